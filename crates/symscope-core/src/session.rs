//! # Session
//!
//! One attach/detach cycle: the type arena, include registry, typedef cache and
//! symbol store, plus the module tracker that feeds them.
//!
//! Nothing here is global. Two sessions never share types or symbols, and
//! [`Session::detach`] drops everything the session learned.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use symscope_core::symbols::{FsImageSource, ImageDescriptor};
//! use symscope_core::{Session, SessionConfig};
//!
//! let mut session = Session::new(SessionConfig::from_env());
//! let report = session.load_executable(&ImageDescriptor::new("/usr/bin/demo", 0), &FsImageSource);
//! println!("{} symbols ({})", session.store().symbol_count(), report.status);
//! ```

use tracing::info;

use crate::config::SessionConfig;
use crate::error::{Result, SymscopeError};
use crate::events::TrackerEventSender;
use crate::loader::{LoadReport, ModuleLoader};
use crate::stabs::{TypeNode, TypeStore};
use crate::symbols::{ImageDescriptor, ImageSource, ModuleId, ModuleKind, Symbol, SymbolStore};
use crate::target::Target;
use crate::tracker::{ModuleTracker, WalkSummary};

/// Per-debuggee context owning every store this crate writes to.
pub struct Session
{
    config: SessionConfig,
    types: TypeStore,
    store: SymbolStore,
    tracker: ModuleTracker,
    executable: Option<ModuleId>,
}

impl Default for Session
{
    fn default() -> Self
    {
        Self::new(SessionConfig::default())
    }
}

impl Session
{
    #[must_use]
    pub fn new(config: SessionConfig) -> Self
    {
        Self {
            config,
            types: TypeStore::new(),
            store: SymbolStore::new(),
            tracker: ModuleTracker::new(),
            executable: None,
        }
    }

    pub fn config(&self) -> &SessionConfig
    {
        &self.config
    }

    pub fn types(&self) -> &TypeStore
    {
        &self.types
    }

    pub fn store(&self) -> &SymbolStore
    {
        &self.store
    }

    pub fn tracker(&self) -> &ModuleTracker
    {
        &self.tracker
    }

    /// Main executable, once loaded through [`Self::load_executable`].
    pub fn executable(&self) -> Option<ModuleId>
    {
        self.executable
    }

    /// Publish tracker events on `sender` from now on.
    pub fn set_event_sender(&mut self, sender: TrackerEventSender)
    {
        let tracker = std::mem::take(&mut self.tracker);
        self.tracker = tracker.with_events(sender);
    }

    /// Load one image. Never fails; problems end up in the report's status.
    pub fn load_image(&mut self, descriptor: &ImageDescriptor, source: &dyn ImageSource) -> LoadReport
    {
        ModuleLoader::new(&mut self.types, &mut self.store, &self.config).load(descriptor, source, None)
    }

    /// Load an image already read into memory.
    pub fn load_image_bytes(&mut self, descriptor: &ImageDescriptor, bytes: &[u8]) -> LoadReport
    {
        ModuleLoader::new(&mut self.types, &mut self.store, &self.config).load_bytes(descriptor, bytes, None)
    }

    /// Load the main program; the tracker starts from it.
    pub fn load_executable(&mut self, descriptor: &ImageDescriptor, source: &dyn ImageSource) -> LoadReport
    {
        let report = ModuleLoader::new(&mut self.types, &mut self.store, &self.config).load(
            descriptor,
            source,
            Some(ModuleKind::Executable),
        );
        self.executable = Some(report.module);
        report
    }

    /// Start tracking shared objects in a live process.
    ///
    /// ## Errors
    ///
    /// [`SymscopeError::InvalidState`] if no executable was loaded, otherwise
    /// whatever [`ModuleTracker::attach`] reports.
    pub fn attach_process(&mut self, target: &mut dyn Target, source: &dyn ImageSource) -> Result<WalkSummary>
    {
        let executable = self.executable.ok_or_else(|| {
            SymscopeError::InvalidState("load the main executable before attaching".to_string())
        })?;
        let mut loader = ModuleLoader::new(&mut self.types, &mut self.store, &self.config);
        self.tracker.attach(target, &mut loader, source, executable, &self.config)
    }

    /// Deliver a stop on the rendezvous breakpoint.
    ///
    /// ## Errors
    ///
    /// See [`ModuleTracker::on_rendezvous_hit`].
    pub fn on_rendezvous_hit(&mut self, target: &mut dyn Target, source: &dyn ImageSource) -> Result<WalkSummary>
    {
        let mut loader = ModuleLoader::new(&mut self.types, &mut self.store, &self.config);
        self.tracker.on_rendezvous_hit(target, &mut loader, source, &self.config)
    }

    /// Type node of a symbol, following forwards; `None` if untyped or left null.
    pub fn symbol_type(&self, symbol: &Symbol) -> Option<&TypeNode>
    {
        let node = self.types.node(symbol.type_ref?)?;
        (!node.is_null()).then_some(node)
    }

    /// Drop all modules, symbols and types.
    pub fn detach(&mut self)
    {
        info!(modules = self.store.module_count(), "detaching session");
        self.types = TypeStore::new();
        self.store = SymbolStore::new();
        self.tracker.detach();
        self.executable = None;
    }
}
