//! # Live Module Tracker
//!
//! Follows the dynamic loader's rendezvous protocol to find every shared
//! object mapped in a running process.
//!
//! ## How it works
//!
//! 1. The main executable is loaded first. Its `_DYNAMIC` symbol gives the
//!    run-time address of the dynamic section.
//! 2. The dynamic section is scanned for the `DT_DEBUG` tag, whose value the
//!    loader fills in with the address of its `r_debug` structure.
//! 3. `r_debug.r_map` heads the link map, a doubly linked list of
//!    `link_map` nodes (`l_addr`, `l_name`, `l_ld`, `l_next`, `l_prev`).
//!    Each node names one mapped object and its load bias.
//! 4. `r_debug.r_brk` is a function the loader calls before and after every
//!    change to the list. One breakpoint there turns each `dlopen` into a
//!    [`ModuleTracker::on_rendezvous_hit`] call, which re-walks the list.
//!
//! ## States
//!
//! ```text
//! Uninitialized --attach--> Attached --breakpoint planted--> Tracking
//!        ^                                                      |
//!        +---------------------- detach ------------------------+
//! ```
//!
//! A failed walk only fails that walk; modules already loaded stay loaded and
//! the tracker keeps its state.

use std::collections::HashSet;
use std::path::PathBuf;

use gimli::RunTimeEndian;
use tracing::{debug, info, trace, warn};

use crate::breakpoints::BreakpointId;
use crate::config::SessionConfig;
use crate::error::{Result, SymscopeError};
use crate::events::{TrackerEvent, TrackerEventSender};
use crate::loader::ModuleLoader;
use crate::symbols::{ImageDescriptor, ImageLayout, ImageSource, ModuleId, ModuleKind};
use crate::target::Target;
use crate::types::Address;

/// Terminates the dynamic section.
pub const DT_NULL: u64 = 0;
/// Holds the address of `r_debug` once the loader has run.
pub const DT_DEBUG: u64 = 21;
/// Start of the OS-specific tag range.
pub const DT_LOOS: u64 = 0x6000_000d;
/// Last OS-specific tag (GNU extensions live at the top of this range).
pub const DT_HIOS: u64 = 0x6fff_ffff;
/// Start of the processor-specific tag range.
pub const DT_LOPROC: u64 = 0x7000_0000;
/// Last processor-specific tag.
pub const DT_HIPROC: u64 = 0x7fff_ffff;
/// Generic tags are numbered below this.
const DT_GENERIC_LIMIT: u64 = 0x40;

/// Chunk size used when reading path names from the target.
const NAME_CHUNK: usize = 64;

/// Where the tracker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState
{
    /// Nothing located yet.
    Uninitialized,
    /// `r_debug` located and walked once; no breakpoint planted.
    Attached,
    /// The rendezvous breakpoint is planted; hits trigger rescans.
    Tracking,
}

/// `r_debug.r_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState
{
    /// `RT_CONSISTENT`: the list is stable.
    Consistent,
    /// `RT_ADD`: an object is being added.
    Add,
    /// `RT_DELETE`: an object is being removed.
    Delete,
    Unknown(u32),
}

impl From<u32> for LoaderState
{
    fn from(value: u32) -> Self
    {
        match value {
            0 => Self::Consistent,
            1 => Self::Add,
            2 => Self::Delete,
            other => Self::Unknown(other),
        }
    }
}

/// The fields of `r_debug` the tracker uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendezvousHeader
{
    pub map: Address,
    pub brk: Address,
    pub state: LoaderState,
}

/// One decoded `link_map` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkMapNode
{
    addr: u64,
    name: u64,
    next: u64,
    prev: u64,
}

/// Outcome of one walk over the link map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary
{
    /// Nodes visited, including skipped ones.
    pub visited: usize,
    /// Modules loaded by this walk.
    pub loaded: Vec<ModuleId>,
    /// (path, bias) pairs already in the store, whether seen by an earlier
    /// walk or loaded directly through the session.
    pub already_known: usize,
}

/// Pointer width and byte order of the debuggee plus the `r_debug` address.
#[derive(Debug, Clone, Copy)]
struct Rendezvous
{
    address: Address,
    width: u8,
    endian: RunTimeEndian,
}

impl Rendezvous
{
    fn field(&self, index: u64) -> Address
    {
        Address::from(self.address.value().wrapping_add(index * u64::from(self.width)))
    }
}

/// State machine that discovers shared objects in a live process.
pub struct ModuleTracker
{
    state: TrackerState,
    rendezvous: Option<Rendezvous>,
    breakpoint: Option<BreakpointId>,
    known: HashSet<(PathBuf, u64)>,
    events: Option<TrackerEventSender>,
}

impl Default for ModuleTracker
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl ModuleTracker
{
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            state: TrackerState::Uninitialized,
            rendezvous: None,
            breakpoint: None,
            known: HashSet::new(),
            events: None,
        }
    }

    /// Publish [`TrackerEvent`]s on `sender`.
    #[must_use]
    pub fn with_events(mut self, sender: TrackerEventSender) -> Self
    {
        self.events = Some(sender);
        self
    }

    pub fn state(&self) -> TrackerState
    {
        self.state
    }

    /// Address of `r_debug`, once located.
    pub fn rendezvous_address(&self) -> Option<Address>
    {
        self.rendezvous.map(|r| r.address)
    }

    /// Breakpoint planted on `r_brk`, if any.
    pub fn breakpoint(&self) -> Option<BreakpointId>
    {
        self.breakpoint
    }

    /// Whether a stop at `id` should be routed to [`Self::on_rendezvous_hit`].
    pub fn is_rendezvous_breakpoint(&self, id: BreakpointId) -> bool
    {
        self.breakpoint == Some(id)
    }

    /// Locate `r_debug` from the already loaded main executable, walk the
    /// link map once and plant the rendezvous breakpoint.
    ///
    /// ## Errors
    ///
    /// - [`SymscopeError::InvalidState`] if already attached
    /// - [`SymscopeError::SymbolNotFound`] if the executable has neither the
    ///   rendezvous symbol nor a `.dynamic` section
    /// - [`SymscopeError::RendezvousUnavailable`] if the dynamic section has no
    ///   usable `DT_DEBUG` entry
    /// - a memory-read failure of the `r_debug` header; the tracker stays
    ///   `Uninitialized` and `attach` may be called again
    /// - a memory-read failure of the initial walk; the breakpoint is still
    ///   planted so the next hit rescans
    pub fn attach(
        &mut self,
        target: &mut dyn Target,
        loader: &mut ModuleLoader<'_>,
        source: &dyn ImageSource,
        executable: ModuleId,
        config: &SessionConfig,
    ) -> Result<WalkSummary>
    {
        if self.state != TrackerState::Uninitialized {
            return Err(SymscopeError::InvalidState("module tracker is already attached".to_string()));
        }

        let (dynamic, layout) = locate_dynamic(loader, executable, config)?;
        let address = find_debug_entry(target, dynamic, &layout, config)?;
        if address.value() == 0 {
            return Err(SymscopeError::RendezvousUnavailable(
                "DT_DEBUG is still zero; the dynamic loader has not run yet".to_string(),
            ));
        }
        let rendezvous = Rendezvous {
            address,
            width: layout.address_size,
            endian: layout.endian,
        };
        self.rendezvous = Some(rendezvous);
        let header = match self.read_header(target) {
            Ok(header) => header,
            Err(err) => {
                self.rendezvous = None;
                return Err(err);
            }
        };
        self.state = TrackerState::Attached;
        info!(r_debug = %address, "located dynamic loader rendezvous");

        if let Some(module) = loader.store().module(executable) {
            self.known.insert((module.path().to_path_buf(), module.bias()));
        }

        let summary = self.walk(target, loader, source, &header, config);

        if header.brk.value() != 0 {
            match target.set_breakpoint(header.brk) {
                Ok(id) => {
                    self.breakpoint = Some(id);
                    self.state = TrackerState::Tracking;
                    info!(breakpoint = %id, address = %header.brk, "tracking dynamic loads");
                    self.emit(TrackerEvent::BreakpointInstalled {
                        id,
                        address: header.brk,
                    });
                }
                Err(SymscopeError::Unsupported(reason)) => {
                    warn!("cannot plant rendezvous breakpoint ({reason}); later loads will not be observed");
                }
                Err(err) => return Err(err),
            }
        }

        summary
    }

    /// React to the target stopping on the rendezvous breakpoint.
    ///
    /// Re-walks the link map and loads pairs not seen before. Removals are
    /// reported as [`TrackerEvent::UnloadIgnored`] and otherwise ignored.
    ///
    /// ## Errors
    ///
    /// [`SymscopeError::InvalidState`] when not tracking; otherwise the
    /// memory-read failure that aborted this rescan.
    pub fn on_rendezvous_hit(
        &mut self,
        target: &mut dyn Target,
        loader: &mut ModuleLoader<'_>,
        source: &dyn ImageSource,
        config: &SessionConfig,
    ) -> Result<WalkSummary>
    {
        if self.state != TrackerState::Tracking {
            return Err(SymscopeError::InvalidState(format!(
                "rendezvous hit delivered while {:?}",
                self.state
            )));
        }

        let result = self
            .read_header(target)
            .and_then(|header| {
                debug!(state = ?header.state, "rendezvous breakpoint hit");
                if header.state == LoaderState::Delete {
                    self.emit(TrackerEvent::UnloadIgnored);
                }
                self.walk(target, loader, source, &header, config)
            });

        if let Err(err) = &result {
            warn!("module rescan aborted: {err}");
            self.emit(TrackerEvent::RescanAborted { reason: err.to_string() });
        }
        result
    }

    /// Forget everything; the next [`Self::attach`] starts from scratch.
    pub fn detach(&mut self)
    {
        self.state = TrackerState::Uninitialized;
        self.rendezvous = None;
        self.breakpoint = None;
        self.known.clear();
    }

    fn emit(&self, event: TrackerEvent)
    {
        if let Some(sender) = &self.events {
            trace!(event = %event.describe(), "tracker event");
            // A dropped receiver only means nobody is listening.
            let _ = sender.send(event);
        }
    }

    fn rendezvous(&self) -> Result<Rendezvous>
    {
        self.rendezvous
            .ok_or_else(|| SymscopeError::InvalidState("rendezvous structure not located".to_string()))
    }

    /// Read `r_map`, `r_brk` and `r_state`.
    fn read_header(&self, target: &mut dyn Target) -> Result<RendezvousHeader>
    {
        let r = self.rendezvous()?;
        let map = target.read_word(r.field(1), r.width, r.endian)?;
        let brk = target.read_word(r.field(2), r.width, r.endian)?;
        let state = target.read_word(r.field(3), 4, r.endian)?;
        Ok(RendezvousHeader {
            map: Address::from(map),
            brk: Address::from(brk),
            state: LoaderState::from(u32::try_from(state).unwrap_or(u32::MAX)),
        })
    }

    fn read_node(&self, target: &mut dyn Target, at: Address) -> Result<LinkMapNode>
    {
        let r = self.rendezvous()?;
        let width = u64::from(r.width);
        let base = at.value();
        let mut word = |index: u64| target.read_word(Address::from(base.wrapping_add(index * width)), r.width, r.endian);
        Ok(LinkMapNode {
            addr: word(0)?,
            name: word(1)?,
            next: word(3)?,
            prev: word(4)?,
        })
    }

    fn walk(
        &mut self,
        target: &mut dyn Target,
        loader: &mut ModuleLoader<'_>,
        source: &dyn ImageSource,
        header: &RendezvousHeader,
        config: &SessionConfig,
    ) -> Result<WalkSummary>
    {
        let mut summary = WalkSummary::default();
        let mut cursor = header.map.value();

        while cursor != 0 {
            if summary.visited >= config.max_link_map_entries {
                return Err(SymscopeError::InvalidState(format!(
                    "link map longer than {} entries",
                    config.max_link_map_entries
                )));
            }
            summary.visited += 1;

            let node = self.read_node(target, Address::from(cursor))?;
            cursor = node.next;

            // The head node describes the executable itself.
            if node.prev == 0 || node.name == 0 {
                continue;
            }
            let path = read_path(target, Address::from(node.name), config.max_path_length)?;
            if path.is_empty() {
                continue;
            }

            let key = (PathBuf::from(&path), node.addr);
            if self.known.contains(&key) {
                summary.already_known += 1;
                continue;
            }

            let report = loader.load(
                &ImageDescriptor::new(key.0.clone(), key.1),
                source,
                Some(ModuleKind::SharedObject),
            );
            if report.newly_loaded {
                self.emit(TrackerEvent::ModuleLoaded {
                    module: report.module,
                    path: key.0.clone(),
                    bias: key.1,
                    status: report.status,
                });
                summary.loaded.push(report.module);
            } else {
                summary.already_known += 1;
            }
            self.known.insert(key);
        }

        debug!(
            visited = summary.visited,
            loaded = summary.loaded.len(),
            known = summary.already_known,
            "link map walk finished"
        );
        Ok(summary)
    }
}

/// Run-time address of the executable's dynamic section and its layout.
fn locate_dynamic(
    loader: &ModuleLoader<'_>,
    executable: ModuleId,
    config: &SessionConfig,
) -> Result<(Address, ImageLayout)>
{
    let store = loader.store();
    let module = store
        .module(executable)
        .ok_or_else(|| SymscopeError::InvalidArgument(format!("no module #{}", executable.index())))?;
    let layout = module.layout();

    if let Some(symbol) = store.lookup_in(executable, &config.rendezvous_symbol).and_then(|id| store.symbol(id)) {
        return Ok((symbol.address, layout));
    }
    if let Some(address) = layout.dynamic_address {
        debug!(symbol = %config.rendezvous_symbol, "symbol missing; using the .dynamic section address");
        return Ok((address, layout));
    }
    Err(SymscopeError::SymbolNotFound(config.rendezvous_symbol.clone()))
}

/// Whether `tag` is one the dynamic section may legitimately contain.
pub fn is_valid_dynamic_tag(tag: u64) -> bool
{
    tag < DT_GENERIC_LIMIT || (DT_LOOS..=DT_HIOS).contains(&tag) || (DT_LOPROC..=DT_HIPROC).contains(&tag)
}

/// Scan the dynamic section at `dynamic` for `DT_DEBUG` and return its value.
fn find_debug_entry(
    target: &mut dyn Target,
    dynamic: Address,
    layout: &ImageLayout,
    config: &SessionConfig,
) -> Result<Address>
{
    let width = u64::from(layout.address_size);
    for index in 0..config.max_link_map_entries as u64 {
        let entry = dynamic.value().wrapping_add(index * 2 * width);
        let tag = target.read_word(Address::from(entry), layout.address_size, layout.endian)?;
        match tag {
            DT_DEBUG => {
                let value =
                    target.read_word(Address::from(entry.wrapping_add(width)), layout.address_size, layout.endian)?;
                return Ok(Address::from(value));
            }
            DT_NULL => {
                return Err(SymscopeError::RendezvousUnavailable(
                    "dynamic section has no DT_DEBUG entry".to_string(),
                ));
            }
            tag if !is_valid_dynamic_tag(tag) => {
                return Err(SymscopeError::RendezvousUnavailable(format!(
                    "invalid dynamic tag 0x{tag:x} at {}",
                    Address::from(entry)
                )));
            }
            _ => {}
        }
    }
    Err(SymscopeError::RendezvousUnavailable(format!(
        "no DT_DEBUG within {} dynamic entries",
        config.max_link_map_entries
    )))
}

/// Read a NUL-terminated path in fixed chunks.
fn read_path(target: &mut dyn Target, at: Address, limit: usize) -> Result<String>
{
    let mut bytes = Vec::new();
    while bytes.len() < limit {
        let chunk_len = NAME_CHUNK.min(limit - bytes.len());
        let chunk = target.read_memory(Address::from(at.value().wrapping_add(bytes.len() as u64)), chunk_len)?;
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            bytes.extend_from_slice(&chunk[..nul]);
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        bytes.extend_from_slice(&chunk);
    }
    Err(SymscopeError::InvalidState(format!("path at {at} longer than {limit} bytes")))
}
