//! # Module Loader
//!
//! Maps one binary image into the session: registers the [`Module`], runs the
//! stab parser over `.stab`/`.stabstr`, then merges the plain linker symbol
//! tables.
//!
//! Loading never fails as a whole. Every problem (unreadable file, unknown
//! format, include overflow) becomes the module's [`DebugInfoStatus`] plus
//! diagnostics, so one bad image cannot stop the images after it.
//!
//! [`Module`]: crate::symbols::Module

use std::borrow::Cow;

use gimli::{EndianSlice, Reader, RunTimeEndian, SectionId};
use object::{BinaryFormat, Object, ObjectSection, ObjectSegment};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SymscopeError};
use crate::stabs::{StabsBuilder, TypeStore};
use crate::symbols::linker::{merge_linker_symbols, MergeStats};
use crate::symbols::{
    DebugInfoStatus, Diagnostic, DiagnosticKind, ImageDescriptor, ImageLayout, ImageSource, ModuleId, ModuleKind,
    SymbolStore,
};
use crate::types::Address;

/// Section holding the stab records.
pub const STAB_SECTION: &str = ".stab";
/// Section holding the stab strings.
pub const STABSTR_SECTION: &str = ".stabstr";

/// What happened when an image was loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport
{
    pub module: ModuleId,
    pub status: DebugInfoStatus,
    /// `false` when the (path, bias) pair was already registered and nothing was parsed.
    pub newly_loaded: bool,
    /// Stab entries dispatched.
    pub stab_entries: usize,
    pub linker: MergeStats,
    /// Diagnostics recorded against the module by this load.
    pub diagnostics: usize,
}

/// Loads images into a session's stores.
pub struct ModuleLoader<'s>
{
    types: &'s mut TypeStore,
    store: &'s mut SymbolStore,
    config: &'s SessionConfig,
}

impl<'s> ModuleLoader<'s>
{
    pub fn new(types: &'s mut TypeStore, store: &'s mut SymbolStore, config: &'s SessionConfig) -> Self
    {
        Self { types, store, config }
    }

    /// The store modules are registered in.
    pub fn store(&self) -> &SymbolStore
    {
        self.store
    }

    /// Load the image described by `descriptor`, reading it through `source`.
    ///
    /// `kind_hint` overrides the kind derived from the ELF header. The
    /// session uses it to mark the main executable.
    pub fn load(
        &mut self,
        descriptor: &ImageDescriptor,
        source: &dyn ImageSource,
        kind_hint: Option<ModuleKind>,
    ) -> LoadReport
    {
        if let Some(existing) = self.already_loaded(descriptor) {
            return existing;
        }

        match source.read_image(&descriptor.path) {
            Ok(bytes) => self.load_bytes(descriptor, &bytes, kind_hint),
            Err(err) => self.failed(descriptor, kind_hint, DiagnosticKind::Io, &err),
        }
    }

    /// Load an image whose bytes are already in memory.
    pub fn load_bytes(&mut self, descriptor: &ImageDescriptor, bytes: &[u8], kind_hint: Option<ModuleKind>)
        -> LoadReport
    {
        if let Some(existing) = self.already_loaded(descriptor) {
            return existing;
        }

        let file = match object::File::parse(bytes) {
            Ok(file) if file.format() == BinaryFormat::Elf => file,
            Ok(file) => {
                let err = SymscopeError::InvalidImage(format!("{:?} images are not supported", file.format()));
                return self.failed(descriptor, kind_hint, DiagnosticKind::Io, &err);
            }
            Err(err) => return self.failed(descriptor, kind_hint, DiagnosticKind::Io, &err.into()),
        };

        let mut diagnostics = Vec::new();
        let e_type = elf_type(bytes, &file);
        let kind = kind_hint.unwrap_or_else(|| classify(e_type, &file));

        let mut bias = descriptor.load_bias;
        if e_type == Some(object::elf::ET_EXEC) && bias != 0 {
            let message = format!(
                "non-relocatable image {} given load bias 0x{bias:x}; assuming the bias is corrupt and using 0",
                descriptor.path.display()
            );
            warn!("{message}");
            diagnostics.push(Diagnostic::new(DiagnosticKind::Relocation, message));
            bias = 0;
        }

        let (link_start, size) = image_extent(&file);
        let (module, created) = self.store.add_module(descriptor.path.clone(), bias, size, kind);
        if !created {
            return self.report_existing(module);
        }
        self.store.set_extent(module, Address::from(link_start).biased(bias), size);

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        self.store.set_layout(
            module,
            ImageLayout {
                address_size: if file.is_64() { 8 } else { 4 },
                endian,
                dynamic_address: file
                    .section_by_name(".dynamic")
                    .map(|section| Address::from(section.address()).biased(bias)),
            },
        );

        let mut failed = false;
        let mut stab_entries = 0;
        let mut not_supported = false;

        match stab_sections(&file) {
            Ok(Some((stabs, strings))) => {
                let mut builder = StabsBuilder::new(
                    &mut *self.types,
                    &mut *self.store,
                    module,
                    bias,
                    self.config.max_include_depth,
                );
                let outcome = builder.run(&stabs, &strings, endian);
                diagnostics.extend(builder.into_diagnostics());
                match outcome {
                    Ok(entries) => stab_entries = entries,
                    Err(err) => {
                        warn!(module = %descriptor.path.display(), "stab parsing abandoned: {err}");
                        failed = true;
                    }
                }
            }
            Ok(None) => {
                let dwarf = SectionId::DebugInfo.name();
                if file.section_by_name(dwarf).is_some() {
                    info!(module = %descriptor.path.display(), "found {dwarf}; that debug format is not handled");
                    not_supported = true;
                }
            }
            Err(err) => {
                diagnostics.push(Diagnostic::new(DiagnosticKind::Format, err.to_string()));
                failed = true;
            }
        }

        let linker = if self.config.merge_linker_symbols {
            merge_linker_symbols(&file, &mut *self.store, module, bias)
        } else {
            MergeStats::default()
        };

        let status = if failed {
            DebugInfoStatus::Error
        } else if stab_entries > 0 {
            DebugInfoStatus::Loaded
        } else if not_supported {
            DebugInfoStatus::NotSupported
        } else if linker.found_symbols() {
            DebugInfoStatus::Loaded
        } else {
            DebugInfoStatus::NoInfo
        };

        let diagnostic_count = diagnostics.len();
        self.store.set_status(module, status);
        self.store.extend_diagnostics(module, diagnostics);

        info!(
            module = %descriptor.path.display(),
            bias = format_args!("0x{bias:x}"),
            %status,
            stab_entries,
            linker_added = linker.added,
            diagnostics = diagnostic_count,
            "module loaded"
        );

        LoadReport {
            module,
            status,
            newly_loaded: true,
            stab_entries,
            linker,
            diagnostics: diagnostic_count,
        }
    }

    fn already_loaded(&self, descriptor: &ImageDescriptor) -> Option<LoadReport>
    {
        let module = self.store.find_module(&descriptor.path, descriptor.load_bias)?;
        debug!(module = %descriptor.path.display(), "module already loaded");
        Some(self.report_existing(module))
    }

    fn report_existing(&self, module: ModuleId) -> LoadReport
    {
        let status = self.store.module(module).map_or(DebugInfoStatus::Error, |m| m.status());
        LoadReport {
            module,
            status,
            newly_loaded: false,
            stab_entries: 0,
            linker: MergeStats::default(),
            diagnostics: 0,
        }
    }

    fn failed(
        &mut self,
        descriptor: &ImageDescriptor,
        kind_hint: Option<ModuleKind>,
        kind: DiagnosticKind,
        err: &SymscopeError,
    ) -> LoadReport
    {
        warn!(module = %descriptor.path.display(), "cannot load image: {err}");
        let (module, _) = self.store.add_module(
            descriptor.path.clone(),
            descriptor.load_bias,
            0,
            kind_hint.unwrap_or(ModuleKind::SharedObject),
        );
        self.store.set_status(module, DebugInfoStatus::Error);
        self.store.extend_diagnostics(module, [Diagnostic::new(kind, err.to_string())]);
        LoadReport {
            module,
            status: DebugInfoStatus::Error,
            newly_loaded: true,
            stab_entries: 0,
            linker: MergeStats::default(),
            diagnostics: 1,
        }
    }
}

/// `.stab` and `.stabstr` contents, if the image has both.
fn stab_sections<'data>(file: &object::File<'data>) -> Result<Option<(Cow<'data, [u8]>, Cow<'data, [u8]>)>>
{
    let Some(stab) = file.section_by_name(STAB_SECTION) else {
        return Ok(None);
    };
    let strings = file.section_by_name(STABSTR_SECTION).ok_or_else(|| {
        SymscopeError::InvalidImage(format!("{STAB_SECTION} present without {STABSTR_SECTION}"))
    })?;

    let stab = stab
        .uncompressed_data()
        .map_err(|err| SymscopeError::InvalidImage(format!("failed to read {STAB_SECTION}: {err}")))?;
    let strings = strings
        .uncompressed_data()
        .map_err(|err| SymscopeError::InvalidImage(format!("failed to read {STABSTR_SECTION}: {err}")))?;
    Ok(Some((stab, strings)))
}

/// `e_type` from the ELF header.
fn elf_type(bytes: &[u8], file: &object::File<'_>) -> Option<u16>
{
    let endian = if file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };
    let mut reader = EndianSlice::new(bytes.get(16..18)?, endian);
    reader.read_u16().ok()
}

/// Executables are `ET_EXEC`, or `ET_DYN` with an interpreter (position-independent executables).
fn classify(e_type: Option<u16>, file: &object::File<'_>) -> ModuleKind
{
    match e_type {
        Some(object::elf::ET_EXEC) => ModuleKind::Executable,
        Some(object::elf::ET_DYN) if file.section_by_name(".interp").is_some() => ModuleKind::Executable,
        _ => ModuleKind::SharedObject,
    }
}

/// Lowest link-time address and span of the loadable segments, or of the
/// allocated sections when there are none.
fn image_extent(file: &object::File<'_>) -> (u64, u64)
{
    let spans: Vec<(u64, u64)> = if file.segments().next().is_some() {
        file.segments()
            .filter(|segment| segment.size() > 0)
            .map(|segment| (segment.address(), segment.address().saturating_add(segment.size())))
            .collect()
    } else {
        file.sections()
            .filter(|section| section.address() != 0 && section.size() > 0)
            .map(|section| (section.address(), section.address().saturating_add(section.size())))
            .collect()
    };

    let start = spans.iter().map(|(start, _)| *start).min().unwrap_or(0);
    let end = spans.iter().map(|(_, end)| *end).max().unwrap_or(0);
    (start, end.saturating_sub(start))
}
