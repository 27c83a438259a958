//! # Symbol Store
//!
//! The sink every debug-info source writes into: modules, functions, data
//! symbols, locals and line entries.
//!
//! The store is additive. Symbols are never removed, only annotated (a size
//! learned from the linker table, an address resolved for a global whose stab
//! carried none). Adding a symbol whose (name, address) is already present
//! returns the existing entry, which is the only discipline the two writers
//! (the stab parser and the linker-table merger) rely on.
//!
//! ## Usage
//!
//! ```rust
//! use symscope_core::symbols::{ModuleKind, NewSymbol, SymbolKind, SymbolStore};
//! use symscope_core::types::Address;
//!
//! let mut store = SymbolStore::new();
//! let (module, _) = store.add_module("/bin/true".into(), 0, 0x1000, ModuleKind::Executable);
//! let main = store.add_symbol(NewSymbol::new("main", Address::from(0x1040), SymbolKind::Function, module));
//! assert_eq!(store.find("main", Address::from(0x1040)), Some(main));
//! ```

pub mod demangle;
pub mod image;
pub mod linker;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use gimli::RunTimeEndian;
use smallvec::SmallVec;
use tracing::trace;

use self::demangle::make_symbol_name;
use crate::error::{Result, SymscopeError};
use crate::stabs::typetable::TypeRef;
use crate::types::{Address, SymbolName};

pub use image::{FsImageSource, ImageDescriptor, ImageSource};

/// Index of a module in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

impl ModuleId
{
    pub fn index(self) -> usize
    {
        self.0
    }
}

/// Index of a symbol in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(usize);

impl SymbolId
{
    pub fn index(self) -> usize
    {
        self.0
    }
}

/// Whether an image is the main program or a shared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind
{
    Executable,
    SharedObject,
}

impl fmt::Display for ModuleKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ModuleKind::Executable => write!(f, "executable"),
            ModuleKind::SharedObject => write!(f, "shared object"),
        }
    }
}

/// Outcome of loading a module's debug information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugInfoStatus
{
    /// Stab records (or, failing that, linker symbols) were parsed.
    Loaded,
    /// Neither debug records nor a usable symbol table were found.
    NoInfo,
    /// The image carries debug info in a format we recognize but do not parse.
    NotSupported,
    /// The image could not be read, or parsing was abandoned.
    Error,
}

impl fmt::Display for DebugInfoStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            DebugInfoStatus::Loaded => "loaded",
            DebugInfoStatus::NoInfo => "no symbols",
            DebugInfoStatus::NotSupported => "unsupported debug format",
            DebugInfoStatus::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Category of a problem found while loading a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind
{
    /// Unknown tag or malformed body in a type definition.
    Grammar,
    /// Record kind we do not handle.
    UnknownRecord,
    /// Broken section or string-table layout.
    Format,
    /// Too many include files in one compilation unit.
    IncludeOverflow,
    /// Load bias ignored or symbol address fixed up.
    Relocation,
    /// The image could not be opened or parsed.
    Io,
}

/// A problem recorded against a module. Also logged through `tracing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic
{
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic
{
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self
    {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Facts about an image's binary layout needed to read its structures in target memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout
{
    /// Pointer size in bytes (4 or 8).
    pub address_size: u8,
    pub endian: RunTimeEndian,
    /// Run-time address of the `.dynamic` section, if the image has one.
    pub dynamic_address: Option<Address>,
}

impl Default for ImageLayout
{
    fn default() -> Self
    {
        Self {
            address_size: 8,
            endian: RunTimeEndian::Little,
            dynamic_address: None,
        }
    }
}

/// One loaded image.
#[derive(Debug, Clone)]
pub struct Module
{
    path: PathBuf,
    bias: u64,
    start: Address,
    size: u64,
    kind: ModuleKind,
    layout: ImageLayout,
    status: DebugInfoStatus,
    sources: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl Module
{
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Difference between run-time and link-time addresses.
    pub fn bias(&self) -> u64
    {
        self.bias
    }

    /// Lowest run-time address the image maps.
    pub fn start(&self) -> Address
    {
        self.start
    }

    pub fn size(&self) -> u64
    {
        self.size
    }

    pub fn kind(&self) -> ModuleKind
    {
        self.kind
    }

    pub fn status(&self) -> DebugInfoStatus
    {
        self.status
    }

    pub fn layout(&self) -> ImageLayout
    {
        self.layout
    }

    /// Compilation-unit source paths seen in the stab stream, in order.
    pub fn sources(&self) -> &[String]
    {
        &self.sources
    }

    pub fn diagnostics(&self) -> &[Diagnostic]
    {
        &self.diagnostics
    }

    /// Whether a run-time address falls inside the module's mapped range.
    pub fn contains(&self, address: Address) -> bool
    {
        address.offset_from(self.start).is_some_and(|offset| offset < self.size)
    }
}

/// Function or data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind
{
    Function,
    Data,
}

/// Where a local variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage
{
    /// Offset from the frame base.
    FrameOffset(i64),
    /// Register number.
    Register(u32),
}

impl Storage
{
    /// Build from the raw pair a record yields.
    ///
    /// `register_slot` is the register number plus one so that register 0
    /// can be told apart from "not in a register"; zero means the variable
    /// lives at `frame_offset`.
    pub fn from_fields(frame_offset: i64, register_slot: u32) -> Self
    {
        if register_slot == 0 {
            Storage::FrameOffset(frame_offset)
        } else {
            Storage::Register(register_slot - 1)
        }
    }
}

/// A parameter or local variable of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable
{
    pub name: String,
    pub storage: Storage,
    pub type_ref: Option<TypeRef>,
    pub is_parameter: bool,
}

/// Maps a function-relative offset to a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LineNumberEntry
{
    pub offset: u64,
    pub line: u32,
}

/// Locals and line table owned by a function symbol.
#[derive(Debug, Clone, Default)]
pub struct FunctionBody
{
    pub locals: Vec<LocalVariable>,
    pub lines: Vec<LineNumberEntry>,
    /// Set once the line table has been sorted and deduplicated.
    pub normalized: bool,
}

/// A function or data symbol.
#[derive(Debug, Clone)]
pub struct Symbol
{
    pub name: SymbolName,
    pub address: Address,
    pub kind: SymbolKind,
    pub module: ModuleId,
    /// Source file for file-local symbols.
    pub source: Option<String>,
    pub type_ref: Option<TypeRef>,
    pub size: Option<u64>,
    /// Present for functions created from stab records.
    pub body: Option<FunctionBody>,
    /// The stab carried no address; the linker table is expected to supply it.
    pub pending_address: bool,
}

impl Symbol
{
    /// Whether `address` lies within this symbol's extent.
    pub fn covers(&self, address: Address) -> bool
    {
        match (address.offset_from(self.address), self.size) {
            (Some(offset), Some(size)) => offset < size,
            (Some(0), None) => true,
            _ => false,
        }
    }
}

/// Arguments for [`SymbolStore::add_symbol`].
#[derive(Debug, Clone)]
pub struct NewSymbol
{
    pub name: String,
    pub address: Address,
    pub kind: SymbolKind,
    pub module: ModuleId,
    pub source: Option<String>,
    pub type_ref: Option<TypeRef>,
    pub size: Option<u64>,
    pub with_body: bool,
    pub pending_address: bool,
}

impl NewSymbol
{
    pub fn new(name: impl Into<String>, address: Address, kind: SymbolKind, module: ModuleId) -> Self
    {
        Self {
            name: name.into(),
            address,
            kind,
            module,
            source: None,
            type_ref: None,
            size: None,
            with_body: false,
            pending_address: false,
        }
    }

    #[must_use]
    pub fn source(mut self, source: Option<String>) -> Self
    {
        self.source = source;
        self
    }

    #[must_use]
    pub fn type_ref(mut self, type_ref: Option<TypeRef>) -> Self
    {
        self.type_ref = type_ref;
        self
    }

    #[must_use]
    pub fn size(mut self, size: Option<u64>) -> Self
    {
        self.size = size;
        self
    }

    /// Give the symbol an (empty) list of locals and lines.
    #[must_use]
    pub fn with_body(mut self) -> Self
    {
        self.with_body = true;
        self
    }

    #[must_use]
    pub fn pending_address(mut self) -> Self
    {
        self.pending_address = true;
        self
    }
}

/// Every module and symbol known to the session.
#[derive(Debug, Default)]
pub struct SymbolStore
{
    modules: Vec<Module>,
    module_index: HashMap<(PathBuf, u64), ModuleId>,
    symbols: Vec<Symbol>,
    by_key: HashMap<(String, Address), SymbolId>,
    by_name: HashMap<String, SmallVec<[SymbolId; 2]>>,
}

impl SymbolStore
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register a module; a second call with the same (path, bias) returns the first.
    ///
    /// The boolean is `true` when the module was created by this call.
    pub fn add_module(&mut self, path: PathBuf, bias: u64, size: u64, kind: ModuleKind) -> (ModuleId, bool)
    {
        if let Some(id) = self.module_index.get(&(path.clone(), bias)) {
            return (*id, false);
        }
        let id = ModuleId(self.modules.len());
        self.module_index.insert((path.clone(), bias), id);
        self.modules.push(Module {
            path,
            bias,
            start: Address::new(bias),
            size,
            kind,
            layout: ImageLayout::default(),
            status: DebugInfoStatus::NoInfo,
            sources: Vec::new(),
            diagnostics: Vec::new(),
        });
        (id, true)
    }

    pub fn find_module(&self, path: &Path, bias: u64) -> Option<ModuleId>
    {
        self.module_index.get(&(path.to_path_buf(), bias)).copied()
    }

    pub fn module(&self, id: ModuleId) -> Option<&Module>
    {
        self.modules.get(id.0)
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)>
    {
        self.modules.iter().enumerate().map(|(index, module)| (ModuleId(index), module))
    }

    pub fn module_count(&self) -> usize
    {
        self.modules.len()
    }

    /// Module whose mapped range contains `address`.
    pub fn module_for_address(&self, address: Address) -> Option<ModuleId>
    {
        self.modules().find(|(_, module)| module.contains(address)).map(|(id, _)| id)
    }

    pub(crate) fn set_status(&mut self, id: ModuleId, status: DebugInfoStatus)
    {
        if let Some(module) = self.modules.get_mut(id.0) {
            module.status = status;
        }
    }

    /// Record where the image is mapped once its segments are known.
    pub(crate) fn set_extent(&mut self, id: ModuleId, start: Address, size: u64)
    {
        if let Some(module) = self.modules.get_mut(id.0) {
            module.start = start;
            module.size = size;
        }
    }

    pub(crate) fn set_layout(&mut self, id: ModuleId, layout: ImageLayout)
    {
        if let Some(module) = self.modules.get_mut(id.0) {
            module.layout = layout;
        }
    }

    pub(crate) fn push_source(&mut self, id: ModuleId, source: &str)
    {
        if let Some(module) = self.modules.get_mut(id.0) {
            if module.sources.last().map(String::as_str) != Some(source) {
                module.sources.push(source.to_string());
            }
        }
    }

    pub(crate) fn extend_diagnostics(&mut self, id: ModuleId, diagnostics: impl IntoIterator<Item = Diagnostic>)
    {
        if let Some(module) = self.modules.get_mut(id.0) {
            module.diagnostics.extend(diagnostics);
        }
    }

    /// Add a symbol, or return the existing one with the same (name, address).
    pub fn add_symbol(&mut self, new: NewSymbol) -> SymbolId
    {
        let key = (new.name.clone(), new.address);
        if let Some(existing) = self.by_key.get(&key) {
            trace!(symbol = %new.name, address = %new.address, "symbol already present");
            return *existing;
        }

        let id = SymbolId(self.symbols.len());
        self.symbols.push(Symbol {
            name: make_symbol_name(&new.name),
            address: new.address,
            kind: new.kind,
            module: new.module,
            source: new.source,
            type_ref: new.type_ref,
            size: new.size,
            body: new.with_body.then(FunctionBody::default),
            pending_address: new.pending_address,
        });
        self.by_name.entry(new.name).or_default().push(id);
        self.by_key.insert(key, id);
        id
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&Symbol>
    {
        self.symbols.get(id.0)
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)>
    {
        self.symbols.iter().enumerate().map(|(index, symbol)| (SymbolId(index), symbol))
    }

    pub fn symbol_count(&self) -> usize
    {
        self.symbols.len()
    }

    /// Symbols belonging to one module, in insertion order.
    pub fn symbols_in(&self, module: ModuleId) -> impl Iterator<Item = (SymbolId, &Symbol)>
    {
        self.symbols().filter(move |(_, symbol)| symbol.module == module)
    }

    /// Exact (name, address) lookup.
    pub fn find(&self, name: &str, address: Address) -> Option<SymbolId>
    {
        self.by_key.get(&(name.to_string(), address)).copied()
    }

    /// All symbols with a given raw name.
    pub fn lookup(&self, name: &str) -> &[SymbolId]
    {
        self.by_name.get(name).map(|ids| ids.as_slice()).unwrap_or_default()
    }

    /// First symbol named `name` in `module`.
    pub fn lookup_in(&self, module: ModuleId, name: &str) -> Option<SymbolId>
    {
        self.lookup(name).iter().copied().find(|id| self.symbols[id.0].module == module)
    }

    /// Append a local variable to a function.
    ///
    /// ## Errors
    ///
    /// Returns `SymbolNotFound` for an unknown id and `InvalidArgument` for a non-function symbol.
    pub fn add_local(&mut self, function: SymbolId, local: LocalVariable) -> Result<()>
    {
        self.body_mut(function)?.locals.push(local);
        Ok(())
    }

    /// Append a line entry to a function.
    ///
    /// ## Errors
    ///
    /// Returns `SymbolNotFound` for an unknown id and `InvalidArgument` for a non-function symbol.
    pub fn add_line(&mut self, function: SymbolId, entry: LineNumberEntry) -> Result<()>
    {
        let body = self.body_mut(function)?;
        body.lines.push(entry);
        body.normalized = false;
        Ok(())
    }

    /// Sort and deduplicate a function's line table.
    pub fn finalize_function(&mut self, function: SymbolId)
    {
        if let Ok(body) = self.body_mut(function) {
            if !body.normalized {
                body.lines.sort();
                body.lines.dedup();
                body.normalized = true;
            }
        }
    }

    /// Record a byte size for a symbol that has none.
    pub fn annotate_size(&mut self, id: SymbolId, size: u64)
    {
        if let Some(symbol) = self.symbols.get_mut(id.0) {
            if symbol.size.is_none() && size > 0 {
                symbol.size = Some(size);
            }
        }
    }

    /// Symbol named `name` in `module` still waiting for an address.
    pub fn pending_in(&self, module: ModuleId, name: &str) -> Option<SymbolId>
    {
        self.lookup(name)
            .iter()
            .copied()
            .find(|id| self.symbols[id.0].module == module && self.symbols[id.0].pending_address)
    }

    /// Give a pending symbol its real address (and size).
    ///
    /// ## Errors
    ///
    /// Returns `SymbolNotFound` for an unknown id.
    pub fn resolve_pending(&mut self, id: SymbolId, address: Address, size: Option<u64>) -> Result<()>
    {
        let symbol = self
            .symbols
            .get_mut(id.0)
            .ok_or_else(|| SymscopeError::SymbolNotFound(format!("symbol #{}", id.0)))?;
        let raw = symbol.name.raw().to_string();
        let old_key = (raw.clone(), symbol.address);
        symbol.address = address;
        symbol.pending_address = false;
        if symbol.size.is_none() {
            symbol.size = size.filter(|size| *size > 0);
        }
        if self.by_key.get(&old_key) == Some(&id) {
            self.by_key.remove(&old_key);
        }
        self.by_key.entry((raw, address)).or_insert(id);
        Ok(())
    }

    /// Function whose extent contains `address`.
    ///
    /// Functions without a known size only match their first byte.
    pub fn function_at(&self, address: Address) -> Option<SymbolId>
    {
        self.symbols()
            .filter(|(_, symbol)| symbol.kind == SymbolKind::Function && symbol.covers(address))
            .max_by_key(|(_, symbol)| symbol.address)
            .map(|(id, _)| id)
    }

    /// Source line for `address`, from the line table of the function containing it.
    pub fn line_at(&self, address: Address) -> Option<(SymbolId, LineNumberEntry)>
    {
        let id = self.function_at(address)?;
        let symbol = &self.symbols[id.0];
        let offset = address.offset_from(symbol.address)?;
        let body = symbol.body.as_ref()?;
        body.lines
            .iter()
            .filter(|entry| entry.offset <= offset)
            .max_by_key(|entry| entry.offset)
            .map(|entry| (id, *entry))
    }

    fn body_mut(&mut self, id: SymbolId) -> Result<&mut FunctionBody>
    {
        let symbol = self
            .symbols
            .get_mut(id.0)
            .ok_or_else(|| SymscopeError::SymbolNotFound(format!("symbol #{}", id.0)))?;
        let name = symbol.name.raw().to_string();
        symbol
            .body
            .as_mut()
            .ok_or_else(|| SymscopeError::InvalidArgument(format!("{name} has no function body")))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn store_with_module() -> (SymbolStore, ModuleId)
    {
        let mut store = SymbolStore::new();
        let (module, created) = store.add_module(PathBuf::from("/lib/libc.so"), 0x7f00_0000, 0x1000, ModuleKind::SharedObject);
        assert!(created);
        (store, module)
    }

    #[test]
    fn test_add_module_is_idempotent()
    {
        let (mut store, module) = store_with_module();
        let (again, created) = store.add_module(PathBuf::from("/lib/libc.so"), 0x7f00_0000, 0x1000, ModuleKind::SharedObject);
        assert_eq!(again, module);
        assert!(!created);
        assert_eq!(store.module_count(), 1);
    }

    #[test]
    fn test_add_symbol_dedups_by_name_and_address()
    {
        let (mut store, module) = store_with_module();
        let first = store.add_symbol(NewSymbol::new("f", Address::new(0x10), SymbolKind::Function, module));
        let second = store.add_symbol(NewSymbol::new("f", Address::new(0x10), SymbolKind::Function, module));
        let other = store.add_symbol(NewSymbol::new("f", Address::new(0x20), SymbolKind::Function, module));
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(store.symbol_count(), 2);
    }

    #[test]
    fn test_finalize_sorts_and_dedups_lines()
    {
        let (mut store, module) = store_with_module();
        let f = store.add_symbol(NewSymbol::new("f", Address::new(0x10), SymbolKind::Function, module).with_body());
        for (offset, line) in [(8, 3), (0, 1), (8, 3), (4, 2)] {
            store.add_line(f, LineNumberEntry { offset, line }).unwrap();
        }
        store.finalize_function(f);

        let body = store.symbol(f).unwrap().body.as_ref().unwrap();
        assert!(body.normalized);
        assert_eq!(body.lines.iter().map(|l| l.offset).collect::<Vec<_>>(), vec![0, 4, 8]);
    }

    #[test]
    fn test_add_line_requires_function_body()
    {
        let (mut store, module) = store_with_module();
        let data = store.add_symbol(NewSymbol::new("d", Address::new(0x10), SymbolKind::Data, module));
        assert!(store.add_line(data, LineNumberEntry { offset: 0, line: 1 }).is_err());
    }

    #[test]
    fn test_resolve_pending_rekeys_symbol()
    {
        let (mut store, module) = store_with_module();
        let g = store.add_symbol(
            NewSymbol::new("counter", Address::new(0x7f00_0000), SymbolKind::Data, module).pending_address(),
        );
        assert_eq!(store.pending_in(module, "counter"), Some(g));

        store.resolve_pending(g, Address::new(0x7f00_0400), Some(4)).unwrap();

        assert_eq!(store.pending_in(module, "counter"), None);
        assert_eq!(store.find("counter", Address::new(0x7f00_0400)), Some(g));
        assert_eq!(store.find("counter", Address::new(0x7f00_0000)), None);
        assert_eq!(store.symbol(g).unwrap().size, Some(4));
    }

    #[test]
    fn test_module_for_address_uses_mapped_start()
    {
        let mut store = SymbolStore::new();
        let (exe, _) = store.add_module(PathBuf::from("/usr/bin/app"), 0, 0x2000, ModuleKind::Executable);
        store.set_extent(exe, Address::new(0x40_0000), 0x2000);
        let (lib, _) = store.add_module(PathBuf::from("/lib/libc.so"), 0x7f00_0000, 0x1000, ModuleKind::SharedObject);

        assert_eq!(store.module_for_address(Address::new(0x40_1000)), Some(exe));
        assert_eq!(store.module_for_address(Address::new(0x40_2000)), None);
        assert_eq!(store.module_for_address(Address::new(0x1000)), None);
        assert_eq!(store.module_for_address(Address::new(0x7f00_0fff)), Some(lib));
    }

    #[test]
    fn test_register_storage_is_offset_by_one()
    {
        assert_eq!(Storage::from_fields(-8, 0), Storage::FrameOffset(-8));
        assert_eq!(Storage::from_fields(0, 1), Storage::Register(0));
        assert_eq!(Storage::from_fields(0, 6), Storage::Register(5));
    }
}
