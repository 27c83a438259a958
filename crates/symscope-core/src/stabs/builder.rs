//! # Symbol Builder
//!
//! Turns the entry stream produced by [`StabReader`] into functions, data
//! symbols, locals and line entries in the [`SymbolStore`].
//!
//! Stab records only make sense in order: a line entry belongs to the last
//! function-start record, a local belongs to the current function, and a
//! type number means something different after every source-file record.
//! The builder carries that state:
//!
//! - the current function, finalized when the next one starts, at a
//!   source-file boundary, or at a string-table partition boundary
//! - the accumulated source path (`N_SO` directory + file records)
//! - whether records currently come from an included source file (`N_SOL`),
//!   in which case locals and lines are dropped rather than misattributed
//! - the per-unit include list that gives include-file type numbers meaning
//!
//! An include-file overflow is the only error that stops the stream; it is
//! fatal to the module being built.

use std::collections::HashSet;

use gimli::RunTimeEndian;
use tracing::{debug, trace, warn};

use super::grammar::{NamedTypes, TypeParser};
use super::record::{StabEntry, StabReader};
use super::typetable::{TypeRef, TypeStore, UnitTypes};
use super::{
    kind_name, N_BINCL, N_BNSYM, N_EINCL, N_ENSYM, N_ENTRY, N_EXCL, N_FNAME, N_FUN, N_GSYM, N_LBRAC, N_LCSYM,
    N_LSYM, N_MAIN, N_OPT, N_PSYM, N_RBRAC, N_ROSYM, N_RSYM, N_SLINE, N_SO, N_SOL, N_SSYM, N_STSYM, N_UNDF,
};
use crate::error::{Result, SymscopeError};
use crate::symbols::demangle::strip_local_suffix;
use crate::symbols::{
    Diagnostic, DiagnosticKind, LineNumberEntry, LocalVariable, ModuleId, NewSymbol, Storage, SymbolId, SymbolKind,
    SymbolStore,
};
use crate::types::Address;

/// Drives one module's stab stream into the stores.
pub struct StabsBuilder<'s>
{
    types: &'s mut TypeStore,
    store: &'s mut SymbolStore,
    module: ModuleId,
    bias: u64,
    unit: UnitTypes,
    named: NamedTypes,
    diagnostics: Vec<Diagnostic>,
    source_path: String,
    in_include: bool,
    current_function: Option<SymbolId>,
    last_function: Option<SymbolId>,
    unknown_kinds: HashSet<u8>,
    entries: usize,
}

impl<'s> StabsBuilder<'s>
{
    pub fn new(
        types: &'s mut TypeStore,
        store: &'s mut SymbolStore,
        module: ModuleId,
        bias: u64,
        max_includes: usize,
    ) -> Self
    {
        Self {
            types,
            store,
            module,
            bias,
            unit: UnitTypes::new(max_includes),
            named: NamedTypes::default(),
            diagnostics: Vec::new(),
            source_path: String::new(),
            in_include: false,
            current_function: None,
            last_function: None,
            unknown_kinds: HashSet::new(),
            entries: 0,
        }
    }

    /// Process a whole `.stab` section. Returns the number of entries dispatched.
    ///
    /// ## Errors
    ///
    /// Returns `IncludeOverflow` if a compilation unit references more include
    /// files than allowed. Entries before the overflow stay in the store.
    pub fn run(&mut self, stabs: &[u8], strings: &[u8], endian: RunTimeEndian) -> Result<usize>
    {
        let mut reader = StabReader::new(stabs, strings, endian);
        debug!(module = self.module.index(), records = reader.record_count(), "parsing stab records");

        let outcome = loop {
            let Some(entry) = reader.next_entry(&mut self.diagnostics) else {
                break Ok(self.entries);
            };
            self.entries += 1;
            if let Err(err) = self.dispatch(&entry) {
                break Err(err);
            }
        };

        self.finish_function();
        outcome
    }

    /// Handle one entry.
    ///
    /// ## Errors
    ///
    /// Returns `IncludeOverflow` from include push/reuse records.
    pub fn dispatch(&mut self, entry: &StabEntry) -> Result<()>
    {
        trace!(kind = kind_name(entry.kind).unwrap_or("?"), text = %entry.text, "stab");

        let (base_name, descriptor) = split_symbol(&entry.text);
        if entry.text.contains('=') && entry.text.contains(':') {
            self.parser().define(&entry.text, base_name, descriptor);
        }

        match entry.kind {
            N_SO => self.source_file(&entry.text),
            N_SOL => self.included_source(&entry.text),
            N_BINCL | N_EXCL => self.open_include(entry)?,
            N_EINCL => match self.unit.pop_include() {
                Some(id) => {
                    let name = self.types.includes.get(id).map_or("?", |file| file.name.as_str());
                    trace!(include = name, "include file closed");
                }
                None => debug!("include pop without a matching push"),
            },
            N_FUN => self.function(entry, base_name, descriptor),
            N_SLINE => self.line(entry),
            N_GSYM | N_STSYM | N_LCSYM | N_ROSYM => self.data(entry, base_name),
            N_PSYM | N_RSYM | N_LSYM => self.local(entry, base_name, descriptor),
            N_UNDF => self.finish_function(),
            N_LBRAC | N_RBRAC | N_OPT | N_MAIN | N_ENTRY | N_BNSYM | N_ENSYM | N_FNAME | N_SSYM => {}
            other => {
                if self.unknown_kinds.insert(other) {
                    self.report(DiagnosticKind::UnknownRecord, format!("unhandled stab kind 0x{other:02x}"));
                }
            }
        }
        Ok(())
    }

    /// Diagnostics recorded so far (grammar, format and record problems).
    pub fn diagnostics(&self) -> &[Diagnostic]
    {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic>
    {
        self.diagnostics
    }

    fn parser(&mut self) -> TypeParser<'_>
    {
        TypeParser::new(self.types, &mut self.unit, &mut self.named, &mut self.diagnostics)
    }

    fn symbol_type(&mut self, text: &str) -> Option<TypeRef>
    {
        self.parser().symbol_type(text)
    }

    fn report(&mut self, kind: DiagnosticKind, message: String)
    {
        warn!(module = self.module.index(), ?kind, "{message}");
        self.diagnostics.push(Diagnostic::new(kind, message));
    }

    fn source_file(&mut self, name: &str)
    {
        self.finish_function();
        self.unit.reset();
        self.in_include = false;

        if name.is_empty() {
            self.source_path.clear();
            return;
        }
        if name.starts_with('/') {
            self.source_path = name.to_string();
        } else {
            self.source_path.push_str(name);
        }
        if !self.source_path.ends_with('/') {
            debug!(source = %self.source_path, "compilation unit");
            self.store.push_source(self.module, &self.source_path);
        }
    }

    fn included_source(&mut self, name: &str)
    {
        let main_file = name == self.source_path
            || (!name.starts_with('/')
                && self
                    .source_path
                    .rsplit_once('/')
                    .is_some_and(|(dir, file)| file == name || format!("{dir}/{name}") == self.source_path));
        self.in_include = !main_file;
    }

    fn open_include(&mut self, entry: &StabEntry) -> Result<()>
    {
        let (id, existed) = match self.types.register_include(&mut self.unit, &entry.text, entry.value) {
            Ok(found) => found,
            Err(err @ SymscopeError::IncludeOverflow { .. }) => {
                self.report(DiagnosticKind::IncludeOverflow, format!("{err} at '{}'", entry.text));
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        if entry.kind == N_BINCL {
            self.unit.enter_include(id);
        } else if !existed {
            debug!(include = %entry.text, "reused include file was never defined; its types are unknown");
        }
        Ok(())
    }

    fn function(&mut self, entry: &StabEntry, base_name: &str, descriptor: Option<u8>)
    {
        if base_name.is_empty() {
            // Function end marker: value is the size of the function just closed.
            if let Some(function) = self.current_function.or(self.last_function) {
                self.store.annotate_size(function, u64::from(entry.value));
            }
            self.finish_function();
            return;
        }

        self.finish_function();
        if self.in_include {
            return;
        }

        let name = strip_local_suffix(base_name).to_string();
        let type_ref = self.symbol_type(&entry.text);
        let source = (descriptor == Some(b'f')).then(|| self.source_path.clone());
        let address = Address::from(u64::from(entry.value)).biased(self.bias);
        let id = self.store.add_symbol(
            NewSymbol::new(name, address, SymbolKind::Function, self.module)
                .source(source)
                .type_ref(type_ref)
                .with_body(),
        );
        self.current_function = Some(id);
    }

    fn line(&mut self, entry: &StabEntry)
    {
        let Some(function) = self.current_function else {
            return;
        };
        if self.in_include {
            return;
        }
        // Line numbers are stored unsigned in the 16-bit descriptor.
        #[allow(clippy::cast_sign_loss)]
        let line = u32::from(entry.desc as u16);
        let _ = self.store.add_line(
            function,
            LineNumberEntry {
                offset: u64::from(entry.value),
                line,
            },
        );
    }

    fn data(&mut self, entry: &StabEntry, base_name: &str)
    {
        if base_name.is_empty() {
            return;
        }
        let name = strip_local_suffix(base_name).to_string();
        let type_ref = self.symbol_type(&entry.text);
        let source = (entry.kind != N_GSYM).then(|| self.source_path.clone());
        let address = Address::from(u64::from(entry.value)).biased(self.bias);

        let mut symbol = NewSymbol::new(name, address, SymbolKind::Data, self.module)
            .source(source)
            .type_ref(type_ref);
        if entry.kind == N_GSYM && entry.value == 0 {
            symbol = symbol.pending_address();
        }
        self.store.add_symbol(symbol);
    }

    fn local(&mut self, entry: &StabEntry, base_name: &str, descriptor: Option<u8>)
    {
        if matches!(descriptor, Some(b't' | b'T')) {
            return;
        }
        let Some(function) = self.current_function else {
            return;
        };
        if self.in_include || base_name.is_empty() {
            return;
        }

        #[allow(clippy::cast_possible_wrap)]
        let storage = if entry.kind == N_RSYM {
            Storage::from_fields(0, entry.value.saturating_add(1))
        } else {
            Storage::from_fields(i64::from(entry.value as i32), 0)
        };
        let is_parameter = entry.kind == N_PSYM || matches!(descriptor, Some(b'p' | b'P' | b'R' | b'v'));
        let local = LocalVariable {
            name: base_name.to_string(),
            storage,
            type_ref: self.symbol_type(&entry.text),
            is_parameter,
        };
        let _ = self.store.add_local(function, local);
    }

    fn finish_function(&mut self)
    {
        if let Some(function) = self.current_function.take() {
            self.store.finalize_function(function);
            self.last_function = Some(function);
        }
    }
}

/// Base name (before the first `:`) and the descriptor letter after it.
fn split_symbol(text: &str) -> (&str, Option<u8>)
{
    match text.split_once(':') {
        Some((base, rest)) => (base, rest.bytes().next().filter(u8::is_ascii_alphabetic)),
        None => (text, None),
    }
}
