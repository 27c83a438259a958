//! # Linker-Symbol-Table Merger
//!
//! Adds the symbols the stab stream did not describe, using the image's plain
//! `.symtab` and `.dynsym` tables.
//!
//! The merger never creates types, locals or line entries, and never adds a
//! second entry for a (name, address) pair already in the store. It does
//! annotate existing entries: a missing byte size is filled in, and a global
//! whose stab carried no address gets the linker's address.

use object::{Object, ObjectSymbol, SymbolKind as ObjectSymbolKind};
use tracing::{debug, trace};

use super::demangle::strip_local_suffix;
use super::{ModuleId, NewSymbol, SymbolKind, SymbolStore};
use crate::types::Address;

/// Counters from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats
{
    /// Entries examined (after skipping section and file markers).
    pub considered: usize,
    /// New symbols added to the store.
    pub added: usize,
    /// Existing symbols that gained a size.
    pub annotated: usize,
    /// Pending stab globals that received their address.
    pub resolved: usize,
}

impl MergeStats
{
    /// Whether either table had at least one usable entry.
    pub fn found_symbols(&self) -> bool
    {
        self.considered > 0
    }
}

/// Merge `.symtab` and `.dynsym` of `file` into the store for `module`.
pub fn merge_linker_symbols<'data, O>(file: &O, store: &mut SymbolStore, module: ModuleId, bias: u64) -> MergeStats
where
    O: Object<'data>,
{
    let mut stats = MergeStats::default();
    merge_table(file.symbols(), store, module, bias, &mut stats);
    merge_table(file.dynamic_symbols(), store, module, bias, &mut stats);
    debug!(
        module = module.index(),
        considered = stats.considered,
        added = stats.added,
        annotated = stats.annotated,
        resolved = stats.resolved,
        "merged linker symbols"
    );
    stats
}

fn merge_table<'data, S>(
    symbols: impl Iterator<Item = S>,
    store: &mut SymbolStore,
    module: ModuleId,
    bias: u64,
    stats: &mut MergeStats,
) where
    S: ObjectSymbol<'data>,
{
    let mut owning_source: Option<String> = None;

    for symbol in symbols {
        let Ok(raw_name) = symbol.name() else {
            continue;
        };

        let kind = match symbol.kind() {
            ObjectSymbolKind::Section => continue,
            ObjectSymbolKind::File => {
                owning_source = (!raw_name.is_empty()).then(|| raw_name.to_string());
                continue;
            }
            ObjectSymbolKind::Text => SymbolKind::Function,
            ObjectSymbolKind::Data => SymbolKind::Data,
            _ => continue,
        };
        if symbol.is_undefined() || raw_name.is_empty() || is_internal_label(raw_name) {
            continue;
        }
        stats.considered += 1;

        let name = strip_local_suffix(raw_name);
        let address = Address::from(symbol.address()).biased(bias);
        let size = symbol.size();

        if let Some(existing) = store.find(name, address) {
            let had_size = store.symbol(existing).is_some_and(|s| s.size.is_some());
            store.annotate_size(existing, size);
            if !had_size && size > 0 {
                stats.annotated += 1;
            }
            continue;
        }

        if let Some(pending) = store.pending_in(module, name) {
            trace!(symbol = name, %address, "resolving stab global from linker table");
            if store.resolve_pending(pending, address, Some(size)).is_ok() {
                stats.resolved += 1;
            }
            continue;
        }

        let source = if symbol.is_global() { None } else { owning_source.clone() };
        store.add_symbol(
            NewSymbol::new(name, address, kind, module)
                .source(source)
                .size((size > 0).then_some(size)),
        );
        stats.added += 1;
    }
}

/// Compiler-internal labels such as `.L42`.
fn is_internal_label(name: &str) -> bool
{
    name.strip_prefix(".L")
        .and_then(|rest| rest.bytes().next())
        .is_some_and(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_internal_labels()
    {
        assert!(is_internal_label(".L0"));
        assert!(is_internal_label(".L123"));
        assert!(!is_internal_label(".Lfoo"));
        assert!(!is_internal_label("main"));
    }
}
