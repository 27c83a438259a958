//! Symbol demangling utilities.
//!
//! STABS-era binaries are mostly C, but C++ and Rust objects built with
//! `-gstabs` carry mangled names too. The language guess looks at the
//! mangling prefix only:
//!
//! - Rust: `_R`, `_ZN` that `rustc-demangle` accepts, or names containing `::`
//! - C++: any other `_Z` name
//! - C: everything else

use rustc_demangle::try_demangle;

use crate::types::{SymbolLanguage, SymbolName};

/// Create a `SymbolName` from a raw linkage name.
pub(crate) fn make_symbol_name(raw: &str) -> SymbolName
{
    let demangled = try_demangle(raw).ok().map(|d| format!("{d:#}"));
    let language = if raw.starts_with("_R") || raw.contains("::") || (raw.starts_with("_ZN") && demangled.is_some()) {
        SymbolLanguage::Rust
    } else if raw.starts_with("_Z") {
        SymbolLanguage::Cpp
    } else {
        SymbolLanguage::C
    };

    SymbolName::new(raw.to_string(), demangled, language)
}

/// Strip a compiler-generated `.<digits>` suffix (`counter.1234` -> `counter`).
pub(crate) fn strip_local_suffix(name: &str) -> &str
{
    match name.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < name.len() && name[dot + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            &name[..dot]
        }
        _ => name,
    }
}
