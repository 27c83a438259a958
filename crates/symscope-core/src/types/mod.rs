//! # Types
//!
//! Small value types shared by the parser, the symbol store and the tracker.

pub mod address;
pub mod process;
pub mod symbols;

pub use address::Address;
pub use process::ProcessId;
pub use symbols::{SymbolLanguage, SymbolName};
