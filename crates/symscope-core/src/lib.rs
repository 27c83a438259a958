//! # symscope-core
//!
//! Debug-information acquisition for a debugger: stab records, the types they
//! describe, linker symbol tables, and the shared objects of a live process.
//!
//! ## Pipeline
//!
//! ```text
//! ModuleTracker --(path, bias)--> ModuleLoader --.stab/.stabstr--> StabReader
//!                                      |                               |
//!                                      |                     TypeParser + StabsBuilder
//!                                      v                               |
//!                          merge_linker_symbols ------> SymbolStore <--+
//! ```
//!
//! Everything is owned by a [`Session`]; nothing is global. Failures are
//! confined to the module (loader) or the rescan (tracker) they happened in.
//!
//! ## Platform Support
//!
//! - **Linux**: `/proc/<pid>/mem` reader ([`platform::linux::ProcMemoryTarget`])
//! - Elsewhere: implement [`Target`] for the host debugger.

pub mod breakpoints;
pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod platform;
pub mod session;
pub mod stabs;
pub mod symbols;
pub mod target;
pub mod tracker;
pub mod types;

pub use config::SessionConfig;
pub use error::{Result, SymscopeError};
pub use loader::{LoadReport, ModuleLoader};
pub use session::Session;
pub use target::Target;
pub use tracker::{ModuleTracker, TrackerState};
pub use types::{Address, ProcessId};
