//! # Error Types
//!
//! Error handling for debug-info acquisition and module tracking.
//!
//! We use `thiserror` to generate the `Error` trait implementations and the
//! display messages. Most failures in this crate never reach the caller as an
//! `Err`: the module loader folds them into a module status plus diagnostics,
//! and the tracker only fails the rescan that hit them.

use thiserror::Error;

/// Main error type for symscope operations
///
/// ## Error Categories
///
/// 1. **Image errors**: Io, InvalidImage
/// 2. **Grammar errors**: IncludeOverflow
/// 3. **Live-process errors**: MemoryRead, SymbolNotFound, RendezvousUnavailable
/// 4. **Usage errors**: InvalidState, Unsupported, InvalidArgument
#[derive(Error, Debug)]
pub enum SymscopeError
{
    /// File could not be opened or read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bytes are not a binary image we understand
    ///
    /// Raised for unknown object formats, truncated headers, and section
    /// data that cannot be read.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A compilation unit referenced more include files than the configured bound
    ///
    /// This is fatal to the module being parsed, never to the session.
    #[error("Include-file stack overflow: more than {limit} include files in one compilation unit")]
    IncludeOverflow
    {
        /// Configured maximum number of include files per compilation unit
        limit: usize,
    },

    /// Reading the target process's memory failed
    #[error("Failed to read {length} bytes at 0x{address:016x}")]
    MemoryRead
    {
        /// Start of the requested range
        address: u64,
        /// Number of bytes requested
        length: usize,
    },

    /// A symbol the caller depends on is not in the store
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The dynamic loader's rendezvous structure could not be located
    ///
    /// This happens when the dynamic section has no debug tag (static
    /// executables, or a loader that has not run yet) or when the tag list is
    /// corrupted.
    #[error("Rendezvous structure unavailable: {0}")]
    RendezvousUnavailable(String),

    /// Operation is not valid in the current state
    ///
    /// ## Example
    ///
    /// Delivering a rendezvous hit to a tracker that was never attached.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The target does not support the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Invalid argument passed to a symscope function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<object::read::Error> for SymscopeError
{
    fn from(err: object::read::Error) -> Self
    {
        SymscopeError::InvalidImage(err.to_string())
    }
}

/// Result type alias for symscope operations
pub type Result<T> = std::result::Result<T, SymscopeError>;
