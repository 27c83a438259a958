//! # Target Interface
//!
//! The narrow view of a live process the module tracker needs: read bytes and
//! plant one breakpoint.
//!
//! Backends (the `/proc`-based reader in [`crate::platform`], a ptrace
//! front-end, or a test double) implement this trait. The tracker never
//! resumes, stops, or otherwise controls the process itself.

use crate::breakpoints::BreakpointId;
use crate::error::{Result, SymscopeError};
use crate::types::Address;

/// Memory and breakpoint access to the debuggee.
pub trait Target
{
    /// Read `len` bytes starting at `addr`.
    ///
    /// ## Errors
    ///
    /// Returns [`SymscopeError::MemoryRead`] if any part of the range is
    /// unreadable. Short reads are errors, never partial results.
    fn read_memory(&mut self, addr: Address, len: usize) -> Result<Vec<u8>>;

    /// Install an execution breakpoint at `addr`.
    ///
    /// ## Errors
    ///
    /// Returns [`SymscopeError::Unsupported`] if the backend cannot plant
    /// breakpoints; the tracker then stays in its attached state and only
    /// the initial walk runs.
    fn set_breakpoint(&mut self, addr: Address) -> Result<BreakpointId>;

    /// Read a pointer-sized word with the given width and byte order.
    ///
    /// ## Errors
    ///
    /// Propagates read failures; rejects widths other than 4 and 8.
    fn read_word(&mut self, addr: Address, width: u8, endian: gimli::RunTimeEndian) -> Result<u64>
    {
        use gimli::Reader;

        let bytes = self.read_memory(addr, usize::from(width))?;
        let mut reader = gimli::EndianSlice::new(&bytes, endian);
        let value = match width {
            4 => reader.read_u32().map(u64::from),
            8 => reader.read_u64(),
            other => return Err(SymscopeError::InvalidArgument(format!("unsupported word width {other}"))),
        };
        value.map_err(|_| SymscopeError::MemoryRead {
            address: addr.value(),
            length: usize::from(width),
        })
    }
}
