//! # Linux Process Memory
//!
//! Reads a live process through `/proc/<pid>/mem`.
//!
//! The kernel only allows this for processes the caller may ptrace (same user
//! with a permissive `ptrace_scope`, or `CAP_SYS_PTRACE`). Planting breakpoints
//! needs ptrace proper, which this backend does not do, so the tracker stays in
//! its attached state when driven by it.
//!
//! ## References
//!
//! - [proc(5)](https://man7.org/linux/man-pages/man5/proc.5.html): `/proc/pid/mem`, `/proc/pid/maps`, `/proc/pid/exe`

use std::fs::{self, File};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::breakpoints::BreakpointId;
use crate::error::{Result, SymscopeError};
use crate::target::Target;
use crate::types::{Address, ProcessId};

/// Read-only view of a process's memory.
#[derive(Debug)]
pub struct ProcMemoryTarget
{
    pid: ProcessId,
    mem: File,
}

impl ProcMemoryTarget
{
    /// Open `/proc/<pid>/mem`.
    ///
    /// ## Errors
    ///
    /// Returns [`SymscopeError::Io`] if the file cannot be opened (no such
    /// process, or insufficient permission).
    pub fn open(pid: ProcessId) -> Result<Self>
    {
        let mem = File::open(proc_path(pid, "mem"))?;
        debug!(pid = %pid, "opened process memory");
        Ok(Self { pid, mem })
    }

    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// Path of the main executable, from `/proc/<pid>/exe`.
    ///
    /// ## Errors
    ///
    /// Returns [`SymscopeError::Io`] if the link cannot be read.
    pub fn executable_path(&self) -> Result<PathBuf>
    {
        Ok(fs::read_link(proc_path(self.pid, "exe"))?)
    }

    /// Lowest address at which `path` is mapped, from `/proc/<pid>/maps`.
    ///
    /// For position-independent executables linked at 0 this is the load bias.
    ///
    /// ## Errors
    ///
    /// Returns [`SymscopeError::Io`] if the map cannot be read and
    /// [`SymscopeError::InvalidArgument`] if `path` is not mapped.
    pub fn mapping_base(&self, path: &Path) -> Result<Address>
    {
        let maps = fs::read_to_string(proc_path(self.pid, "maps"))?;
        lowest_mapping(&maps, path)
            .ok_or_else(|| SymscopeError::InvalidArgument(format!("{} is not mapped", path.display())))
    }
}

impl Target for ProcMemoryTarget
{
    fn read_memory(&mut self, addr: Address, len: usize) -> Result<Vec<u8>>
    {
        trace!(address = %addr, len, "reading process memory");
        let mut buffer = vec![0u8; len];
        self.mem.read_exact_at(&mut buffer, addr.value()).map_err(|_| SymscopeError::MemoryRead {
            address: addr.value(),
            length: len,
        })?;
        Ok(buffer)
    }

    fn set_breakpoint(&mut self, _addr: Address) -> Result<BreakpointId>
    {
        Err(SymscopeError::Unsupported(
            "the /proc memory target cannot plant breakpoints".to_string(),
        ))
    }
}

fn proc_path(pid: ProcessId, entry: &str) -> PathBuf
{
    PathBuf::from(format!("/proc/{pid}/{entry}"))
}

/// Parse `maps` text and return the lowest start address of a mapping of `path`.
fn lowest_mapping(maps: &str, path: &Path) -> Option<Address>
{
    maps.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let range = fields.next()?;
            let mapped = fields.nth(4)?;
            (Path::new(mapped) == path).then_some(range)
        })
        .filter_map(|range| range.split('-').next())
        .filter_map(|start| u64::from_str_radix(start, 16).ok())
        .min()
        .map(Address::from)
}

#[cfg(test)]
mod tests
{
    use super::*;

    const MAPS: &str = "\
5581a000-5581b000 r--p 00000000 fd:01 1234 /usr/bin/demo
5581b000-5581c000 r-xp 00001000 fd:01 1234 /usr/bin/demo
7f10c000-7f10e000 r--p 00000000 fd:01 99 /usr/lib/libc.so.6
7ffd0000-7ffd2000 rw-p 00000000 00:00 0 [stack]
";

    #[test]
    fn test_lowest_mapping()
    {
        assert_eq!(
            lowest_mapping(MAPS, Path::new("/usr/bin/demo")),
            Some(Address::from(0x5581_a000))
        );
        assert_eq!(
            lowest_mapping(MAPS, Path::new("/usr/lib/libc.so.6")),
            Some(Address::from(0x7f10_c000))
        );
        assert_eq!(lowest_mapping(MAPS, Path::new("/missing")), None);
    }

    #[test]
    fn test_read_own_memory()
    {
        let value: u64 = 0x1122_3344_5566_7788;
        let address = Address::from(std::ptr::addr_of!(value) as u64);
        let mut target = ProcMemoryTarget::open(ProcessId::from(std::process::id())).unwrap();
        let bytes = target.read_memory(address, 8).unwrap();
        assert_eq!(bytes, value.to_ne_bytes());
        assert!(matches!(
            target.set_breakpoint(address),
            Err(SymscopeError::Unsupported(_))
        ));
    }
}
