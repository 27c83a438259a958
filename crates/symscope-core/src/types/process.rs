//! Process identifier.

use std::fmt;

/// Process identifier (PID)
///
/// ## Example
///
/// ```rust
/// use symscope_core::types::ProcessId;
///
/// let pid = ProcessId::from(12345);
/// assert_eq!(u32::from(pid), 12345);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}
