//! Module tracker event types and helpers.
//!
//! Front-ends consume these to learn about modules appearing in the target
//! without polling the symbol store after every stop. Events are informational;
//! the store is always the source of truth.

use std::path::PathBuf;
use std::sync::mpsc;

use crate::breakpoints::BreakpointId;
use crate::symbols::{DebugInfoStatus, ModuleId};
use crate::types::Address;

/// Event emitted by the module tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent
{
    /// A (path, bias) pair was seen for the first time and loaded.
    ModuleLoaded
    {
        module: ModuleId,
        path: PathBuf,
        bias: u64,
        status: DebugInfoStatus,
    },
    /// The rendezvous breakpoint was planted.
    BreakpointInstalled
    {
        id: BreakpointId,
        address: Address,
    },
    /// A rescan stopped early; modules loaded before the failure stay loaded.
    RescanAborted
    {
        reason: String,
    },
    /// The loader reported a removal, which is not tracked.
    UnloadIgnored,
}

impl TrackerEvent
{
    /// Human-readable description of the event.
    #[must_use]
    pub fn describe(&self) -> String
    {
        match self {
            Self::ModuleLoaded { path, bias, status, .. } => {
                format!("Loaded {} at bias 0x{bias:x} ({status})", path.display())
            }
            Self::BreakpointInstalled { id, address } => format!("Rendezvous breakpoint {id} at {address}"),
            Self::RescanAborted { reason } => format!("Module rescan aborted: {reason}"),
            Self::UnloadIgnored => "Library unload reported; unloads are not tracked".to_string(),
        }
    }
}

/// Sender side of the tracker event channel.
pub type TrackerEventSender = mpsc::Sender<TrackerEvent>;
/// Receiver side of the tracker event channel.
pub type TrackerEventReceiver = mpsc::Receiver<TrackerEvent>;

/// Create a new tracker event channel.
#[must_use]
pub fn event_channel() -> (TrackerEventSender, TrackerEventReceiver)
{
    mpsc::channel()
}
