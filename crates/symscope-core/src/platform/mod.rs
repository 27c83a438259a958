//! # Platform-Specific Targets
//!
//! Implementations of [`Target`](crate::target::Target) backed by the host
//! operating system.
//!
//! - **Linux**: reads `/proc/<pid>/mem`
//!   - See: [proc(5) man page](https://man7.org/linux/man-pages/man5/proc.5.html)
//!
//! Other systems have no backend; front-ends there supply their own `Target`.

#[cfg(target_os = "linux")]
pub mod linux;
