//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed memory address
///
/// This wrapper around `u64` keeps addresses apart from sizes, offsets and
/// load biases, which are all plain `u64` values in this crate.
///
/// ## Example
///
/// ```rust
/// use symscope_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Relocate a file address by a load bias, wrapping like the loader does
    #[must_use]
    pub const fn biased(self, bias: u64) -> Self
    {
        Address(self.0.wrapping_add(bias))
    }

    /// Add an offset, returning `None` on overflow
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Distance from `base` to `self`, or `None` if `self` lies below `base`
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(addr: Address) -> Self
    {
        addr.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Self;

    fn add(self, offset: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(offset))
    }
}

impl Sub<u64> for Address
{
    type Output = Self;

    fn sub(self, offset: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(offset))
    }
}
