#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//! Bit-serial JTAG transaction engine for GPIO-driven debug probes.
//!
//! [`jtag`] turns instruction loads and debug-port register transfers into
//! TMS/TDI bit buffers and runs the WAIT-retry protocol; [`driver::bitbang`]
//! clocks those buffers over GPIO at the tier picked by [`speed`].

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod driver;
pub mod jtag;
pub mod pins;
pub mod scratch;
pub mod speed;

#[cfg(test)]
mod mock_device;
