//! Shift engine backends.

pub mod bitbang;
