//! Id primitives shared by the reflow crates.

#![warn(missing_docs)]

pub mod ids;
