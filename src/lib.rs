#![forbid(unsafe_code)]

//! Shared pieces used by the `lumac` and `lumarun` driver binaries:
//! the reference extension handlers the rest of the toolchain is
//! demonstrated against.

pub mod extensions;
