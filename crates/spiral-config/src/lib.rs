//! Process-level configuration shared by the DFT crates: tracing bootstrap
//! and the environment-driven runtime knobs.

pub mod dft;
pub mod tracing;

pub use dft::{config, configure, DftConfig, KernelFamily, PowerMode, ReleaseMode};
