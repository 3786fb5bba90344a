// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Host-side building blocks for the two-pass 2D DFT.
//!
//! The GPU orchestration lives in `st-dft-wgpu`; this crate owns everything
//! that never touches a device: the complex matrix representation, the
//! row-major interleaved buffer layout shared with the kernels, the text
//! exchange format, and a direct CPU transform used as fallback and oracle.

pub mod direction;
pub mod exchange;
pub mod layout;
pub mod reference;

pub use direction::Direction;
pub use exchange::{read_matrix, write_matrix, ExchangeError};
pub use layout::{dims, flatten, reshape, ComplexMatrix, FlatComplexBuffer, LayoutError};
pub use num_complex::Complex32;
