// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Two-pass 2D DFT on `wgpu` compute pipelines.
//!
//! An invocation uploads a flattened complex matrix, runs a row pass into an
//! intermediate buffer, runs a column pass into the output buffer and reads
//! the result back. Both passes go to the same queue in program order, which
//! is what makes the column pass observe the row pass's writes.
//!
//! [`Dft2d`] is the entry point; the remaining modules expose the pieces it
//! is built from.

pub mod context;
pub mod dft;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod pipeline;
pub mod readback;
pub mod resources;
pub mod scheduler;
pub mod util;

pub use context::WgpuContext;
pub use dft::{BackendKind, Dft2d, TransformOutput, TransformRequest};
pub use error::{DftError, ReadbackError};
pub use geometry::{DispatchGeometry, WorkgroupLimits};
pub use layout::BindingLayout;
pub use pipeline::PassKind;
pub use resources::{BufferKind, GpuBuffer, LedgerSnapshot, ObjectKind, ResourceLedger, Tracked};
pub use scheduler::{Invocation, InvocationState, KernelSources};
pub use util::{ShaderCache, ShaderLoadError};
