// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::time::Duration;

use st_dft::{Direction, LayoutError};
use thiserror::Error;

use crate::scheduler::InvocationState;
use crate::util::ShaderLoadError;

/// Failures of the final map-for-read.
#[derive(Debug, Error)]
pub enum ReadbackError {
    #[error("failed to map the staging buffer: {0}")]
    Map(#[source] wgpu::BufferAsyncError),
    #[error("the map callback was dropped without reporting a result")]
    CallbackDropped,
    #[error("readback did not complete within {0:?}")]
    Timeout(Duration),
    #[error("cannot read {requested} bytes from a {available}-byte buffer")]
    OutOfRange { requested: u64, available: u64 },
    #[error("readback length {0} is not a multiple of 4 bytes")]
    Misaligned(u64),
    #[error("device rejected the readback copy: {0}")]
    Copy(String),
}

/// Everything that can abort a transform invocation.
#[derive(Debug, Error)]
pub enum DftError {
    #[error("no compatible GPU adapter was found")]
    NoAdapter,
    #[error("failed to acquire a device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error(transparent)]
    Shader(#[from] ShaderLoadError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Readback(#[from] ReadbackError),
    #[error("invalid dispatch geometry: {0}")]
    InvalidGeometry(String),
    #[error("{direction} transforms are not supported by the forward-only kernels")]
    UnsupportedDirection { direction: Direction },
    #[error("invalid invocation transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: InvocationState,
        to: InvocationState,
    },
    #[error("cannot allocate buffer '{label}': {reason}")]
    Allocation { label: String, reason: String },
    #[error("binding mismatch: {0}")]
    Binding(String),
    #[error("device rejected {stage}: {message}")]
    Validation { stage: String, message: String },
}
