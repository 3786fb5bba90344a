// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::borrow::Cow;
use std::sync::Mutex;

use spiral_config::DftConfig;
use st_dft::{flatten, reference, Complex32, ComplexMatrix, Direction, FlatComplexBuffer};
use tracing::debug;

use crate::context::WgpuContext;
use crate::error::DftError;
use crate::resources::ResourceLedger;
use crate::scheduler::Invocation;
use crate::util::{default_shader_dir, ShaderCache};

/// Input descriptor: dimensions, direction and optional data.
///
/// Without data the transform runs on a zero-filled `rows x cols` matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformRequest {
    pub rows: usize,
    pub cols: usize,
    pub direction: Direction,
    pub data: Option<FlatComplexBuffer>,
}

impl TransformRequest {
    pub fn new(rows: usize, cols: usize, direction: Direction) -> Self {
        Self {
            rows,
            cols,
            direction,
            data: None,
        }
    }

    pub fn with_data(data: FlatComplexBuffer, direction: Direction) -> Self {
        Self {
            rows: data.rows(),
            cols: data.cols(),
            direction,
            data: Some(data),
        }
    }

    /// Flatten `matrix`, rejecting ragged rows.
    pub fn from_matrix(matrix: &[Vec<Complex32>], direction: Direction) -> Result<Self, DftError> {
        Ok(Self::with_data(flatten(matrix)?, direction))
    }

    fn input(&self) -> Result<Cow<'_, FlatComplexBuffer>, DftError> {
        match &self.data {
            Some(data) if data.rows() == self.rows && data.cols() == self.cols => {
                Ok(Cow::Borrowed(data))
            }
            Some(data) => Err(DftError::InvalidGeometry(format!(
                "request declares {}x{} but carries a {}x{} buffer",
                self.rows,
                self.cols,
                data.rows(),
                data.cols()
            ))),
            None => Ok(Cow::Owned(FlatComplexBuffer::zeroed(self.rows, self.cols)?)),
        }
    }
}

/// Output descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformOutput {
    pub rows: usize,
    pub cols: usize,
    pub direction: Direction,
    pub data: FlatComplexBuffer,
}

impl TransformOutput {
    pub fn to_matrix(&self) -> ComplexMatrix {
        self.data.to_matrix()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Cpu,
    Gpu,
}

struct GpuBackend {
    ctx: WgpuContext,
    config: DftConfig,
    shaders: Mutex<ShaderCache>,
}

enum Backend {
    Cpu,
    Gpu(Box<GpuBackend>),
}

/// Two-pass 2D DFT behind a single entry point.
///
/// `execute` takes `&self` and may be called from several threads, including
/// on instances sharing one [`WgpuContext`]. The shader cache is locked only
/// while templates resolve, and device error scopes are serialised
/// process-wide, so concurrent transforms overlap everywhere else.
pub struct Dft2d {
    backend: Backend,
    ledger: ResourceLedger,
}

impl Dft2d {
    /// Direct transform on the host.
    pub fn cpu() -> Self {
        Self {
            backend: Backend::Cpu,
            ledger: ResourceLedger::new(),
        }
    }

    /// Run on `ctx` with `config`.
    pub fn with_gpu(ctx: WgpuContext, config: DftConfig) -> Self {
        let shader_dir = config.shader_dir.clone().unwrap_or_else(default_shader_dir);
        Self {
            backend: Backend::Gpu(Box::new(GpuBackend {
                ctx,
                config,
                shaders: Mutex::new(ShaderCache::new(shader_dir)),
            })),
            ledger: ResourceLedger::new(),
        }
    }

    /// Bring up a device from the process configuration.
    pub fn new_default_gpu() -> Result<Self, DftError> {
        let config = spiral_config::config().clone();
        let ctx = WgpuContext::request(&config)?;
        Ok(Self::with_gpu(ctx, config))
    }

    pub fn backend(&self) -> BackendKind {
        match self.backend {
            Backend::Cpu => BackendKind::Cpu,
            Backend::Gpu(_) => BackendKind::Gpu,
        }
    }

    /// Counters for every GPU object this transform has created.
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn context(&self) -> Option<&WgpuContext> {
        match &self.backend {
            Backend::Cpu => None,
            Backend::Gpu(gpu) => Some(&gpu.ctx),
        }
    }

    pub fn execute(&self, request: &TransformRequest) -> Result<TransformOutput, DftError> {
        let input = request.input()?;
        let (rows, cols, direction) = (request.rows, request.cols, request.direction);
        let finish = |data: FlatComplexBuffer| TransformOutput {
            rows,
            cols,
            direction,
            data,
        };

        if rows == 0 || cols == 0 {
            debug!(rows, cols, "empty matrix, nothing to dispatch");
            return Ok(finish(input.into_owned()));
        }

        match &self.backend {
            Backend::Cpu => Ok(finish(reference::dft2d(&input, direction))),
            Backend::Gpu(gpu) => {
                let mut invocation =
                    Invocation::new(&gpu.ctx, &self.ledger, &gpu.config, rows, cols, direction)?;
                // Both templates resolve before any GPU object exists; the
                // cache is not held while the passes run.
                let sources = {
                    let mut shaders = gpu
                        .shaders
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    invocation.kernel_sources(&mut shaders)?
                };
                let values = invocation.run(sources, &input)?;
                Ok(finish(FlatComplexBuffer::from_interleaved(rows, cols, values)?))
            }
        }
    }

    /// Convenience wrapper over [`Self::execute`] for nested matrices.
    pub fn transform(
        &self,
        matrix: &[Vec<Complex32>],
        direction: Direction,
    ) -> Result<ComplexMatrix, DftError> {
        let request = TransformRequest::from_matrix(matrix, direction)?;
        Ok(self.execute(&request)?.to_matrix())
    }
}
