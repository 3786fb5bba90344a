// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Sequencing of the row and column passes.
//!
//! The row pass writes the intermediate buffer and the column pass reads it.
//! Both command buffers go to the same queue in program order, so the column
//! pass observes every row-pass write without a host-side wait. With
//! [`ReleaseMode::WaitIdle`] the scheduler additionally waits for each
//! submission to retire before releasing what it used.

use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use spiral_config::{DftConfig, KernelFamily, ReleaseMode};
use st_dft::layout::{float_len, FlatComplexBuffer};
use st_dft::Direction;
use tracing::{debug, debug_span};
use wgpu::{BindGroup, Maintain, SubmissionIndex};

use crate::context::WgpuContext;
use crate::error::DftError;
use crate::geometry::DispatchGeometry;
use crate::layout::{bind_group, BindingLayout, PassBindings, UNIFORM_SIZE};
use crate::pipeline::{compile_kernel, specialise, PassKernel, PassKind};
use crate::readback::read_buffer;
use crate::resources::{allocate, BufferKind, ResourceLedger};
use crate::util::{with_validation_scope, ShaderCache};

/// Slot 2 contents.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ParamsUniform {
    pub rows: u32,
    pub cols: u32,
    _pad0: u32,
    _pad1: u32,
}

impl ParamsUniform {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self {
            rows,
            cols,
            _pad0: 0,
            _pad1: 0,
        }
    }
}

/// Slot 3 contents.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct DirectionUniform {
    pub inverse: u32,
    _pad: [u32; 3],
}

impl DirectionUniform {
    pub fn new(direction: Direction) -> Self {
        Self {
            inverse: direction.as_flag(),
            _pad: [0; 3],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvocationState {
    Idle,
    RowPassBuilt,
    RowPassSubmitted,
    ColPassBuilt,
    ColPassSubmitted,
    Complete,
    Aborted,
}

impl InvocationState {
    /// The only state reachable from `self` on success.
    pub fn successor(self) -> Option<Self> {
        use InvocationState::*;
        match self {
            Idle => Some(RowPassBuilt),
            RowPassBuilt => Some(RowPassSubmitted),
            RowPassSubmitted => Some(ColPassBuilt),
            ColPassBuilt => Some(ColPassSubmitted),
            ColPassSubmitted => Some(Complete),
            Complete | Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Complete | InvocationState::Aborted)
    }

    /// Forward along the pass sequence, or abort from any live state.
    pub fn can_advance_to(self, next: Self) -> bool {
        self.successor() == Some(next) || (next == InvocationState::Aborted && !self.is_terminal())
    }
}

/// Reject directions the configured kernels cannot run.
pub fn check_direction(family: KernelFamily, direction: Direction) -> Result<(), DftError> {
    if family == KernelFamily::ForwardOnly && direction.is_inverse() {
        return Err(DftError::UnsupportedDirection { direction });
    }
    Ok(())
}

/// Byte size of a `rows x cols` buffer, checked against the device's
/// storage binding and buffer size limits.
pub fn buffer_bytes(rows: usize, cols: usize, limits: &wgpu::Limits) -> Result<u64, DftError> {
    let floats = float_len(rows, cols)?;
    let bytes = (floats as u64)
        .checked_mul(std::mem::size_of::<f32>() as u64)
        .ok_or_else(|| {
            DftError::InvalidGeometry(format!("{rows}x{cols} overflows a buffer size"))
        })?;
    let max_binding = u64::from(limits.max_storage_buffer_binding_size);
    if bytes > max_binding || bytes > limits.max_buffer_size {
        return Err(DftError::InvalidGeometry(format!(
            "{rows}x{cols} needs {bytes} bytes, more than the device binds ({} bytes)",
            max_binding.min(limits.max_buffer_size)
        )));
    }
    Ok(bytes)
}

/// Both kernels with their workgroup size resolved, plus the template paths
/// used to label compile errors.
#[derive(Clone, Debug)]
pub struct KernelSources {
    row: String,
    row_context: String,
    column: String,
    column_context: String,
}

/// Per-call context for one transform.
///
/// All sizing state lives here rather than in process-wide storage, so
/// independent invocations never share mutable state.
#[derive(Debug)]
pub struct Invocation<'a> {
    ctx: &'a WgpuContext,
    ledger: &'a ResourceLedger,
    rows: usize,
    cols: usize,
    params: ParamsUniform,
    byte_len: u64,
    direction: Direction,
    family: KernelFamily,
    layout: BindingLayout,
    release: ReleaseMode,
    readback_timeout: Duration,
    geometry: DispatchGeometry,
    state: InvocationState,
}

impl<'a> Invocation<'a> {
    /// Plan a transform of a non-empty `rows x cols` matrix.
    pub fn new(
        ctx: &'a WgpuContext,
        ledger: &'a ResourceLedger,
        config: &DftConfig,
        rows: usize,
        cols: usize,
        direction: Direction,
    ) -> Result<Self, DftError> {
        check_direction(config.kernels, direction)?;
        if rows == 0 || cols == 0 {
            return Err(DftError::InvalidGeometry(format!(
                "cannot dispatch an empty {rows}x{cols} matrix"
            )));
        }
        let dims = u32::try_from(rows).and_then(|r| u32::try_from(cols).map(|c| (r, c)));
        let Ok((rows_u32, cols_u32)) = dims else {
            return Err(DftError::InvalidGeometry(format!(
                "{rows}x{cols} exceeds the 32-bit dimensions the kernels address"
            )));
        };
        let byte_len = buffer_bytes(rows, cols, &ctx.limits())?;

        let limits = ctx.workgroup_limits();
        let geometry = DispatchGeometry::from_limits(&limits, rows, cols);
        geometry.validate(&limits)?;

        Ok(Self {
            ctx,
            ledger,
            rows,
            cols,
            params: ParamsUniform::new(rows_u32, cols_u32),
            byte_len,
            direction,
            family: config.kernels,
            layout: BindingLayout::for_kernels(config.kernels),
            release: config.release,
            readback_timeout: config.readback_timeout,
            geometry,
            state: InvocationState::Idle,
        })
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn geometry(&self) -> DispatchGeometry {
        self.geometry
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    fn advance(&mut self, next: InvocationState) -> Result<(), DftError> {
        if !self.state.can_advance_to(next) {
            return Err(DftError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "invocation state");
        self.state = next;
        Ok(())
    }

    /// Resolve both templates for this invocation's workgroup size.
    ///
    /// Only the cache is touched, so callers sharing a cache can release it
    /// before [`Self::run`]. A failure leaves the invocation `Aborted`.
    pub fn kernel_sources(&mut self, shaders: &mut ShaderCache) -> Result<KernelSources, DftError> {
        let workgroup = self.geometry.workgroup_size();
        let resolved = specialise(shaders, PassKind::Row, self.family, workgroup).and_then(|row| {
            let column = specialise(shaders, PassKind::Column, self.family, workgroup)?;
            Ok(KernelSources {
                row,
                row_context: template_path(shaders, PassKind::Row, self.family),
                column,
                column_context: template_path(shaders, PassKind::Column, self.family),
            })
        });
        if let Err(err) = &resolved {
            self.state = InvocationState::Aborted;
            debug!(error = %err, "invocation aborted");
        }
        resolved
    }

    /// Run both passes on `input` and read the result back.
    ///
    /// Any failure leaves the invocation `Aborted`; every GPU object it
    /// created has been released by the time this returns.
    pub fn run(
        &mut self,
        sources: KernelSources,
        input: &FlatComplexBuffer,
    ) -> Result<Vec<f32>, DftError> {
        let span = debug_span!(
            "dft2d",
            rows = self.rows,
            cols = self.cols,
            direction = %self.direction
        );
        let _enter = span.enter();

        match self.execute(sources, input) {
            Ok(values) => Ok(values),
            Err(err) => {
                if !self.state.is_terminal() {
                    self.state = InvocationState::Aborted;
                }
                debug!(error = %err, "invocation aborted");
                Err(err)
            }
        }
    }

    fn execute(
        &mut self,
        sources: KernelSources,
        input: &FlatComplexBuffer,
    ) -> Result<Vec<f32>, DftError> {
        if self.state != InvocationState::Idle {
            return Err(DftError::InvalidTransition {
                from: self.state,
                to: InvocationState::RowPassBuilt,
            });
        }
        if input.rows() != self.rows || input.cols() != self.cols {
            return Err(DftError::InvalidGeometry(format!(
                "input is {}x{} but the invocation was planned for {}x{}",
                input.rows(),
                input.cols(),
                self.rows,
                self.cols
            )));
        }

        let KernelSources {
            row: row_source,
            row_context,
            column: col_source,
            column_context: col_context,
        } = sources;

        let (ctx, ledger) = (self.ctx, self.ledger);
        let device = ctx.device();
        let bytes = self.byte_len;

        let input_buf = allocate(
            ctx,
            ledger,
            "st.dft.input",
            Some(bytemuck::cast_slice(input.as_slice())),
            bytes,
            BufferKind::Input,
        )?;
        let intermediate = allocate(
            ctx,
            ledger,
            "st.dft.intermediate",
            None,
            bytes,
            BufferKind::Intermediate,
        )?;
        let output = allocate(ctx, ledger, "st.dft.output", None, bytes, BufferKind::Output)?;
        let params = allocate(
            ctx,
            ledger,
            "st.dft.params",
            Some(bytemuck::bytes_of(&self.params)),
            UNIFORM_SIZE,
            BufferKind::Params,
        )?;
        let direction = if self.layout.has_direction() {
            let uniform = DirectionUniform::new(self.direction);
            Some(allocate(
                ctx,
                ledger,
                "st.dft.direction",
                Some(bytemuck::bytes_of(&uniform)),
                UNIFORM_SIZE,
                BufferKind::Direction,
            )?)
        } else {
            None
        };
        let bind_group_layout = self.layout.create(device, ledger)?;

        let row_kernel = compile_kernel(
            ctx,
            ledger,
            PassKind::Row,
            row_source,
            &row_context,
            &bind_group_layout,
        )?;
        let row_group = bind_group(
            device,
            ledger,
            PassKind::Row.label(),
            self.layout,
            &bind_group_layout,
            &PassBindings {
                input: &input_buf,
                output: &intermediate,
                params: &params,
                direction: direction.as_ref(),
            },
        )?;
        self.advance(InvocationState::RowPassBuilt)?;
        let submission = self.submit(PassKind::Row, &row_kernel, &row_group)?;
        self.advance(InvocationState::RowPassSubmitted)?;
        self.retire(submission);
        row_group.release();
        drop(row_kernel);
        drop(input_buf);

        let col_kernel = compile_kernel(
            ctx,
            ledger,
            PassKind::Column,
            col_source,
            &col_context,
            &bind_group_layout,
        )?;
        let col_group = bind_group(
            device,
            ledger,
            PassKind::Column.label(),
            self.layout,
            &bind_group_layout,
            &PassBindings {
                input: &intermediate,
                output: &output,
                params: &params,
                direction: direction.as_ref(),
            },
        )?;
        self.advance(InvocationState::ColPassBuilt)?;
        let submission = self.submit(PassKind::Column, &col_kernel, &col_group)?;
        self.advance(InvocationState::ColPassSubmitted)?;
        self.retire(submission);
        col_group.release();
        drop(col_kernel);

        drop(direction);
        drop(params);
        drop(bind_group_layout);
        drop(intermediate);

        let values = read_buffer(ctx, ledger, &output, bytes, self.readback_timeout)?;
        drop(output);
        self.advance(InvocationState::Complete)?;
        Ok(values)
    }

    fn submit(
        &self,
        pass: PassKind,
        kernel: &PassKernel,
        group: &BindGroup,
    ) -> Result<SubmissionIndex, DftError> {
        let device = self.ctx.device();
        let [x, y, z] = self.geometry.workgroups();
        let (submission, error) = with_validation_scope(device, || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(pass.label()),
            });
            {
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(pass.label()),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(kernel.pipeline());
                cpass.set_bind_group(0, group, &[]);
                cpass.dispatch_workgroups(x, y, z);
            }
            self.ctx.queue().submit(Some(encoder.finish()))
        });
        if let Some(err) = error {
            return Err(DftError::Validation {
                stage: format!("{} dispatch", pass.label()),
                message: err.to_string(),
            });
        }
        debug!(
            pass = ?pass,
            workgroup = ?self.geometry.workgroup_size(),
            workgroups = ?[x, y, z],
            "submitted pass"
        );
        Ok(submission)
    }

    /// Under [`ReleaseMode::WaitIdle`], block until `submission` retires.
    fn retire(&self, submission: SubmissionIndex) {
        if self.release == ReleaseMode::WaitIdle {
            self.ctx
                .device()
                .poll(Maintain::WaitForSubmissionIndex(submission));
        }
    }
}

fn template_path(shaders: &ShaderCache, pass: PassKind, family: KernelFamily) -> String {
    shaders
        .shader_dir()
        .join(pass.template(family))
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use InvocationState::*;

    #[test]
    fn uniforms_are_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<ParamsUniform>() as u64, UNIFORM_SIZE);
        assert_eq!(std::mem::size_of::<DirectionUniform>() as u64, UNIFORM_SIZE);
        let params = ParamsUniform::new(3, 5);
        assert_eq!(bytemuck::cast::<_, [u32; 4]>(params), [3, 5, 0, 0]);
        let inverse = DirectionUniform::new(Direction::Inverse);
        assert_eq!(bytemuck::cast::<_, [u32; 4]>(inverse), [1, 0, 0, 0]);
    }

    #[test]
    fn states_follow_the_pass_sequence() {
        let mut state = Idle;
        let mut seen = vec![state];
        while let Some(next) = state.successor() {
            assert!(state.can_advance_to(next));
            state = next;
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![Idle, RowPassBuilt, RowPassSubmitted, ColPassBuilt, ColPassSubmitted, Complete]
        );
    }

    #[test]
    fn skipping_or_rewinding_is_rejected() {
        assert!(!Idle.can_advance_to(RowPassSubmitted));
        assert!(!RowPassSubmitted.can_advance_to(RowPassBuilt));
        assert!(!ColPassSubmitted.can_advance_to(Idle));
        assert!(!Complete.can_advance_to(Idle));
    }

    #[test]
    fn abort_is_reachable_from_live_states_only() {
        for state in [Idle, RowPassBuilt, RowPassSubmitted, ColPassBuilt, ColPassSubmitted] {
            assert!(state.can_advance_to(Aborted), "{state:?}");
        }
        assert!(!Complete.can_advance_to(Aborted));
        assert!(!Aborted.can_advance_to(Aborted));
        assert!(!Aborted.can_advance_to(Idle));
    }

    #[test]
    fn forward_only_kernels_refuse_inverse() {
        assert!(check_direction(KernelFamily::ForwardOnly, Direction::Forward).is_ok());
        assert!(matches!(
            check_direction(KernelFamily::ForwardOnly, Direction::Inverse),
            Err(DftError::UnsupportedDirection {
                direction: Direction::Inverse
            })
        ));
        assert!(check_direction(KernelFamily::Directional, Direction::Inverse).is_ok());
    }

    #[test]
    fn buffer_size_is_checked_against_binding_limits() {
        let mut limits = wgpu::Limits::downlevel_defaults();
        assert_eq!(buffer_bytes(4, 4, &limits).unwrap(), 128);
        limits.max_storage_buffer_binding_size = 64;
        assert!(matches!(
            buffer_bytes(4, 4, &limits),
            Err(DftError::InvalidGeometry(_))
        ));
        assert!(matches!(
            buffer_bytes(usize::MAX, 2, &limits),
            Err(DftError::Layout(_))
        ));
    }
}
