// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! GPU buffer allocation and release accounting.
//!
//! Every object an invocation creates is wrapped in [`Tracked`], whose drop
//! releases the handle and records the release in a [`ResourceLedger`]. Early
//! returns therefore release everything created so far, exactly once.

use std::fmt;
use std::num::NonZeroU64;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};
use wgpu::{Buffer, BufferUsages};

use crate::context::WgpuContext;
use crate::error::DftError;
use crate::util::with_validation_scope;

/// Role of a buffer within an invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Input,
    Intermediate,
    Output,
    Params,
    Direction,
    Staging,
}

impl BufferKind {
    /// Usage flags. Every kind can be written after creation.
    pub fn usage(self) -> BufferUsages {
        match self {
            BufferKind::Input => BufferUsages::STORAGE | BufferUsages::COPY_DST,
            BufferKind::Intermediate | BufferKind::Output => {
                BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST
            }
            BufferKind::Params | BufferKind::Direction => {
                BufferUsages::UNIFORM | BufferUsages::COPY_DST
            }
            BufferKind::Staging => BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        }
    }
}

/// Category of GPU object counted by the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Buffer,
    ShaderModule,
    BindGroupLayout,
    PipelineLayout,
    ComputePipeline,
    BindGroup,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 6] = [
        ObjectKind::Buffer,
        ObjectKind::ShaderModule,
        ObjectKind::BindGroupLayout,
        ObjectKind::PipelineLayout,
        ObjectKind::ComputePipeline,
        ObjectKind::BindGroup,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Default)]
struct Counters {
    allocated: [AtomicUsize; 6],
    released: [AtomicUsize; 6],
}

/// Shared allocation/release counters.
///
/// Clones share the same counters, so a ledger can be handed to every
/// invocation of a transform and inspected afterwards.
#[derive(Clone, Default)]
pub struct ResourceLedger {
    counters: Arc<Counters>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_allocation(&self, kind: ObjectKind) {
        self.counters.allocated[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn record_release(&self, kind: ObjectKind) {
        self.counters.released[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let load = |slots: &[AtomicUsize; 6]| {
            let mut out = [0usize; 6];
            for (dst, src) in out.iter_mut().zip(slots) {
                *dst = src.load(Ordering::Relaxed);
            }
            out
        };
        LedgerSnapshot {
            allocated_by_kind: load(&self.counters.allocated),
            released_by_kind: load(&self.counters.released),
        }
    }
}

impl fmt::Debug for ResourceLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        let live: Vec<(ObjectKind, usize)> = ObjectKind::ALL
            .into_iter()
            .map(|kind| (kind, snapshot.live_of(kind)))
            .filter(|(_, live)| *live > 0)
            .collect();
        f.debug_struct("ResourceLedger")
            .field("allocated", &snapshot.allocated())
            .field("released", &snapshot.released())
            .field("live", &live)
            .finish()
    }
}

/// Point-in-time copy of a ledger's counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    allocated_by_kind: [usize; 6],
    released_by_kind: [usize; 6],
}

impl LedgerSnapshot {
    pub fn allocated(&self) -> usize {
        self.allocated_by_kind.iter().sum()
    }

    pub fn released(&self) -> usize {
        self.released_by_kind.iter().sum()
    }

    /// Objects allocated but not yet released.
    pub fn live(&self) -> usize {
        self.allocated().saturating_sub(self.released())
    }

    pub fn allocated_of(&self, kind: ObjectKind) -> usize {
        self.allocated_by_kind[kind.index()]
    }

    pub fn released_of(&self, kind: ObjectKind) -> usize {
        self.released_by_kind[kind.index()]
    }

    pub fn live_of(&self, kind: ObjectKind) -> usize {
        self.allocated_of(kind).saturating_sub(self.released_of(kind))
    }
}

/// A GPU object whose release is recorded exactly once, when it drops.
pub struct Tracked<T> {
    value: T,
    kind: ObjectKind,
    label: String,
    ledger: ResourceLedger,
}

impl<T> Tracked<T> {
    pub fn new(
        ledger: &ResourceLedger,
        kind: ObjectKind,
        label: impl Into<String>,
        value: T,
    ) -> Self {
        let label = label.into();
        ledger.record_allocation(kind);
        trace!(kind = ?kind, label = %label, "allocated");
        Self {
            value,
            kind,
            label,
            ledger: ledger.clone(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Release now rather than at the end of the enclosing scope.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.ledger.record_release(self.kind);
        trace!(kind = ?self.kind, label = %self.label, "released");
    }
}

impl<T> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish()
    }
}

/// Buffer plus the logical size used for binding ranges and copies.
#[derive(Debug)]
pub struct GpuBuffer {
    buffer: Tracked<Buffer>,
    size: u64,
    kind: BufferKind,
}

impl GpuBuffer {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Logical size in bytes. The allocation may be padded beyond it.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        self.buffer.label()
    }

    /// Binding covering exactly `[0, size)`.
    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: NonZeroU64::new(self.size),
        })
    }
}

/// Create a tracked buffer of `size` bytes without any checks or upload.
pub(crate) fn create_tracked(
    ctx: &WgpuContext,
    ledger: &ResourceLedger,
    label: &str,
    size: u64,
    kind: BufferKind,
) -> Tracked<Buffer> {
    let buffer = ctx.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: padded_size(size),
        usage: kind.usage(),
        mapped_at_creation: false,
    });
    Tracked::new(ledger, ObjectKind::Buffer, label, buffer)
}

/// Allocate a buffer of `byte_size` logical bytes, optionally uploading
/// `initial`.
///
/// The upload is queued before this returns, which orders it ahead of any
/// later submission that reads the buffer.
pub fn allocate(
    ctx: &WgpuContext,
    ledger: &ResourceLedger,
    label: &str,
    initial: Option<&[u8]>,
    byte_size: u64,
    kind: BufferKind,
) -> Result<GpuBuffer, DftError> {
    if byte_size == 0 {
        return Err(DftError::Allocation {
            label: label.to_string(),
            reason: "zero-sized buffers cannot be bound".to_string(),
        });
    }
    if let Some(data) = initial {
        if data.len() as u64 != byte_size {
            return Err(DftError::Allocation {
                label: label.to_string(),
                reason: format!(
                    "{} bytes of initial data for a {byte_size}-byte buffer",
                    data.len()
                ),
            });
        }
    }

    let (buffer, error) = with_validation_scope(ctx.device(), || {
        create_tracked(ctx, ledger, label, byte_size, kind)
    });
    if let Some(err) = error {
        return Err(DftError::Validation {
            stage: format!("buffer '{label}'"),
            message: err.to_string(),
        });
    }

    if let Some(data) = initial {
        if data.len() % wgpu::COPY_BUFFER_ALIGNMENT as usize == 0 {
            ctx.queue().write_buffer(&buffer, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(padded_size(byte_size) as usize, 0);
            ctx.queue().write_buffer(&buffer, 0, &padded);
        }
    }
    debug!(
        label,
        kind = ?kind,
        bytes = byte_size,
        uploaded = initial.is_some(),
        "allocated buffer"
    );

    Ok(GpuBuffer {
        buffer,
        size: byte_size,
        kind,
    })
}

fn padded_size(size: u64) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    size.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_accepts_writes() {
        for kind in [
            BufferKind::Input,
            BufferKind::Intermediate,
            BufferKind::Output,
            BufferKind::Params,
            BufferKind::Direction,
            BufferKind::Staging,
        ] {
            assert!(kind.usage().contains(BufferUsages::COPY_DST), "{kind:?}");
        }
        assert_eq!(
            BufferKind::Staging.usage(),
            BufferUsages::MAP_READ | BufferUsages::COPY_DST
        );
        assert!(BufferKind::Output.usage().contains(BufferUsages::COPY_SRC));
        assert!(BufferKind::Intermediate.usage().contains(BufferUsages::STORAGE));
        assert!(BufferKind::Params.usage().contains(BufferUsages::UNIFORM));
        assert!(!BufferKind::Input.usage().contains(BufferUsages::UNIFORM));
    }

    #[test]
    fn tracked_objects_are_released_once() {
        let ledger = ResourceLedger::new();
        let a = Tracked::new(&ledger, ObjectKind::Buffer, "a", String::from("a"));
        let b = Tracked::new(&ledger, ObjectKind::BindGroup, "b", 7u32);
        assert_eq!(*b, 7);
        assert_eq!(a.len(), 1);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.allocated(), 2);
        assert_eq!(snapshot.live(), 2);

        a.release();
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.released_of(ObjectKind::Buffer), 1);
        assert_eq!(snapshot.released_of(ObjectKind::BindGroup), 0);
        assert_eq!(snapshot.live_of(ObjectKind::BindGroup), 1);
        let debug = format!("{ledger:?}");
        assert!(debug.contains("BindGroup"), "{debug}");
        assert!(!debug.contains("Buffer,"), "{debug}");

        drop(b);
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.allocated(), 2);
        assert_eq!(snapshot.released(), 2);
        assert_eq!(snapshot.live(), 0);
    }

    #[test]
    fn early_return_releases_everything_created_so_far() {
        fn build(ledger: &ResourceLedger, fail_at: usize) -> Result<Vec<Tracked<usize>>, usize> {
            let mut held = Vec::new();
            for step in 0..4 {
                if step == fail_at {
                    return Err(step);
                }
                held.push(Tracked::new(ledger, ObjectKind::ShaderModule, "step", step));
            }
            Ok(held)
        }

        let ledger = ResourceLedger::new();
        assert_eq!(build(&ledger, 2).unwrap_err(), 2);
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.allocated_of(ObjectKind::ShaderModule), 2);
        assert_eq!(snapshot.live(), 0);
    }

    #[test]
    fn clones_share_counters() {
        let ledger = ResourceLedger::new();
        let clone = ledger.clone();
        let held = Tracked::new(&clone, ObjectKind::Buffer, "shared", ());
        assert_eq!(ledger.snapshot().live(), 1);
        drop(held);
        assert_eq!(ledger.snapshot().live(), 0);
    }

    #[test]
    fn sizes_are_padded_to_copy_alignment() {
        assert_eq!(padded_size(1), 4);
        assert_eq!(padded_size(8), 8);
        assert_eq!(padded_size(18), 20);
    }
}
