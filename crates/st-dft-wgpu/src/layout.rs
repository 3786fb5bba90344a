// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The binding contract shared by the row and column kernels.
//!
//! | slot | contents | access |
//! |------|----------|--------|
//! | 0 | pass input | read-only storage |
//! | 1 | pass output | read-write storage |
//! | 2 | `(rows, cols)` | uniform |
//! | 3 | direction flag | uniform, directional kernels only |

use std::num::NonZeroU64;

use spiral_config::KernelFamily;
use wgpu::{
    BindGroup, BindGroupLayout, BindGroupLayoutEntry, BindingType, BufferBindingType, Device,
    ShaderStages,
};

use crate::error::DftError;
use crate::resources::{BufferKind, GpuBuffer, ObjectKind, ResourceLedger, Tracked};
use crate::util::with_validation_scope;

pub const SLOT_INPUT: u32 = 0;
pub const SLOT_OUTPUT: u32 = 1;
pub const SLOT_PARAMS: u32 = 2;
pub const SLOT_DIRECTION: u32 = 3;

/// Size of each uniform block, padded to 16 bytes.
pub const UNIFORM_SIZE: u64 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingLayout {
    /// All four slots.
    Directional,
    /// Slots 0 to 2; the kernels only run forward.
    ForwardOnly,
}

impl BindingLayout {
    pub fn for_kernels(family: KernelFamily) -> Self {
        match family {
            KernelFamily::Directional => BindingLayout::Directional,
            KernelFamily::ForwardOnly => BindingLayout::ForwardOnly,
        }
    }

    pub fn has_direction(self) -> bool {
        matches!(self, BindingLayout::Directional)
    }

    pub fn slot_count(self) -> usize {
        if self.has_direction() {
            4
        } else {
            3
        }
    }

    pub fn entries(self) -> Vec<BindGroupLayoutEntry> {
        let mut entries = vec![
            storage_entry(SLOT_INPUT, true),
            storage_entry(SLOT_OUTPUT, false),
            uniform_entry(SLOT_PARAMS),
        ];
        if self.has_direction() {
            entries.push(uniform_entry(SLOT_DIRECTION));
        }
        entries
    }

    pub fn create(
        self,
        device: &Device,
        ledger: &ResourceLedger,
    ) -> Result<Tracked<BindGroupLayout>, DftError> {
        let entries = self.entries();
        let (layout, error) = with_validation_scope(device, || {
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("st.dft.bind_group_layout"),
                entries: &entries,
            });
            Tracked::new(ledger, ObjectKind::BindGroupLayout, "st.dft.bind_group_layout", layout)
        });
        match error {
            None => Ok(layout),
            Some(err) => Err(DftError::Validation {
                stage: "bind group layout".to_string(),
                message: err.to_string(),
            }),
        }
    }
}

fn storage_entry(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(UNIFORM_SIZE),
        },
        count: None,
    }
}

/// Buffers bound for one pass.
#[derive(Clone, Copy, Debug)]
pub struct PassBindings<'a> {
    pub input: &'a GpuBuffer,
    pub output: &'a GpuBuffer,
    pub params: &'a GpuBuffer,
    pub direction: Option<&'a GpuBuffer>,
}

/// Kind and logical size of whatever is bound to a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDesc {
    pub kind: BufferKind,
    pub size: u64,
}

impl From<&GpuBuffer> for SlotDesc {
    fn from(buffer: &GpuBuffer) -> Self {
        Self {
            kind: buffer.kind(),
            size: buffer.size(),
        }
    }
}

/// Check a pass's buffers against `layout` before anything is bound.
pub fn check_slots(
    layout: BindingLayout,
    input: SlotDesc,
    output: SlotDesc,
    params: SlotDesc,
    direction: Option<SlotDesc>,
) -> Result<(), DftError> {
    let mismatch = |msg: String| Err(DftError::Binding(msg));

    if !matches!(input.kind, BufferKind::Input | BufferKind::Intermediate) {
        return mismatch(format!("slot {SLOT_INPUT} cannot read from a {:?} buffer", input.kind));
    }
    if !matches!(output.kind, BufferKind::Intermediate | BufferKind::Output) {
        return mismatch(format!("slot {SLOT_OUTPUT} cannot write to a {:?} buffer", output.kind));
    }
    if input.size != output.size {
        return mismatch(format!(
            "input holds {} bytes but output holds {}",
            input.size, output.size
        ));
    }
    if params.kind != BufferKind::Params || params.size != UNIFORM_SIZE {
        return mismatch(format!("slot {SLOT_PARAMS} expects a {UNIFORM_SIZE}-byte params uniform"));
    }
    match (layout.has_direction(), direction) {
        (true, Some(desc)) if desc.kind == BufferKind::Direction && desc.size == UNIFORM_SIZE => {
            Ok(())
        }
        (true, Some(_)) => mismatch(format!(
            "slot {SLOT_DIRECTION} expects a {UNIFORM_SIZE}-byte direction uniform"
        )),
        (true, None) => mismatch(format!(
            "layout declares slot {SLOT_DIRECTION} but no direction buffer was given"
        )),
        (false, Some(_)) => mismatch(
            "direction buffer given for a layout without a direction slot".to_string(),
        ),
        (false, None) => Ok(()),
    }
}

/// Bind `bindings` against `layout`, each slot covering exactly the buffer's
/// logical size.
pub fn bind_group(
    device: &Device,
    ledger: &ResourceLedger,
    label: &str,
    layout: BindingLayout,
    bind_group_layout: &BindGroupLayout,
    bindings: &PassBindings<'_>,
) -> Result<Tracked<BindGroup>, DftError> {
    check_slots(
        layout,
        bindings.input.into(),
        bindings.output.into(),
        bindings.params.into(),
        bindings.direction.map(SlotDesc::from),
    )?;

    let mut entries = vec![
        wgpu::BindGroupEntry {
            binding: SLOT_INPUT,
            resource: bindings.input.binding(),
        },
        wgpu::BindGroupEntry {
            binding: SLOT_OUTPUT,
            resource: bindings.output.binding(),
        },
        wgpu::BindGroupEntry {
            binding: SLOT_PARAMS,
            resource: bindings.params.binding(),
        },
    ];
    if let Some(direction) = bindings.direction {
        entries.push(wgpu::BindGroupEntry {
            binding: SLOT_DIRECTION,
            resource: direction.binding(),
        });
    }

    let (group, error) = with_validation_scope(device, || {
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: bind_group_layout,
            entries: &entries,
        });
        Tracked::new(ledger, ObjectKind::BindGroup, label, group)
    });
    match error {
        None => Ok(group),
        Some(err) => Err(DftError::Validation {
            stage: format!("bind group '{label}'"),
            message: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(kind: BufferKind, size: u64) -> SlotDesc {
        SlotDesc { kind, size }
    }

    fn params() -> SlotDesc {
        desc(BufferKind::Params, UNIFORM_SIZE)
    }

    #[test]
    fn directional_layout_declares_four_slots() {
        let entries = BindingLayout::Directional.entries();
        assert_eq!(entries.len(), 4);
        let bindings: Vec<u32> = entries.iter().map(|e| e.binding).collect();
        assert_eq!(bindings, vec![SLOT_INPUT, SLOT_OUTPUT, SLOT_PARAMS, SLOT_DIRECTION]);
        assert!(matches!(
            entries[0].ty,
            BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: true },
                ..
            }
        ));
        assert!(matches!(
            entries[1].ty,
            BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: false },
                ..
            }
        ));
        for entry in &entries[2..] {
            assert!(matches!(
                entry.ty,
                BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    ..
                }
            ));
            assert_eq!(entry.visibility, ShaderStages::COMPUTE);
        }
    }

    #[test]
    fn forward_only_layout_drops_the_direction_slot() {
        let layout = BindingLayout::for_kernels(KernelFamily::ForwardOnly);
        assert_eq!(layout, BindingLayout::ForwardOnly);
        assert_eq!(layout.slot_count(), 3);
        assert!(layout
            .entries()
            .iter()
            .all(|entry| entry.binding != SLOT_DIRECTION));
    }

    #[test]
    fn row_and_column_bindings_are_accepted() {
        let input = desc(BufferKind::Input, 128);
        let intermediate = desc(BufferKind::Intermediate, 128);
        let output = desc(BufferKind::Output, 128);
        let direction = Some(desc(BufferKind::Direction, UNIFORM_SIZE));
        let directional = BindingLayout::Directional;
        assert!(check_slots(directional, input, intermediate, params(), direction).is_ok());
        assert!(check_slots(directional, intermediate, output, params(), direction).is_ok());
        let forward = BindingLayout::ForwardOnly;
        assert!(check_slots(forward, input, intermediate, params(), None).is_ok());
    }

    #[test]
    fn direction_slot_must_match_the_layout() {
        let input = desc(BufferKind::Input, 64);
        let output = desc(BufferKind::Output, 64);
        let direction = Some(desc(BufferKind::Direction, UNIFORM_SIZE));
        assert!(matches!(
            check_slots(BindingLayout::Directional, input, output, params(), None),
            Err(DftError::Binding(_))
        ));
        assert!(matches!(
            check_slots(BindingLayout::ForwardOnly, input, output, params(), direction),
            Err(DftError::Binding(_))
        ));
    }

    #[test]
    fn size_and_role_mismatches_are_rejected() {
        let input = desc(BufferKind::Input, 64);
        let short = desc(BufferKind::Output, 56);
        assert!(check_slots(BindingLayout::ForwardOnly, input, short, params(), None).is_err());

        let staging = desc(BufferKind::Staging, 64);
        assert!(check_slots(BindingLayout::ForwardOnly, input, staging, params(), None).is_err());

        let wrong_params = desc(BufferKind::Params, 8);
        let output = desc(BufferKind::Output, 64);
        let layout = BindingLayout::ForwardOnly;
        assert!(check_slots(layout, input, output, wrong_params, None).is_err());
    }
}
