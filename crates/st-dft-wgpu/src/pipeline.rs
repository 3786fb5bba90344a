// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use spiral_config::KernelFamily;
use tracing::debug;
use wgpu::{BindGroupLayout, ComputePipeline, PipelineLayout, ShaderModule};

use crate::context::WgpuContext;
use crate::error::DftError;
use crate::resources::{ObjectKind, ResourceLedger, Tracked};
use crate::util::{create_module, with_validation_scope, ShaderCache};

/// Entry point every kernel template exports.
pub const ENTRY_POINT: &str = "main";

/// Which axis a pass transforms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    Row,
    Column,
}

impl PassKind {
    /// Template file for this pass under `family`.
    pub fn template(self, family: KernelFamily) -> &'static str {
        match (self, family) {
            (PassKind::Row, KernelFamily::Directional) => "row.wgsl",
            (PassKind::Column, KernelFamily::Directional) => "col.wgsl",
            (PassKind::Row, KernelFamily::ForwardOnly) => "row_forward.wgsl",
            (PassKind::Column, KernelFamily::ForwardOnly) => "col_forward.wgsl",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PassKind::Row => "st.dft.row",
            PassKind::Column => "st.dft.col",
        }
    }
}

/// Module, layout and pipeline for one pass. Dropping it releases all three.
#[derive(Debug)]
pub struct PassKernel {
    pipeline: Tracked<ComputePipeline>,
    _layout: Tracked<PipelineLayout>,
    _module: Tracked<ShaderModule>,
}

impl PassKernel {
    pub fn pipeline(&self) -> &ComputePipeline {
        &self.pipeline
    }
}

/// Resolve the template for `pass` without touching the device.
pub fn specialise(
    cache: &mut ShaderCache,
    pass: PassKind,
    family: KernelFamily,
    workgroup: [u32; 3],
) -> Result<String, DftError> {
    Ok(cache.specialised(pass.template(family), workgroup)?)
}

/// Compile an already specialised source into a compute pipeline bound to
/// `bind_group_layout`.
pub fn compile_kernel(
    ctx: &WgpuContext,
    ledger: &ResourceLedger,
    pass: PassKind,
    source: String,
    context: &str,
    bind_group_layout: &BindGroupLayout,
) -> Result<PassKernel, DftError> {
    let device = ctx.device();
    let label = pass.label();

    let module = create_module(device, label, source, context)?;
    let module = Tracked::new(ledger, ObjectKind::ShaderModule, label, module);

    let (built, error) = with_validation_scope(device, || {
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[bind_group_layout],
            push_constant_ranges: &[],
        });
        let layout = Tracked::new(ledger, ObjectKind::PipelineLayout, label, layout);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&*layout),
            module: &*module,
            entry_point: ENTRY_POINT,
            compilation_options: Default::default(),
        });
        let pipeline = Tracked::new(ledger, ObjectKind::ComputePipeline, label, pipeline);
        (layout, pipeline)
    });
    let (layout, pipeline) = built;
    if let Some(err) = error {
        return Err(DftError::Validation {
            stage: format!("pipeline '{label}'"),
            message: err.to_string(),
        });
    }

    debug!(pass = ?pass, context, "compiled kernel");
    Ok(PassKernel {
        pipeline,
        _layout: layout,
        _module: module,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_follow_the_kernel_family() {
        assert_eq!(PassKind::Row.template(KernelFamily::Directional), "row.wgsl");
        assert_eq!(PassKind::Column.template(KernelFamily::Directional), "col.wgsl");
        assert_eq!(PassKind::Row.template(KernelFamily::ForwardOnly), "row_forward.wgsl");
        assert_eq!(PassKind::Column.template(KernelFamily::ForwardOnly), "col_forward.wgsl");
        assert_ne!(PassKind::Row.label(), PassKind::Column.label());
    }

    #[test]
    fn specialising_bundled_templates_needs_no_device() {
        let mut cache = ShaderCache::new(crate::util::default_shader_dir());
        for family in [KernelFamily::Directional, KernelFamily::ForwardOnly] {
            for pass in [PassKind::Row, PassKind::Column] {
                let source = specialise(&mut cache, pass, family, [8, 4, 1]).unwrap();
                assert!(source.contains("@workgroup_size(8, 4, 1)"));
                assert!(source.contains("fn main("));
            }
        }
    }

    #[test]
    fn missing_template_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ShaderCache::new(dir.path());
        let err = specialise(&mut cache, PassKind::Row, KernelFamily::Directional, [1, 1, 1])
            .unwrap_err();
        assert!(matches!(err, DftError::Shader(_)));
    }
}
