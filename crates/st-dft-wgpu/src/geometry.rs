// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Dispatch sizing shared by the row and column passes.

use crate::error::DftError;

/// Device maxima that bound a compute dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkgroupLimits {
    pub max_size_x: u32,
    pub max_size_y: u32,
    pub max_size_z: u32,
    pub max_invocations: u32,
    pub max_workgroups_per_dimension: u32,
}

impl WorkgroupLimits {
    pub fn from_limits(limits: &wgpu::Limits) -> Self {
        Self {
            max_size_x: limits.max_compute_workgroup_size_x,
            max_size_y: limits.max_compute_workgroup_size_y,
            max_size_z: limits.max_compute_workgroup_size_z,
            max_invocations: limits.max_compute_invocations_per_workgroup,
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        }
    }
}

/// Workgroup size and grid for one `rows x cols` invocation.
///
/// Both passes cover the same domain, so one geometry serves both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchGeometry {
    workgroup: [u32; 3],
    groups: [u32; 3],
}

impl DispatchGeometry {
    /// Square-ish workgroups: each axis gets
    /// `min(max_axis, floor(sqrt(max_invocations)))`, never less than one.
    pub fn from_limits(limits: &WorkgroupLimits, rows: usize, cols: usize) -> Self {
        let side = isqrt(limits.max_invocations.max(1));
        let wg_x = side.min(limits.max_size_x).max(1);
        let wg_y = side.min(limits.max_size_y).max(1);
        Self {
            workgroup: [wg_x, wg_y, 1],
            groups: [groups_for(cols, wg_x), groups_for(rows, wg_y), 1],
        }
    }

    /// Reject grids the device cannot launch.
    pub fn validate(&self, limits: &WorkgroupLimits) -> Result<(), DftError> {
        let [wg_x, wg_y, wg_z] = self.workgroup;
        if wg_x > limits.max_size_x || wg_y > limits.max_size_y || wg_z > limits.max_size_z {
            return Err(DftError::InvalidGeometry(format!(
                "workgroup {wg_x}x{wg_y}x{wg_z} exceeds the per-axis maxima {}x{}x{}",
                limits.max_size_x, limits.max_size_y, limits.max_size_z
            )));
        }
        let invocations = u64::from(wg_x) * u64::from(wg_y) * u64::from(wg_z);
        if invocations > u64::from(limits.max_invocations) {
            return Err(DftError::InvalidGeometry(format!(
                "workgroup of {invocations} invocations exceeds the limit of {}",
                limits.max_invocations
            )));
        }
        if let Some(groups) = self
            .groups
            .iter()
            .find(|&&g| g > limits.max_workgroups_per_dimension)
        {
            return Err(DftError::InvalidGeometry(format!(
                "{groups} workgroups along one axis exceeds the limit of {}",
                limits.max_workgroups_per_dimension
            )));
        }
        Ok(())
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup
    }

    pub fn workgroups(&self) -> [u32; 3] {
        self.groups
    }

    /// Whether the grid reaches every element of a `rows x cols` domain.
    pub fn covers(&self, rows: usize, cols: usize) -> bool {
        let reach_x = u64::from(self.groups[0]) * u64::from(self.workgroup[0]);
        let reach_y = u64::from(self.groups[1]) * u64::from(self.workgroup[1]);
        reach_x >= cols as u64 && reach_y >= rows as u64
    }
}

/// `ceil(len / size)`, saturated so oversize domains fail validation instead
/// of wrapping.
fn groups_for(len: usize, size: u32) -> u32 {
    let groups = (len as u64).div_ceil(u64::from(size));
    u32::try_from(groups).unwrap_or(u32::MAX)
}

fn isqrt(value: u32) -> u32 {
    let mut root = (value as f64).sqrt() as u32;
    while u64::from(root) * u64::from(root) > u64::from(value) {
        root -= 1;
    }
    while u64::from(root + 1) * u64::from(root + 1) <= u64::from(value) {
        root += 1;
    }
    root
}
