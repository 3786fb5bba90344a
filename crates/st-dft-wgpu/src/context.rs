// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::sync::Arc;

use spiral_config::{DftConfig, PowerMode};
use tracing::debug;
use wgpu::{AdapterInfo, Device, Limits, Queue};

use crate::error::DftError;
use crate::geometry::WorkgroupLimits;

/// Device/queue pair every invocation runs on.
#[derive(Clone, Debug)]
pub struct WgpuContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
    adapter: Option<AdapterInfo>,
}

impl WgpuContext {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        Self {
            device,
            queue,
            adapter: None,
        }
    }

    /// Bring up an adapter and device according to `config`.
    ///
    /// The device is requested with the adapter's own limits so dispatch
    /// sizing sees everything the hardware offers.
    pub fn request(config: &DftConfig) -> Result<Self, DftError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let power_preference = match config.power {
            PowerMode::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerMode::LowPower => wgpu::PowerPreference::LowPower,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            force_fallback_adapter: config.force_fallback_adapter,
            compatible_surface: None,
        }))
        .ok_or(DftError::NoAdapter)?;

        let info = adapter.get_info();
        debug!(
            adapter = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("st.dft.device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
            },
            None,
        ))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter: Some(info),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Adapter description when the context was created by [`Self::request`].
    pub fn adapter_info(&self) -> Option<&AdapterInfo> {
        self.adapter.as_ref()
    }

    pub fn limits(&self) -> Limits {
        self.device.limits()
    }

    /// Compute-dispatch maxima reported by the device.
    pub fn workgroup_limits(&self) -> WorkgroupLimits {
        WorkgroupLimits::from_limits(&self.device.limits())
    }
}
