//! Compute device resolution.
//!
//! The device is picked once, at startup, and carried around as a
//! [`DeviceInfo`]. Whether the run could be spread over several accelerators
//! is recorded as a capability flag rather than rediscovered from device
//! names later on.

use candle_core::Device;
use tracing::info;

use crate::config::DeviceRequest;
use crate::error::Result;

/// The active device and what it supports.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device: Device,
    /// True on accelerators that can host replicated model copies.
    pub supports_data_parallel: bool,
}

impl DeviceInfo {
    /// CPU, no data parallelism.
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            supports_data_parallel: false,
        }
    }

    /// Resolve a request, falling back to CPU for `Auto` when no accelerator
    /// is compiled in or present.
    pub fn resolve(request: DeviceRequest) -> Result<Self> {
        let device = match request {
            DeviceRequest::Cpu => Device::Cpu,
            DeviceRequest::Cuda(ordinal) => Device::new_cuda(ordinal)?,
            DeviceRequest::Metal => Device::new_metal(0)?,
            DeviceRequest::Auto => {
                if candle_core::utils::cuda_is_available() {
                    Device::new_cuda(0)?
                } else if candle_core::utils::metal_is_available() {
                    Device::new_metal(0)?
                } else {
                    Device::Cpu
                }
            }
        };
        let info = Self::from_device(device);
        info!(
            device = ?info.device,
            data_parallel = info.supports_data_parallel,
            "resolved compute device"
        );
        Ok(info)
    }

    /// Introspect an already constructed device.
    pub fn from_device(device: Device) -> Self {
        let supports_data_parallel = device.is_cuda() || device.is_metal();
        Self {
            device,
            supports_data_parallel,
        }
    }
}
