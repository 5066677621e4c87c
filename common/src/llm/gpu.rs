use candle_core::{DType, Device};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuBackend {
    Cuda,
    Metal,
    Cpu,
}

impl GpuBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuBackend::Cuda => "cuda",
            GpuBackend::Metal => "metal",
            GpuBackend::Cpu => "cpu",
        }
    }

    pub fn class(&self) -> DeviceClass {
        match self {
            GpuBackend::Cuda | GpuBackend::Metal => DeviceClass::Accelerator,
            GpuBackend::Cpu => DeviceClass::Cpu,
        }
    }

    /// half precision on accelerators, full precision on the cpu
    pub fn dtype(&self) -> DType {
        match self.class() {
            DeviceClass::Accelerator => DType::F16,
            DeviceClass::Cpu => DType::F32,
        }
    }
}

/// memory caps are configured per class, not per backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Accelerator,
    Cpu,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Accelerator => "accelerator",
            DeviceClass::Cpu => "cpu",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub backend: GpuBackend,
    pub device: Device,
    pub dtype: DType,
}

impl DeviceConfig {
    pub fn cpu() -> Self {
        Self {
            backend: GpuBackend::Cpu,
            device: Device::Cpu,
            dtype: GpuBackend::Cpu.dtype(),
        }
    }

    pub fn is_accelerated(&self) -> bool {
        self.backend.class() == DeviceClass::Accelerator
    }
}

fn force_cpu() -> bool {
    env::var("FORCE_CPU")
        .map(|v| {
            let v = v.to_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}

fn try_cuda() -> Option<Device> {
    if !candle_core::utils::cuda_is_available() {
        return None;
    }
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            tracing::warn!("cuda reported available but failed to initialize: {}", e);
            None
        }
    }
}

fn try_metal() -> Option<Device> {
    if !candle_core::utils::metal_is_available() {
        return None;
    }
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            tracing::warn!("metal reported available but failed to initialize: {}", e);
            None
        }
    }
}

/// picks cuda, then metal, then cpu
pub fn select_device() -> DeviceConfig {
    if force_cpu() {
        tracing::info!("gpu acceleration disabled (cpu mode forced)");
        return DeviceConfig::cpu();
    }

    let (backend, device) = if let Some(device) = try_cuda() {
        (GpuBackend::Cuda, device)
    } else if let Some(device) = try_metal() {
        (GpuBackend::Metal, device)
    } else {
        tracing::info!("no gpu acceleration available, using cpu");
        return DeviceConfig::cpu();
    };

    let config = DeviceConfig {
        backend,
        device,
        dtype: backend.dtype(),
    };

    tracing::info!(
        "gpu acceleration enabled: backend={}, dtype={:?}",
        backend.as_str(),
        config.dtype
    );

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_device() {
        let config = select_device();
        assert!(matches!(
            config.backend,
            GpuBackend::Cuda | GpuBackend::Metal | GpuBackend::Cpu
        ));
        assert_eq!(config.dtype, config.backend.dtype());
    }

    #[test]
    fn test_precision_by_class() {
        assert_eq!(GpuBackend::Cuda.dtype(), DType::F16);
        assert_eq!(GpuBackend::Metal.dtype(), DType::F16);
        assert_eq!(GpuBackend::Cpu.dtype(), DType::F32);
        assert!(!DeviceConfig::cpu().is_accelerated());
    }
}
