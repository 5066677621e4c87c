use crate::error::{ChatError, Result};
use crate::llm::gpu::DeviceClass;
use std::sync::atomic::{AtomicUsize, Ordering};

/// per-device-class caps on the weight footprint, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    pub accelerator: u64,
    pub cpu: u64,
}

impl MemoryLimits {
    pub fn parse(accelerator: &str, cpu: &str) -> Result<Self> {
        Ok(Self {
            accelerator: parse_memory_size(accelerator)?,
            cpu: parse_memory_size(cpu)?,
        })
    }

    pub fn for_class(&self, class: DeviceClass) -> u64 {
        match class {
            DeviceClass::Accelerator => self.accelerator,
            DeviceClass::Cpu => self.cpu,
        }
    }

    /// fail when the estimated footprint does not fit the cap of the device class
    pub fn check(&self, class: DeviceClass, required: u64) -> Result<()> {
        let limit = self.for_class(class);
        if required > limit {
            return Err(ChatError::ModelLoad(format!(
                "model needs ~{} bytes but the {} memory cap is {} bytes",
                required,
                class.as_str(),
                limit
            )));
        }
        Ok(())
    }
}

/// parses sizes like "4GB", "512MiB" or "1.5 gb" into bytes
pub fn parse_memory_size(raw: &str) -> Result<u64> {
    let text = raw.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| ChatError::Config(format!("invalid memory size: {:?}", raw)))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        other => {
            return Err(ChatError::Config(format!(
                "unknown memory unit {:?} in {:?}",
                other, raw
            )))
        }
    };

    Ok((value * multiplier as f64) as u64)
}

static HEAP_RELEASES: AtomicUsize = AtomicUsize::new(0);

/// hands freed allocator pages back to the os
pub fn release_heap() {
    // safe to call from any thread; a no-op when mimalloc holds nothing
    unsafe { libmimalloc_sys::mi_collect(true) };
    HEAP_RELEASES.fetch_add(1, Ordering::Relaxed);
}

/// number of heap collections run by this process so far
pub fn heap_releases() -> usize {
    HEAP_RELEASES.load(Ordering::Relaxed)
}
