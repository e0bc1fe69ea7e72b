// Defaults and limits for the simulated address space

use crate::memory::{AddressRange, MemoryError, Size};

/// First simulated address
pub const DEFAULT_START: u64 = 0;

/// The simulated range is `2^DEFAULT_MEMORY_POWER` bytes wide
pub const DEFAULT_MEMORY_POWER: u32 = 32;

/// Leaf granularity of the segment tree
pub const DEFAULT_CHUNK_SIZE: u64 = 4096;

/// Largest leaf buffer we are willing to materialize
pub const MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Widest range that still has a representable exclusive end
pub const MAX_MEMORY_POWER: u32 = 63;

/// Snapshot history budget (256 MB)
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 256 * 1024 * 1024;

/// Everything needed to build a simulator and its replay history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorConfig {
    pub start: u64,
    pub memory_power: u32,
    pub chunk_size: u64,
    pub snapshot_limit: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            start: DEFAULT_START,
            memory_power: DEFAULT_MEMORY_POWER,
            chunk_size: DEFAULT_CHUNK_SIZE,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
        }
    }
}

impl SimulatorConfig {
    /// Width of the simulated range, if it is representable
    pub fn width(&self) -> Option<Size> {
        if self.memory_power > MAX_MEMORY_POWER {
            return None;
        }
        Some(1u64 << self.memory_power)
    }

    /// Resolve `[start, start + 2^memory_power)` into a validated range
    pub fn address_range(&self) -> Result<AddressRange, MemoryError> {
        let end = self
            .width()
            .and_then(|width| self.start.checked_add(width))
            .ok_or_else(|| MemoryError::InvalidGeometry {
                message: format!(
                    "0x{:x} + 2^{} does not fit in a 64-bit address",
                    self.start, self.memory_power
                ),
            })?;
        AddressRange::new(self.start, end, self.chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_range() {
        let range = SimulatorConfig::default().address_range().unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.end, 1 << 32);
        assert_eq!(range.chunk_size, 4096);
    }

    #[test]
    fn test_range_overflow_rejected() {
        let config = SimulatorConfig {
            start: u64::MAX - 10,
            ..SimulatorConfig::default()
        };
        assert!(matches!(
            config.address_range(),
            Err(MemoryError::InvalidGeometry { .. })
        ));

        let config = SimulatorConfig {
            memory_power: 64,
            ..SimulatorConfig::default()
        };
        assert!(config.address_range().is_err());
    }
}
