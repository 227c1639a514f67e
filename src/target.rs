//! Hardware target description.
//!
//! A `Target` carries the launch limits the candidate space is constrained
//! by (warp width, threads per block, shared memory) plus the occupancy
//! figures the simulated measurer uses. Its fingerprint partitions the
//! config database so results from one GPU are never served on another.

use serde::{Deserialize, Serialize};

/// GPU vendor family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vendor {
    Nvidia,
    Amd,
    Generic,
}

impl Vendor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nvidia => "nvidia",
            Self::Amd => "amd",
            Self::Generic => "generic",
        }
    }
}

/// Launch limits and throughput figures for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub vendor: Vendor,
    /// Architecture name, e.g. "sm_80"
    pub arch: String,
    /// Threads executing in lockstep (32 on NVIDIA, 64 on CDNA)
    pub threads_per_warp: usize,
    pub max_threads_per_block: usize,
    pub max_shared_memory_per_block: usize,
    pub num_sms: usize,
    pub max_blocks_per_sm: usize,
    /// Sustained global memory bandwidth in GB/s
    pub memory_bandwidth_gbs: f64,
    /// Fixed kernel launch overhead in microseconds
    pub launch_overhead_us: f64,
}

impl Target {
    pub fn nvidia_a100() -> Self {
        Target {
            vendor: Vendor::Nvidia,
            arch: "sm_80".to_string(),
            threads_per_warp: 32,
            max_threads_per_block: 1024,
            max_shared_memory_per_block: 48 * 1024,
            num_sms: 108,
            max_blocks_per_sm: 32,
            memory_bandwidth_gbs: 1555.0,
            launch_overhead_us: 3.0,
        }
    }

    pub fn nvidia_rtx3070() -> Self {
        Target {
            vendor: Vendor::Nvidia,
            arch: "sm_86".to_string(),
            threads_per_warp: 32,
            max_threads_per_block: 1024,
            max_shared_memory_per_block: 48 * 1024,
            num_sms: 46,
            max_blocks_per_sm: 16,
            memory_bandwidth_gbs: 448.0,
            launch_overhead_us: 4.0,
        }
    }

    pub fn amd_mi250() -> Self {
        Target {
            vendor: Vendor::Amd,
            arch: "gfx90a".to_string(),
            threads_per_warp: 64,
            max_threads_per_block: 1024,
            max_shared_memory_per_block: 64 * 1024,
            num_sms: 110,
            max_blocks_per_sm: 32,
            memory_bandwidth_gbs: 1600.0,
            launch_overhead_us: 5.0,
        }
    }

    /// Look up a preset by its short name ("a100", "rtx3070", "mi250").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "a100" | "sm_80" => Some(Self::nvidia_a100()),
            "rtx3070" | "sm_86" => Some(Self::nvidia_rtx3070()),
            "mi250" | "gfx90a" => Some(Self::amd_mi250()),
            _ => None,
        }
    }

    /// Stable identifier used as the database partition key.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}_{}_w{}_t{}",
            self.vendor.name(),
            self.arch,
            self.threads_per_warp,
            self.max_threads_per_block
        )
    }

    /// Maximum warps that fit in one block.
    #[inline]
    pub fn max_warps_per_block(&self) -> usize {
        self.max_threads_per_block / self.threads_per_warp.max(1)
    }
}

/// The target used when the caller does not name one.
pub fn default_target() -> Target {
    Target::nvidia_a100()
}

impl Default for Target {
    fn default() -> Self {
        default_target()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_distinguishes_presets() {
        let a = Target::nvidia_a100().fingerprint();
        let b = Target::amd_mi250().fingerprint();
        assert_eq!(a, "nvidia_sm_80_w32_t1024");
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Target::from_name("A100"), Some(Target::nvidia_a100()));
        assert_eq!(Target::from_name("gfx90a").unwrap().threads_per_warp, 64);
        assert!(Target::from_name("tpu").is_none());
    }

    #[test]
    fn test_max_warps() {
        assert_eq!(Target::nvidia_a100().max_warps_per_block(), 32);
        assert_eq!(Target::amd_mi250().max_warps_per_block(), 16);
    }
}
