//! Setup-time error types. Per-frame work degrades instead of failing.

use crate::preset::VolumetricPreset;

#[derive(Debug, thiserror::Error)]
pub enum VolumetricsError {
    /// GPU resources were requested for a preset that has no V-Buffer.
    #[error("volumetric preset {0:?} has no V-Buffer to allocate")]
    EmptyPreset(VolumetricPreset),

    /// The V-Buffer would exceed the device's 3D texture limit.
    #[error("V-Buffer of {width}x{height}x{depth} exceeds the device 3D texture limit of {limit}")]
    VBufferTooLarge {
        width: u32,
        height: u32,
        depth: u32,
        limit: u32,
    },

    /// Zero-sized screen passed to resource creation.
    #[error("invalid screen size {width}x{height}")]
    InvalidScreenSize { width: u32, height: u32 },
}
