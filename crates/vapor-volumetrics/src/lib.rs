//! Volumetric fog: V-Buffer layout, density volume culling, temporal jitter,
//! ambient probe convolution and the voxelization, lighting and filtering passes.

pub mod collector;
pub mod commands;
pub mod density_volume;
mod error;
pub mod filtering;
pub mod frustum;
pub mod gpu;
pub mod history;
pub mod jitter;
pub mod kernel;
pub mod lighting;
mod pipeline;
mod preset;
pub mod spherical_harmonics;
pub mod uniforms;
mod vbuffer;
pub mod voxelization;

pub use collector::{DensityVolumeCollector, MAX_VISIBLE_VOLUME_COUNT, VisibleVolumeLists};
pub use commands::{
    BindingSlot, Command, CommandList, CommandRecorder, DispatchGrid, GROUP_SIZE_1D, GlobalSlot,
    ResourceId,
};
pub use density_volume::{
    DensityVolume, DensityVolumeEngineData, DensityVolumeManager, DensityVolumeParameters,
    DensityVolumeSource, rendering_utils,
};
pub use error::VolumetricsError;
pub use frustum::{Frustum, OrientedBBox};
pub use gpu::{
    EncodeStats, GpuVolumetricResources, KernelFamily, KernelPipelines, VolumetricKernelPipelines,
    WgpuHistoryAllocator, encode_commands,
};
pub use history::{
    CameraHistory, CameraId, HistoryAllocator, HistoryManager, HistoryTextures, Texture3DHandle,
    VolumeTextureDesc, VolumeTextureFormat,
};
pub use jitter::{JITTER_SEQUENCE_LENGTH, JitterSequence};
pub use kernel::{FilterKernel, KernelId, LightingKernel, VoxelizationKernel};
pub use pipeline::{
    CameraFrameReport, CameraView, FogSettings, FrameInfo, LightCullingInfo, VolumetricPipeline,
    VolumetricSettings, lighting_texture_for_shading,
};
pub use preset::{BIG_TILE_SIZE, VolumetricPreset, big_tile_counts, div_round_up};
pub use spherical_harmonics::{
    SphericalHarmonicsL2, ZonalHarmonicsL2, cornette_shanks_phase_constant,
    preconvolve_ambient_probe,
};
pub use uniforms::{
    MAX_XR_VIEWS, ShaderVariablesGlobalVolumetrics, ShaderVariablesVolumetric, VolumeAtlasInfo,
};
pub use vbuffer::{VBufferInputs, VBufferParameters};
