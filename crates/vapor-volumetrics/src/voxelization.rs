//! Volume voxelization: rasterizes the visible density volumes into the
//! shared density texture.

use crate::commands::{BindingSlot, CommandRecorder, DispatchGrid, ResourceId};
use crate::kernel::{KernelId, VoxelizationKernel};
use crate::uniforms::ShaderVariablesVolumetric;

/// Everything the voxelization dispatch needs, resolved up front.
#[derive(Clone, Debug)]
pub struct VoxelizationParameters {
    pub kernel: VoxelizationKernel,
    pub grid: DispatchGrid,
    /// Mask atlas, or the black volume when the scene has none.
    pub volume_atlas: ResourceId,
    pub constants: ShaderVariablesVolumetric,
}

impl VoxelizationParameters {
    /// Tiled culling is used only when there are lights to cull and the
    /// big-tile prepass ran this frame.
    pub fn new(
        grid: DispatchGrid,
        has_lights_to_cull: bool,
        big_tile_prepass: bool,
        high_quality: bool,
        has_volume_atlas: bool,
        constants: ShaderVariablesVolumetric,
    ) -> Self {
        let tiled_lighting = has_lights_to_cull && big_tile_prepass;
        Self {
            kernel: VoxelizationKernel::select(tiled_lighting, high_quality),
            grid,
            volume_atlas: if has_volume_atlas {
                ResourceId::VolumeMaskAtlas
            } else {
                ResourceId::BlackVolume
            },
            constants,
        }
    }
}

/// Bind inputs and dispatch the voxelization kernel.
pub fn record_voxelization(params: &VoxelizationParameters, recorder: &mut dyn CommandRecorder) {
    let _span = tracing::debug_span!("volume_voxelization", kernel = params.kernel.index()).entered();
    let kernel = KernelId::Voxelization(params.kernel);

    recorder.begin_scope("volume_voxelization");

    if params.kernel.is_tiled() {
        recorder.bind_buffer(kernel, BindingSlot::BigTileLightList, ResourceId::BigTileLightList);
    }
    recorder.bind_texture(kernel, BindingSlot::VBufferDensity, ResourceId::DensityBuffer);
    recorder.bind_buffer(kernel, BindingSlot::VolumeBounds, ResourceId::VolumeBounds);
    recorder.bind_buffer(kernel, BindingSlot::VolumeData, ResourceId::VolumeData);
    recorder.bind_texture(kernel, BindingSlot::VolumeMaskAtlas, params.volume_atlas);
    recorder.push_constants(kernel, &params.constants);
    recorder.dispatch(kernel, params.grid);

    recorder.end_scope();
}
