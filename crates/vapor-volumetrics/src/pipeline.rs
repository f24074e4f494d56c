//! The volumetric lighting context and its per-camera frame.
//!
//! [`VolumetricPipeline`] owns everything shared by all cameras (the visible
//! volume lists, the jitter tables, the shared V-Buffer size) and the
//! per-camera temporal state. It exists only while volumetrics are supported;
//! [`VolumetricPipeline::new`] returns `None` otherwise.
//!
//! Per camera and frame, [`render_camera`](VolumetricPipeline::render_camera)
//! records, in order:
//!
//! 1. the renderer-facing lighting texture and global constants,
//! 2. the visible density volume uploads,
//! 3. voxelization,
//! 4. lighting integration,
//! 5. the optional separable filter.
//!
//! A camera without volumetric fog only gets step 1, bound to the black volume.

use glam::{Mat4, UVec2, UVec3, Vec3};

use crate::collector::DensityVolumeCollector;
use crate::commands::{CommandRecorder, DispatchGrid, GlobalSlot, ResourceId};
use crate::density_volume::DensityVolumeSource;
use crate::filtering::record_filtering;
use crate::frustum::Frustum;
use crate::history::{CameraId, HistoryAllocator, HistoryManager};
use crate::jitter::JitterSequence;
use crate::kernel::{LightingKernel, VoxelizationKernel};
use crate::lighting::{LightingParameters, record_lighting};
use crate::preset::{VolumetricPreset, big_tile_counts};
use crate::spherical_harmonics::{
    SphericalHarmonicsL2, cornette_shanks_phase_constant, preconvolve_ambient_probe,
};
use crate::uniforms::{
    MAX_XR_VIEWS, ShaderVariablesGlobalVolumetrics, ShaderVariablesVolumetric, VolumeAtlasInfo,
    coord_to_view_dir_matrix, projection_aspect, volume_mask_dimensions, z_plane_texel_spacing,
};
use crate::vbuffer::{VBufferInputs, VBufferParameters};
use crate::voxelization::{VoxelizationParameters, record_voxelization};

/// Platform-level volumetric support.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumetricSettings {
    pub support_volumetrics: bool,
    /// High preset instead of Medium.
    pub increase_resolution: bool,
    /// Volumes are positioned relative to the camera instead of the world origin.
    pub camera_relative_rendering: bool,
}

impl Default for VolumetricSettings {
    fn default() -> Self {
        Self {
            support_volumetrics: true,
            increase_resolution: false,
            camera_relative_rendering: false,
        }
    }
}

/// Per-camera fog controls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FogSettings {
    pub enabled: bool,
    pub volumetric: bool,
    /// Distance from the near plane covered by the V-Buffer.
    pub depth_extent: f32,
    pub slice_distribution_uniformity: f32,
    /// Phase function anisotropy `g` in `(-1, 1)`.
    pub anisotropy: f32,
    pub global_light_probe_dimmer: f32,
    pub filter: bool,
    pub reprojection: bool,
}

impl Default for FogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            volumetric: true,
            depth_extent: 64.0,
            slice_distribution_uniformity: 0.75,
            anisotropy: 0.0,
            global_light_probe_dimmer: 1.0,
            filter: false,
            reprojection: true,
        }
    }
}

impl FogSettings {
    pub fn is_volumetric_fog_enabled(&self) -> bool {
        self.enabled && self.volumetric
    }
}

/// A camera as seen by the volumetric passes.
#[derive(Clone, Debug)]
pub struct CameraView {
    pub id: CameraId,
    /// Used to label per-camera GPU resources.
    pub name: String,
    /// World-space position.
    pub position: Vec3,
    /// World-to-view matrix of each view rendered in this pass (one, or two for stereo).
    pub views: Vec<Mat4>,
    /// Projection with a `[0, 1]` depth range.
    pub projection: Mat4,
    pub screen_size: UVec2,
    pub near: f32,
    pub far: f32,
    /// Radians.
    pub vertical_fov: f32,
    pub fog: FogSettings,
    pub ambient_probe: SphericalHarmonicsL2,
}

impl CameraView {
    pub fn view_count(&self) -> u32 {
        self.views.len().clamp(1, MAX_XR_VIEWS) as u32
    }

    fn main_view(&self) -> Mat4 {
        self.views.first().copied().unwrap_or(Mat4::IDENTITY)
    }
}

/// State handed over by the light-culling subsystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LightCullingInfo {
    pub has_lights_to_cull: bool,
    /// Whether the big-tile prepass ran and its light list is available.
    pub big_tile_prepass: bool,
}

/// Frame-global inputs.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInfo {
    pub frame_index: u64,
    /// Seconds, drives mask scrolling.
    pub time: f32,
}

/// What happened for one camera this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraFrameReport {
    pub fog_enabled: bool,
    pub resolution: UVec3,
    pub visible_volumes: usize,
    pub voxelization_kernel: Option<VoxelizationKernel>,
    pub lighting_kernel: Option<LightingKernel>,
    /// History validity seen by this frame's lighting pass.
    pub history_was_valid: bool,
    pub reprojected: bool,
    pub filtered: bool,
}

impl CameraFrameReport {
    fn skipped() -> Self {
        Self {
            fog_enabled: false,
            resolution: UVec3::ZERO,
            visible_volumes: 0,
            voxelization_kernel: None,
            lighting_kernel: None,
            history_was_valid: false,
            reprojected: false,
            filtered: false,
        }
    }
}

/// The lighting texture shading should sample for a camera.
pub fn lighting_texture_for_shading(fog_enabled: bool) -> ResourceId {
    if fog_enabled {
        ResourceId::LightingBuffer
    } else {
        ResourceId::BlackVolume
    }
}

fn vbuffer_parameters(preset: VolumetricPreset, camera: &CameraView) -> VBufferParameters {
    VBufferParameters::new(&VBufferInputs {
        viewport_size: preset.resolution(camera.screen_size.x, camera.screen_size.y),
        depth_extent: camera.fog.depth_extent,
        near: camera.near,
        far: camera.far,
        vertical_fov: camera.vertical_fov,
        slice_distribution_uniformity: camera.fog.slice_distribution_uniformity,
    })
}

/// Shared volumetric lighting state, created when volumetrics are supported.
#[derive(Debug)]
pub struct VolumetricPipeline {
    preset: VolumetricPreset,
    camera_relative: bool,
    collector: DensityVolumeCollector,
    jitter: JitterSequence,
    history: HistoryManager,
    /// X/Y of the shared density and lighting textures. Only grows.
    shared_buffer_size: UVec2,
}

impl VolumetricPipeline {
    pub fn new(settings: &VolumetricSettings) -> Option<Self> {
        let preset = VolumetricPreset::from_settings(settings.support_volumetrics, settings.increase_resolution);
        if preset == VolumetricPreset::Off {
            tracing::info!("volumetric lighting not supported, skipping setup");
            return None;
        }
        tracing::info!(
            ?preset,
            tile_size = preset.tile_size(),
            slices = preset.slice_count(),
            "volumetric lighting initialized"
        );
        Some(Self {
            preset,
            camera_relative: settings.camera_relative_rendering,
            collector: DensityVolumeCollector::new(),
            jitter: JitterSequence::new(),
            history: HistoryManager::new(),
            shared_buffer_size: UVec2::ZERO,
        })
    }

    pub fn preset(&self) -> VolumetricPreset {
        self.preset
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    /// Size the shared V-Buffer textures must have, in texels.
    pub fn shared_buffer_size(&self) -> UVec3 {
        self.shared_buffer_size.extend(self.preset.slice_count())
    }

    /// V-Buffer layout of `camera` this frame.
    pub fn compute_vbuffer_parameters(&self, camera: &CameraView) -> VBufferParameters {
        vbuffer_parameters(self.preset, camera)
    }

    /// Record all volumetric work of one camera. Call once per camera per frame.
    #[allow(clippy::too_many_arguments)]
    pub fn render_camera(
        &mut self,
        camera: &CameraView,
        frame: &FrameInfo,
        volumes: &mut dyn DensityVolumeSource,
        volume_atlas: Option<&VolumeAtlasInfo>,
        lights: &LightCullingInfo,
        allocator: &mut dyn HistoryAllocator,
        recorder: &mut dyn CommandRecorder,
    ) -> CameraFrameReport {
        let fog_enabled = camera.fog.is_volumetric_fog_enabled();

        let preset = self.preset;
        self.history
            .reinitialize(camera.id, fog_enabled, allocator, || vbuffer_parameters(preset, camera));

        recorder.set_global_texture(GlobalSlot::VBufferLighting, lighting_texture_for_shading(fog_enabled));
        if !fog_enabled {
            return CameraFrameReport::skipped();
        }

        let params = self.compute_vbuffer_parameters(camera);
        self.history.update(camera.id, params);
        self.shared_buffer_size = self.shared_buffer_size.max(params.viewport_size.truncate());

        let view_count = camera.view_count();
        recorder.set_global_constants(ShaderVariablesGlobalVolumetrics::new(
            &params,
            self.shared_buffer_size,
            view_count,
        ));

        let visible_volumes = self.prepare_visible_density_volumes(camera, frame.time, volumes, recorder);

        let history_textures = if camera.fog.reprojection {
            self.history
                .ensure_textures(camera.id, &camera.name, params.viewport_size, allocator);
            self.history.textures_for_frame(camera.id, frame.frame_index)
        } else {
            None
        };

        let history_was_valid = self.history.history_is_valid(camera.id);
        let constants = self.volumetric_constants(camera, frame, &params, volume_atlas, history_was_valid);
        let grid = DispatchGrid::for_resolution(params.viewport_size, view_count);
        let high_quality = self.preset.is_high_quality();

        let voxelization = VoxelizationParameters::new(
            grid,
            lights.has_lights_to_cull,
            lights.big_tile_prepass,
            high_quality,
            volume_atlas.is_some(),
            constants,
        );
        record_voxelization(&voxelization, recorder);

        let lighting = LightingParameters::new(
            grid,
            lights.big_tile_prepass,
            camera.fog.reprojection,
            history_textures,
            camera.fog.anisotropy,
            high_quality,
            camera.fog.filter,
            constants,
        );
        let reprojected = record_lighting(&lighting, recorder);
        if reprojected {
            self.history.mark_history_valid(camera.id);
        }

        if lighting.filter {
            record_filtering(grid, &constants, recorder);
        }

        tracing::trace!(
            camera = %camera.id,
            visible_volumes,
            reprojected,
            filtered = lighting.filter,
            "volumetric camera recorded"
        );

        CameraFrameReport {
            fog_enabled,
            resolution: params.viewport_size,
            visible_volumes,
            voxelization_kernel: Some(voxelization.kernel),
            lighting_kernel: Some(lighting.kernel),
            history_was_valid,
            reprojected,
            filtered: lighting.filter,
        }
    }

    /// Forget a destroyed camera and release its history textures.
    pub fn remove_camera(&mut self, camera: CameraId, allocator: &mut dyn HistoryAllocator) {
        self.history.remove_camera(camera, allocator);
    }

    fn prepare_visible_density_volumes(
        &mut self,
        camera: &CameraView,
        time: f32,
        volumes: &mut dyn DensityVolumeSource,
        recorder: &mut dyn CommandRecorder,
    ) -> usize {
        let _span = tracing::debug_span!("prepare_visible_density_volumes").entered();

        let world_to_view = if self.camera_relative {
            camera.main_view() * Mat4::from_translation(camera.position)
        } else {
            camera.main_view()
        };
        let frustum = Frustum::from_view_projection(&(camera.projection * world_to_view));

        let volumes = volumes.prepare_density_volumes(time);
        let visible = self
            .collector
            .collect(volumes, &frustum, camera.position, self.camera_relative);

        if !visible.is_empty() {
            recorder.upload_buffer(ResourceId::VolumeBounds, visible.bounds_bytes());
            recorder.upload_buffer(ResourceId::VolumeData, visible.data_bytes());
        }
        visible.len()
    }

    fn volumetric_constants(
        &self,
        camera: &CameraView,
        frame: &FrameInfo,
        params: &VBufferParameters,
        volume_atlas: Option<&VolumeAtlasInfo>,
        history_is_valid: bool,
    ) -> ShaderVariablesVolumetric {
        let resolution = params.resolution_vec4();
        let aspect = projection_aspect(&camera.projection);

        let mut cb = ShaderVariablesVolumetric::default();
        // Rotation only, so camera-relative views need no offset.
        let views: &[Mat4] = if camera.views.is_empty() { &[Mat4::IDENTITY] } else { &camera.views };
        for (dst, view) in cb.coord_to_view_dir.iter_mut().zip(views) {
            *dst = coord_to_view_dir_matrix(view, camera.vertical_fov, aspect, resolution).to_cols_array();
        }

        cb.unit_depth_texel_spacing = z_plane_texel_spacing(1.0, camera.vertical_fov, resolution.y);
        cb.num_visible_density_volumes = self.collector.visible().len() as u32;
        cb.cornette_shanks_constant = cornette_shanks_phase_constant(camera.fog.anisotropy);
        cb.history_is_valid = u32::from(history_is_valid);
        cb.sample_offset = self.jitter.sample_offset(frame.frame_index).to_array();
        cb.volume_mask_dimensions = volume_mask_dimensions(volume_atlas).to_array();
        cb.set_ambient_probe(&preconvolve_ambient_probe(
            &camera.ambient_probe,
            camera.fog.anisotropy,
            camera.fog.global_light_probe_dimmer,
        ));

        let history = self.history.get(camera.id);
        let prev = history.map_or(*params, |h| *h.previous());
        let history_size = history
            .map(|h| h.buffer_size())
            .filter(|size| size.x > 0 && size.y > 0)
            .unwrap_or(prev.viewport_size.truncate());
        cb.set_previous_frame(&prev, history_size);

        let big_tiles = big_tile_counts(camera.screen_size);
        cb.num_tile_big_tile_x = big_tiles.x;
        cb.num_tile_big_tile_y = big_tiles.y;
        cb
    }
}
