//! Density volumes: local regions of participating media.
//!
//! Provides [`DensityVolumeParameters`] (artist-facing, CPU), the compact
//! [`DensityVolumeEngineData`] record consumed by the voxelization kernel, and
//! [`DensityVolumeManager`], the default in-memory volume source.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

/// Smallest distance-fade length. Keeps the reciprocal finite when start == end.
const MIN_DISTANCE_FADE_LENGTH: f32 = 0.000_015_26;

/// Mean free path ↔ extinction and albedo ↔ scattering conversions.
pub mod rendering_utils {
    use glam::Vec3;

    pub fn mean_free_path_from_extinction(extinction: f32) -> f32 {
        1.0 / extinction
    }

    pub fn extinction_from_mean_free_path(mean_free_path: f32) -> f32 {
        1.0 / mean_free_path
    }

    pub fn absorption_from_extinction_and_scattering(extinction: f32, scattering: Vec3) -> Vec3 {
        Vec3::splat(extinction) - scattering
    }

    pub fn scattering_from_extinction_and_albedo(extinction: f32, albedo: Vec3) -> Vec3 {
        extinction * albedo
    }

    pub fn albedo_from_mean_free_path_and_scattering(mean_free_path: f32, scattering: Vec3) -> Vec3 {
        mean_free_path * scattering
    }
}

/// Per-volume GPU record, 80 bytes, std430-compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DensityVolumeEngineData {
    /// Scattering coefficient per channel, in `[0, 1]`.
    pub scattering: [f32; 3],
    /// Extinction coefficient, in `[0, 1]`.
    pub extinction: f32,
    pub texture_tiling: [f32; 3],
    /// Slice of the mask atlas, or -1 for no mask.
    pub texture_index: i32,
    pub texture_scroll: [f32; 3],
    /// Nonzero to invert the blend distance fade.
    pub invert_fade: u32,
    pub rcp_pos_face_fade: [f32; 3],
    pub rcp_dist_fade_len: f32,
    pub rcp_neg_face_fade: [f32; 3],
    pub end_times_rcp_dist_fade_len: f32,
}

static_assertions::assert_eq_size!(DensityVolumeEngineData, [u8; 80]);

impl DensityVolumeEngineData {
    /// A record that contributes nothing: no media, no mask, no fading.
    pub fn neutral() -> Self {
        Self {
            scattering: [0.0; 3],
            extinction: 0.0,
            texture_tiling: [1.0; 3],
            texture_index: -1,
            texture_scroll: [0.0; 3],
            invert_fade: 0,
            rcp_pos_face_fade: [f32::MAX; 3],
            rcp_dist_fade_len: 0.0,
            rcp_neg_face_fade: [f32::MAX; 3],
            end_times_rcp_dist_fade_len: 1.0,
        }
    }
}

impl Default for DensityVolumeEngineData {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Artist-facing description of a density volume's media and fades.
#[derive(Clone, Debug, PartialEq)]
pub struct DensityVolumeParameters {
    /// Single-scattering albedo, linear RGB in `[0, 1]`.
    pub albedo: Vec3,
    /// Distance at which light is attenuated to ~37%. At least 1.
    pub mean_free_path: f32,
    /// Full size of the volume's box along each local axis.
    pub size: Vec3,
    /// Mask atlas slice, -1 when the volume has no mask.
    pub texture_index: i32,
    pub texture_scroll_speed: Vec3,
    pub texture_tiling: Vec3,
    /// Fade distances towards the positive faces, as a fraction of the size.
    pub positive_fade: Vec3,
    /// Fade distances towards the negative faces, as a fraction of the size.
    pub negative_fade: Vec3,
    pub distance_fade_start: f32,
    pub distance_fade_end: f32,
    pub invert_fade: bool,
    texture_offset: Vec3,
}

impl Default for DensityVolumeParameters {
    fn default() -> Self {
        Self {
            albedo: Vec3::ONE,
            mean_free_path: 10.0,
            size: Vec3::ONE,
            texture_index: -1,
            texture_scroll_speed: Vec3::ZERO,
            texture_tiling: Vec3::ONE,
            positive_fade: Vec3::ZERO,
            negative_fade: Vec3::ZERO,
            distance_fade_start: 10_000.0,
            distance_fade_end: 10_000.0,
            invert_fade: false,
            texture_offset: Vec3::ZERO,
        }
    }
}

impl DensityVolumeParameters {
    /// Create parameters with the given albedo and mean free path.
    pub fn new(albedo: Vec3, mean_free_path: f32, size: Vec3) -> Self {
        let mut params = Self {
            albedo,
            mean_free_path,
            size,
            ..Self::default()
        };
        params.constrain();
        params
    }

    pub fn has_mask(&self) -> bool {
        self.texture_index >= 0
    }

    /// Animated offset of the mask texture, as of the last [`update`](Self::update).
    pub fn texture_offset(&self) -> Vec3 {
        self.texture_offset
    }

    /// Clamp to the range the engine record can represent: albedo in
    /// `[0, 1]` and a mean free path of at least 1, so that extinction and
    /// scattering stay in `[0, 1]`.
    pub fn constrain(&mut self) {
        self.albedo = self.albedo.clamp(Vec3::ZERO, Vec3::ONE);
        self.mean_free_path = self.mean_free_path.max(1.0);
    }

    /// Advance the mask scroll animation to `time` seconds.
    pub fn update(&mut self, time: f32) {
        if self.has_mask() {
            let offset = self.texture_scroll_speed * time;
            self.texture_offset = Vec3::new(-offset.x, -offset.y, offset.z);
        }
    }

    pub fn to_engine_data(&self) -> DensityVolumeEngineData {
        let extinction = rendering_utils::extinction_from_mean_free_path(self.mean_free_path);
        let scattering = rendering_utils::scattering_from_extinction_and_albedo(extinction, self.albedo);

        let dist_fade_len = (self.distance_fade_end - self.distance_fade_start).max(MIN_DISTANCE_FADE_LENGTH);
        let rcp_dist_fade_len = 1.0 / dist_fade_len;

        DensityVolumeEngineData {
            scattering: scattering.to_array(),
            extinction,
            texture_tiling: self.texture_tiling.to_array(),
            texture_index: self.texture_index,
            texture_scroll: self.texture_offset.to_array(),
            invert_fade: u32::from(self.invert_fade),
            rcp_pos_face_fade: reciprocal_fade(self.positive_fade).to_array(),
            rcp_dist_fade_len,
            rcp_neg_face_fade: reciprocal_fade(self.negative_fade).to_array(),
            end_times_rcp_dist_fade_len: self.distance_fade_end * rcp_dist_fade_len,
        }
    }
}

/// `1 / fade` per axis, with zero fades mapping to `f32::MAX` (no fade).
fn reciprocal_fade(fade: Vec3) -> Vec3 {
    let rcp = |f: f32| (1.0 / f).min(f32::MAX);
    Vec3::new(rcp(fade.x), rcp(fade.y), rcp(fade.z))
}

/// A placed density volume.
#[derive(Clone, Debug, PartialEq)]
pub struct DensityVolume {
    pub position: Vec3,
    pub rotation: Quat,
    pub parameters: DensityVolumeParameters,
}

impl DensityVolume {
    pub fn new(position: Vec3, rotation: Quat, parameters: DensityVolumeParameters) -> Self {
        Self {
            position,
            rotation,
            parameters,
        }
    }

    /// World transform of the volume's box (scale = full size).
    pub fn transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.parameters.size, self.rotation, self.position)
    }
}

/// Supplier of the active density volumes for a frame.
pub trait DensityVolumeSource {
    /// Animate the volumes to `time` and return them in their stable iteration order.
    fn prepare_density_volumes(&mut self, time: f32) -> &[DensityVolume];
}

/// In-memory density-volume registry.
#[derive(Debug, Default)]
pub struct DensityVolumeManager {
    volumes: Vec<DensityVolume>,
}

impl DensityVolumeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a volume. Its parameters are constrained on insertion.
    pub fn add(&mut self, mut volume: DensityVolume) {
        volume.parameters.constrain();
        self.volumes.push(volume);
    }

    pub fn clear(&mut self) {
        self.volumes.clear();
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn volumes(&self) -> &[DensityVolume] {
        &self.volumes
    }
}

impl DensityVolumeSource for DensityVolumeManager {
    fn prepare_density_volumes(&mut self, time: f32) -> &[DensityVolume] {
        for volume in &mut self.volumes {
            volume.parameters.update(time);
        }
        &self.volumes
    }
}
