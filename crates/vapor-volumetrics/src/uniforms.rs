//! GPU constant blocks for the volumetric kernels and the renderer.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, UVec2, Vec4};

use crate::spherical_harmonics::PACKED_AMBIENT_PROBE_LEN;
use crate::vbuffer::VBufferParameters;

/// Maximum number of views rendered in a single pass (stereo).
pub const MAX_XR_VIEWS: usize = 2;

/// Per-camera, per-frame constants of the voxelization, lighting and filtering kernels.
///
/// 368 bytes, std140-compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ShaderVariablesVolumetric {
    /// Column-major pixel-coordinate to world-space view-direction matrix per view.
    pub coord_to_view_dir: [[f32; 16]; MAX_XR_VIEWS],
    pub unit_depth_texel_spacing: f32,
    pub num_visible_density_volumes: u32,
    pub cornette_shanks_constant: f32,
    /// 1 when the history buffer holds a previous frame that may be reprojected.
    pub history_is_valid: u32,
    /// Jitter `(x, y, z, frame_index)`.
    pub sample_offset: [f32; 4],
    pub volume_mask_dimensions: [f32; 4],
    /// Ambient probe convolved with the phase function.
    pub ambient_probe_coeffs: [[f32; 4]; PACKED_AMBIENT_PROBE_LEN],
    pub prev_viewport_size: [f32; 4],
    pub history_prev_uv_scale_and_limit: [f32; 4],
    pub prev_depth_encoding_params: [f32; 4],
    pub prev_depth_decoding_params: [f32; 4],
    pub num_tile_big_tile_x: u32,
    pub num_tile_big_tile_y: u32,
    /// Padding to a 16-byte multiple.
    pub _pad: [u32; 2],
}

static_assertions::assert_eq_size!(ShaderVariablesVolumetric, [u8; 368]);

impl Default for ShaderVariablesVolumetric {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl ShaderVariablesVolumetric {
    pub fn set_ambient_probe(&mut self, packed: &[Vec4; PACKED_AMBIENT_PROBE_LEN]) {
        for (dst, src) in self.ambient_probe_coeffs.iter_mut().zip(packed) {
            *dst = src.to_array();
        }
    }

    /// Copy the previous frame's V-Buffer layout, as sampled from a history
    /// buffer of `history_buffer_size` texels.
    pub fn set_previous_frame(&mut self, prev: &VBufferParameters, history_buffer_size: UVec2) {
        self.prev_viewport_size = prev.resolution_vec4().to_array();
        self.history_prev_uv_scale_and_limit = prev.uv_scale_and_limit(history_buffer_size).to_array();
        self.prev_depth_encoding_params = prev.depth_encoding_params.to_array();
        self.prev_depth_decoding_params = prev.depth_decoding_params.to_array();
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// V-Buffer constants shared with every shader that samples the lighting buffer.
///
/// 80 bytes, std140-compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderVariablesGlobalVolumetrics {
    /// `(w, h, 1/w, 1/h)` of the current viewport.
    pub viewport_size: [f32; 4],
    pub shared_uv_scale_and_limit: [f32; 4],
    pub distance_encoding_params: [f32; 4],
    pub distance_decoding_params: [f32; 4],
    /// Slices per view.
    pub slice_count: u32,
    pub rcp_slice_count: f32,
    pub last_slice_distance: f32,
    pub rcp_instanced_view_count: f32,
}

static_assertions::assert_eq_size!(ShaderVariablesGlobalVolumetrics, [u8; 80]);

impl ShaderVariablesGlobalVolumetrics {
    /// Build from the camera's current V-Buffer layout.
    ///
    /// In single-pass stereo the slices are split between views, so the
    /// per-view slice count is the total divided by `view_count`.
    pub fn new(current: &VBufferParameters, shared_buffer_size: UVec2, view_count: u32) -> Self {
        let view_count = view_count.max(1);
        let slice_count = current.viewport_size.z / view_count;
        let rcp_slice_count = if slice_count > 0 {
            1.0 / slice_count as f32
        } else {
            0.0
        };

        Self {
            viewport_size: current.resolution_vec4().to_array(),
            shared_uv_scale_and_limit: current.uv_scale_and_limit(shared_buffer_size).to_array(),
            distance_encoding_params: current.depth_encoding_params.to_array(),
            distance_decoding_params: current.depth_decoding_params.to_array(),
            slice_count,
            rcp_slice_count,
            last_slice_distance: current.last_slice_distance(slice_count),
            rcp_instanced_view_count: 1.0 / view_count as f32,
        }
    }
}

/// Dimensions of the 3D mask atlas, whose slices are stacked along X.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeAtlasInfo {
    pub width: u32,
    pub depth: u32,
}

/// `(w / d, w, d, log2 w)`, or zero without an atlas.
pub fn volume_mask_dimensions(atlas: Option<&VolumeAtlasInfo>) -> Vec4 {
    match atlas {
        Some(atlas) if atlas.width > 0 && atlas.depth > 0 => {
            let w = atlas.width as f32;
            let d = atlas.depth as f32;
            Vec4::new(w / d, w, d, w.log2())
        }
        _ => Vec4::ZERO,
    }
}

/// Width/height ratio encoded in a perspective projection matrix.
pub fn projection_aspect(projection: &Mat4) -> f32 {
    if projection.x_axis.x == 0.0 {
        return 1.0;
    }
    projection.y_axis.y / projection.x_axis.x
}

/// Size of one texel at `distance` along the view axis, for a target of `resolution_y` rows.
pub fn z_plane_texel_spacing(distance: f32, vertical_fov: f32, resolution_y: f32) -> f32 {
    if resolution_y <= 0.0 {
        return 0.0;
    }
    distance * (0.5 * vertical_fov).tan() * 2.0 / resolution_y
}

/// Matrix taking `(px, py, 1, 0)` in V-Buffer texel coordinates (origin top-left)
/// to an unnormalized world-space direction through that texel.
///
/// `resolution` is `(w, h, 1/w, 1/h)`. The texel center `(w/2, h/2)` maps
/// onto the camera's forward direction.
pub fn coord_to_view_dir_matrix(
    world_to_view: &Mat4,
    vertical_fov: f32,
    aspect: f32,
    resolution: Vec4,
) -> Mat4 {
    let tan_half = (0.5 * vertical_fov).tan();
    let tan_half_x = tan_half * aspect;

    let raster_to_view = Mat4::from_cols(
        Vec4::new(2.0 * tan_half_x * resolution.z, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -2.0 * tan_half * resolution.w, 0.0, 0.0),
        Vec4::new(-tan_half_x, tan_half, -1.0, 0.0),
        Vec4::new(0.0, 0.0, 0.0, 1.0),
    );

    let view_to_world_rotation = Mat4::from_mat3(Mat3::from_mat4(*world_to_view).transpose());
    view_to_world_rotation * raster_to_view
}
