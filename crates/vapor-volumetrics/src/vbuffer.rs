//! V-Buffer parameters: grid resolution and logarithmic depth slicing.
//!
//! Slices are distributed along view distance with a generalized logarithmic
//! mapping. The `slice_distribution_uniformity` control blends between a
//! strongly logarithmic distribution (0) and a nearly linear one (1).
//!
//! Encoding maps a distance `d` in `[near, far]` to a normalized slice
//! coordinate `t` in `[0, 1]`:
//!
//! ```text
//! t = enc.x + enc.y * log2(d - enc.z)
//! d = dec.x * exp2(t * dec.y) + dec.z
//! ```

use glam::{UVec2, UVec3, Vec4};

/// Lower bound of the distribution constant. Uniformity 1 would otherwise give `c = 0`.
const MIN_DISTRIBUTION_CONSTANT: f32 = 0.001;

/// Camera and fog inputs to [`VBufferParameters::new`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VBufferInputs {
    /// V-Buffer resolution (width, height, slices) from the quality preset.
    pub viewport_size: UVec3,
    /// Requested fog distance measured from the near plane.
    pub depth_extent: f32,
    /// Camera near clip distance.
    pub near: f32,
    /// Camera far clip distance.
    pub far: f32,
    /// Vertical field of view in radians.
    pub vertical_fov: f32,
    /// Slice distribution control in `[0, 1]`.
    pub slice_distribution_uniformity: f32,
}

/// Per-frame V-Buffer layout for one camera.
///
/// Two of these are retained per camera (current and previous). They are
/// replaced wholesale every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VBufferParameters {
    pub viewport_size: UVec3,
    pub depth_encoding_params: Vec4,
    pub depth_decoding_params: Vec4,
}

impl VBufferParameters {
    /// Derive the grid and the depth mapping from camera intrinsics.
    ///
    /// The V-Buffer is capped by the sphere enclosing the camera's far plane,
    /// so slices never extend past the visible frustum.
    pub fn new(inputs: &VBufferInputs) -> Self {
        let viewport = inputs.viewport_size;
        let aspect_ratio = if viewport.y == 0 {
            1.0
        } else {
            viewport.x as f32 / viewport.y as f32
        };

        let far_plane_height = 2.0 * (0.5 * inputs.vertical_fov).tan() * inputs.far;
        let far_plane_width = far_plane_height * aspect_ratio;
        let far_plane_max_dim = far_plane_width.max(far_plane_height);
        let far_plane_dist =
            (inputs.far * inputs.far + 0.25 * far_plane_max_dim * far_plane_max_dim).sqrt();

        let near_dist = inputs.near;
        let far_dist = (near_dist + inputs.depth_extent).min(far_plane_dist);

        let uniformity = inputs.slice_distribution_uniformity.clamp(0.0, 1.0);
        let c = (2.0 - 2.0 * uniformity).max(MIN_DISTRIBUTION_CONSTANT);

        Self {
            viewport_size: viewport,
            depth_encoding_params: logarithmic_depth_encoding_params(near_dist, far_dist, c),
            depth_decoding_params: logarithmic_depth_decoding_params(near_dist, far_dist, c),
        }
    }

    /// A zero-width, zero-height viewport marks parameters that were never computed.
    pub fn is_uninitialized(&self) -> bool {
        self.viewport_size.x == 0 && self.viewport_size.y == 0
    }

    /// Map a view distance to a normalized slice coordinate, clamped to `[0, 1]`.
    ///
    /// Distances at or inside the near plane map to 0, distances past the
    /// depth extent map to 1.
    pub fn encode_depth(&self, distance: f32) -> f32 {
        let p = self.depth_encoding_params;
        (p.x + p.y * (distance - p.z).max(0.0).log2()).clamp(0.0, 1.0)
    }

    /// Map a normalized slice coordinate back to a view distance.
    pub fn decode_depth(&self, t: f32) -> f32 {
        let p = self.depth_decoding_params;
        p.x * (t * p.y).exp2() + p.z
    }

    /// Slice containing the given view distance, clamped to the grid.
    pub fn slice_index(&self, distance: f32) -> u32 {
        let slices = self.viewport_size.z;
        if slices == 0 {
            return 0;
        }
        let t = self.encode_depth(distance);
        ((t * slices as f32) as u32).min(slices - 1)
    }

    /// View distance at the center of the given slice.
    pub fn slice_center_distance(&self, slice: u32) -> f32 {
        let slices = self.viewport_size.z.max(1) as f32;
        self.decode_depth((slice as f32 + 0.5) / slices)
    }

    /// Distance to the center of the last slice.
    pub fn last_slice_distance(&self, slice_count: u32) -> f32 {
        let t = 1.0 - 0.5 / slice_count.max(1) as f32;
        self.decode_depth(t)
    }

    /// UV scale and clamp limit for sampling this viewport inside a larger buffer.
    ///
    /// Returns `(vp.x / buf.x, vp.y / buf.y, (vp.x - 0.5) / buf.x, (vp.y - 0.5) / buf.y)`.
    pub fn uv_scale_and_limit(&self, buffer_size: UVec2) -> Vec4 {
        if buffer_size.x == 0 || buffer_size.y == 0 {
            return Vec4::ZERO;
        }
        let rcp_x = 1.0 / buffer_size.x as f32;
        let rcp_y = 1.0 / buffer_size.y as f32;
        let vp_x = self.viewport_size.x as f32;
        let vp_y = self.viewport_size.y as f32;
        Vec4::new(
            vp_x * rcp_x,
            vp_y * rcp_y,
            (vp_x - 0.5) * rcp_x,
            (vp_y - 0.5) * rcp_y,
        )
    }

    /// `(width, height, 1 / width, 1 / height)`, the layout the kernels consume.
    pub fn resolution_vec4(&self) -> Vec4 {
        let w = self.viewport_size.x as f32;
        let h = self.viewport_size.y as f32;
        let rcp = |v: f32| if v > 0.0 { 1.0 / v } else { 0.0 };
        Vec4::new(w, h, rcp(w), rcp(h))
    }
}

fn logarithmic_depth_encoding_params(near: f32, far: f32, c: f32) -> Vec4 {
    let y = 1.0 / (c * (far - near) + 1.0).log2();
    Vec4::new(c.log2() * y, y, near - 1.0 / c, 0.0)
}

fn logarithmic_depth_decoding_params(near: f32, far: f32, c: f32) -> Vec4 {
    Vec4::new(1.0 / c, (c * (far - near) + 1.0).log2(), near - 1.0 / c, 0.0)
}
