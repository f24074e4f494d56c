//! Camera frustum and oriented bounding boxes for density-volume culling.
//!
//! The frustum keeps both its six inward-pointing planes (extracted from the
//! view-projection matrix) and its eight corners, so that oriented boxes can
//! be tested with a separating-axis test in both directions: box against the
//! frustum planes, then frustum corners against the box faces.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Plane indices into the frustum planes array.
const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// Number of planes tested in a full frustum overlap test.
pub const FRUSTUM_PLANE_COUNT: usize = 6;
/// Number of corners tested in a full frustum overlap test.
pub const FRUSTUM_CORNER_COUNT: usize = 8;

/// A view frustum with six inward-pointing planes and eight corners.
#[derive(Clone, Debug)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far. `(a, b, c)` is the unit inward
    /// normal and `d` the signed distance term.
    planes: [Vec4; FRUSTUM_PLANE_COUNT],
    /// Near corners first, then far corners.
    corners: [Vec3; FRUSTUM_CORNER_COUNT],
}

impl Frustum {
    /// Extract planes (Gribb-Hartmann) and corners from a view-projection
    /// matrix with a `[0, 1]` clip-space depth range.
    ///
    /// Works for both standard and reverse-Z projections: the near and far
    /// planes swap roles but both are still produced.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [Vec4::ZERO; FRUSTUM_PLANE_COUNT];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[2];
        planes[FAR] = rows[3] - rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        let inv = vp.inverse();
        let mut corners = [Vec3::ZERO; FRUSTUM_CORNER_COUNT];
        let mut i = 0;
        for z in [0.0, 1.0] {
            for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
                corners[i] = inv.project_point3(Vec3::new(x, y, z));
                i += 1;
            }
        }

        Self { planes, corners }
    }

    /// Inward-pointing planes.
    pub fn planes(&self) -> &[Vec4; FRUSTUM_PLANE_COUNT] {
        &self.planes
    }

    /// World-space corners.
    pub fn corners(&self) -> &[Vec3; FRUSTUM_CORNER_COUNT] {
        &self.corners
    }
}

/// An oriented bounding box in the GPU layout consumed by the voxelization kernel.
///
/// 48 bytes: `right`, `up` and `center` rows each carry one half-extent in `w`.
/// The forward axis is `right × up`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct OrientedBBox {
    pub right: [f32; 3],
    pub extent_x: f32,
    pub up: [f32; 3],
    pub extent_y: f32,
    pub center: [f32; 3],
    pub extent_z: f32,
}

static_assertions::assert_eq_size!(OrientedBBox, [u8; 48]);

impl OrientedBBox {
    /// Build a box from a translation-rotation-scale matrix of a unit cube
    /// centered on the origin (scale = full size).
    pub fn from_transform(trs: &Mat4) -> Self {
        let vec_x = trs.x_axis.truncate();
        let vec_y = trs.y_axis.truncate();
        let vec_z = trs.z_axis.truncate();
        let len_x = vec_x.length();
        let len_y = vec_y.length();

        Self {
            right: (vec_x / len_x).to_array(),
            extent_x: 0.5 * len_x,
            up: (vec_y / len_y).to_array(),
            extent_y: 0.5 * len_y,
            center: trs.w_axis.truncate().to_array(),
            extent_z: 0.5 * vec_z.length(),
        }
    }

    pub fn center(&self) -> Vec3 {
        Vec3::from_array(self.center)
    }

    pub fn right(&self) -> Vec3 {
        Vec3::from_array(self.right)
    }

    pub fn up(&self) -> Vec3 {
        Vec3::from_array(self.up)
    }

    pub fn forward(&self) -> Vec3 {
        self.right().cross(self.up())
    }

    pub fn extents(&self) -> Vec3 {
        Vec3::new(self.extent_x, self.extent_y, self.extent_z)
    }

    /// Move the box by `-offset` (camera-relative rendering).
    pub fn translate_to_relative(&mut self, offset: Vec3) {
        self.center = (self.center() - offset).to_array();
    }

    /// Separating-axis overlap test against up to `num_planes` frustum planes
    /// and `num_corners` frustum corners.
    ///
    /// First the box is rejected if it lies entirely behind any frustum plane.
    /// Then, unless `num_corners` is 0, the frustum is rejected if all of its
    /// corners lie outside the same pair of opposite box faces, which removes
    /// the false positives of plane-only tests near frustum edges.
    pub fn overlaps(&self, frustum: &Frustum, num_planes: usize, num_corners: usize) -> bool {
        let center = self.center();
        let axes = [self.right(), self.up(), self.forward()];
        let extents = self.extents();

        for plane in frustum.planes.iter().take(num_planes) {
            let n = plane.truncate();
            let max_half_diag_proj = extents.x * n.dot(axes[0]).abs()
                + extents.y * n.dot(axes[1]).abs()
                + extents.z * n.dot(axes[2]).abs();
            let center_to_plane = n.dot(center) + plane.w;
            if max_half_diag_proj + center_to_plane < 0.0 {
                return false;
            }
        }

        if num_corners == 0 {
            return true;
        }

        for (axis, extent) in axes.iter().zip(extents.to_array()) {
            let mut outside_pos = true;
            let mut outside_neg = true;
            for corner in frustum.corners.iter().take(num_corners) {
                let proj = axis.dot(*corner - center);
                outside_pos &= proj > extent;
                outside_neg &= -proj > extent;
            }
            if outside_pos || outside_neg {
                return false;
            }
        }

        true
    }
}
