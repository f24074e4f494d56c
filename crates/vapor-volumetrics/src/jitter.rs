//! Deterministic 7-sample jitter used to dither voxel sampling over time.
//!
//! XY offsets are the centers of 7 hexagonally close-packed circles inside
//! `(-0.5, 0.5)²`, rotated by 15 degrees so that their projections onto X and
//! Y are all distinct. The Z offsets are the centroids of 7 equal intervals
//! of `[0, 1]`, ordered in `{small, large}` pairs so the running average stays
//! near 0.5.

use glam::{Vec2, Vec3, Vec4};

/// Number of samples before the sequence repeats.
pub const JITTER_SEQUENCE_LENGTH: usize = 7;

/// Radius of each close-packed circle.
const CIRCLE_RADIUS: f32 = 0.170_540_69;
const COS_15: f32 = 0.965_925_83;
const SIN_15: f32 = 0.258_819_04;

const Z_SEQUENCE: [f32; JITTER_SEQUENCE_LENGTH] = [
    7.0 / 14.0,
    3.0 / 14.0,
    11.0 / 14.0,
    5.0 / 14.0,
    9.0 / 14.0,
    1.0 / 14.0,
    13.0 / 14.0,
];

/// The fixed XY and Z jitter tables.
#[derive(Clone, Debug, PartialEq)]
pub struct JitterSequence {
    xy: [Vec2; JITTER_SEQUENCE_LENGTH],
    z: [f32; JITTER_SEQUENCE_LENGTH],
}

impl Default for JitterSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSequence {
    pub fn new() -> Self {
        Self {
            xy: hexagonal_close_packed_circles(),
            z: Z_SEQUENCE,
        }
    }

    /// Index into the tables for the given frame.
    pub fn sample_index(frame_index: u64) -> usize {
        (frame_index % JITTER_SEQUENCE_LENGTH as u64) as usize
    }

    /// `(x, y, z)` offset for the given frame.
    pub fn sample(&self, frame_index: u64) -> Vec3 {
        let i = Self::sample_index(frame_index);
        self.xy[i].extend(self.z[i])
    }

    /// Offset packed for the volumetric constants: `(x, y, z, frame_index)`.
    pub fn sample_offset(&self, frame_index: u64) -> Vec4 {
        self.sample(frame_index).extend(frame_index as f32)
    }
}

// Packing order keeps the weighted average near the center:
//  (7)(5)
// (2)(1)(3)
//  (4)(6)
fn hexagonal_close_packed_circles() -> [Vec2; JITTER_SEQUENCE_LENGTH] {
    let r = CIRCLE_RADIUS;
    let d = 2.0 * r;
    let s = r * 3.0_f32.sqrt();

    let coords = [
        Vec2::new(0.0, 0.0),
        Vec2::new(-d, 0.0),
        Vec2::new(d, 0.0),
        Vec2::new(-r, -s),
        Vec2::new(r, s),
        Vec2::new(r, -s),
        Vec2::new(-r, s),
    ];

    coords.map(|c| Vec2::new(c.x * COS_15 - c.y * SIN_15, c.x * SIN_15 + c.y * COS_15))
}
