//! Quality presets controlling V-Buffer tile size and slice count.

use glam::{UVec2, UVec3};

/// Edge length in pixels of a big tile used by the tiled light-culling prepass.
pub const BIG_TILE_SIZE: u32 = 64;

/// Integer division rounding towards positive infinity.
///
/// Returns 0 when `divisor` is 0 so that the `Off` preset collapses to an
/// empty V-Buffer instead of panicking.
pub fn div_round_up(value: u32, divisor: u32) -> u32 {
    if divisor == 0 {
        return 0;
    }
    value.div_ceil(divisor)
}

/// Volumetric lighting quality preset.
///
/// `Off` is a valid, silent no-op: a zero-sized V-Buffer with zero slices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VolumetricPreset {
    #[default]
    Off,
    Medium,
    High,
}

impl VolumetricPreset {
    /// Every preset, in ascending quality order.
    pub const ALL: [Self; 3] = [Self::Off, Self::Medium, Self::High];

    /// Select a preset from the platform support flags.
    pub fn from_settings(support_volumetrics: bool, increase_resolution: bool) -> Self {
        match (support_volumetrics, increase_resolution) {
            (false, _) => Self::Off,
            (true, false) => Self::Medium,
            (true, true) => Self::High,
        }
    }

    /// Parse a preset name (case-insensitive).
    ///
    /// Unknown names resolve to `Off`, which disables fog without failing.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "off" => Self::Off,
            "medium" => Self::Medium,
            "high" => Self::High,
            other => {
                tracing::warn!(preset = other, "unknown volumetric preset, disabling volumetrics");
                Self::Off
            }
        }
    }

    /// Screen pixels covered by one V-Buffer texel along X and Y.
    pub fn tile_size(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Medium => 8,
            Self::High => 4,
        }
    }

    /// Number of depth slices of the V-Buffer.
    pub fn slice_count(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Medium => 64,
            Self::High => 128,
        }
    }

    /// Whether the high-quality kernel variants are used.
    pub fn is_high_quality(self) -> bool {
        self == Self::High
    }

    /// V-Buffer resolution (width, height, slices) for a screen of the given size.
    pub fn resolution(self, screen_width: u32, screen_height: u32) -> UVec3 {
        let tile = self.tile_size();
        UVec3::new(
            div_round_up(screen_width, tile),
            div_round_up(screen_height, tile),
            self.slice_count(),
        )
    }

    /// Width and height of the V-Buffer for a screen of the given size.
    pub fn resolution_xy(self, screen_size: UVec2) -> UVec2 {
        self.resolution(screen_size.x, screen_size.y).truncate()
    }
}

/// Number of big tiles covering the screen along X and Y.
pub fn big_tile_counts(screen_size: UVec2) -> UVec2 {
    UVec2::new(
        div_round_up(screen_size.x, BIG_TILE_SIZE),
        div_round_up(screen_size.y, BIG_TILE_SIZE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_medium_preset_1080p_resolution() {
        let res = VolumetricPreset::Medium.resolution(1920, 1080);
        assert_eq!(res, UVec3::new(240, 135, 64));
    }

    #[test]
    fn test_high_preset_1080p_resolution() {
        let res = VolumetricPreset::High.resolution(1920, 1080);
        assert_eq!(res, UVec3::new(480, 270, 128));
    }

    #[test]
    fn test_off_preset_is_empty() {
        assert_eq!(VolumetricPreset::Off.resolution(1920, 1080), UVec3::ZERO);
        assert_eq!(VolumetricPreset::Off.tile_size(), 0);
        assert_eq!(VolumetricPreset::Off.slice_count(), 0);
    }

    #[test]
    fn test_resolution_rounds_up_partial_tiles() {
        let res = VolumetricPreset::Medium.resolution(1921, 1);
        assert_eq!(res.x, 241);
        assert_eq!(res.y, 1);
    }

    #[test]
    fn test_from_settings() {
        assert_eq!(VolumetricPreset::from_settings(false, true), VolumetricPreset::Off);
        assert_eq!(VolumetricPreset::from_settings(true, false), VolumetricPreset::Medium);
        assert_eq!(VolumetricPreset::from_settings(true, true), VolumetricPreset::High);
    }

    #[test]
    fn test_unknown_name_disables() {
        assert_eq!(VolumetricPreset::from_name("HIGH"), VolumetricPreset::High);
        assert_eq!(VolumetricPreset::from_name("ultra"), VolumetricPreset::Off);
    }

    #[test]
    fn test_big_tile_counts() {
        assert_eq!(big_tile_counts(UVec2::new(1920, 1080)), UVec2::new(30, 17));
        assert_eq!(div_round_up(5, 0), 0);
    }
}
