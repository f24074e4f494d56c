//! Kernel variant selection.
//!
//! Every pass picks its compute kernel through a total function of its
//! quality flags, so each flag combination names exactly one variant.

use std::fmt;

/// Voxelization kernel variant, indexed by `tiled | high_quality << 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoxelizationKernel {
    Default,
    Tiled,
    HighQuality,
    TiledHighQuality,
}

impl VoxelizationKernel {
    pub const ALL: [Self; 4] = [
        Self::Default,
        Self::Tiled,
        Self::HighQuality,
        Self::TiledHighQuality,
    ];

    pub fn select(tiled_lighting: bool, high_quality: bool) -> Self {
        match (tiled_lighting, high_quality) {
            (false, false) => Self::Default,
            (true, false) => Self::Tiled,
            (false, true) => Self::HighQuality,
            (true, true) => Self::TiledHighQuality,
        }
    }

    /// Kernel index in the voxelization shader.
    pub fn index(self) -> u32 {
        match self {
            Self::Default => 0,
            Self::Tiled => 1,
            Self::HighQuality => 2,
            Self::TiledHighQuality => 3,
        }
    }

    pub fn is_tiled(self) -> bool {
        matches!(self, Self::Tiled | Self::TiledHighQuality)
    }

    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Default => "voxelize",
            Self::Tiled => "voxelize_tiled",
            Self::HighQuality => "voxelize_hq",
            Self::TiledHighQuality => "voxelize_tiled_hq",
        }
    }
}

/// Lighting kernel variant: one per combination of the four feature flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LightingKernel {
    pub tiled_lighting: bool,
    pub reprojection: bool,
    pub anisotropy: bool,
    pub high_quality: bool,
}

impl LightingKernel {
    pub const VARIANT_COUNT: usize = 16;

    /// Every variant, ordered by [`index`](Self::index).
    pub const ALL: [Self; Self::VARIANT_COUNT] = {
        let mut all = [Self {
            tiled_lighting: false,
            reprojection: false,
            anisotropy: false,
            high_quality: false,
        }; Self::VARIANT_COUNT];
        let mut i = 0;
        while i < Self::VARIANT_COUNT {
            all[i] = Self::from_index(i as u32);
            i += 1;
        }
        all
    };

    pub fn select(tiled_lighting: bool, reprojection: bool, anisotropy: f32, high_quality: bool) -> Self {
        Self {
            tiled_lighting,
            reprojection,
            anisotropy: anisotropy != 0.0,
            high_quality,
        }
    }

    pub const fn from_index(index: u32) -> Self {
        Self {
            tiled_lighting: index & 1 != 0,
            reprojection: index & 2 != 0,
            anisotropy: index & 4 != 0,
            high_quality: index & 8 != 0,
        }
    }

    pub fn index(self) -> u32 {
        u32::from(self.tiled_lighting)
            | u32::from(self.reprojection) << 1
            | u32::from(self.anisotropy) << 2
            | u32::from(self.high_quality) << 3
    }

    /// Shader defines enabling this variant.
    pub fn keywords(self) -> Vec<&'static str> {
        let mut keywords = Vec::with_capacity(4);
        if !self.tiled_lighting {
            keywords.push("LIGHTLOOP_DISABLE_TILE_AND_CLUSTER");
        }
        if self.reprojection {
            keywords.push("ENABLE_REPROJECTION");
        }
        if self.anisotropy {
            keywords.push("ENABLE_ANISOTROPY");
        }
        keywords.push(if self.high_quality {
            "VL_PRESET_HQ"
        } else {
            "VL_PRESET_MQ"
        });
        keywords
    }
}

impl fmt::Display for LightingKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "volumetric_lighting[{}]", self.keywords().join(","))
    }
}

/// Separable filter kernel direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterKernel {
    X,
    Y,
}

impl FilterKernel {
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::X => "filter_volumetric_lighting_x",
            Self::Y => "filter_volumetric_lighting_y",
        }
    }
}

/// Any kernel dispatched by the volumetric passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelId {
    Voxelization(VoxelizationKernel),
    Lighting(LightingKernel),
    Filter(FilterKernel),
}

impl KernelId {
    /// Every kernel the pipeline may request.
    pub fn all() -> impl Iterator<Item = Self> {
        VoxelizationKernel::ALL
            .into_iter()
            .map(Self::Voxelization)
            .chain(LightingKernel::ALL.into_iter().map(Self::Lighting))
            .chain([FilterKernel::X, FilterKernel::Y].into_iter().map(Self::Filter))
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voxelization(k) => f.write_str(k.entry_point()),
            Self::Lighting(k) => k.fmt(f),
            Self::Filter(k) => f.write_str(k.entry_point()),
        }
    }
}
