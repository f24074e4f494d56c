//! Second-order spherical harmonics and the ambient probe preconvolution.
//!
//! Coefficient `i` of a band-limited SH vector holds band `l`, order `m` at
//! `i = l(l + 1) + m`. Probes arrive with the cosine-lobe normalization baked
//! in, which is undone before convolving with the phase function.

use std::f32::consts::PI;

use glam::Vec4;

/// Number of coefficients per color channel for bands 0..=2.
pub const SH_L2_COEFFICIENT_COUNT: usize = 9;

/// Number of `Vec4` groups the preconvolved probe is packed into.
pub const PACKED_AMBIENT_PROBE_LEN: usize = 7;

/// Inverse of the cosine-lobe normalization of each coefficient.
const INV_COSINE_NORMALIZATION: [f32; SH_L2_COEFFICIENT_COUNT] = {
    const C0: f32 = 0.282_094_8; // 1 / (2 sqrt(pi))
    const C1: f32 = 0.325_735_02; // sqrt(3 / pi) / 3
    const C2: f32 = 0.273_137_1; // sqrt(15 / pi) / 8
    const C3: f32 = 0.078_847_89; // sqrt(5 / pi) / 16
    const C4: f32 = 0.136_568_55; // sqrt(15 / pi) / 16
    [
        1.0 / C0,
        -1.0 / C1,
        1.0 / C1,
        -1.0 / C1,
        1.0 / C2,
        -1.0 / C2,
        1.0 / C3,
        -1.0 / C2,
        1.0 / C4,
    ]
};

/// Basis function constants folded into the coefficients before upload.
const BASIS_CONSTANTS: [f32; SH_L2_COEFFICIENT_COUNT] = {
    const K0: f32 = 0.282_094_8; // {0, 0}: 1/2 sqrt(1/pi)
    const K1: f32 = 0.488_602_5; // {1, 0}: 1/2 sqrt(3/pi)
    const K2: f32 = 1.092_548_4; // {2,-2}: 1/2 sqrt(15/pi)
    const K3: f32 = 0.315_391_57; // {2, 0}: 1/4 sqrt(5/pi)
    const K4: f32 = 0.546_274_2; // {2, 2}: 1/4 sqrt(15/pi)
    [K0, -K1, K1, -K1, K2, -K2, K3, -K2, K4]
};

/// RGB spherical harmonics up to band 2.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SphericalHarmonicsL2 {
    /// `coefficients[channel][i]`.
    pub coefficients: [[f32; SH_L2_COEFFICIENT_COUNT]; 3],
}

impl SphericalHarmonicsL2 {
    /// Constant radiance `rgb` in every direction, in the cosine-rescaled
    /// convention probes are delivered in.
    pub fn ambient(rgb: [f32; 3]) -> Self {
        let mut sh = Self::default();
        for (channel, value) in rgb.into_iter().enumerate() {
            sh.coefficients[channel][0] = value;
        }
        sh
    }

    fn map_coefficients(mut self, f: impl Fn(usize, f32) -> f32) -> Self {
        for channel in &mut self.coefficients {
            for (i, coeff) in channel.iter_mut().enumerate() {
                *coeff = f(i, *coeff);
            }
        }
        self
    }

    /// Remove the cosine-lobe normalization applied by the probe baker.
    pub fn undo_cosine_rescaling(self) -> Self {
        self.map_coefficients(|i, c| c * INV_COSINE_NORMALIZATION[i])
    }

    /// Scale every coefficient by `factor`.
    pub fn rescale(self, factor: f32) -> Self {
        self.map_coefficients(|_, c| c * factor)
    }

    /// Convolve with a rotationally symmetric kernel.
    pub fn convolve(self, zh: &ZonalHarmonicsL2) -> Self {
        self.map_coefficients(|i, c| c * zh.convolution_weight(band_of(i)))
    }

    /// Fold the SH basis constants into the coefficients.
    pub fn premultiply(self) -> Self {
        self.map_coefficients(|i, c| c * BASIS_CONSTANTS[i])
    }

    /// Pack into the 7 `Vec4` layout evaluated by the lighting kernel.
    pub fn pack(&self) -> [Vec4; PACKED_AMBIENT_PROBE_LEN] {
        let sh = &self.coefficients;
        let mut packed = [Vec4::ZERO; PACKED_AMBIENT_PROBE_LEN];
        for c in 0..3 {
            packed[c] = Vec4::new(sh[c][3], sh[c][1], sh[c][2], sh[c][0] - sh[c][6]);
            packed[3 + c] = Vec4::new(sh[c][4], sh[c][5], sh[c][6] * 3.0, sh[c][7]);
        }
        packed[6] = Vec4::new(sh[0][8], sh[1][8], sh[2][8], 1.0);
        packed
    }
}

fn band_of(i: usize) -> usize {
    match i {
        0 => 0,
        1..=3 => 1,
        _ => 2,
    }
}

/// Zonal harmonics (the `m = 0` coefficients) of a rotationally symmetric function.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ZonalHarmonicsL2 {
    pub coefficients: [f32; 3],
}

impl ZonalHarmonicsL2 {
    /// Fit of the Cornette–Shanks phase function with anisotropy `g`.
    pub fn cornette_shanks(g: f32) -> Self {
        let g2 = g * g;
        Self {
            coefficients: [
                0.282_095,
                0.293_162 * g * (4.0 + g2) / (2.0 + g2),
                (0.126_157 + 1.441_79 * g2 + 0.324_403 * g2 * g2) / (2.0 + g2),
            ],
        }
    }

    /// Funk–Hecke scale applied to band `l` when convolving.
    fn convolution_weight(&self, l: usize) -> f32 {
        let n = (4.0 * PI / (2 * l + 1) as f32).sqrt();
        n * self.coefficients[l]
    }
}

/// Direction-independent part of the Cornette–Shanks phase function.
pub fn cornette_shanks_phase_constant(anisotropy: f32) -> f32 {
    let g2 = anisotropy * anisotropy;
    (3.0 / (8.0 * PI)) * (1.0 - g2) / (2.0 + g2)
}

/// Undo cosine rescaling, dim, convolve with the phase function and pack
/// the ambient probe for the volumetric constants.
pub fn preconvolve_ambient_probe(
    probe: &SphericalHarmonicsL2,
    anisotropy: f32,
    dimmer: f32,
) -> [Vec4; PACKED_AMBIENT_PROBE_LEN] {
    let phase = ZonalHarmonicsL2::cornette_shanks(anisotropy);
    probe
        .undo_cosine_rescaling()
        .rescale(dimmer)
        .convolve(&phase)
        .premultiply()
        .pack()
}
