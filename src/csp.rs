//! Colorspace metadata carried by image parameters.
//!
//! Only the pieces the compositor actually consumes are modeled: the
//! YUV<->RGB matrix (for overlay conversion), the sample range (for
//! float normalization), chroma siting (for subsampled conversion) and
//! the alpha interpretation. Primaries and transfer tag along as pure
//! metadata so parameter equality catches changes in them.

/// YUV<->RGB matrix selection. `Rgb` marks formats that carry RGB (or
/// gray treated as RGB luma) and never go through a matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Matrix {
    Rgb,
    Bt601,
    Bt709,
    Bt2020Ncl,
}

impl Matrix {
    /// Luma weights `(kr, kb)`, or `None` for RGB.
    pub fn luma_weights(self) -> Option<(f32, f32)> {
        match self {
            Matrix::Rgb => None,
            Matrix::Bt601 => Some((0.299, 0.114)),
            Matrix::Bt709 => Some((0.2126, 0.0722)),
            Matrix::Bt2020Ncl => Some((0.2627, 0.0593)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primaries {
    /// SMPTE 170M, 525-line SD.
    Smpte170M,
    /// BT.470 BG, 625-line SD.
    Bt470Bg,
    Bt709,
    Bt2020,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    Bt1886,
    Srgb,
    Pq,
}

/// Nominal range of stored samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Levels {
    /// "TV" range: luma 16..235, chroma 16..240 (scaled by bit depth).
    Limited,
    /// "PC" range: the full storable range.
    Full,
}

/// Horizontal siting of subsampled chroma samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChromaLoc {
    Center,
    Left,
}

/// How the alpha channel (if the format has one) relates to color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlphaMode {
    /// Alpha is present but meaningless, or absent entirely.
    None,
    Straight,
    Premul,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Colorimetry {
    pub matrix: Matrix,
    pub primaries: Primaries,
    pub transfer: Transfer,
    pub levels: Levels,
}

impl Colorimetry {
    /// sRGB, full range. The colorspace of the RGBA overlay.
    pub fn srgb() -> Self {
        Self {
            matrix: Matrix::Rgb,
            primaries: Primaries::Bt709,
            transfer: Transfer::Srgb,
            levels: Levels::Full,
        }
    }

    /// BT.709 limited range, the usual default for HD video.
    pub fn bt709_limited() -> Self {
        Self {
            matrix: Matrix::Bt709,
            primaries: Primaries::Bt709,
            transfer: Transfer::Bt1886,
            levels: Levels::Limited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_weights_sum_below_one() {
        for m in [Matrix::Bt601, Matrix::Bt709, Matrix::Bt2020Ncl] {
            let (kr, kb) = m.luma_weights().unwrap();
            assert!(kr + kb < 1.0);
            assert!(kr > 0.0 && kb > 0.0);
        }
        assert!(Matrix::Rgb.luma_weights().is_none());
    }
}
