use serde::{Deserialize, Serialize};

use crate::errors::Bm3dError;

const HD_WIDTH_U: usize = 2048;
const HD_HEIGHT_U: usize = 1536;
const SD_WIDTH_U: usize = 1024;
const SD_HEIGHT_U: usize = 576;

/// Color matrix tags, numbered as in ITU-T H.273 where applicable.
/// `Opp` is the opponent color space BM3D uses to decorrelate RGB channels.
/// `Minimum`/`Maximum` are grayscale-reduction pseudo-matrices and are
/// rejected by the full RGB<->YUV conversion routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMatrix {
    Gbr,
    Bt709,
    Unspecified,
    Fcc,
    Bt470bg,
    Smpte170m,
    Smpte240m,
    YCgCo,
    Bt2020nc,
    Bt2020c,
    Opp,
    Minimum,
    Maximum,
}

impl ColorMatrix {
    /// Parses the integer tag used by the host parameter surface.
    pub fn from_tag(tag: i64) -> Result<Self, Bm3dError> {
        match tag {
            0 => Ok(ColorMatrix::Gbr),
            1 => Ok(ColorMatrix::Bt709),
            2 => Ok(ColorMatrix::Unspecified),
            4 => Ok(ColorMatrix::Fcc),
            5 => Ok(ColorMatrix::Bt470bg),
            6 => Ok(ColorMatrix::Smpte170m),
            7 => Ok(ColorMatrix::Smpte240m),
            8 => Ok(ColorMatrix::YCgCo),
            9 => Ok(ColorMatrix::Bt2020nc),
            10 => Ok(ColorMatrix::Bt2020c),
            100 => Ok(ColorMatrix::Opp),
            _ => Err(Bm3dError::UnsupportedMatrix),
        }
    }

    pub fn tag(self) -> i64 {
        match self {
            ColorMatrix::Gbr => 0,
            ColorMatrix::Bt709 => 1,
            ColorMatrix::Unspecified => 2,
            ColorMatrix::Fcc => 4,
            ColorMatrix::Bt470bg => 5,
            ColorMatrix::Smpte170m => 6,
            ColorMatrix::Smpte240m => 7,
            ColorMatrix::YCgCo => 8,
            ColorMatrix::Bt2020nc => 9,
            ColorMatrix::Bt2020c => 10,
            ColorMatrix::Opp => 100,
            ColorMatrix::Minimum => 101,
            ColorMatrix::Maximum => 102,
        }
    }
}

/// Published Kr/Kg/Kb luma constants for the weighted matrices.
pub fn matrix_parameter(matrix: ColorMatrix) -> (f64, f64, f64) {
    match matrix {
        ColorMatrix::Gbr => (0.0, 1.0, 0.0),
        ColorMatrix::Bt709 => (0.2126, 0.7152, 0.0722),
        ColorMatrix::Fcc => (0.30, 0.59, 0.11),
        ColorMatrix::Bt470bg => (0.299, 0.587, 0.114),
        ColorMatrix::Smpte170m => (0.299, 0.587, 0.114),
        ColorMatrix::Smpte240m => (0.212, 0.701, 0.087),
        ColorMatrix::YCgCo => (0.25, 0.50, 0.25),
        ColorMatrix::Bt2020nc => (0.2627, 0.6780, 0.0593),
        ColorMatrix::Bt2020c => (0.2627, 0.6780, 0.0593),
        ColorMatrix::Opp => (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0),
        _ => (0.2126, 0.7152, 0.0722),
    }
}

/// Full RGB -> YUV coefficient rows (Yr..Yb, Ur..Ub, Vr..Vb).
pub fn rgb_to_yuv_parameter(matrix: ColorMatrix) -> [[f64; 3]; 3] {
    match matrix {
        ColorMatrix::Gbr => [
            // E'Y = E'G, E'Pb = E'B, E'Pr = E'R
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
        ],
        ColorMatrix::YCgCo => [
            [0.25, 0.5, 0.25],
            [-0.25, 0.5, -0.25],
            [0.5, 0.0, -0.5],
        ],
        ColorMatrix::Opp => [
            // Y = (R + G + B) / 3, U = (R - B) / 2, V = (R - 2G + B) / 4
            [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
            [0.5, 0.0, -0.5],
            [0.25, -0.5, 0.25],
        ],
        _ => {
            let (kr, kg, kb) = matrix_parameter(matrix);
            [
                [kr, kg, kb],
                [-kr * 0.5 / (1.0 - kb), -kg * 0.5 / (1.0 - kb), 0.5],
                [0.5, -kg * 0.5 / (1.0 - kr), -kb * 0.5 / (1.0 - kr)],
            ]
        }
    }
}

/// Full YUV -> RGB coefficient rows (Ry..Rv, Gy..Gv, By..Bv).
pub fn yuv_to_rgb_parameter(matrix: ColorMatrix) -> [[f64; 3]; 3] {
    match matrix {
        ColorMatrix::Gbr => [
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
        ],
        ColorMatrix::YCgCo => [
            [1.0, -1.0, 1.0],
            [1.0, 1.0, 0.0],
            [1.0, -1.0, -1.0],
        ],
        ColorMatrix::Opp => [
            // R = Y + U + (2/3)V, G = Y - (4/3)V, B = Y - U + (2/3)V
            [1.0, 1.0, 2.0 / 3.0],
            [1.0, 0.0, -4.0 / 3.0],
            [1.0, -1.0, 2.0 / 3.0],
        ],
        _ => {
            let (kr, kg, kb) = matrix_parameter(matrix);
            [
                [1.0, 0.0, 2.0 * (1.0 - kr)],
                [
                    1.0,
                    -2.0 * kb * (1.0 - kb) / kg,
                    -2.0 * kr * (1.0 - kr) / kg,
                ],
                [1.0, 2.0 * (1.0 - kb), 0.0],
            ]
        }
    }
}

/// Default matrix derived from frame resolution when none is specified.
pub fn default_matrix(width: usize, height: usize) -> ColorMatrix {
    if width > HD_WIDTH_U || height > HD_HEIGHT_U {
        ColorMatrix::Bt2020nc
    } else if width > SD_WIDTH_U || height > SD_HEIGHT_U {
        ColorMatrix::Bt709
    } else {
        ColorMatrix::Smpte170m
    }
}

/// L2 norms of the three matrix rows, used to rescale sigma and thMSE into
/// the internal color space.
pub(crate) fn row_norms(matrix: ColorMatrix) -> [f64; 3] {
    let rows = rgb_to_yuv_parameter(matrix);
    let norm = |row: &[f64; 3]| (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt();
    [norm(&rows[0]), norm(&rows[1]), norm(&rows[2])]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opp_round_trip_identity() {
        let fwd = rgb_to_yuv_parameter(ColorMatrix::Opp);
        let bwd = yuv_to_rgb_parameter(ColorMatrix::Opp);
        for r in 0..3 {
            for c in 0..3 {
                let mut acc = 0.0;
                for k in 0..3 {
                    acc += bwd[r][k] * fwd[k][c];
                }
                let expected = if r == c { 1.0 } else { 0.0 };
                assert!((acc - expected).abs() < 1e-12, "({r},{c}) = {acc}");
            }
        }
    }

    #[test]
    fn test_bt709_round_trip_identity() {
        let fwd = rgb_to_yuv_parameter(ColorMatrix::Bt709);
        let bwd = yuv_to_rgb_parameter(ColorMatrix::Bt709);
        for r in 0..3 {
            for c in 0..3 {
                let mut acc = 0.0;
                for k in 0..3 {
                    acc += bwd[r][k] * fwd[k][c];
                }
                let expected = if r == c { 1.0 } else { 0.0 };
                assert!((acc - expected).abs() < 1e-9, "({r},{c}) = {acc}");
            }
        }
    }

    #[test]
    fn test_opp_row_norms() {
        let norms = row_norms(ColorMatrix::Opp);
        assert!((norms[0] - 1.0 / 3f64.sqrt()).abs() < 1e-12);
        assert!((norms[1] - 1.0 / 2f64.sqrt()).abs() < 1e-12);
        assert!((norms[2] - 6f64.sqrt() / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_default_matrix_by_resolution() {
        assert_eq!(default_matrix(720, 576), ColorMatrix::Smpte170m);
        assert_eq!(default_matrix(1920, 1080), ColorMatrix::Bt709);
        assert_eq!(default_matrix(3840, 2160), ColorMatrix::Bt2020nc);
    }

    #[test]
    fn test_matrix_tag_round_trip() {
        for tag in [0, 1, 2, 4, 5, 6, 7, 8, 9, 10, 100] {
            assert_eq!(ColorMatrix::from_tag(tag).unwrap().tag(), tag);
        }
        assert!(ColorMatrix::from_tag(3).is_err());
        assert!(ColorMatrix::from_tag(101).is_err());
    }
}
