use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::color::{self, ColorMatrix};
use crate::errors::Bm3dError;
use crate::plane::{
    ColorFamily, ColorRange, Frame, FrameProps, PlaneData, SampleFormat, VideoFormat,
};

/// Output sample kind of the RGB<->OPP converters and the temporal
/// aggregator: 0 selects 16-bit integer, 1 selects 32-bit float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Integer,
    Float,
}

/// Quantization parameters of one plane: floor, neutral and ceiling of the
/// nominal sample range.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QuanPara {
    pub floor: f64,
    pub neutral: f64,
    pub ceil: f64,
    float: bool,
}

impl QuanPara {
    /// Full-range integer chroma has an asymmetric floor/ceil around the
    /// neutral value and needs the dedicated rounding treatment.
    fn is_pc_chroma(&self) -> bool {
        !self.float
            && self.floor < self.neutral
            && (self.floor as i64 + self.ceil as i64) % 2 == 1
    }
}

pub(crate) fn quan_para(sample: SampleFormat, full: bool, chroma: bool) -> QuanPara {
    match sample {
        SampleFormat::Int { bits } => {
            let scale = f64::from(1u32 << (bits - 8));
            if full {
                QuanPara {
                    floor: 0.0,
                    neutral: if chroma { f64::from(1u32 << (bits - 1)) } else { 0.0 },
                    ceil: ((1u64 << bits) - 1) as f64,
                    float: false,
                }
            } else if chroma {
                QuanPara {
                    floor: 16.0 * scale,
                    neutral: 128.0 * scale,
                    ceil: 240.0 * scale,
                    float: false,
                }
            } else {
                QuanPara {
                    floor: 16.0 * scale,
                    neutral: 16.0 * scale,
                    ceil: 235.0 * scale,
                    float: false,
                }
            }
        }
        SampleFormat::Float => {
            if chroma {
                QuanPara {
                    floor: -0.5,
                    neutral: 0.0,
                    ceil: 0.5,
                    float: true,
                }
            } else {
                QuanPara {
                    floor: 0.0,
                    neutral: 0.0,
                    ceil: 1.0,
                    float: true,
                }
            }
        }
    }
}

/// Linear range mapping between two quantization schemes on raw sample
/// values. Integer destinations get the rounding offset folded into the
/// additive constant so the final cast can truncate.
pub(crate) fn range_convert(dst: &mut [f32], src: &[f32], d: QuanPara, s: QuanPara, clip: bool) {
    let gain = (d.ceil - d.floor) / (s.ceil - s.floor);
    let mut offset = -s.neutral * gain + d.neutral;
    if !d.float {
        offset += if d.is_pc_chroma() { 0.499999 } else { 0.5 };
    }
    // Full-range integer chroma must always be clipped.
    let clip = clip || s.is_pc_chroma();

    let gain = gain as f32;
    let offset = offset as f32;

    if clip {
        let lower = d.floor as f32;
        let upper = d.ceil as f32;
        for (out, &v) in dst.iter_mut().zip(src) {
            *out = (v * gain + offset).clamp(lower, upper);
        }
    } else {
        for (out, &v) in dst.iter_mut().zip(src) {
            *out = v * gain + offset;
        }
    }
}

/// RGB planes to a single luma plane. Supports the weighted matrices, the
/// OPP average and the Minimum/Maximum grayscale reductions.
pub(crate) fn convert_to_y(
    dst: &mut [f32],
    src_r: &[f32],
    src_g: &[f32],
    src_b: &[f32],
    d: QuanPara,
    s: QuanPara,
    matrix: ColorMatrix,
    clip: bool,
) {
    let s_range = s.ceil - s.floor;
    let d_range = d.ceil - d.floor;
    let lower = d.floor as f32;
    let upper = d.ceil as f32;
    let rounding = if d.float { 0.0 } else { 0.5 };

    match matrix {
        ColorMatrix::Gbr => {
            let dq = QuanPara { neutral: d.floor, ..d };
            let sq = QuanPara { neutral: s.floor, ..s };
            range_convert(dst, src_g, dq, sq, clip);
        }
        ColorMatrix::Opp => {
            let gain = (d_range / (s_range * 3.0)) as f32;
            let offset = (-s.floor * 3.0 * (gain as f64) + d.floor + rounding) as f32;
            for (i, out) in dst.iter_mut().enumerate() {
                let v = (src_r[i] + src_g[i] + src_b[i]) * gain + offset;
                *out = if clip { v.clamp(lower, upper) } else { v };
            }
        }
        ColorMatrix::Minimum => {
            let gain = (d_range / s_range) as f32;
            let offset = (-s.floor * (gain as f64) + d.floor + rounding) as f32;
            for (i, out) in dst.iter_mut().enumerate() {
                let v = src_r[i].min(src_g[i]).min(src_b[i]) * gain + offset;
                *out = if clip { v.clamp(lower, upper) } else { v };
            }
        }
        ColorMatrix::Maximum => {
            let gain = (d_range / s_range) as f32;
            let offset = (-s.floor * (gain as f64) + d.floor + rounding) as f32;
            for (i, out) in dst.iter_mut().enumerate() {
                let v = src_r[i].max(src_g[i]).max(src_b[i]) * gain + offset;
                *out = if clip { v.clamp(lower, upper) } else { v };
            }
        }
        _ => {
            let (kr, kg, kb) = color::matrix_parameter(matrix);
            let gain = d_range / s_range;
            let offset = (-s.floor * gain + d.floor + rounding) as f32;
            let (kr, kg, kb) = ((kr * gain) as f32, (kg * gain) as f32, (kb * gain) as f32);
            for (i, out) in dst.iter_mut().enumerate() {
                let v = kr * src_r[i] + kg * src_g[i] + kb * src_b[i] + offset;
                *out = if clip { v.clamp(lower, upper) } else { v };
            }
        }
    }
}

/// Full RGB -> YUV matrix conversion. The Minimum/Maximum pseudo-matrices
/// are only valid for grayscale reduction and are rejected here.
pub(crate) fn matrix_convert_rgb_to_yuv(
    dst: [&mut [f32]; 3],
    src: [&[f32]; 3],
    width: usize,
    d_luma: QuanPara,
    d_chroma: QuanPara,
    s: QuanPara,
    matrix: ColorMatrix,
    clip: bool,
) -> Result<(), Bm3dError> {
    if matrix == ColorMatrix::Minimum || matrix == ColorMatrix::Maximum {
        return Err(Bm3dError::UnsupportedMatrix);
    }

    let [dst_y, dst_u, dst_v] = dst;
    let [src_r, src_g, src_b] = src;

    if matrix == ColorMatrix::Gbr {
        let dq = QuanPara { neutral: d_luma.floor, ..d_luma };
        let sq = QuanPara { neutral: s.floor, ..s };
        range_convert(dst_y, src_g, dq, sq, clip);
        range_convert(dst_u, src_b, dq, sq, clip);
        range_convert(dst_v, src_r, dq, sq, clip);
        return Ok(());
    }

    let s_range = s.ceil - s.floor;
    let rounding_y = if d_luma.float { 0.0 } else { 0.5 };
    let rounding_c = if d_chroma.float {
        0.0
    } else if d_chroma.is_pc_chroma() {
        0.499999
    } else {
        0.5
    };

    let (rows, offset_y) = {
        let mut rows = color::rgb_to_yuv_parameter(matrix);
        let gain_y = (d_luma.ceil - d_luma.floor) / s_range;
        let gain_c = (d_chroma.ceil - d_chroma.floor) / s_range;
        let offset_y = -s.floor * gain_y * (rows[0][0] + rows[0][1] + rows[0][2])
            + d_luma.floor
            + rounding_y;
        for c in 0..3 {
            rows[0][c] *= gain_y;
            rows[1][c] *= gain_c;
            rows[2][c] *= gain_c;
        }
        (rows, offset_y)
    };
    // Chroma rows sum to zero, so only the neutral offset remains.
    let offset_c = d_chroma.neutral + rounding_c;

    let rows: Vec<[f32; 3]> = rows
        .iter()
        .map(|r| [r[0] as f32, r[1] as f32, r[2] as f32])
        .collect();
    let offset_y = offset_y as f32;
    let offset_c = offset_c as f32;

    let clamp = move |v: f32, q: QuanPara| {
        if clip {
            v.clamp(q.floor as f32, q.ceil as f32)
        } else {
            v
        }
    };

    dst_y
        .par_chunks_mut(width)
        .zip(dst_u.par_chunks_mut(width))
        .zip(dst_v.par_chunks_mut(width))
        .zip(src_r.par_chunks(width))
        .zip(src_g.par_chunks(width))
        .zip(src_b.par_chunks(width))
        .for_each(|(((((row_y, row_u), row_v), r), g), b)| {
            for i in 0..row_y.len() {
                let (sr, sg, sb) = (r[i], g[i], b[i]);
                row_y[i] = clamp(
                    rows[0][0] * sr + rows[0][1] * sg + rows[0][2] * sb + offset_y,
                    d_luma,
                );
                row_u[i] = clamp(
                    rows[1][0] * sr + rows[1][1] * sg + rows[1][2] * sb + offset_c,
                    d_chroma,
                );
                row_v[i] = clamp(
                    rows[2][0] * sr + rows[2][1] * sg + rows[2][2] * sb + offset_c,
                    d_chroma,
                );
            }
        });

    Ok(())
}

/// Full YUV -> RGB matrix conversion, the inverse of the above.
pub(crate) fn matrix_convert_yuv_to_rgb(
    dst: [&mut [f32]; 3],
    src: [&[f32]; 3],
    width: usize,
    d: QuanPara,
    s_luma: QuanPara,
    s_chroma: QuanPara,
    matrix: ColorMatrix,
    clip: bool,
) -> Result<(), Bm3dError> {
    if matrix == ColorMatrix::Minimum || matrix == ColorMatrix::Maximum {
        return Err(Bm3dError::UnsupportedMatrix);
    }

    let [dst_r, dst_g, dst_b] = dst;
    let [src_y, src_u, src_v] = src;

    if matrix == ColorMatrix::Gbr {
        let dq = QuanPara { neutral: d.floor, ..d };
        let sq = QuanPara { neutral: s_luma.floor, ..s_luma };
        range_convert(dst_g, src_y, dq, sq, clip);
        range_convert(dst_b, src_u, dq, sq, clip);
        range_convert(dst_r, src_v, dq, sq, clip);
        return Ok(());
    }

    let gain_y = (d.ceil - d.floor) / (s_luma.ceil - s_luma.floor);
    let gain_c = (d.ceil - d.floor) / (s_chroma.ceil - s_chroma.floor);
    let rounding = if d.float { 0.0 } else { 0.5 };

    let mut rows = color::yuv_to_rgb_parameter(matrix);
    let mut offsets = [0.0f64; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        row[0] *= gain_y;
        row[1] *= gain_c;
        row[2] *= gain_c;
        offsets[r] =
            -s_luma.floor * row[0] - s_chroma.neutral * (row[1] + row[2]) + d.floor + rounding;
    }

    let rows: Vec<[f32; 3]> = rows
        .iter()
        .map(|r| [r[0] as f32, r[1] as f32, r[2] as f32])
        .collect();
    let offsets: Vec<f32> = offsets.iter().map(|&o| o as f32).collect();
    let lower = d.floor as f32;
    let upper = d.ceil as f32;

    let clamp = move |v: f32| if clip { v.clamp(lower, upper) } else { v };

    dst_r
        .par_chunks_mut(width)
        .zip(dst_g.par_chunks_mut(width))
        .zip(dst_b.par_chunks_mut(width))
        .zip(src_y.par_chunks(width))
        .zip(src_u.par_chunks(width))
        .zip(src_v.par_chunks(width))
        .for_each(|(((((row_r, row_g), row_b), y), u), v)| {
            for i in 0..row_r.len() {
                let (sy, su, sv) = (y[i], u[i], v[i]);
                row_r[i] = clamp(rows[0][0] * sy + rows[0][1] * su + rows[0][2] * sv + offsets[0]);
                row_g[i] = clamp(rows[1][0] * sy + rows[1][1] * su + rows[1][2] * sv + offsets[1]);
                row_b[i] = clamp(rows[2][0] * sy + rows[2][1] * su + rows[2][2] * sv + offsets[2]);
            }
        });

    Ok(())
}

////////////////////////////////////////////////////////////////////////////
// Plane helpers used on engine entry and exit

/// Typed samples to the internal float range ([0,1] luma, [-0.5,0.5] chroma).
pub(crate) fn plane_to_internal(
    plane: &PlaneData,
    sample: SampleFormat,
    chroma: bool,
    full: bool,
) -> Vec<f32> {
    match plane {
        PlaneData::F32(v) => v.clone(),
        _ => {
            let raw = plane.to_raw_f32();
            let mut dst = vec![0.0f32; raw.len()];
            let d = quan_para(SampleFormat::Float, true, chroma);
            let s = quan_para(sample, full, chroma);
            range_convert(&mut dst, &raw, d, s, false);
            dst
        }
    }
}

/// Internal float range back to typed samples; integer output is clipped.
pub(crate) fn internal_to_plane(
    values: &[f32],
    sample: SampleFormat,
    chroma: bool,
    full: bool,
) -> PlaneData {
    match sample {
        SampleFormat::Float => PlaneData::F32(values.to_vec()),
        SampleFormat::Int { .. } => {
            let mut raw = vec![0.0f32; values.len()];
            let d = quan_para(sample, full, chroma);
            let s = quan_para(SampleFormat::Float, true, chroma);
            range_convert(&mut raw, values, d, s, true);
            PlaneData::from_raw_f32(&raw, sample)
        }
    }
}

/// RGB frame to internal OPP planes (always full range).
pub(crate) fn rgb_to_internal_yuv(frame: &Frame) -> Result<[Vec<f32>; 3], Bm3dError> {
    let raw: Vec<Vec<f32>> = frame.planes.iter().map(|p| p.to_raw_f32()).collect();
    let len = raw[0].len();
    let mut y = vec![0.0f32; len];
    let mut u = vec![0.0f32; len];
    let mut v = vec![0.0f32; len];

    matrix_convert_rgb_to_yuv(
        [&mut y, &mut u, &mut v],
        [&raw[0], &raw[1], &raw[2]],
        frame.format.width,
        quan_para(SampleFormat::Float, true, false),
        quan_para(SampleFormat::Float, true, true),
        quan_para(frame.format.sample, true, false),
        ColorMatrix::Opp,
        false,
    )?;

    Ok([y, u, v])
}

/// RGB frame to the internal OPP luma plane only (block-matching reference).
pub(crate) fn rgb_to_internal_y(frame: &Frame) -> Vec<f32> {
    let raw: Vec<Vec<f32>> = frame.planes.iter().map(|p| p.to_raw_f32()).collect();
    let mut y = vec![0.0f32; raw[0].len()];
    convert_to_y(
        &mut y,
        &raw[0],
        &raw[1],
        &raw[2],
        quan_para(SampleFormat::Float, true, false),
        quan_para(frame.format.sample, true, false),
        ColorMatrix::Opp,
        false,
    );
    y
}

/// Internal OPP planes back to typed RGB planes.
pub(crate) fn internal_yuv_to_rgb_planes(
    yuv: [&[f32]; 3],
    width: usize,
    sample: SampleFormat,
) -> Result<[PlaneData; 3], Bm3dError> {
    let len = yuv[0].len();
    let mut r = vec![0.0f32; len];
    let mut g = vec![0.0f32; len];
    let mut b = vec![0.0f32; len];

    matrix_convert_yuv_to_rgb(
        [&mut r, &mut g, &mut b],
        yuv,
        width,
        quan_para(sample, true, false),
        quan_para(SampleFormat::Float, true, false),
        quan_para(SampleFormat::Float, true, true),
        ColorMatrix::Opp,
        !sample.is_float(),
    )?;

    Ok([
        PlaneData::from_raw_f32(&r, sample),
        PlaneData::from_raw_f32(&g, sample),
        PlaneData::from_raw_f32(&b, sample),
    ])
}

////////////////////////////////////////////////////////////////////////////
// Public conversion operations

fn check_depth(frame: &Frame, clip: &'static str) -> Result<(), Bm3dError> {
    frame.format.sample.validate(clip)
}

/// Converts an RGB frame into the opponent color space. The output carries
/// three planes (Y, U, V) as 16-bit integer or 32-bit float, always full
/// range, tagged with `matrix = 0` and `bm3d_opp = true`.
pub fn rgb_to_opp(src: &Frame, sample: SampleKind) -> Result<Frame, Bm3dError> {
    check_depth(src, "input")?;
    if src.format.family != ColorFamily::Rgb {
        return Err(Bm3dError::Format {
            clip: "input",
            reason: "must be of RGB color family".to_string(),
        });
    }

    let dst_sample = match sample {
        SampleKind::Integer => SampleFormat::Int { bits: 16 },
        SampleKind::Float => SampleFormat::Float,
    };

    let raw: Vec<Vec<f32>> = src.planes.iter().map(|p| p.to_raw_f32()).collect();
    let len = raw[0].len();
    let mut y = vec![0.0f32; len];
    let mut u = vec![0.0f32; len];
    let mut v = vec![0.0f32; len];

    matrix_convert_rgb_to_yuv(
        [&mut y, &mut u, &mut v],
        [&raw[0], &raw[1], &raw[2]],
        src.format.width,
        quan_para(dst_sample, true, false),
        quan_para(dst_sample, true, true),
        quan_para(src.format.sample, true, false),
        ColorMatrix::Opp,
        !dst_sample.is_float(),
    )?;

    let format = VideoFormat::new(
        ColorFamily::Yuv,
        dst_sample,
        src.format.width,
        src.format.height,
    );
    let planes = vec![
        PlaneData::from_raw_f32(&y, dst_sample),
        PlaneData::from_raw_f32(&u, dst_sample),
        PlaneData::from_raw_f32(&v, dst_sample),
    ];
    let props = FrameProps {
        color_range: Some(ColorRange::Full),
        matrix: Some(0),
        bm3d_opp: true,
        ..FrameProps::default()
    };
    Frame::from_planes(format, planes, props)
}

/// Converts an opponent-space frame back to RGB (16-bit integer or float).
pub fn opp_to_rgb(src: &Frame, sample: SampleKind) -> Result<Frame, Bm3dError> {
    check_depth(src, "input")?;
    if src.format.family != ColorFamily::Yuv || src.format.is_sub_sampled() {
        return Err(Bm3dError::Format {
            clip: "input",
            reason: "must be of YUV444 color format".to_string(),
        });
    }
    if !src.props.bm3d_opp {
        log::warn!(
            "opp_to_rgb: the input frame is not tagged \"bm3d_opp\"; \
             it should come from rgb_to_opp or a BM3D stage fed with RGB"
        );
    }

    let dst_sample = match sample {
        SampleKind::Integer => SampleFormat::Int { bits: 16 },
        SampleKind::Float => SampleFormat::Float,
    };

    let raw: Vec<Vec<f32>> = src.planes.iter().map(|p| p.to_raw_f32()).collect();
    let len = raw[0].len();
    let mut r = vec![0.0f32; len];
    let mut g = vec![0.0f32; len];
    let mut b = vec![0.0f32; len];

    matrix_convert_yuv_to_rgb(
        [&mut r, &mut g, &mut b],
        [&raw[0], &raw[1], &raw[2]],
        src.format.width,
        quan_para(dst_sample, true, false),
        quan_para(src.format.sample, true, false),
        quan_para(src.format.sample, true, true),
        ColorMatrix::Opp,
        !dst_sample.is_float(),
    )?;

    let format = VideoFormat::new(
        ColorFamily::Rgb,
        dst_sample,
        src.format.width,
        src.format.height,
    );
    let planes = vec![
        PlaneData::from_raw_f32(&r, dst_sample),
        PlaneData::from_raw_f32(&g, dst_sample),
        PlaneData::from_raw_f32(&b, dst_sample),
    ];
    let props = FrameProps {
        color_range: Some(ColorRange::Full),
        ..FrameProps::default()
    };
    Frame::from_planes(format, planes, props)
}
