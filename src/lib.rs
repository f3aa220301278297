//! BM3D / V-BM3D image and video denoising.
//!
//! The engine attenuates additive noise by exploiting non-local
//! self-similarity: for every reference patch it collects similar patches
//! from a search window (spatial, or spatio-temporal with predictive
//! cross-frame search), stacks them into a 3-D group, shrinks the group in
//! a decorrelating 3-D DCT domain (hard threshold in the Basic stage,
//! empirical Wiener in the Final stage) and aggregates the cleaned patches
//! back with confidence weights.
//!
//! The usual two-stage pipeline is [`Bm3dBasic`] followed by [`Bm3dFinal`]
//! with the basic estimate as reference. The temporal forms
//! ([`VBm3dBasic`], [`VBm3dFinal`]) emit stacked per-offset
//! numerator/denominator intermediates which [`VAggregate`] reduces over
//! the temporal window. RGB input is processed in the opponent color
//! space; [`rgb_to_opp`] / [`opp_to_rgb`] expose that conversion.

mod aggregate;
mod block;
mod color;
mod convert;
mod errors;
mod filter;
mod params;
mod plane;
mod spatial;
mod temporal;
mod transform;

pub use aggregate::VAggregate;
pub use block::{Block, BlockGroup, CurrentPos, MatchEntry, MatchEntry3, Pos, Pos3};
pub use color::{default_matrix, matrix_parameter, rgb_to_yuv_parameter, yuv_to_rgb_parameter, ColorMatrix};
pub use convert::{opp_to_rgb, rgb_to_opp, SampleKind};
pub use errors::Bm3dError;
pub use params::{Bm3dParams, Profile, VBm3dParams};
pub use plane::{ColorFamily, ColorRange, Frame, FrameProps, PlaneData, SampleFormat, VideoFormat};

use rayon::prelude::*;

use spatial::{EngineContext, Scratch};
use temporal::TemporalContext;

fn check_input_format(frame: &Frame, format: &VideoFormat) -> Result<(), Bm3dError> {
    if frame.format != *format {
        return Err(Bm3dError::Format {
            clip: "input",
            reason: "only constant format input supported".to_string(),
        });
    }
    Ok(())
}

fn check_same_clip(
    format: &VideoFormat,
    other: &VideoFormat,
    clip: &'static str,
) -> Result<(), Bm3dError> {
    if format.family != other.family
        || format.sample != other.sample
        || format.sub_sampling_w != other.sub_sampling_w
        || format.sub_sampling_h != other.sub_sampling_h
    {
        return Err(Bm3dError::ClipMismatch {
            clip,
            property: "format",
        });
    }
    if format.width != other.width || format.height != other.height {
        return Err(Bm3dError::ClipMismatch {
            clip,
            property: "width and height",
        });
    }
    Ok(())
}

fn resolve_matrix(format: &VideoFormat, matrix: Option<i64>) -> Result<ColorMatrix, Bm3dError> {
    match format.family {
        ColorFamily::Rgb => Ok(ColorMatrix::Opp),
        ColorFamily::YCoCg => Ok(ColorMatrix::YCgCo),
        _ => match matrix {
            None => Ok(default_matrix(format.width, format.height)),
            Some(tag) => {
                let matrix = ColorMatrix::from_tag(tag)?;
                if matrix == ColorMatrix::Unspecified {
                    Ok(default_matrix(format.width, format.height))
                } else {
                    Ok(matrix)
                }
            }
        },
    }
}

/// A plane is processed unless the input is YUV-like and its sigma is zero;
/// RGB input always processes all three opponent planes.
fn process_flags(format: &VideoFormat, sigma: &[f64; 3]) -> [bool; 3] {
    let mut process = [true; 3];
    if format.family != ColorFamily::Rgb {
        for (flag, &s) in process.iter_mut().zip(sigma) {
            if s == 0.0 {
                *flag = false;
            }
        }
    }
    for flag in process.iter_mut().skip(format.plane_count()) {
        *flag = false;
    }
    process
}

fn check_chroma_subsampling(
    format: &VideoFormat,
    process: &[bool; 3],
) -> Result<(), Bm3dError> {
    if (process[1] || process[2]) && format.is_sub_sampled() {
        return Err(Bm3dError::SubsampledChroma { clip: "input" });
    }
    Ok(())
}

fn warn_opp_mismatch(frame: &Frame, matrix: ColorMatrix, op: &str) {
    if frame.props.bm3d_opp && frame.format.family != ColorFamily::Rgb && matrix != ColorMatrix::Opp
    {
        log::warn!(
            "{op}: the frame property \"bm3d_opp\" indicates opponent color space input; \
             specify matrix=100 in the filter's arguments"
        );
    }
}

////////////////////////////////////////////////////////////////////////////
// Spatial per-frame pipeline

fn run_spatial(
    ctx: &EngineContext,
    format: &VideoFormat,
    scratch: &mut Scratch,
    src: &Frame,
    ref_frame: Option<&Frame>,
    wref_frame: Option<&Frame>,
) -> Result<Frame, Bm3dError> {
    check_input_format(src, format)?;
    if let Some(r) = ref_frame {
        check_same_clip(format, &r.format, "ref")?;
    }
    if let Some(w) = wref_frame {
        check_same_clip(format, &w.format, "wref")?;
    }
    warn_opp_mismatch(src, ctx.matrix, if ctx.params.wiener { "final" } else { "basic" });

    if !ctx.process.iter().any(|&p| p) {
        return Ok(src.clone());
    }

    let full = src.is_full_range();
    let width = format.width;
    let height = format.height;

    let mut dst: [Option<Vec<f32>>; 3] = [None, None, None];

    let out_planes: Vec<PlaneData> = match format.family {
        ColorFamily::Rgb => {
            let src_pl = convert::rgb_to_internal_yuv(src)?;
            let ref_y_own = ref_frame.map(convert::rgb_to_internal_y);
            let guide_own = if ctx.params.wiener {
                match (wref_frame, ref_frame) {
                    (Some(w), _) => Some(convert::rgb_to_internal_yuv(w)?),
                    (None, Some(r)) => Some(convert::rgb_to_internal_yuv(r)?),
                    (None, None) => None,
                }
            } else {
                None
            };

            let ref_y: &[f32] = ref_y_own.as_deref().unwrap_or(&src_pl[0]);
            let srcs: [Option<&[f32]>; 3] =
                [Some(&src_pl[0]), Some(&src_pl[1]), Some(&src_pl[2])];
            let wrefs: [Option<&[f32]>; 3] = if ctx.params.wiener {
                let guide = guide_own.as_ref().unwrap_or(&src_pl);
                [Some(&guide[0]), Some(&guide[1]), Some(&guide[2])]
            } else {
                [None, None, None]
            };

            spatial::kernel(ctx, &mut dst, srcs, ref_y, wrefs, height, width, scratch);

            let [dy, du, dv] = dst;
            let (dy, du, dv) = (
                dy.expect("luma estimate"),
                du.expect("chroma estimate"),
                dv.expect("chroma estimate"),
            );
            convert::internal_yuv_to_rgb_planes([&dy, &du, &dv], width, format.sample)?.into()
        }
        _ => {
            let count = format.plane_count();
            let mut src_int: [Option<Vec<f32>>; 3] = [None, None, None];
            for (p, slot) in src_int.iter_mut().enumerate().take(count) {
                if p == 0 || ctx.process[p] {
                    *slot = Some(convert::plane_to_internal(
                        &src.planes[p],
                        format.sample,
                        p > 0,
                        full,
                    ));
                }
            }
            let ref_y_own = ref_frame.map(|f| {
                convert::plane_to_internal(&f.planes[0], format.sample, false, full)
            });
            let guide_frame = wref_frame.or(ref_frame);
            let mut guide_own: [Option<Vec<f32>>; 3] = [None, None, None];
            if ctx.params.wiener {
                if let Some(guide) = guide_frame {
                    for (p, slot) in guide_own.iter_mut().enumerate().take(count) {
                        if ctx.process[p] {
                            *slot = Some(convert::plane_to_internal(
                                &guide.planes[p],
                                format.sample,
                                p > 0,
                                full,
                            ));
                        }
                    }
                }
            }

            let srcs: [Option<&[f32]>; 3] = std::array::from_fn(|p| src_int[p].as_deref());
            let ref_y: &[f32] = ref_y_own
                .as_deref()
                .unwrap_or_else(|| srcs[0].expect("luma plane"));
            let wrefs: [Option<&[f32]>; 3] = std::array::from_fn(|p| {
                if ctx.params.wiener {
                    guide_own[p].as_deref().or(srcs[p])
                } else {
                    None
                }
            });

            spatial::kernel(ctx, &mut dst, srcs, ref_y, wrefs, height, width, scratch);

            let mut planes = Vec::with_capacity(count);
            for p in 0..count {
                if ctx.process[p] {
                    planes.push(convert::internal_to_plane(
                        dst[p].as_ref().expect("estimate plane"),
                        format.sample,
                        p > 0,
                        full,
                    ));
                } else {
                    planes.push(src.planes[p].clone());
                }
            }
            planes
        }
    };

    Frame::from_planes(*format, out_planes, src.props.clone())
}

/// Spatial BM3D, Basic stage (hard-threshold collaborative filtering).
pub struct Bm3dBasic {
    ctx: EngineContext,
    format: VideoFormat,
}

impl Bm3dBasic {
    /// `matrix` is the raw tag of the color matrix the YUV input is
    /// encoded with; RGB input always uses the opponent color space.
    pub fn new(
        format: VideoFormat,
        mut params: Bm3dParams,
        matrix: Option<i64>,
    ) -> Result<Self, Bm3dError> {
        params.wiener = false;
        format.sample.validate("input")?;
        params.validate(format.width, format.height)?;
        let matrix = resolve_matrix(&format, matrix)?;
        let process = process_flags(&format, &params.sigma);
        check_chroma_subsampling(&format, &process)?;
        Ok(Bm3dBasic {
            ctx: EngineContext::new(params, matrix, process),
            format,
        })
    }

    /// Denoises one frame. `ref_frame` optionally supplies the planes the
    /// block matching runs in; it defaults to the source itself.
    pub fn process(&self, src: &Frame, ref_frame: Option<&Frame>) -> Result<Frame, Bm3dError> {
        let mut scratch = Scratch::new();
        run_spatial(&self.ctx, &self.format, &mut scratch, src, ref_frame, None)
    }

    /// Denoises a clip, processing frames in parallel with worker-owned
    /// scratch buffers.
    pub fn process_clip(
        &self,
        clip: &[Frame],
        ref_clip: Option<&[Frame]>,
    ) -> Result<Vec<Frame>, Bm3dError> {
        if let Some(r) = ref_clip {
            if r.len() != clip.len() {
                return Err(Bm3dError::ClipMismatch {
                    clip: "ref",
                    property: "number of frames",
                });
            }
        }
        clip.par_iter()
            .enumerate()
            .map_init(Scratch::new, |scratch, (n, frame)| {
                run_spatial(
                    &self.ctx,
                    &self.format,
                    scratch,
                    frame,
                    ref_clip.map(|r| &r[n]),
                    None,
                )
            })
            .collect()
    }
}

/// Spatial BM3D, Final stage (empirical Wiener filtering guided by the
/// basic estimate).
pub struct Bm3dFinal {
    ctx: EngineContext,
    format: VideoFormat,
}

impl Bm3dFinal {
    pub fn new(
        format: VideoFormat,
        mut params: Bm3dParams,
        matrix: Option<i64>,
    ) -> Result<Self, Bm3dError> {
        params.wiener = true;
        format.sample.validate("input")?;
        params.validate(format.width, format.height)?;
        let matrix = resolve_matrix(&format, matrix)?;
        let process = process_flags(&format, &params.sigma);
        check_chroma_subsampling(&format, &process)?;
        Ok(Bm3dFinal {
            ctx: EngineContext::new(params, matrix, process),
            format,
        })
    }

    /// Denoises one frame. `ref_frame` (typically the basic estimate)
    /// drives both block matching and, unless `wref_frame` overrides it,
    /// the empirical Wiener shrinkage.
    pub fn process(
        &self,
        src: &Frame,
        ref_frame: &Frame,
        wref_frame: Option<&Frame>,
    ) -> Result<Frame, Bm3dError> {
        let mut scratch = Scratch::new();
        run_spatial(
            &self.ctx,
            &self.format,
            &mut scratch,
            src,
            Some(ref_frame),
            wref_frame,
        )
    }

    pub fn process_clip(
        &self,
        clip: &[Frame],
        ref_clip: &[Frame],
        wref_clip: Option<&[Frame]>,
    ) -> Result<Vec<Frame>, Bm3dError> {
        if ref_clip.len() != clip.len() {
            return Err(Bm3dError::ClipMismatch {
                clip: "ref",
                property: "number of frames",
            });
        }
        if let Some(w) = wref_clip {
            if w.len() != clip.len() {
                return Err(Bm3dError::ClipMismatch {
                    clip: "wref",
                    property: "number of frames",
                });
            }
        }
        clip.par_iter()
            .enumerate()
            .map_init(Scratch::new, |scratch, (n, frame)| {
                run_spatial(
                    &self.ctx,
                    &self.format,
                    scratch,
                    frame,
                    Some(&ref_clip[n]),
                    wref_clip.map(|w| &w[n]),
                )
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////////
// Temporal per-frame pipeline

fn run_temporal(
    ctx: &TemporalContext,
    format: &VideoFormat,
    scratch: &mut Scratch,
    src_window: &[&Frame],
    cur: usize,
    ref_window: Option<&[&Frame]>,
    wref_window: Option<&[&Frame]>,
) -> Result<Frame, Bm3dError> {
    let frames = src_window.len();
    if frames == 0 || cur >= frames || cur > ctx.radius || frames - 1 - cur > ctx.radius {
        return Err(Bm3dError::Other(
            "temporal window does not match the configured radius".to_string(),
        ));
    }
    for frame in src_window {
        check_input_format(frame, format)?;
    }
    for (window, clip) in [(ref_window, "ref"), (wref_window, "wref")] {
        if let Some(w) = window {
            if w.len() != frames {
                return Err(Bm3dError::ClipMismatch {
                    clip,
                    property: "number of frames",
                });
            }
            for frame in w {
                check_same_clip(format, &frame.format, clip)?;
            }
        }
    }
    let op = if ctx.base.params.wiener { "vfinal" } else { "vbasic" };
    warn_opp_mismatch(src_window[cur], ctx.base.matrix, op);

    if !ctx.base.process.iter().any(|&p| p) {
        return Ok(src_window[cur].clone());
    }

    let wiener = ctx.base.params.wiener;
    let full = src_window[cur].is_full_range();
    let width = format.width;
    let height = format.height;
    let count = format.plane_count();

    // Internal float planes per window frame.
    let mut src_int: Vec<[Option<Vec<f32>>; 3]> = Vec::with_capacity(frames);
    let mut ref_y_own: Option<Vec<Vec<f32>>> = None;
    let mut guide_own: Option<Vec<[Option<Vec<f32>>; 3]>> = None;

    if format.family == ColorFamily::Rgb {
        for frame in src_window {
            let [y, u, v] = convert::rgb_to_internal_yuv(frame)?;
            src_int.push([Some(y), Some(u), Some(v)]);
        }
        if let Some(rw) = ref_window {
            ref_y_own = Some(rw.iter().map(|f| convert::rgb_to_internal_y(f)).collect());
        }
        if wiener {
            let guide_window = wref_window.or(ref_window);
            if let Some(gw) = guide_window {
                let mut planes = Vec::with_capacity(frames);
                for frame in gw {
                    let [y, u, v] = convert::rgb_to_internal_yuv(frame)?;
                    planes.push([Some(y), Some(u), Some(v)]);
                }
                guide_own = Some(planes);
            }
        }
    } else {
        for frame in src_window {
            let mut planes: [Option<Vec<f32>>; 3] = [None, None, None];
            for (p, slot) in planes.iter_mut().enumerate().take(count) {
                if p == 0 || ctx.base.process[p] {
                    *slot = Some(convert::plane_to_internal(
                        &frame.planes[p],
                        format.sample,
                        p > 0,
                        full,
                    ));
                }
            }
            src_int.push(planes);
        }
        if let Some(rw) = ref_window {
            ref_y_own = Some(
                rw.iter()
                    .map(|f| convert::plane_to_internal(&f.planes[0], format.sample, false, full))
                    .collect(),
            );
        }
        if wiener {
            let guide_window = wref_window.or(ref_window);
            if let Some(gw) = guide_window {
                let mut all = Vec::with_capacity(frames);
                for frame in gw {
                    let mut planes: [Option<Vec<f32>>; 3] = [None, None, None];
                    for (p, slot) in planes.iter_mut().enumerate().take(count) {
                        if ctx.base.process[p] {
                            *slot = Some(convert::plane_to_internal(
                                &frame.planes[p],
                                format.sample,
                                p > 0,
                                full,
                            ));
                        }
                    }
                    all.push(planes);
                }
                guide_own = Some(all);
            }
        }
    }

    // Per-plane slice views across the window.
    let src_views: [Option<Vec<&[f32]>>; 3] = std::array::from_fn(|p| {
        ctx.base.process[p].then(|| {
            src_int
                .iter()
                .map(|planes| planes[p].as_deref().expect("source plane"))
                .collect()
        })
    });
    let ref_views: Vec<&[f32]> = (0..frames)
        .map(|f| match &ref_y_own {
            Some(refs) => refs[f].as_slice(),
            None => src_int[f][0].as_deref().expect("luma plane"),
        })
        .collect();
    let guide_views: [Option<Vec<&[f32]>>; 3] = std::array::from_fn(|p| {
        (wiener && ctx.base.process[p]).then(|| {
            (0..frames)
                .map(|f| match &guide_own {
                    Some(guides) => guides[f][p].as_deref().expect("guide plane"),
                    None => src_int[f][p].as_deref().expect("source plane"),
                })
                .collect()
        })
    });

    let mut accum: [Option<Vec<temporal::FrameAccum>>; 3] = [None, None, None];
    temporal::kernel(
        ctx,
        &mut accum,
        std::array::from_fn(|p| src_views[p].as_deref()),
        &ref_views,
        std::array::from_fn(|p| guide_views[p].as_deref()),
        cur,
        height,
        width,
        scratch,
    );

    // Assemble the stacked intermediate: per offset o the slab pair
    // (2(R+o), 2(R+o)+1) holds this frame's contribution to frame cur+o.
    let slab_pairs = ctx.radius * 2 + 1;
    let out_family = if format.family == ColorFamily::Rgb {
        ColorFamily::Yuv
    } else {
        format.family
    };
    let mut out_format = VideoFormat::new(
        out_family,
        SampleFormat::Float,
        width,
        height * slab_pairs * 2,
    );
    out_format.sub_sampling_w = format.sub_sampling_w;
    out_format.sub_sampling_h = format.sub_sampling_h;

    let mut planes = Vec::with_capacity(out_format.plane_count());
    for p in 0..out_format.plane_count() {
        let (pw, ph) = out_format.plane_dimensions(p);
        let mut data = vec![0.0f32; pw * ph];
        if let Some(acc) = &accum[p] {
            let pcount = width * height;
            for (i, fa) in acc.iter().enumerate() {
                let pair = ctx.radius - cur + i;
                let base = pair * 2 * pcount;
                data[base..base + pcount].copy_from_slice(&fa.num);
                data[base + pcount..base + 2 * pcount].copy_from_slice(&fa.den);
            }
        }
        planes.push(PlaneData::F32(data));
    }

    let mut props = src_window[cur].props.clone();
    props.v_radius = Some(ctx.radius);
    props.v_process = Some(ctx.base.process);
    if format.family == ColorFamily::Rgb {
        props.bm3d_opp = true;
    }

    Frame::from_planes(out_format, planes, props)
}

fn temporal_windows<'a>(
    clip: &'a [Frame],
    n: usize,
    radius: usize,
) -> (Vec<&'a Frame>, usize) {
    let lo = n.saturating_sub(radius);
    let hi = (n + radius).min(clip.len() - 1);
    (clip[lo..=hi].iter().collect(), n - lo)
}

/// Temporal V-BM3D, Basic stage. Emits a stacked intermediate of height
/// `H * (2 * radius + 1) * 2` carrying per-offset (numerator, denominator)
/// plane pairs, to be reduced by [`VAggregate`].
pub struct VBm3dBasic {
    ctx: TemporalContext,
    format: VideoFormat,
}

impl VBm3dBasic {
    pub fn new(
        format: VideoFormat,
        mut params: VBm3dParams,
        matrix: Option<i64>,
    ) -> Result<Self, Bm3dError> {
        params.bm3d.wiener = false;
        format.sample.validate("input")?;
        params.validate(format.width, format.height)?;
        let matrix = resolve_matrix(&format, matrix)?;
        let process = process_flags(&format, &params.bm3d.sigma);
        check_chroma_subsampling(&format, &process)?;
        Ok(VBm3dBasic {
            ctx: TemporalContext::new(params, matrix, process),
            format,
        })
    }

    pub fn radius(&self) -> usize {
        self.ctx.radius
    }

    /// Processes the window `[n - radius, n + radius]` (clamped at the
    /// sequence ends) around the frame at window index `cur`.
    pub fn process_window(
        &self,
        src_window: &[&Frame],
        cur: usize,
        ref_window: Option<&[&Frame]>,
    ) -> Result<Frame, Bm3dError> {
        let mut scratch = Scratch::new();
        run_temporal(
            &self.ctx,
            &self.format,
            &mut scratch,
            src_window,
            cur,
            ref_window,
            None,
        )
    }

    pub fn process_clip(
        &self,
        clip: &[Frame],
        ref_clip: Option<&[Frame]>,
    ) -> Result<Vec<Frame>, Bm3dError> {
        if let Some(r) = ref_clip {
            if r.len() != clip.len() {
                return Err(Bm3dError::ClipMismatch {
                    clip: "ref",
                    property: "number of frames",
                });
            }
        }
        (0..clip.len())
            .into_par_iter()
            .map_init(Scratch::new, |scratch, n| {
                let (window, cur) = temporal_windows(clip, n, self.ctx.radius);
                let ref_w = ref_clip.map(|r| temporal_windows(r, n, self.ctx.radius).0);
                run_temporal(
                    &self.ctx,
                    &self.format,
                    scratch,
                    &window,
                    cur,
                    ref_w.as_deref(),
                    None,
                )
            })
            .collect()
    }
}

/// Temporal V-BM3D, Final stage (empirical Wiener over the spatio-temporal
/// groups). Emits the same stacked intermediate layout as [`VBm3dBasic`].
pub struct VBm3dFinal {
    ctx: TemporalContext,
    format: VideoFormat,
}

impl VBm3dFinal {
    pub fn new(
        format: VideoFormat,
        mut params: VBm3dParams,
        matrix: Option<i64>,
    ) -> Result<Self, Bm3dError> {
        params.bm3d.wiener = true;
        format.sample.validate("input")?;
        params.validate(format.width, format.height)?;
        let matrix = resolve_matrix(&format, matrix)?;
        let process = process_flags(&format, &params.bm3d.sigma);
        check_chroma_subsampling(&format, &process)?;
        Ok(VBm3dFinal {
            ctx: TemporalContext::new(params, matrix, process),
            format,
        })
    }

    pub fn radius(&self) -> usize {
        self.ctx.radius
    }

    pub fn process_window(
        &self,
        src_window: &[&Frame],
        cur: usize,
        ref_window: &[&Frame],
        wref_window: Option<&[&Frame]>,
    ) -> Result<Frame, Bm3dError> {
        let mut scratch = Scratch::new();
        run_temporal(
            &self.ctx,
            &self.format,
            &mut scratch,
            src_window,
            cur,
            Some(ref_window),
            wref_window,
        )
    }

    pub fn process_clip(
        &self,
        clip: &[Frame],
        ref_clip: &[Frame],
        wref_clip: Option<&[Frame]>,
    ) -> Result<Vec<Frame>, Bm3dError> {
        if ref_clip.len() != clip.len() {
            return Err(Bm3dError::ClipMismatch {
                clip: "ref",
                property: "number of frames",
            });
        }
        if let Some(w) = wref_clip {
            if w.len() != clip.len() {
                return Err(Bm3dError::ClipMismatch {
                    clip: "wref",
                    property: "number of frames",
                });
            }
        }
        (0..clip.len())
            .into_par_iter()
            .map_init(Scratch::new, |scratch, n| {
                let (window, cur) = temporal_windows(clip, n, self.ctx.radius);
                let ref_w = temporal_windows(ref_clip, n, self.ctx.radius).0;
                let wref_w = wref_clip.map(|w| temporal_windows(w, n, self.ctx.radius).0);
                run_temporal(
                    &self.ctx,
                    &self.format,
                    scratch,
                    &window,
                    cur,
                    Some(&ref_w),
                    wref_w.as_deref(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_format(width: usize, height: usize) -> VideoFormat {
        VideoFormat::new(ColorFamily::Gray, SampleFormat::Float, width, height)
    }

    #[test]
    fn test_basic_rejects_oversized_block() {
        let params = Bm3dParams::new(false, Profile::Lc);
        assert!(Bm3dBasic::new(gray_format(4, 4), params, None).is_err());
    }

    #[test]
    fn test_basic_passthrough_when_sigma_zero_yuv() {
        let format = VideoFormat::new(ColorFamily::Yuv, SampleFormat::Float, 16, 16);
        let mut params = Bm3dParams::new(false, Profile::Lc);
        params.set_sigma(&[0.0, 0.0, 0.0]).unwrap();
        let basic = Bm3dBasic::new(format, params, Some(1)).unwrap();
        let frame = Frame::new(format);
        let out = basic.process(&frame, None).unwrap();
        assert_eq!(out.planes[0].len(), frame.planes[0].len());
    }

    #[test]
    fn test_subsampled_chroma_rejected() {
        let mut format = VideoFormat::new(ColorFamily::Yuv, SampleFormat::Int { bits: 8 }, 32, 32);
        format.sub_sampling_w = 1;
        format.sub_sampling_h = 1;
        let params = Bm3dParams::new(false, Profile::Lc);
        let err = Bm3dBasic::new(format, params, Some(1));
        assert!(matches!(err, Err(Bm3dError::SubsampledChroma { .. })));

        // Luma-only processing on the same format is allowed.
        let mut params = Bm3dParams::new(false, Profile::Lc);
        params.set_sigma(&[10.0, 0.0, 0.0]).unwrap();
        assert!(Bm3dBasic::new(format, params, Some(1)).is_ok());
    }

    #[test]
    fn test_ref_format_mismatch_rejected() {
        let format = gray_format(16, 16);
        let basic = Bm3dBasic::new(format, Bm3dParams::new(false, Profile::Lc), None).unwrap();
        let frame = Frame::new(format);
        let other = Frame::new(gray_format(32, 32));
        assert!(matches!(
            basic.process(&frame, Some(&other)),
            Err(Bm3dError::ClipMismatch { .. })
        ));
    }

    #[test]
    fn test_vbasic_stacked_layout() {
        let format = gray_format(16, 16);
        let mut params = VBm3dParams::new(false, Profile::Fast);
        params.bm3d.set_sigma(&[10.0]).unwrap();
        let vbasic = VBm3dBasic::new(format, params, None).unwrap();
        let clip: Vec<Frame> = (0..3).map(|_| Frame::new(format)).collect();
        let out = vbasic.process_clip(&clip, None).unwrap();
        assert_eq!(out.len(), 3);
        let radius = vbasic.radius();
        for frame in &out {
            assert_eq!(frame.format.height, 16 * (2 * radius + 1) * 2);
            assert_eq!(frame.props.v_radius, Some(radius));
            assert_eq!(frame.props.v_process, Some([true, false, false]));
        }
    }

    #[test]
    fn test_vbasic_vaggregate_round_trip_gray() {
        // Constant input: the full temporal pipeline must reproduce it.
        let format = gray_format(16, 16);
        let mut params = VBm3dParams::new(false, Profile::Fast);
        params.bm3d.set_sigma(&[10.0]).unwrap();
        let vbasic = VBm3dBasic::new(format, params, None).unwrap();
        let mut template = Frame::new(format);
        if let PlaneData::F32(data) = &mut template.planes[0] {
            data.iter_mut().for_each(|v| *v = 0.5);
        }
        let clip: Vec<Frame> = (0..3).map(|_| template.clone()).collect();
        let stacked = vbasic.process_clip(&clip, None).unwrap();
        let agg = VAggregate::new(vbasic.radius(), SampleKind::Float).unwrap();
        let out = agg.process_clip(&stacked).unwrap();
        for frame in &out {
            let data = frame.planes[0].as_f32().unwrap();
            for &v in data {
                assert!((v - 0.5).abs() < 1e-5);
            }
        }
    }
}
