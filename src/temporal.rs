use crate::block::{Block, CurrentPos, MatchEntry3, Pos, Pos3};
use crate::color::ColorMatrix;
use crate::filter;
use crate::params::VBm3dParams;
use crate::spatial::{scan_positions, EngineContext, Scratch};

/// Temporal engine context: the spatial context plus the window radius and
/// predictive-search settings.
pub(crate) struct TemporalContext {
    pub base: EngineContext,
    pub radius: usize,
    pub ps_num: usize,
    pub ps_range: usize,
    pub ps_step: usize,
}

impl TemporalContext {
    pub fn new(params: VBm3dParams, matrix: ColorMatrix, process: [bool; 3]) -> Self {
        let radius = params.radius;
        let ps_num = params.ps_num;
        let ps_range = params.ps_range;
        let ps_step = params.ps_step;
        TemporalContext {
            base: EngineContext::new(params.bm3d, matrix, process),
            radius,
            ps_num,
            ps_range,
            ps_step,
        }
    }
}

/// Per-offset accumulator pair of one plane of the stacked intermediate.
pub(crate) struct FrameAccum {
    pub num: Vec<f32>,
    pub den: Vec<f32>,
}

impl FrameAccum {
    fn new(pcount: usize) -> Self {
        FrameAccum {
            num: vec![0.0; pcount],
            den: vec![0.0; pcount],
        }
    }
}

fn to_pos3(matches: &[crate::block::MatchEntry], frame: usize) -> impl Iterator<Item = MatchEntry3> + '_ {
    matches.iter().map(move |m| MatchEntry3 {
        key: m.key,
        pos: Pos3 {
            z: frame,
            y: m.pos.y,
            x: m.pos.x,
        },
    })
}

fn seeds(matches: &[crate::block::MatchEntry], ps_num: usize) -> Vec<Pos> {
    matches.iter().take(ps_num).map(|m| m.pos).collect()
}

/// Predictive spatio-temporal block matching. The current frame is scanned
/// with the full window; each further frame searches only the union of
/// small windows seeded by the previous frame's best matches.
pub(crate) fn block_matching(
    ctx: &TemporalContext,
    refs: &[&[f32]],
    cur: usize,
    height: usize,
    width: usize,
    j: usize,
    i: usize,
) -> Vec<MatchEntry3> {
    let params = &ctx.base.params;
    let pos = Pos { y: j, x: i };

    // Take the reference block as the only element in the group when block
    // matching is disabled.
    if params.group_size == 1 || ctx.base.th_mse <= 0.0 {
        return vec![MatchEntry3 {
            key: 0.0,
            pos: Pos3 { z: cur, y: j, x: i },
        }];
    }

    let block = Block::from_plane(refs[cur], width, params.block_size, params.block_size, pos);

    // Block matching in the current frame.
    let frame_match = block.block_matching_multi(
        refs[cur],
        height,
        width,
        width,
        1.0,
        params.bm_range,
        params.bm_step,
        ctx.base.th_mse,
        CurrentPos::Prepend,
        params.group_size,
        true,
    );

    let mut match_code: Vec<MatchEntry3> = to_pos3(&frame_match, cur).collect();

    let cur_search = block.gen_search_pos(
        &seeds(&frame_match, ctx.ps_num),
        height,
        width,
        ctx.ps_range,
        ctx.ps_step,
    );

    // Predictive search sweeping backward, then forward.
    let mut prev = frame_match.clone();
    for f in (0..cur).rev() {
        let matches = if f + 1 == cur {
            block.block_matching_multi_pos(
                refs[f],
                width,
                1.0,
                &cur_search,
                ctx.base.th_mse,
                params.group_size,
                true,
            )
        } else {
            let search = block.gen_search_pos(
                &seeds(&prev, ctx.ps_num),
                height,
                width,
                ctx.ps_range,
                ctx.ps_step,
            );
            block.block_matching_multi_pos(
                refs[f],
                width,
                1.0,
                &search,
                ctx.base.th_mse,
                params.group_size,
                true,
            )
        };
        match_code.extend(to_pos3(&matches, f));
        prev = matches;
    }

    let mut prev = frame_match;
    for f in cur + 1..refs.len() {
        let matches = if f == cur + 1 {
            block.block_matching_multi_pos(
                refs[f],
                width,
                1.0,
                &cur_search,
                ctx.base.th_mse,
                params.group_size,
                true,
            )
        } else {
            let search = block.gen_search_pos(
                &seeds(&prev, ctx.ps_num),
                height,
                width,
                ctx.ps_range,
                ctx.ps_step,
            );
            block.block_matching_multi_pos(
                refs[f],
                width,
                1.0,
                &search,
                ctx.base.th_mse,
                params.group_size,
                true,
            )
        };
        match_code.extend(to_pos3(&matches, f));
        prev = matches;
    }

    // Keep the G best entries; the key-0 reference block stays first.
    if match_code.len() > params.group_size {
        match_code[1..].sort_unstable_by(MatchEntry3::cmp);
        match_code.truncate(params.group_size);
    }

    match_code
}

/// One frame of V-BM3D: raster the current frame, group across the window,
/// filter, and accumulate per-offset (numerator, denominator) planes.
/// No division happens here; the aggregator performs the delayed
/// overlap-add across the temporal window.
pub(crate) fn kernel(
    ctx: &TemporalContext,
    accum: &mut [Option<Vec<FrameAccum>>; 3],
    srcs: [Option<&[&[f32]]>; 3],
    ref_y: &[&[f32]],
    wrefs: [Option<&[&[f32]]>; 3],
    cur: usize,
    height: usize,
    width: usize,
    scratch: &mut Scratch,
) {
    let stride = width;
    let pcount = height * width;
    let frames = ref_y.len();

    for plane in 0..3 {
        if ctx.base.process[plane] {
            let planes = accum[plane]
                .get_or_insert_with(|| (0..frames).map(|_| FrameAccum::new(pcount)).collect());
            for fa in planes.iter_mut() {
                fa.num.iter_mut().for_each(|v| *v = 0.0);
                fa.den.iter_mut().for_each(|v| *v = 0.0);
            }
        }
    }

    let block_size = ctx.base.params.block_size;
    let rows = scan_positions(height - block_size, ctx.base.params.block_step);
    let cols = scan_positions(width - block_size, ctx.base.params.block_step);

    for &j in &rows {
        for &i in &cols {
            let code = block_matching(ctx, ref_y, cur, height, width, j, i);

            for plane in 0..3 {
                if !ctx.base.process[plane] {
                    continue;
                }
                let fdata = ctx.base.filter[plane].as_ref().expect("filter data");
                let planes = accum[plane].as_mut().expect("accumulator planes");
                let (mut nums, mut dens): (Vec<&mut [f32]>, Vec<&mut [f32]>) = planes
                    .iter_mut()
                    .map(|fa| (fa.num.as_mut_slice(), fa.den.as_mut_slice()))
                    .unzip();

                if ctx.base.params.wiener {
                    filter::collaborative_wiener_temporal(
                        &mut nums,
                        &mut dens,
                        srcs[plane].expect("source planes"),
                        wrefs[plane].expect("wiener reference planes"),
                        stride,
                        &code,
                        fdata,
                        &mut scratch.transform,
                    );
                } else {
                    filter::collaborative_basic_temporal(
                        &mut nums,
                        &mut dens,
                        srcs[plane].expect("source planes"),
                        stride,
                        &code,
                        fdata,
                        &mut scratch.transform,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Profile;

    fn context() -> TemporalContext {
        let mut params = VBm3dParams::new(false, Profile::Fast);
        params.bm3d.set_sigma(&[10.0]).unwrap();
        TemporalContext::new(params, ColorMatrix::Opp, [true, false, false])
    }

    #[test]
    fn test_reference_block_stays_first() {
        let ctx = context();
        let plane: Vec<f32> = (0..32 * 32).map(|i| ((i * 13) % 97) as f32 / 97.0).collect();
        let refs: Vec<&[f32]> = vec![&plane, &plane, &plane];
        let code = block_matching(&ctx, &refs, 1, 32, 32, 8, 8);
        assert!(!code.is_empty());
        assert_eq!(code[0].key, 0.0);
        assert_eq!(code[0].pos, Pos3 { z: 1, y: 8, x: 8 });
        assert!(code.len() <= ctx.base.params.group_size);
    }

    #[test]
    fn test_repeated_frame_finds_cross_frame_matches() {
        let ctx = context();
        let plane: Vec<f32> = (0..32 * 32).map(|i| ((i * 7) % 31) as f32 / 31.0).collect();
        let refs: Vec<&[f32]> = vec![&plane, &plane, &plane];
        let code = block_matching(&ctx, &refs, 1, 32, 32, 0, 0);
        // The identical co-located block in the adjacent frames has SSD 0
        // and is therefore excluded, but near-identical neighborhood
        // positions within threshold appear with their frame index.
        for entry in &code {
            assert!(entry.pos.z < 3);
        }
    }

    #[test]
    fn test_kernel_covers_current_frame() {
        let ctx = context();
        let (h, w) = (24usize, 24usize);
        let plane = vec![0.5f32; h * w];
        let refs: Vec<&[f32]> = vec![&plane, &plane, &plane];
        let mut accum: [Option<Vec<FrameAccum>>; 3] = [None, None, None];
        let mut scratch = Scratch::new();
        kernel(
            &ctx,
            &mut accum,
            [Some(&refs), None, None],
            &refs,
            [None, None, None],
            1,
            h,
            w,
            &mut scratch,
        );
        let planes = accum[0].as_ref().unwrap();
        assert_eq!(planes.len(), 3);
        // The current frame's own offset is fully covered by the raster.
        assert!(planes[1].den.iter().all(|&d| d > 0.0));
        // Numerator of the constant plane normalizes back to 0.5.
        for (n, d) in planes[1].num.iter().zip(&planes[1].den) {
            assert!((n / d - 0.5).abs() < 1e-5);
        }
    }
}
