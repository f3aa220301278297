use crate::block::{Block, CurrentPos, MatchEntry, Pos};
use crate::color::{self, ColorMatrix};
use crate::filter;
use crate::params::Bm3dParams;
use crate::plane::AlignedVec;
use crate::transform::{FilterData, TransformScratch};

/// Owns the validated parameters and the per-channel precomputed tables of
/// one configured operation. Shared immutably between workers.
pub(crate) struct EngineContext {
    pub params: Bm3dParams,
    pub matrix: ColorMatrix,
    pub process: [bool; 3],
    /// Matching threshold rescaled by the luma row norm of the matrix.
    pub th_mse: f64,
    pub filter: [Option<FilterData>; 3],
}

impl EngineContext {
    pub fn new(params: Bm3dParams, matrix: ColorMatrix, process: [bool; 3]) -> Self {
        // Sigma and thMSE arrive in the nominal 0-255 scale; rescale them
        // into the internal color space through the matrix row norms.
        let norms = color::row_norms(matrix);
        let th_mse = params.th_mse * norms[0];
        let filter = std::array::from_fn(|i| {
            process[i].then(|| {
                FilterData::new(
                    params.wiener,
                    params.sigma[i] / 255.0 * norms[i],
                    params.group_size,
                    params.block_size,
                    params.lambda,
                )
            })
        });
        EngineContext {
            params,
            matrix,
            process,
            th_mse,
            filter,
        }
    }
}

/// Worker-owned scratch reused across frames: denominator planes plus the
/// transform line buffers.
pub(crate) struct Scratch {
    den: [Option<AlignedVec>; 3],
    pub transform: TransformScratch,
}

impl Scratch {
    pub fn new() -> Self {
        Scratch {
            den: [None, None, None],
            transform: TransformScratch::new(),
        }
    }

    fn den_plane(&mut self, plane: usize, pcount: usize) -> &mut AlignedVec {
        let slot = &mut self.den[plane];
        match slot {
            Some(buf) if buf.len() == pcount => {
                buf.fill_zero();
            }
            _ => *slot = Some(AlignedVec::zeroed(pcount)),
        }
        slot.as_mut().expect("denominator scratch")
    }
}

/// Reference-block raster along one axis: every `step` positions, with the
/// last position snapped to `limit` so the trailing strip is covered
/// exactly once.
pub(crate) fn scan_positions(limit: usize, step: usize) -> Vec<usize> {
    let mut positions = Vec::with_capacity(limit / step + 2);
    let mut j = 0;
    loop {
        if j >= limit + step {
            break;
        }
        if j > limit {
            j = limit;
        }
        positions.push(j);
        j += step;
    }
    positions
}

/// Group formation for one reference block: skipped entirely when the
/// group degenerates to the reference block itself.
pub(crate) fn block_matching(
    ctx: &EngineContext,
    ref_plane: &[f32],
    height: usize,
    width: usize,
    j: usize,
    i: usize,
) -> Vec<MatchEntry> {
    let pos = Pos { y: j, x: i };
    if ctx.params.group_size == 1 || ctx.th_mse <= 0.0 {
        return vec![MatchEntry { key: 0.0, pos }];
    }

    let block = Block::from_plane(
        ref_plane,
        width,
        ctx.params.block_size,
        ctx.params.block_size,
        pos,
    );
    block.block_matching_multi(
        ref_plane,
        height,
        width,
        width,
        1.0,
        ctx.params.bm_range,
        ctx.params.bm_step,
        ctx.th_mse,
        CurrentPos::Prepend,
        ctx.params.group_size,
        true,
    )
}

/// One frame of spatial BM3D over the internal float planes. Block
/// matching runs in the luma reference plane; the positions group every
/// processed channel. `dst` planes double as the numerator accumulators.
pub(crate) fn kernel(
    ctx: &EngineContext,
    dst: &mut [Option<Vec<f32>>; 3],
    src: [Option<&[f32]>; 3],
    ref_y: &[f32],
    wref: [Option<&[f32]>; 3],
    height: usize,
    width: usize,
    scratch: &mut Scratch,
) {
    let stride = width;
    let pcount = height * width;

    for plane in 0..3 {
        if ctx.process[plane] {
            let num = dst[plane].get_or_insert_with(|| vec![0.0; pcount]);
            num.iter_mut().for_each(|v| *v = 0.0);
            scratch.den_plane(plane, pcount);
        }
    }

    let block_size = ctx.params.block_size;
    let rows = scan_positions(height - block_size, ctx.params.block_step);
    let cols = scan_positions(width - block_size, ctx.params.block_step);

    for &j in &rows {
        for &i in &cols {
            let code = block_matching(ctx, ref_y, height, width, j, i);

            for plane in 0..3 {
                if !ctx.process[plane] {
                    continue;
                }
                let fdata = ctx.filter[plane].as_ref().expect("filter data");
                let num = dst[plane].as_mut().expect("numerator plane");
                let den = scratch.den[plane].as_mut().expect("denominator plane");
                if ctx.params.wiener {
                    filter::collaborative_wiener(
                        num,
                        den,
                        src[plane].expect("source plane"),
                        wref[plane].expect("wiener reference plane"),
                        stride,
                        &code,
                        fdata,
                        &mut scratch.transform,
                    );
                } else {
                    filter::collaborative_basic(
                        num,
                        den,
                        src[plane].expect("source plane"),
                        stride,
                        &code,
                        fdata,
                        &mut scratch.transform,
                    );
                }
            }
        }
    }

    // The filtered blocks are summed and averaged to form the estimate.
    for plane in 0..3 {
        if !ctx.process[plane] {
            continue;
        }
        let num = dst[plane].as_mut().expect("numerator plane");
        let den = scratch.den[plane].as_ref().expect("denominator plane");
        for (v, &d) in num.iter_mut().zip(den.iter()) {
            *v /= d;
        }
    }
}
