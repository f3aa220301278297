use crate::block::{BlockGroup, MatchEntry, MatchEntry3};
use crate::transform::{FilterData, TransformScratch};

/// Hard-threshold shrinkage: zero every transform coefficient whose
/// magnitude is at or below its per-position threshold, count the rest.
fn hard_threshold(data: &mut [f32], thresholds: &[f32]) -> usize {
    let mut retained = 0usize;
    for (v, &thr) in data.iter_mut().zip(thresholds) {
        if *v > thr || *v < -thr {
            retained += 1;
        } else {
            *v = 0.0;
        }
    }
    retained
}

/// Empirical Wiener shrinkage guided by the reference coefficients; returns
/// the accumulated L2 norm of the Wiener gains.
fn wiener_shrink(data: &mut [f32], guide: &[f32], sigma_sqr: f32) -> f32 {
    let mut l2 = 0.0f32;
    for (v, &g) in data.iter_mut().zip(guide) {
        let energy = g * g;
        let coef = energy / (energy + sigma_sqr);
        *v *= coef;
        l2 += coef * coef;
    }
    l2
}

fn basic_weights(retained: usize, amp: f64) -> (f32, f32) {
    let den_weight = if retained < 1 {
        1.0
    } else {
        1.0 / retained as f32
    };
    let num_weight = (f64::from(den_weight) / amp) as f32;
    (num_weight, den_weight)
}

fn wiener_weights(l2: f32, amp: f64) -> (f32, f32) {
    let l2 = l2.max(f32::EPSILON);
    let den_weight = 1.0 / l2;
    let num_weight = (f64::from(den_weight) / amp) as f32;
    (num_weight, den_weight)
}

/// Spatial hard-threshold collaborative filter: group, transform, shrink,
/// inverse transform, and aggregate into the numerator/denominator planes.
pub(crate) fn collaborative_basic(
    num: &mut [f32],
    den: &mut [f32],
    src: &[f32],
    stride: usize,
    code: &[MatchEntry],
    fdata: &FilterData,
    scratch: &mut TransformScratch,
) {
    let mut group = BlockGroup::from_matches(src, stride, code, fdata.group_size(), fdata.block_size());
    let k = group.group_size();

    fdata.forward(group.data_mut(), k, scratch);
    let retained = hard_threshold(group.data_mut(), fdata.threshold_table(k));
    fdata.backward(group.data_mut(), k, scratch);

    let (num_weight, den_weight) = basic_weights(retained, fdata.final_amp(k));
    group.add_to(num, stride, num_weight);
    group.count_to(den, stride, den_weight);
}

/// Spatial empirical-Wiener collaborative filter; `wref` supplies the
/// shrinkage guide.
pub(crate) fn collaborative_wiener(
    num: &mut [f32],
    den: &mut [f32],
    src: &[f32],
    wref: &[f32],
    stride: usize,
    code: &[MatchEntry],
    fdata: &FilterData,
    scratch: &mut TransformScratch,
) {
    let mut src_group =
        BlockGroup::from_matches(src, stride, code, fdata.group_size(), fdata.block_size());
    let mut ref_group =
        BlockGroup::from_matches(wref, stride, code, fdata.group_size(), fdata.block_size());
    let k = src_group.group_size();

    fdata.forward(src_group.data_mut(), k, scratch);
    fdata.forward(ref_group.data_mut(), k, scratch);
    let l2 = wiener_shrink(
        src_group.data_mut(),
        ref_group.data(),
        fdata.wiener_sigma_sqr(k),
    );
    fdata.backward(src_group.data_mut(), k, scratch);

    let (num_weight, den_weight) = wiener_weights(l2, fdata.final_amp(k));
    src_group.add_to(num, stride, num_weight);
    src_group.count_to(den, stride, den_weight);
}

/// Temporal hard-threshold filter: the group spans the frame window and the
/// cleaned blocks land in the per-frame numerator/denominator planes.
pub(crate) fn collaborative_basic_temporal(
    num: &mut [&mut [f32]],
    den: &mut [&mut [f32]],
    srcs: &[&[f32]],
    stride: usize,
    code: &[MatchEntry3],
    fdata: &FilterData,
    scratch: &mut TransformScratch,
) {
    let mut group =
        BlockGroup::from_matches3(srcs, stride, code, fdata.group_size(), fdata.block_size());
    let k = group.group_size();

    fdata.forward(group.data_mut(), k, scratch);
    let retained = hard_threshold(group.data_mut(), fdata.threshold_table(k));
    fdata.backward(group.data_mut(), k, scratch);

    let (num_weight, den_weight) = basic_weights(retained, fdata.final_amp(k));
    group.add_to_frames(num, stride, num_weight);
    group.count_to_frames(den, stride, den_weight);
}

/// Temporal empirical-Wiener filter.
pub(crate) fn collaborative_wiener_temporal(
    num: &mut [&mut [f32]],
    den: &mut [&mut [f32]],
    srcs: &[&[f32]],
    wrefs: &[&[f32]],
    stride: usize,
    code: &[MatchEntry3],
    fdata: &FilterData,
    scratch: &mut TransformScratch,
) {
    let mut src_group =
        BlockGroup::from_matches3(srcs, stride, code, fdata.group_size(), fdata.block_size());
    let mut ref_group =
        BlockGroup::from_matches3(wrefs, stride, code, fdata.group_size(), fdata.block_size());
    let k = src_group.group_size();

    fdata.forward(src_group.data_mut(), k, scratch);
    fdata.forward(ref_group.data_mut(), k, scratch);
    let l2 = wiener_shrink(
        src_group.data_mut(),
        ref_group.data(),
        fdata.wiener_sigma_sqr(k),
    );
    fdata.backward(src_group.data_mut(), k, scratch);

    let (num_weight, den_weight) = wiener_weights(l2, fdata.final_amp(k));
    src_group.add_to_frames(num, stride, num_weight);
    src_group.count_to_frames(den, stride, den_weight);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Pos;

    #[test]
    fn test_hard_threshold_counts_and_zeroes() {
        let mut data = [3.0f32, -0.5, 0.5, -4.0, 0.0];
        let thr = [1.0f32, 1.0, 1.0, 1.0, 1.0];
        let retained = hard_threshold(&mut data, &thr);
        assert_eq!(retained, 2);
        assert_eq!(data, [3.0, 0.0, 0.0, -4.0, 0.0]);
    }

    #[test]
    fn test_wiener_shrink_bounds() {
        let mut data = [1.0f32, 1.0];
        let guide = [10.0f32, 0.0];
        let l2 = wiener_shrink(&mut data, &guide, 1.0);
        // Large guide energy keeps the coefficient, zero guide kills it.
        assert!(data[0] > 0.98 && data[0] < 1.0);
        assert_eq!(data[1], 0.0);
        assert!(l2 > 0.96 && l2 < 1.0);
    }

    #[test]
    fn test_basic_weights_guard() {
        let (_, den) = basic_weights(0, 512.0);
        assert_eq!(den, 1.0);
        let (num, den) = basic_weights(4, 512.0);
        assert_eq!(den, 0.25);
        assert!((num - 0.25 / 512.0).abs() < 1e-9);
    }

    #[test]
    fn test_wiener_weights_guard() {
        let (_, den) = wiener_weights(0.0, 512.0);
        assert!(den.is_finite());
        let (_, den) = wiener_weights(2.0, 512.0);
        assert_eq!(den, 0.5);
    }

    #[test]
    fn test_collaborative_basic_identity_at_zero_sigma() {
        // With sigma = 0 the threshold table is all zeros, every non-zero
        // coefficient is retained and the block is reproduced.
        let b = 8;
        let (h, w) = (8usize, 8usize);
        let src: Vec<f32> = (0..h * w).map(|i| (i as f32 * 0.11).sin() * 0.3 + 0.5).collect();
        let fdata = FilterData::new(false, 0.0, 1, b, 2.7);
        let mut scratch = TransformScratch::new();
        let code = [MatchEntry {
            key: 0.0,
            pos: Pos { y: 0, x: 0 },
        }];
        let mut num = vec![0.0f32; h * w];
        let mut den = vec![0.0f32; h * w];
        collaborative_basic(&mut num, &mut den, &src, w, &code, &fdata, &mut scratch);
        for i in 0..h * w {
            assert!(den[i] > 0.0);
            let out = num[i] / den[i];
            assert!((out - src[i]).abs() < 1e-4, "{} != {}", out, src[i]);
        }
    }

    #[test]
    fn test_collaborative_wiener_identity_with_clean_guide() {
        // Near-zero sigma makes every Wiener gain 1 wherever the guide
        // coefficient is non-zero; using the source itself as guide the
        // output reproduces the input.
        let b = 4;
        let (h, w) = (4usize, 4usize);
        let src: Vec<f32> = (0..h * w).map(|i| 0.3 + 0.02 * i as f32).collect();
        let fdata = FilterData::new(true, 1e-6, 1, b, 2.7);
        let mut scratch = TransformScratch::new();
        let code = [MatchEntry {
            key: 0.0,
            pos: Pos { y: 0, x: 0 },
        }];
        let mut num = vec![0.0f32; h * w];
        let mut den = vec![0.0f32; h * w];
        collaborative_wiener(&mut num, &mut den, &src, &src, w, &code, &fdata, &mut scratch);
        for i in 0..h * w {
            let out = num[i] / den[i];
            assert!((out - src[i]).abs() < 1e-4);
        }
    }
}
