use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use crate::plane::AlignedVec;

/// One-dimensional unnormalized DCT pair of a given length, stored as dense
/// coefficient matrices. The forward table is DCT-II, the backward table
/// DCT-III, so a round trip amplifies by 2n per axis.
pub(crate) struct DctTable {
    n: usize,
    fwd: Vec<f32>,
    bwd: Vec<f32>,
}

impl DctTable {
    fn new(n: usize) -> Self {
        let mut fwd = vec![0.0f32; n * n];
        let mut bwd = vec![0.0f32; n * n];
        for k in 0..n {
            for j in 0..n {
                // Y_k = 2 sum_j x_j cos(pi (j + 1/2) k / n)
                fwd[k * n + j] =
                    (2.0 * (PI * (j as f64 + 0.5) * k as f64 / n as f64).cos()) as f32;
                // Y_j = x_0 + 2 sum_{k>=1} x_k cos(pi k (j + 1/2) / n)
                bwd[j * n + k] = if k == 0 {
                    1.0
                } else {
                    (2.0 * (PI * k as f64 * (j as f64 + 0.5) / n as f64).cos()) as f32
                };
            }
        }
        DctTable { n, fwd, bwd }
    }

    fn apply(&self, table: &[f32], src: &[f32], dst: &mut [f32]) {
        let n = self.n;
        for (k, out) in dst.iter_mut().enumerate() {
            let row = &table[k * n..(k + 1) * n];
            let mut acc = 0.0f32;
            for (coef, &v) in row.iter().zip(src) {
                acc += coef * v;
            }
            *out = acc;
        }
    }
}

/// Process-wide planner cache. Plan construction is serialized behind this
/// mutex; built plans are immutable and shared.
static PLANNER: Lazy<Mutex<HashMap<usize, Arc<DctTable>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn plan_dct(n: usize) -> Arc<DctTable> {
    let mut cache = PLANNER.lock().unwrap_or_else(|e| e.into_inner());
    cache
        .entry(n)
        .or_insert_with(|| Arc::new(DctTable::new(n)))
        .clone()
}

/// Reusable buffers for the separable transform passes.
pub(crate) struct TransformScratch {
    line: Vec<f32>,
    line_out: Vec<f32>,
}

impl TransformScratch {
    pub fn new() -> Self {
        TransformScratch {
            line: Vec::new(),
            line_out: Vec::new(),
        }
    }

    fn resize(&mut self, n: usize) {
        self.line.resize(n, 0.0);
        self.line_out.resize(n, 0.0);
    }
}

/// Per-channel precomputed filter tables: 3-D DCT plans for every group
/// size, the amplification factors, and either the hard-threshold tables or
/// the Wiener noise energy.
pub(crate) struct FilterData {
    wiener: bool,
    group_size: usize,
    block_size: usize,
    plans: Vec<Arc<DctTable>>,
    block_plan: Arc<DctTable>,
    final_amp: Vec<f64>,
    thr_table: Vec<AlignedVec>,
    wiener_sigma_sqr: Vec<f32>,
}

impl FilterData {
    /// `sigma` is the channel noise level already scaled into the internal
    /// color space (sigma / 255 * row_norm).
    pub fn new(
        wiener: bool,
        sigma: f64,
        group_size: usize,
        block_size: usize,
        lambda: f64,
    ) -> Self {
        let block_plan = plan_dct(block_size);
        let mut plans = Vec::with_capacity(group_size);
        let mut final_amp = Vec::with_capacity(group_size);
        let mut thr_table = Vec::new();
        let mut wiener_sigma_sqr = Vec::new();

        for k in 1..=group_size {
            plans.push(plan_dct(k));

            let amp = (2 * k * 2 * block_size * 2 * block_size) as f64;
            final_amp.push(amp);
            let forward_amp = amp.sqrt();

            if wiener {
                wiener_sigma_sqr.push((sigma * forward_amp * sigma * forward_amp) as f32);
            } else {
                let thr_base = sigma * lambda * forward_amp;
                let thr = [
                    thr_base,
                    thr_base * 2f64.sqrt(),
                    thr_base * 2.0,
                    thr_base * 8f64.sqrt(),
                ];

                // Coefficients on a DC axis carry more energy; each zero
                // index raises the threshold by sqrt(2).
                let mut table = AlignedVec::zeroed(k * block_size * block_size);
                let mut idx = 0;
                for z in 0..k {
                    for y in 0..block_size {
                        for x in 0..block_size {
                            let mut flag = 0;
                            if x == 0 {
                                flag += 1;
                            }
                            if y == 0 {
                                flag += 1;
                            }
                            if z == 0 {
                                flag += 1;
                            }
                            table[idx] = thr[flag] as f32;
                            idx += 1;
                        }
                    }
                }
                thr_table.push(table);
            }
        }

        FilterData {
            wiener,
            group_size,
            block_size,
            plans,
            block_plan,
            final_amp,
            thr_table,
            wiener_sigma_sqr,
        }
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn final_amp(&self, k: usize) -> f64 {
        self.final_amp[k - 1]
    }

    pub fn threshold_table(&self, k: usize) -> &[f32] {
        debug_assert!(!self.wiener);
        &self.thr_table[k - 1]
    }

    pub fn wiener_sigma_sqr(&self, k: usize) -> f32 {
        debug_assert!(self.wiener);
        self.wiener_sigma_sqr[k - 1]
    }

    /// Forward 3-D DCT-II in place over a contiguous (k, B, B) group.
    pub fn forward(&self, data: &mut [f32], k: usize, scratch: &mut TransformScratch) {
        self.execute(data, k, false, scratch);
    }

    /// Backward 3-D DCT-III in place; the caller divides by `final_amp`.
    pub fn backward(&self, data: &mut [f32], k: usize, scratch: &mut TransformScratch) {
        self.execute(data, k, true, scratch);
    }

    fn execute(&self, data: &mut [f32], k: usize, backward: bool, scratch: &mut TransformScratch) {
        let b = self.block_size;
        debug_assert_eq!(data.len(), k * b * b);
        let group_plan = &self.plans[k - 1];
        let block_plan = &self.block_plan;
        let block_table: &[f32] = if backward { &block_plan.bwd } else { &block_plan.fwd };
        let group_table: &[f32] = if backward { &group_plan.bwd } else { &group_plan.fwd };

        scratch.resize(k.max(b));

        // Axis x: rows are contiguous.
        for row in data.chunks_exact_mut(b) {
            scratch.line[..b].copy_from_slice(row);
            block_plan.apply(block_table, &scratch.line[..b], &mut scratch.line_out[..b]);
            row.copy_from_slice(&scratch.line_out[..b]);
        }

        // Axis y: columns inside each slab, stride B.
        for slab in data.chunks_exact_mut(b * b) {
            for x in 0..b {
                for y in 0..b {
                    scratch.line[y] = slab[y * b + x];
                }
                block_plan.apply(block_table, &scratch.line[..b], &mut scratch.line_out[..b]);
                for y in 0..b {
                    slab[y * b + x] = scratch.line_out[y];
                }
            }
        }

        // Axis z: across slabs, stride B*B. The size-1 transform still
        // contributes its factor of 2 to the round-trip gain.
        let slab_len = b * b;
        for i in 0..slab_len {
            for z in 0..k {
                scratch.line[z] = data[z * slab_len + i];
            }
            group_plan.apply(group_table, &scratch.line[..k], &mut scratch.line_out[..k]);
            for z in 0..k {
                data[z * slab_len + i] = scratch.line_out[z];
            }
        }
    }
}
