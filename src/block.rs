use smallvec::SmallVec;
use std::cmp::Ordering;

use crate::plane::AlignedVec;

/// 2-D block position (top-left corner), ordered (y, x).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pos {
    pub y: usize,
    pub x: usize,
}

/// Spatio-temporal block position, ordered (frame, y, x).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pos3 {
    pub z: usize,
    pub y: usize,
    pub x: usize,
}

/// A matched position with its distance key in MSE units.
#[derive(Debug, Clone, Copy)]
pub struct MatchEntry {
    pub key: f32,
    pub pos: Pos,
}

impl MatchEntry {
    /// Total order: distance first, then position, so sorting is
    /// deterministic without relying on sort stability.
    pub fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .partial_cmp(&other.key)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.pos.cmp(&other.pos))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchEntry3 {
    pub key: f32,
    pub pos: Pos3,
}

impl MatchEntry3 {
    pub fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .partial_cmp(&other.key)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.pos.cmp(&other.pos))
    }
}

/// How the reference block's own position takes part in a multi-match scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentPos {
    /// Scan the current position like any other candidate.
    Include,
    /// Skip it during the scan but prepend it with key 0 to the result.
    Prepend,
    /// Skip it entirely.
    Exclude,
}

/// A reference block: an owned aligned copy of a B x B tile at a position.
pub struct Block {
    height: usize,
    width: usize,
    pos: Pos,
    data: AlignedVec,
}

impl Block {
    pub fn from_plane(src: &[f32], stride: usize, height: usize, width: usize, pos: Pos) -> Self {
        let mut data = AlignedVec::zeroed(height * width);
        for y in 0..height {
            let row = (pos.y + y) * stride + pos.x;
            data[y * width..(y + 1) * width].copy_from_slice(&src[row..row + width]);
        }
        Block {
            height,
            width,
            pos,
            data,
        }
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn pos(&self) -> Pos {
        self.pos
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Writes the block back into a plane at its position.
    pub fn store(&self, dst: &mut [f32], stride: usize) {
        for y in 0..self.height {
            let row = (self.pos.y + y) * stride + self.pos.x;
            dst[row..row + self.width].copy_from_slice(&self.data[y * self.width..(y + 1) * self.width]);
        }
    }

    /// Adds the block, scaled by `gain`, into a plane at its position.
    pub fn add_to(&self, dst: &mut [f32], stride: usize, gain: f32) {
        for y in 0..self.height {
            let row = (self.pos.y + y) * stride + self.pos.x;
            for (out, &v) in dst[row..row + self.width]
                .iter_mut()
                .zip(&self.data[y * self.width..(y + 1) * self.width])
            {
                *out += v * gain;
            }
        }
    }

    /// Adds `value` at every pixel the block covers.
    pub fn count_to(&self, dst: &mut [f32], stride: usize, value: f32) {
        for y in 0..self.height {
            let row = (self.pos.y + y) * stride + self.pos.x;
            for out in &mut dst[row..row + self.width] {
                *out += value;
            }
        }
    }

    fn ssd(&self, src: &[f32], stride: usize, pos: Pos) -> f32 {
        let mut dist = 0.0f32;
        for y in 0..self.height {
            let row = (pos.y + y) * stride + pos.x;
            let refrow = &self.data[y * self.width..(y + 1) * self.width];
            for (refv, &srcv) in refrow.iter().zip(&src[row..row + self.width]) {
                let diff = refv - srcv;
                dist += diff * diff;
            }
        }
        dist
    }

    /// One boundary of the search window: the reference coordinate pushed
    /// toward `range` away, pulled back in whole steps until it lies inside
    /// the valid interval ending at `plane_boundary`.
    pub fn search_boundary(
        pos: usize,
        plane_boundary: usize,
        search_range: usize,
        search_step: usize,
    ) -> usize {
        let range = (search_range / search_step * search_step) as i64;
        let step = search_step as i64;
        let pos = pos as i64;
        let bound = plane_boundary as i64;

        let result = match pos.cmp(&bound) {
            Ordering::Equal => bound,
            Ordering::Greater => {
                let mut sb = pos - range;
                while sb < bound {
                    sb += step;
                }
                sb
            }
            Ordering::Less => {
                let mut sb = pos + range;
                while sb > bound {
                    sb -= step;
                }
                sb
            }
        };
        result as usize
    }

    fn window(
        &self,
        src_height: usize,
        src_width: usize,
        range: usize,
        step: usize,
    ) -> (usize, usize, usize, usize) {
        let l = Self::search_boundary(self.pos.x, 0, range, step);
        let r = Self::search_boundary(self.pos.x, src_width - self.width, range, step);
        let t = Self::search_boundary(self.pos.y, 0, range, step);
        let b = Self::search_boundary(self.pos.y, src_height - self.height, range, step);
        (t, b, l, r)
    }

    fn mse_to_sse(&self, src_range: f32, th_mse: f64) -> (f32, f32) {
        let mse2sse =
            (self.height * self.width) as f64 * f64::from(src_range) * f64::from(src_range)
                / (255.0 * 255.0);
        ((th_mse * mse2sse) as f32, (1.0 / mse2sse) as f32)
    }

    /// Greedy single-match scan: returns the first position whose SSD drops
    /// to the threshold, or the overall minimum if none does.
    pub fn block_matching(
        &self,
        src: &[f32],
        src_height: usize,
        src_width: usize,
        src_stride: usize,
        src_range: f32,
        range: usize,
        step: usize,
        th_mse: f64,
        exclude_cur_pos: bool,
    ) -> MatchEntry {
        let (t, b, l, r) = self.window(src_height, src_width, range, step);
        let (th_sse, dist_mul) = self.mse_to_sse(src_range, th_mse);

        let mut dist_min = f32::MAX;
        let mut pos = Pos { y: 0, x: 0 };

        'scan: for j in (t..=b).step_by(step) {
            for i in (l..=r).step_by(step) {
                if exclude_cur_pos && j == self.pos.y && i == self.pos.x {
                    continue;
                }
                let dist = self.ssd(src, src_stride, Pos { y: j, x: i });
                if dist < dist_min {
                    dist_min = dist;
                    pos = Pos { y: j, x: i };
                    if dist_min <= th_sse {
                        break 'scan;
                    }
                }
            }
        }

        MatchEntry {
            key: dist_min * dist_mul,
            pos,
        }
    }

    fn matching_into(
        &self,
        out: &mut Vec<MatchEntry>,
        src: &[f32],
        src_stride: usize,
        search_pos: &[Pos],
        th_sse: f32,
        dist_mul: f32,
    ) {
        for &pos in search_pos {
            let dist = self.ssd(src, src_stride, pos);
            // Only match similar blocks but not identical blocks.
            if dist <= th_sse && dist != 0.0 {
                out.push(MatchEntry {
                    key: dist * dist_mul,
                    pos,
                });
            }
        }
    }

    fn sort_and_truncate(code: &mut Vec<MatchEntry>, match_size: usize, sorted: bool) {
        if match_size > 0 && code.len() > match_size {
            code.sort_unstable_by(MatchEntry::cmp);
            code.truncate(match_size);
        } else if sorted {
            code.sort_by(MatchEntry::cmp);
        }
    }

    /// Multi-match scan over the rectangular window around the reference
    /// position. Keeps positions with SSD within the threshold, sorted by
    /// distance and truncated to `match_size` entries when positive.
    pub fn block_matching_multi(
        &self,
        src: &[f32],
        src_height: usize,
        src_width: usize,
        src_stride: usize,
        src_range: f32,
        range: usize,
        step: usize,
        th_mse: f64,
        cur_pos: CurrentPos,
        match_size: usize,
        sorted: bool,
    ) -> Vec<MatchEntry> {
        let (t, b, l, r) = self.window(src_height, src_width, range, step);
        let (th_sse, dist_mul) = self.mse_to_sse(src_range, th_mse);

        let mut search_pos =
            Vec::with_capacity(((r - l) / step + 1) * ((b - t) / step + 1));
        for j in (t..=b).step_by(step) {
            for i in (l..=r).step_by(step) {
                if cur_pos != CurrentPos::Include && j == self.pos.y && i == self.pos.x {
                    continue;
                }
                search_pos.push(Pos { y: j, x: i });
            }
        }

        let mut code = Vec::with_capacity(search_pos.len() + 1);
        if cur_pos == CurrentPos::Prepend {
            code.push(MatchEntry {
                key: 0.0,
                pos: self.pos,
            });
        }
        self.matching_into(&mut code, src, src_stride, &search_pos, th_sse, dist_mul);
        Self::sort_and_truncate(&mut code, match_size, sorted);
        code
    }

    /// Multi-match scan over an explicit search-position list (predictive
    /// search path).
    pub fn block_matching_multi_pos(
        &self,
        src: &[f32],
        src_stride: usize,
        src_range: f32,
        search_pos: &[Pos],
        th_mse: f64,
        match_size: usize,
        sorted: bool,
    ) -> Vec<MatchEntry> {
        let (th_sse, dist_mul) = self.mse_to_sse(src_range, th_mse);
        let mut code = Vec::with_capacity(search_pos.len());
        self.matching_into(&mut code, src, src_stride, search_pos, th_sse, dist_mul);
        Self::sort_and_truncate(&mut code, match_size, sorted);
        code
    }

    /// Union of the search windows around the seed positions, deduplicated
    /// and sorted; seeds the cross-frame predictive search.
    pub fn gen_search_pos(
        &self,
        seeds: &[Pos],
        src_height: usize,
        src_width: usize,
        range: usize,
        step: usize,
    ) -> Vec<Pos> {
        let mut search_pos = Vec::new();
        for &seed in seeds {
            let l = Self::search_boundary(seed.x, 0, range, step);
            let r = Self::search_boundary(seed.x, src_width - self.width, range, step);
            let t = Self::search_boundary(seed.y, 0, range, step);
            let b = Self::search_boundary(seed.y, src_height - self.height, range, step);
            for j in (t..=b).step_by(step) {
                for i in (l..=r).step_by(step) {
                    search_pos.push(Pos { y: j, x: i });
                }
            }
        }
        search_pos.sort_unstable();
        search_pos.dedup();
        search_pos
    }
}

/// A 3-D stack of up to G matched blocks with their positions. The data is
/// contiguous `[k][y][x]` with slab stride equal to the block width, so the
/// separable 3-D transform addresses it as one array.
pub struct BlockGroup {
    group_size: usize,
    height: usize,
    width: usize,
    positions: SmallVec<[Pos3; 8]>,
    data: AlignedVec,
}

impl BlockGroup {
    /// Builds a group from a spatial match code; positions carry frame 0.
    pub fn from_matches(
        src: &[f32],
        src_stride: usize,
        code: &[MatchEntry],
        max_group: usize,
        block_size: usize,
    ) -> Self {
        let group_size = code.len().min(max_group);
        let positions: SmallVec<[Pos3; 8]> = code[..group_size]
            .iter()
            .map(|m| Pos3 {
                z: 0,
                y: m.pos.y,
                x: m.pos.x,
            })
            .collect();
        let mut group = BlockGroup {
            group_size,
            height: block_size,
            width: block_size,
            positions,
            data: AlignedVec::zeroed(group_size * block_size * block_size),
        };
        group.load(&[src], src_stride);
        group
    }

    /// Builds a group from a spatio-temporal match code; `srcs` holds one
    /// plane per frame of the window.
    pub fn from_matches3(
        srcs: &[&[f32]],
        src_stride: usize,
        code: &[MatchEntry3],
        max_group: usize,
        block_size: usize,
    ) -> Self {
        let group_size = code.len().min(max_group);
        let positions: SmallVec<[Pos3; 8]> =
            code[..group_size].iter().map(|m| m.pos).collect();
        let mut group = BlockGroup {
            group_size,
            height: block_size,
            width: block_size,
            positions,
            data: AlignedVec::zeroed(group_size * block_size * block_size),
        };
        group.load(srcs, src_stride);
        group
    }

    fn load(&mut self, srcs: &[&[f32]], stride: usize) {
        let (h, w) = (self.height, self.width);
        for (k, pos) in self.positions.iter().enumerate() {
            let src = srcs[pos.z];
            let slab = &mut self.data[k * h * w..(k + 1) * h * w];
            for y in 0..h {
                let row = (pos.y + y) * stride + pos.x;
                slab[y * w..(y + 1) * w].copy_from_slice(&src[row..row + w]);
            }
        }
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn block_size(&self) -> usize {
        self.width
    }

    pub fn positions(&self) -> &[Pos3] {
        &self.positions
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Adds every stacked block, scaled by `gain`, into a single plane.
    pub fn add_to(&self, dst: &mut [f32], stride: usize, gain: f32) {
        let (h, w) = (self.height, self.width);
        for (k, pos) in self.positions.iter().enumerate() {
            let slab = &self.data[k * h * w..(k + 1) * h * w];
            for y in 0..h {
                let row = (pos.y + y) * stride + pos.x;
                for (out, &v) in dst[row..row + w].iter_mut().zip(&slab[y * w..(y + 1) * w]) {
                    *out += v * gain;
                }
            }
        }
    }

    /// Adds `value` at every pixel covered by a stacked block.
    pub fn count_to(&self, dst: &mut [f32], stride: usize, value: f32) {
        let (h, w) = (self.height, self.width);
        for pos in &self.positions {
            for y in 0..h {
                let row = (pos.y + y) * stride + pos.x;
                for out in &mut dst[row..row + w] {
                    *out += value;
                }
            }
        }
    }

    /// Temporal form of `add_to`: each block lands in the plane of its frame.
    pub fn add_to_frames(&self, dst: &mut [&mut [f32]], stride: usize, gain: f32) {
        let (h, w) = (self.height, self.width);
        for (k, pos) in self.positions.iter().enumerate() {
            let slab = &self.data[k * h * w..(k + 1) * h * w];
            let plane = &mut *dst[pos.z];
            for y in 0..h {
                let row = (pos.y + y) * stride + pos.x;
                for (out, &v) in plane[row..row + w].iter_mut().zip(&slab[y * w..(y + 1) * w]) {
                    *out += v * gain;
                }
            }
        }
    }

    /// Temporal form of `count_to`.
    pub fn count_to_frames(&self, dst: &mut [&mut [f32]], stride: usize, value: f32) {
        let (h, w) = (self.height, self.width);
        for pos in &self.positions {
            let plane = &mut *dst[pos.z];
            for y in 0..h {
                let row = (pos.y + y) * stride + pos.x;
                for out in &mut plane[row..row + w] {
                    *out += value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_plane(height: usize, width: usize) -> Vec<f32> {
        (0..height * width).map(|i| i as f32 / 100.0).collect()
    }

    #[test]
    fn test_search_boundary_clamps_to_interior() {
        // Reference at 10, valid interior [0, 24], range 16, step 1.
        assert_eq!(Block::search_boundary(10, 0, 16, 1), 0);
        assert_eq!(Block::search_boundary(10, 24, 16, 1), 24);
        // Step 3 pulls the boundary back to a reachable position.
        assert_eq!(Block::search_boundary(10, 0, 16, 3), 1);
        assert_eq!(Block::search_boundary(10, 24, 16, 3), 22);
        // Position already at the boundary.
        assert_eq!(Block::search_boundary(24, 24, 16, 1), 24);
    }

    #[test]
    fn test_self_match_has_key_zero_first() {
        let plane = gradient_plane(16, 16);
        let block = Block::from_plane(&plane, 16, 8, 8, Pos { y: 4, x: 4 });
        let code = block.block_matching_multi(
            &plane,
            16,
            16,
            16,
            1.0,
            4,
            1,
            1e6,
            CurrentPos::Prepend,
            8,
            true,
        );
        assert!(!code.is_empty());
        assert_eq!(code[0].key, 0.0);
        assert_eq!(code[0].pos, Pos { y: 4, x: 4 });
        assert!(code.len() <= 8);
        for pair in code.windows(2) {
            assert!(pair[0].key <= pair[1].key);
        }
    }

    #[test]
    fn test_identical_blocks_are_not_matched() {
        // A constant plane: every candidate has SSD 0 and is dropped, so
        // only the prepended reference remains.
        let plane = vec![0.25f32; 16 * 16];
        let block = Block::from_plane(&plane, 16, 8, 8, Pos { y: 0, x: 0 });
        let code = block.block_matching_multi(
            &plane,
            16,
            16,
            16,
            1.0,
            8,
            1,
            1e6,
            CurrentPos::Prepend,
            16,
            true,
        );
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].pos, Pos { y: 0, x: 0 });
    }

    #[test]
    fn test_greedy_matching_finds_duplicate() {
        let mut plane = gradient_plane(24, 24);
        // Copy the tile at (0, 0) to (12, 8).
        for y in 0..8 {
            for x in 0..8 {
                plane[(12 + y) * 24 + 8 + x] = plane[y * 24 + x];
            }
        }
        let block = Block::from_plane(&plane, 24, 8, 8, Pos { y: 0, x: 0 });
        let found = block.block_matching(&plane, 24, 24, 24, 1.0, 16, 1, 0.0, true);
        assert_eq!(found.pos, Pos { y: 12, x: 8 });
        assert_eq!(found.key, 0.0);
    }

    #[test]
    fn test_match_key_is_in_mse_units() {
        // Two 1x1 "blocks" differing by d have SSD d^2 over 1 pixel; the
        // key divides out pixel count and the 1/255^2 range factor.
        let plane = vec![0.0f32, 10.0 / 255.0];
        let block = Block::from_plane(&plane, 2, 1, 1, Pos { y: 0, x: 0 });
        let code = block.block_matching_multi(
            &plane,
            1,
            2,
            2,
            1.0,
            1,
            1,
            1e6,
            CurrentPos::Prepend,
            0,
            true,
        );
        assert_eq!(code.len(), 2);
        assert!((code[1].key - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_gen_search_pos_dedups_overlapping_windows() {
        let plane = gradient_plane(32, 32);
        let block = Block::from_plane(&plane, 32, 8, 8, Pos { y: 8, x: 8 });
        let seeds = [Pos { y: 8, x: 8 }, Pos { y: 9, x: 8 }];
        let positions = block.gen_search_pos(&seeds, 32, 32, 2, 1);
        let mut unique = positions.clone();
        unique.dedup();
        assert_eq!(positions.len(), unique.len());
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        // Both windows span y in [6, 11]; x in [6, 10]: 6 * 5 positions.
        assert_eq!(positions.len(), 30);
    }

    #[test]
    fn test_group_layout_contiguous() {
        let plane = gradient_plane(16, 16);
        let code = [
            MatchEntry { key: 0.0, pos: Pos { y: 0, x: 0 } },
            MatchEntry { key: 1.0, pos: Pos { y: 8, x: 8 } },
        ];
        let group = BlockGroup::from_matches(&plane, 16, &code, 8, 8);
        assert_eq!(group.group_size(), 2);
        assert_eq!(group.data().len(), 2 * 64);
        // Slab 1 row 0 equals the plane row at (8, 8).
        assert_eq!(group.data()[64], plane[8 * 16 + 8]);
        assert_eq!(group.data()[64 + 8], plane[9 * 16 + 8]);
    }

    #[test]
    fn test_group_aggregate_coverage() {
        let plane = vec![1.0f32; 16 * 16];
        let code = [
            MatchEntry { key: 0.0, pos: Pos { y: 0, x: 0 } },
            MatchEntry { key: 1.0, pos: Pos { y: 4, x: 4 } },
        ];
        let group = BlockGroup::from_matches(&plane, 16, &code, 8, 8);
        let mut num = vec![0.0f32; 16 * 16];
        let mut den = vec![0.0f32; 16 * 16];
        group.add_to(&mut num, 16, 0.5);
        group.count_to(&mut den, 16, 0.5);
        // The overlap region got two contributions.
        assert_eq!(den[0], 0.5);
        assert_eq!(den[5 * 16 + 5], 1.0);
        assert_eq!(num[5 * 16 + 5], 1.0);
    }
}
