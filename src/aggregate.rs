use rayon::prelude::*;

use crate::convert::{internal_to_plane, SampleKind};
use crate::errors::Bm3dError;
use crate::plane::{ColorFamily, Frame, SampleFormat, VideoFormat};

/// Temporal aggregator: reduces the stacked intermediates of `vbasic` /
/// `vfinal` over the temporal window into ordinary frames, implementing
/// the delayed overlap-add.
pub struct VAggregate {
    radius: usize,
    sample: SampleKind,
}

impl VAggregate {
    pub fn new(radius: usize, sample: SampleKind) -> Result<Self, Bm3dError> {
        if !(1..=16).contains(&radius) {
            return Err(Bm3dError::Param {
                name: "radius",
                constraint: "an integer in [1, 16]",
            });
        }
        Ok(VAggregate { radius, sample })
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    fn validate_input(&self, frame: &Frame) -> Result<(), Bm3dError> {
        if frame.format.sample != SampleFormat::Float {
            return Err(Bm3dError::Format {
                clip: "input",
                reason: "only accept 32 bit float format clip from vbasic or vfinal".to_string(),
            });
        }
        if frame.format.family == ColorFamily::Rgb {
            return Err(Bm3dError::Format {
                clip: "input",
                reason: "must be of Gray, YUV or YCoCg color family".to_string(),
            });
        }
        let slabs = (self.radius * 2 + 1) * 2;
        if frame.format.height % slabs != 0 {
            return Err(Bm3dError::Format {
                clip: "input",
                reason: format!(
                    "stacked height {} is not a multiple of (2 * radius + 1) * 2 = {}",
                    frame.format.height, slabs
                ),
            });
        }
        Ok(())
    }

    /// Aggregates one output frame from the stacked intermediates of the
    /// clamped window around it. `window[cur]` is the intermediate produced
    /// for the output frame itself.
    pub fn process_window(&self, window: &[&Frame], cur: usize) -> Result<Frame, Bm3dError> {
        if window.is_empty() || cur >= window.len() || window.len() > self.radius * 2 + 1 {
            return Err(Bm3dError::Other(
                "temporal window does not match the configured radius".to_string(),
            ));
        }
        for frame in window {
            self.validate_input(frame)?;
            if frame.format != window[cur].format {
                return Err(Bm3dError::ClipMismatch {
                    clip: "input",
                    property: "format",
                });
            }
        }

        let src = window[cur];
        let props = &src.props;

        match props.v_radius {
            None => log::warn!(
                "vaggregate: no \"bm3d_v_radius\" property on the input frame; \
                 make sure vaggregate consumes the output of vbasic or vfinal"
            ),
            Some(r) if r != self.radius => log::warn!(
                "vaggregate: mismatch between the configured radius={} and the input \
                 frame property bm3d_v_radius={} set by the previous stage",
                self.radius,
                r
            ),
            _ => {}
        }

        let process = match props.v_process {
            Some(flags) => flags,
            None => {
                log::warn!(
                    "vaggregate: no \"bm3d_v_process\" property on the input frame; \
                     assuming every plane was processed"
                );
                [true, true, true]
            }
        };

        let full = src.is_full_range();
        let slab_pairs = self.radius * 2 + 1;
        let height = src.format.height / (slab_pairs * 2);
        let width = src.format.width;

        let dst_sample = match self.sample {
            SampleKind::Integer => SampleFormat::Int { bits: 16 },
            SampleKind::Float => SampleFormat::Float,
        };
        let mut format = VideoFormat::new(src.format.family, dst_sample, width, height);
        format.sub_sampling_w = src.format.sub_sampling_w;
        format.sub_sampling_h = src.format.sub_sampling_h;

        let mut planes = Vec::with_capacity(format.plane_count());
        for plane in 0..format.plane_count() {
            let chroma = plane > 0 && src.format.family != ColorFamily::Rgb;
            let processed = process[plane];
            let (pw, ph) = format.plane_dimensions(plane);
            let pcount = pw * ph;

            let mut acc = vec![0.0f32; pcount];
            if processed {
                let mut den = vec![0.0f32; pcount];
                for (idx, frame) in window.iter().enumerate() {
                    // The slab pair this source frame produced for the
                    // output frame sits at index radius - (m - n).
                    let offset = self.radius as i64 - (idx as i64 - cur as i64);
                    debug_assert!((0..slab_pairs as i64).contains(&offset));
                    let base = offset as usize * 2 * pcount;
                    let data = frame.planes[plane]
                        .as_f32()
                        .expect("stacked intermediate is float");
                    let num_slab = &data[base..base + pcount];
                    let den_slab = &data[base + pcount..base + 2 * pcount];
                    for i in 0..pcount {
                        acc[i] += num_slab[i];
                        den[i] += den_slab[i];
                    }
                }
                for (v, &d) in acc.iter_mut().zip(&den) {
                    *v /= d;
                }
            }
            // Unprocessed planes carry no contributions; they reduce to the
            // neutral value of the internal range.

            planes.push(internal_to_plane(&acc, dst_sample, chroma, full));
        }

        let mut out_props = props.clone();
        out_props.v_radius = None;
        out_props.v_process = None;

        Frame::from_planes(format, planes, out_props)
    }

    /// Aggregates a whole clip of stacked intermediates, clamping the
    /// window at the sequence ends.
    pub fn process_clip(&self, clip: &[Frame]) -> Result<Vec<Frame>, Bm3dError> {
        clip.par_iter()
            .enumerate()
            .map(|(n, _)| {
                let lo = n.saturating_sub(self.radius);
                let hi = (n + self.radius).min(clip.len() - 1);
                let window: Vec<&Frame> = clip[lo..=hi].iter().collect();
                self.process_window(&window, n - lo)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::{FrameProps, PlaneData};

    fn stacked_frame(radius: usize, height: usize, width: usize, fill: &[(usize, f32, f32)]) -> Frame {
        // fill: (slab pair index, numerator value, denominator value)
        let pcount = height * width;
        let slabs = (radius * 2 + 1) * 2;
        let mut data = vec![0.0f32; pcount * slabs];
        for &(pair, num, den) in fill {
            let base = pair * 2 * pcount;
            data[base..base + pcount].iter_mut().for_each(|v| *v = num);
            data[base + pcount..base + 2 * pcount]
                .iter_mut()
                .for_each(|v| *v = den);
        }
        let format = VideoFormat::new(
            ColorFamily::Gray,
            SampleFormat::Float,
            width,
            height * slabs,
        );
        Frame::from_planes(
            format,
            vec![PlaneData::F32(data)],
            FrameProps {
                v_radius: Some(radius),
                v_process: Some([true, false, false]),
                ..FrameProps::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_radius_validation() {
        assert!(VAggregate::new(0, SampleKind::Float).is_err());
        assert!(VAggregate::new(17, SampleKind::Float).is_err());
        assert!(VAggregate::new(1, SampleKind::Float).is_ok());
    }

    #[test]
    fn test_single_frame_window_divides() {
        // One frame, radius 1: only the middle slab pair (index 1) of the
        // frame's own stack is read.
        let agg = VAggregate::new(1, SampleKind::Float).unwrap();
        let frame = stacked_frame(1, 4, 4, &[(1, 0.25, 0.5)]);
        let out = agg.process_window(&[&frame], 0).unwrap();
        assert_eq!(out.format.height, 4);
        let data = out.planes[0].as_f32().unwrap();
        assert!(data.iter().all(|&v| (v - 0.5).abs() < 1e-6));
        assert!(out.props.v_radius.is_none());
    }

    #[test]
    fn test_overlap_add_across_window() {
        let agg = VAggregate::new(1, SampleKind::Float).unwrap();
        // Frame n-1 wrote its forward-offset slab (pair 2), frame n its own
        // (pair 1), frame n+1 its backward-offset slab (pair 0).
        let prev = stacked_frame(1, 4, 4, &[(2, 0.2, 1.0)]);
        let cur = stacked_frame(1, 4, 4, &[(1, 0.4, 1.0)]);
        let next = stacked_frame(1, 4, 4, &[(0, 0.6, 1.0)]);
        let out = agg
            .process_window(&[&prev, &cur, &next], 1)
            .unwrap();
        let data = out.planes[0].as_f32().unwrap();
        for &v in data {
            assert!((v - 0.4).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rejects_rgb_and_integer_input() {
        let agg = VAggregate::new(1, SampleKind::Float).unwrap();
        let rgb = Frame::new(VideoFormat::new(
            ColorFamily::Rgb,
            SampleFormat::Float,
            4,
            24,
        ));
        assert!(agg.process_window(&[&rgb], 0).is_err());
        let int_frame = Frame::new(VideoFormat::new(
            ColorFamily::Gray,
            SampleFormat::Int { bits: 8 },
            4,
            24,
        ));
        assert!(agg.process_window(&[&int_frame], 0).is_err());
    }

    #[test]
    fn test_integer_output_sample() {
        let agg = VAggregate::new(1, SampleKind::Integer).unwrap();
        let frame = stacked_frame(1, 4, 4, &[(1, 1.0, 1.0)]);
        let out = agg.process_window(&[&frame], 0).unwrap();
        match &out.planes[0] {
            PlaneData::U16(v) => assert_eq!(v[0], 65535),
            other => panic!("unexpected plane {:?}", other),
        }
    }
}
