use serde::{Deserialize, Serialize};
use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::errors::Bm3dError;

/// Alignment of every float buffer addressed by the inner loops.
pub(crate) const MEMORY_ALIGNMENT: usize = 32;

/// Owning 32-byte-aligned f32 buffer. Fixed length, zero-initialized.
pub(crate) struct AlignedVec {
    ptr: NonNull<f32>,
    len: usize,
}

impl AlignedVec {
    pub fn zeroed(len: usize) -> Self {
        if len == 0 {
            return AlignedVec {
                ptr: NonNull::dangling(),
                len: 0,
            };
        }
        let layout = Layout::from_size_align(len * size_of::<f32>(), MEMORY_ALIGNMENT)
            .expect("invalid buffer layout");
        // Zeroed allocation doubles as the accumulator reset.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw as *mut f32) else {
            alloc::handle_alloc_error(layout)
        };
        AlignedVec { ptr, len }
    }

    pub fn from_slice(src: &[f32]) -> Self {
        let mut buf = AlignedVec::zeroed(src.len());
        buf.copy_from_slice(src);
        buf
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn fill_zero(&mut self) {
        self.iter_mut().for_each(|v| *v = 0.0);
    }
}

impl Deref for AlignedVec {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedVec {
    fn deref_mut(&mut self) -> &mut [f32] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Clone for AlignedVec {
    fn clone(&self) -> Self {
        AlignedVec::from_slice(self)
    }
}

impl Drop for AlignedVec {
    fn drop(&mut self) {
        if self.len > 0 {
            let layout = Layout::from_size_align(self.len * size_of::<f32>(), MEMORY_ALIGNMENT)
                .expect("invalid buffer layout");
            unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) };
        }
    }
}

impl std::fmt::Debug for AlignedVec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedVec").field("len", &self.len).finish()
    }
}

// The buffer is uniquely owned plain data.
unsafe impl Send for AlignedVec {}
unsafe impl Sync for AlignedVec {}

/// Color family of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFamily {
    Gray,
    Yuv,
    YCoCg,
    Rgb,
}

impl ColorFamily {
    pub fn plane_count(self) -> usize {
        match self {
            ColorFamily::Gray => 1,
            _ => 3,
        }
    }
}

/// Sample representation: 8-16 bit integer or 32-bit float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    Int { bits: u32 },
    Float,
}

impl SampleFormat {
    pub fn validate(self, clip: &'static str) -> Result<(), Bm3dError> {
        match self {
            SampleFormat::Int { bits } if !(8..=16).contains(&bits) => Err(Bm3dError::Format {
                clip,
                reason: "only 8-16 bit integer or 32 bit float formats supported".to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::Float)
    }
}

/// Constant format of a clip. Chroma sub-sampling factors are log2;
/// both are zero for 4:4:4 and for the families without chroma planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub family: ColorFamily,
    pub sample: SampleFormat,
    pub width: usize,
    pub height: usize,
    pub sub_sampling_w: u32,
    pub sub_sampling_h: u32,
}

impl VideoFormat {
    pub fn new(family: ColorFamily, sample: SampleFormat, width: usize, height: usize) -> Self {
        VideoFormat {
            family,
            sample,
            width,
            height,
            sub_sampling_w: 0,
            sub_sampling_h: 0,
        }
    }

    pub fn plane_count(&self) -> usize {
        self.family.plane_count()
    }

    pub fn plane_dimensions(&self, plane: usize) -> (usize, usize) {
        if plane == 0 || self.family == ColorFamily::Rgb {
            (self.width, self.height)
        } else {
            (
                self.width >> self.sub_sampling_w,
                self.height >> self.sub_sampling_h,
            )
        }
    }

    pub fn is_sub_sampled(&self) -> bool {
        self.sub_sampling_w != 0 || self.sub_sampling_h != 0
    }
}

/// Tagged plane storage. Conversion to the internal f32 representation
/// happens once on entry and once on exit; every inner loop runs on f32.
#[derive(Debug, Clone)]
pub enum PlaneData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl PlaneData {
    pub fn len(&self) -> usize {
        match self {
            PlaneData::U8(v) => v.len(),
            PlaneData::U16(v) => v.len(),
            PlaneData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn zeroed(sample: SampleFormat, len: usize) -> Self {
        match sample {
            SampleFormat::Int { bits } if bits <= 8 => PlaneData::U8(vec![0; len]),
            SampleFormat::Int { .. } => PlaneData::U16(vec![0; len]),
            SampleFormat::Float => PlaneData::F32(vec![0.0; len]),
        }
    }

    pub(crate) fn matches(&self, sample: SampleFormat) -> bool {
        match (self, sample) {
            (PlaneData::U8(_), SampleFormat::Int { bits }) => bits <= 8,
            (PlaneData::U16(_), SampleFormat::Int { bits }) => bits > 8,
            (PlaneData::F32(_), SampleFormat::Float) => true,
            _ => false,
        }
    }

    /// Raw sample values widened to f32, without any range mapping.
    pub(crate) fn to_raw_f32(&self) -> Vec<f32> {
        match self {
            PlaneData::U8(v) => v.iter().map(|&s| s as f32).collect(),
            PlaneData::U16(v) => v.iter().map(|&s| s as f32).collect(),
            PlaneData::F32(v) => v.clone(),
        }
    }

    /// Stores raw destination-scale values back into typed samples.
    /// Integer casts truncate; the conversion gains already carry the
    /// rounding offset.
    pub(crate) fn from_raw_f32(values: &[f32], sample: SampleFormat) -> Self {
        match sample {
            SampleFormat::Int { bits } if bits <= 8 => {
                PlaneData::U8(values.iter().map(|&v| v as u8).collect())
            }
            SampleFormat::Int { .. } => PlaneData::U16(values.iter().map(|&v| v as u16).collect()),
            SampleFormat::Float => PlaneData::F32(values.to_vec()),
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            PlaneData::F32(v) => Some(v),
            _ => None,
        }
    }
}

/// Nominal sample range of integer YUV input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorRange {
    Full,
    Limited,
}

/// Frame metadata carried between operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameProps {
    pub color_range: Option<ColorRange>,
    /// Raw matrix tag as published by the host (`_Matrix`).
    pub matrix: Option<i64>,
    /// Set by `rgb_to_opp` and the temporal stages on RGB input; marks the
    /// planes as opponent color space, which also forces full range.
    pub bm3d_opp: bool,
    pub v_radius: Option<usize>,
    pub v_process: Option<[bool; 3]>,
}

/// A single video frame: constant format, planes and properties.
#[derive(Debug, Clone)]
pub struct Frame {
    pub format: VideoFormat,
    pub planes: Vec<PlaneData>,
    pub props: FrameProps,
}

impl Frame {
    pub fn new(format: VideoFormat) -> Self {
        let planes = (0..format.plane_count())
            .map(|p| {
                let (w, h) = format.plane_dimensions(p);
                PlaneData::zeroed(format.sample, w * h)
            })
            .collect();
        Frame {
            format,
            planes,
            props: FrameProps::default(),
        }
    }

    pub fn from_planes(
        format: VideoFormat,
        planes: Vec<PlaneData>,
        props: FrameProps,
    ) -> Result<Self, Bm3dError> {
        format.sample.validate("input")?;
        if planes.len() != format.plane_count() {
            return Err(Bm3dError::Format {
                clip: "input",
                reason: format!(
                    "expected {} planes, got {}",
                    format.plane_count(),
                    planes.len()
                ),
            });
        }
        for (p, plane) in planes.iter().enumerate() {
            let (w, h) = format.plane_dimensions(p);
            if plane.len() != w * h {
                return Err(Bm3dError::Format {
                    clip: "input",
                    reason: format!("plane {} size mismatch", p),
                });
            }
            if !plane.matches(format.sample) {
                return Err(Bm3dError::Format {
                    clip: "input",
                    reason: format!("plane {} sample type mismatch", p),
                });
            }
        }
        Ok(Frame {
            format,
            planes,
            props,
        })
    }

    /// Limited range applies only when explicitly tagged and the frame is
    /// not in opponent color space.
    pub(crate) fn is_full_range(&self) -> bool {
        self.props.bm3d_opp || self.props.color_range != Some(ColorRange::Limited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_vec_alignment() {
        for len in [1, 7, 64, 1023] {
            let buf = AlignedVec::zeroed(len);
            assert_eq!(buf.len(), len);
            assert_eq!(buf.as_ptr() as usize % MEMORY_ALIGNMENT, 0);
            assert!(buf.iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_aligned_vec_clone() {
        let mut buf = AlignedVec::zeroed(16);
        buf[3] = 1.5;
        let copy = buf.clone();
        assert_eq!(copy[3], 1.5);
        assert_eq!(copy.len(), 16);
    }

    #[test]
    fn test_frame_construction() {
        let format = VideoFormat::new(
            ColorFamily::Yuv,
            SampleFormat::Int { bits: 8 },
            16,
            8,
        );
        let frame = Frame::new(format);
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[0].len(), 128);
    }

    #[test]
    fn test_from_planes_rejects_mismatch() {
        let format = VideoFormat::new(ColorFamily::Gray, SampleFormat::Float, 4, 4);
        let err = Frame::from_planes(
            format,
            vec![PlaneData::F32(vec![0.0; 15])],
            FrameProps::default(),
        );
        assert!(err.is_err());
        let err = Frame::from_planes(
            format,
            vec![PlaneData::U8(vec![0; 16])],
            FrameProps::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_full_range_detection() {
        let format = VideoFormat::new(ColorFamily::Yuv, SampleFormat::Int { bits: 8 }, 4, 4);
        let mut frame = Frame::new(format);
        assert!(frame.is_full_range());
        frame.props.color_range = Some(ColorRange::Limited);
        assert!(!frame.is_full_range());
        frame.props.bm3d_opp = true;
        assert!(frame.is_full_range());
    }

    #[test]
    fn test_sub_sampled_dimensions() {
        let mut format = VideoFormat::new(ColorFamily::Yuv, SampleFormat::Int { bits: 8 }, 16, 16);
        format.sub_sampling_w = 1;
        format.sub_sampling_h = 1;
        assert!(format.is_sub_sampled());
        assert_eq!(format.plane_dimensions(0), (16, 16));
        assert_eq!(format.plane_dimensions(1), (8, 8));
    }
}
