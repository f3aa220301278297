use thiserror::Error;

/// Unified error type for BM3D configuration and processing.
/// Construction errors abort the operation for that clip; warnings go
/// through the `log` crate and never abort.
#[derive(Error, Debug)]
pub enum Bm3dError {
    #[error("Invalid \"{name}\" assigned, must be {constraint}")]
    Param {
        name: &'static str,
        constraint: &'static str,
    },

    #[error("Unrecognized \"profile\" specified, should be \"fast\", \"lc\", \"np\", \"high\" or \"vn\"")]
    UnknownProfile,

    #[error("Unsupported \"matrix\" specified")]
    UnsupportedMatrix,

    #[error("Invalid {clip} clip, {reason}")]
    Format {
        clip: &'static str,
        reason: String,
    },

    #[error("input clip and clip \"{clip}\" must be of the same {property}")]
    ClipMismatch {
        clip: &'static str,
        property: &'static str,
    },

    #[error(
        "{clip} clip: sub-sampled format is not supported when chroma is processed, \
         convert it to YUV444 or RGB first. \
         For the best quality, RGB colorspace is recommended as input."
    )]
    SubsampledChroma { clip: &'static str },

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_error_message() {
        let err = Bm3dError::Param {
            name: "block_size",
            constraint: "an integer in [1, 64]",
        };
        assert_eq!(
            err.to_string(),
            "Invalid \"block_size\" assigned, must be an integer in [1, 64]"
        );
    }

    #[test]
    fn test_clip_mismatch_message() {
        let err = Bm3dError::ClipMismatch {
            clip: "ref",
            property: "format",
        };
        assert_eq!(
            err.to_string(),
            "input clip and clip \"ref\" must be of the same format"
        );
    }
}
