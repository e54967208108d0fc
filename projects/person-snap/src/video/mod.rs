pub mod ffmpeg_reader;
pub mod opencv_reader;

use crate::error::ExtractError;
use anyhow::{anyhow, Result};
use clap::ValueEnum;
use image::RgbImage;
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use std::num::NonZeroU64;

/// Which decoding library backs a [`VideoReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Opencv,
    Ffmpeg,
}

/// Decoding of a single video file. Frames come out as BGR `Mat`s at the
/// source resolution. Dropping the reader releases the decoder, on every exit
/// path.
pub trait VideoReader: Send {
    /// Frame rate as reported by the container. May be zero for malformed or
    /// variable-rate sources; callers must treat that as an error before
    /// dividing by it.
    fn source_fps(&self) -> f64;

    /// Position the stream so the next `read_frame` decodes `frame_num`.
    fn seek_to_frame(&mut self, frame_num: u64) -> Result<()>;

    /// Decode the next frame, or `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<Mat>>;
}

/// Open `path` with the requested backend.
pub fn open(backend: Backend, path: &str) -> Result<Box<dyn VideoReader>, ExtractError> {
    let file_open = |reason: anyhow::Error| ExtractError::FileOpen {
        path: path.to_string(),
        reason,
    };

    Ok(match backend {
        Backend::Opencv => {
            Box::new(opencv_reader::OpencvReader::new(path).map_err(file_open)?)
        }
        Backend::Ffmpeg => {
            Box::new(ffmpeg_reader::FfmpegReader::new(path).map_err(file_open)?)
        }
    })
}

/// fps as the detection artifacts define it: the container's reported rate
/// truncated toward zero. `None` when truncation leaves nothing to divide by,
/// so downstream frame arithmetic never sees a zero rate.
pub fn truncated_fps(reported: f64) -> Option<NonZeroU64> {
    NonZeroU64::new(reported.max(0.0) as u64)
}

/// Convert a BGR `Mat` to an `RgbImage` (channel order corrected, data copied).
pub fn mat_to_rgb_image(mat: &Mat) -> Result<RgbImage> {
    let mut rgb_mat = Mat::default();
    imgproc::cvt_color_def(mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    RgbImage::from_vec(size.width as u32, size.height as u32, buffer)
        .ok_or_else(|| anyhow!("Failed to create image buffer from Mat data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_fps_drops_the_fraction() {
        assert_eq!(truncated_fps(30.0), NonZeroU64::new(30));
        assert_eq!(truncated_fps(29.97), NonZeroU64::new(29));
    }

    #[test]
    fn truncated_fps_rejects_unusable_rates() {
        assert_eq!(truncated_fps(0.0), None);
        assert_eq!(truncated_fps(0.5), None);
        assert_eq!(truncated_fps(-25.0), None);
    }
}
