use super::VideoReader;
use anyhow::{anyhow, Result};
use opencv::{
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_POS_FRAMES},
};

/// Video reader backed by OpenCV's `VideoCapture`.
pub struct OpencvReader {
    capture: VideoCapture,
    source_fps: f64,
}

impl OpencvReader {
    pub fn new(path: &str) -> Result<Self> {
        let capture = VideoCapture::from_file(path, CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(anyhow!("Failed to open video file: {}", path));
        }

        // Reported as-is; a zero rate is for the caller to reject.
        let source_fps = capture.get(CAP_PROP_FPS)?;
        let raw_count = capture.get(CAP_PROP_FRAME_COUNT)? as usize;

        tracing::debug!(
            "OpencvReader: opened {}, fps={:.2}, stream_frames={}",
            path,
            source_fps,
            raw_count
        );

        Ok(Self {
            capture,
            source_fps,
        })
    }
}

impl VideoReader for OpencvReader {
    fn source_fps(&self) -> f64 {
        self.source_fps
    }

    fn seek_to_frame(&mut self, frame_num: u64) -> Result<()> {
        self.capture.set(CAP_PROP_POS_FRAMES, frame_num as f64)?;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame)?;
        if !success || frame.empty() {
            // VideoCapture does not distinguish end of stream from a decode
            // fault; either way there is nothing further to read.
            return Ok(None);
        }

        Ok(Some(frame))
    }
}
