// On-demand crop extraction: re-seek the second a detection was sampled at,
// crop the stored box out of that frame, and hand it back as base64 PNG.

use crate::error::ExtractError;
use crate::pipeline::types::Detection;
use crate::video::{self, mat_to_rgb_image, Backend, VideoReader};
use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use opencv::core::{Mat, Rect};
use opencv::prelude::*;
use std::io::Cursor;
use std::num::NonZeroU64;

/// Open `path`, seek to `detection.ts` and return the cropped box as base64
/// encoded PNG. The path must point at the same clip the detection was sampled
/// from for the timestamp-to-frame mapping to hold.
pub fn extract_box_as_b64(
    path: &str,
    backend: Backend,
    detection: &Detection,
) -> Result<String, ExtractError> {
    let mut reader = video::open(backend, path)?;
    let fps = video::truncated_fps(reader.source_fps()).ok_or_else(|| {
        ExtractError::InvalidFrameRate {
            path: path.to_string(),
        }
    })?;

    extract_from_reader(reader.as_mut(), fps, detection)
}

/// Seek + crop + encode against an already opened reader. `ts * fps` is the
/// first frame of the sampled second, which may differ from the exact frame
/// the sampler saw (accepted precision loss of the record format).
pub fn extract_from_reader(
    reader: &mut dyn VideoReader,
    fps: NonZeroU64,
    detection: &Detection,
) -> Result<String, ExtractError> {
    let frame_number = detection.ts * fps.get();
    let seek_failed = || ExtractError::Seek {
        seconds: detection.ts,
        frame: frame_number,
    };

    reader.seek_to_frame(frame_number).map_err(|_| seek_failed())?;
    let frame = reader
        .read_frame()
        .map_err(ExtractError::Decode)?
        .ok_or_else(seek_failed)?;

    let cropped = crop_clamped(&frame, detection.bb).map_err(ExtractError::Encode)?;
    let rgb = mat_to_rgb_image(&cropped).map_err(ExtractError::Encode)?;

    let mut png = Cursor::new(Vec::new());
    rgb.write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| ExtractError::Encode(e.into()))?;

    Ok(BASE64.encode(png.into_inner()))
}

/// Crop `[y1:y2, x1:x2]` with coordinates clamped to the frame. Stored boxes
/// were computed against the same resolution, so clamping is normally a no-op;
/// a box that lands entirely outside the frame is an error, not a panic.
pub fn crop_clamped(frame: &Mat, bb: [i32; 4]) -> Result<Mat> {
    let size = frame.size()?;
    let [x1, y1, x2, y2] = bb;

    let x1 = x1.clamp(0, size.width);
    let y1 = y1.clamp(0, size.height);
    let x2 = x2.clamp(0, size.width);
    let y2 = y2.clamp(0, size.height);

    let width = x2 - x1;
    let height = y2 - y1;
    if width <= 0 || height <= 0 {
        anyhow::bail!(
            "Invalid crop dimensions: {}x{} (bb: {:?})",
            width,
            height,
            bb
        );
    }

    let roi = Rect::new(x1, y1, width, height);
    let cropped = Mat::roi(frame, roi)?;

    let mut out = Mat::default();
    cropped.copy_to(&mut out)?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{blank_frame, FakeReader};
    use image::GenericImageView;
    use opencv::core::Scalar;
    use opencv::imgproc;

    fn fps(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    /// A 64x48 black frame with a solid blue rectangle at (10,10)-(30,40).
    fn frame_with_blue_box() -> Mat {
        let mut frame = blank_frame(48, 64);
        imgproc::rectangle(
            &mut frame,
            Rect::new(10, 10, 20, 30),
            Scalar::new(255.0, 0.0, 0.0, 0.0), // BGR blue
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        frame
    }

    #[test]
    fn round_trips_the_sampled_region() {
        let mut reader = FakeReader::new(vec![frame_with_blue_box()], 30.0);
        let detection = Detection {
            ts: 0,
            bb: [10, 10, 30, 40],
        };

        let b64 = extract_from_reader(&mut reader, fps(30), &detection).unwrap();
        let bytes = BASE64.decode(b64.as_bytes()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();

        assert_eq!(decoded.dimensions(), (20, 30));
        // BGR blue comes back as RGB blue after channel correction.
        assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(decoded.get_pixel(19, 29).0, [0, 0, 255, 255]);
    }

    #[test]
    fn seeks_to_the_first_frame_of_the_second() {
        // 3 seconds of frames at 2 fps; only frame 4 carries the blue box.
        let mut frames: Vec<Mat> = (0..6).map(|_| blank_frame(48, 64)).collect();
        frames[4] = frame_with_blue_box();
        let mut reader = FakeReader::new(frames, 2.0);

        let detection = Detection {
            ts: 2,
            bb: [10, 10, 30, 40],
        };
        let b64 = extract_from_reader(&mut reader, fps(2), &detection).unwrap();
        let bytes = BASE64.decode(b64.as_bytes()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();

        assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn timestamp_beyond_the_clip_is_a_seek_error() {
        let mut reader = FakeReader::new(vec![blank_frame(48, 64); 2], 1.0);
        let detection = Detection {
            ts: 10,
            bb: [0, 0, 10, 10],
        };

        let err = extract_from_reader(&mut reader, fps(1), &detection).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Seek {
                seconds: 10,
                frame: 10
            }
        ));
    }

    #[test]
    fn oversized_boxes_are_clamped_to_the_frame() {
        let frame = blank_frame(48, 64);
        let cropped = crop_clamped(&frame, [-5, -5, 1000, 1000]).unwrap();
        assert_eq!((cropped.cols(), cropped.rows()), (64, 48));
    }

    #[test]
    fn a_box_entirely_outside_the_frame_fails_cleanly() {
        let frame = blank_frame(48, 64);
        assert!(crop_clamped(&frame, [100, 100, 200, 200]).is_err());
        assert!(crop_clamped(&frame, [30, 30, 10, 10]).is_err());
    }
}
