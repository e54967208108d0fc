// Interval sampling scan: decode a clip sequentially, run the detector on one
// frame every N seconds, and keep the person boxes.

use crate::detect::Detector;
use crate::error::ExtractError;
use crate::pipeline::types::Detection;
use crate::video::{self, Backend, VideoReader};
use std::num::{NonZeroU32, NonZeroU64};

/// Default gap between sampled frames.
pub const DEFAULT_INTERVAL_SECONDS: u32 = 5;

/// Open `path` and scan it. See [`sample`].
pub fn process(
    path: &str,
    backend: Backend,
    detector: &mut dyn Detector,
    interval_seconds: NonZeroU32,
) -> Result<Vec<Detection>, ExtractError> {
    let mut reader = video::open(backend, path)?;
    let fps = video::truncated_fps(reader.source_fps()).ok_or_else(|| {
        ExtractError::InvalidFrameRate {
            path: path.to_string(),
        }
    })?;

    sample(reader.as_mut(), detector, fps, interval_seconds)
}

/// Scan an opened reader. One frame out of every `fps * interval_seconds` is
/// submitted to the detector, starting with frame 0; end of stream is the only
/// termination condition, so an empty clip yields an empty set. A detector
/// fault loses that frame's detections but not the scan.
pub fn sample(
    reader: &mut dyn VideoReader,
    detector: &mut dyn Detector,
    fps: NonZeroU64,
    interval_seconds: NonZeroU32,
) -> Result<Vec<Detection>, ExtractError> {
    // Both factors are non-zero, so the modulo below cannot divide by zero.
    let frame_interval = fps.get() * u64::from(interval_seconds.get());
    let mut detections = Vec::new();
    let mut frame_count: u64 = 0;

    loop {
        let frame = match reader.read_frame().map_err(ExtractError::Decode)? {
            Some(frame) => frame,
            None => break,
        };

        if frame_count % frame_interval == 0 {
            match detector.detect(&frame) {
                Ok(objects) => {
                    let ts = frame_count / fps.get();
                    for object in objects.into_iter().filter(|o| o.is_person()) {
                        detections.push(Detection {
                            ts,
                            bb: object.bbox,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!("detector failed on frame {}: {:#}", frame_count, e);
                }
            }
        }

        frame_count += 1;
    }

    tracing::info!(
        "scanned {} frames, {} person detections",
        frame_count,
        detections.len()
    );
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{person, FakeReader, ScriptedDetector};

    fn seconds(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn fps(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn samples_one_frame_per_interval_starting_at_zero() {
        // 20 frames at 2 fps with a 3s interval: frames 0, 6, 12, 18.
        let mut reader = FakeReader::solid(20, 2.0);
        let mut detector = ScriptedDetector::quiet();

        let out = sample(&mut reader, &mut detector, fps(2), seconds(3)).unwrap();

        assert_eq!(detector.calls, 4);
        assert!(out.is_empty());
    }

    #[test]
    fn five_second_clip_at_thirty_fps_samples_only_frame_zero() {
        let mut reader = FakeReader::solid(150, 30.0);
        let mut detector = ScriptedDetector::new(vec![Ok(vec![person([10, 10, 100, 100])])]);

        let out = sample(&mut reader, &mut detector, fps(30), seconds(5)).unwrap();

        assert_eq!(detector.calls, 1);
        assert_eq!(
            out,
            vec![Detection {
                ts: 0,
                bb: [10, 10, 100, 100]
            }]
        );
    }

    #[test]
    fn timestamps_are_floor_divided_and_non_decreasing() {
        let mut reader = FakeReader::solid(20, 2.0);
        let mut detector = ScriptedDetector::new(vec![
            Ok(vec![person([0, 0, 5, 5]), person([1, 1, 6, 6])]),
            Ok(vec![person([2, 2, 7, 7])]),
            Ok(Vec::new()),
            Ok(vec![person([3, 3, 8, 8])]),
        ]);

        let out = sample(&mut reader, &mut detector, fps(2), seconds(3)).unwrap();

        let ts: Vec<u64> = out.iter().map(|d| d.ts).collect();
        assert_eq!(ts, vec![0, 0, 3, 9]);
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn empty_video_yields_an_empty_set() {
        let mut reader = FakeReader::solid(0, 30.0);
        let mut detector = ScriptedDetector::quiet();

        let out = sample(&mut reader, &mut detector, fps(30), seconds(5)).unwrap();

        assert!(out.is_empty());
        assert_eq!(detector.calls, 0);
    }

    #[test]
    fn non_person_classes_are_filtered_out() {
        let mut dog = person([5, 5, 20, 20]);
        dog.class_id = 16;
        dog.class_name = Some("dog".to_string());

        let mut reader = FakeReader::solid(1, 30.0);
        let mut detector = ScriptedDetector::new(vec![Ok(vec![dog, person([1, 2, 3, 4])])]);

        let out = sample(&mut reader, &mut detector, fps(30), seconds(5)).unwrap();

        assert_eq!(
            out,
            vec![Detection {
                ts: 0,
                bb: [1, 2, 3, 4]
            }]
        );
    }

    #[test]
    fn a_detector_fault_skips_the_frame_but_not_the_scan() {
        // 8 frames at 1 fps, 2s interval: sampled frames 0, 2, 4, 6.
        let mut reader = FakeReader::solid(8, 1.0);
        let mut detector = ScriptedDetector::new(vec![
            Err("inference backend unavailable".to_string()),
            Ok(vec![person([4, 4, 9, 9])]),
        ]);

        let out = sample(&mut reader, &mut detector, fps(1), seconds(2)).unwrap();

        assert_eq!(detector.calls, 4);
        assert_eq!(
            out,
            vec![Detection {
                ts: 2,
                bb: [4, 4, 9, 9]
            }]
        );
    }
}
