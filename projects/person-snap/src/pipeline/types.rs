// Detection record definitions
//
// A scan produces a JSON array of these records (`detections.json` inside the
// run directory); the cropper consumes one record at a time, on demand.

use serde::{Deserialize, Serialize};

/// One detected person: the second of the clip the sampled frame belongs to,
/// and the box around the person in original-frame pixel coordinates.
///
/// `ts` is the frame index floor-divided by the frame rate, so every frame
/// within a second maps to the same value. Re-seeking by `ts` therefore lands
/// on the first frame of that second; that precision loss is part of the
/// format, not a defect.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Seconds elapsed in the clip at the sampled frame.
    pub ts: u64,
    /// `[x1, y1, x2, y2]` in pixels, relative to the full decoded frame.
    pub bb: [i32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_the_artifact_format() {
        let detection = Detection {
            ts: 5,
            bb: [120, 45, 300, 480],
        };
        assert_eq!(
            serde_json::to_string(&detection).unwrap(),
            r#"{"ts":5,"bb":[120,45,300,480]}"#
        );
    }

    #[test]
    fn deserializes_a_detection_set() {
        let set: Vec<Detection> = serde_json::from_str(
            r#"[{"ts":5,"bb":[120,45,300,480]},{"ts":10,"bb":[80,60,250,470]}]"#,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[1].ts, 10);
        assert_eq!(set[1].bb, [80, 60, 250, 470]);
    }

    #[test]
    fn rejects_a_malformed_box() {
        let result: Result<Detection, _> = serde_json::from_str(r#"{"ts":5,"bb":[1,2,3]}"#);
        assert!(result.is_err());
    }
}
