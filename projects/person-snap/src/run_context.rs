use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::pipeline::types::Detection;

pub const METADATA_FILE: &str = "metadata.json";
pub const DETECTIONS_FILE: &str = "detections.json";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunMetadata {
    /// Path of the source clip as it was scanned.
    pub source_path: String,
    /// When the camera captured the clip, recovered from the folder layout
    /// (file mtime when the layout doesn't parse).
    pub captured_at: DateTime<Utc>,
    pub run_id: String,
    #[serde(skip)]
    pub output_dir: PathBuf,
}

pub fn list_videos(video_root: &Path) -> Vec<PathBuf> {
    WalkDir::new(video_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("mp4"))
                .unwrap_or(false)
        })
        // Clips the camera is still uploading show up as dotfiles.
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Run id: the clip's path relative to the video root with separators
/// flattened, so one clip maps to exactly one run directory.
pub fn run_id_for(video_root: &Path, video_path: &Path) -> String {
    let relative = video_path.strip_prefix(video_root).unwrap_or(video_path);
    let flattened = relative.to_string_lossy().replace(['/', '\\'], "-");
    flattened
        .strip_suffix(".mp4")
        .map(str::to_string)
        .unwrap_or(flattened)
}

pub fn has_run(output_root: &Path, video_root: &Path, video_path: &Path) -> bool {
    output_root.join(run_id_for(video_root, video_path)).exists()
}

pub fn create_run(
    output_root: &Path,
    video_root: &Path,
    video_path: &Path,
) -> Result<RunMetadata> {
    let run_id = run_id_for(video_root, video_path);
    let output_dir = output_root.join(&run_id);
    if output_dir.exists() {
        return Err(anyhow::anyhow!(
            "Output directory already exists for: {}",
            run_id
        ));
    }

    fs::create_dir_all(&output_dir)?;

    let captured_at = capture_time_from_path(video_path)
        .map(|dt| dt.and_utc())
        .or_else(|| file_mtime(video_path))
        .unwrap_or_else(Utc::now);

    let metadata = RunMetadata {
        source_path: video_path.to_string_lossy().into_owned(),
        captured_at,
        run_id,
        output_dir: output_dir.clone(),
    };

    let content = serde_json::to_string_pretty(&metadata)?;
    fs::write(output_dir.join(METADATA_FILE), content)?;

    Ok(metadata)
}

/// Persist a finished scan: create the run directory and write its detections
/// in one step. Callers sample first and only record on success, so a run
/// directory always carries its detections and `has_run` never hides a clip
/// whose scan failed.
pub fn record_run(
    output_root: &Path,
    video_root: &Path,
    video_path: &Path,
    detections: &[Detection],
) -> Result<RunMetadata> {
    let metadata = create_run(output_root, video_root, video_path)?;
    if let Err(e) = write_detections(&metadata, detections) {
        // Half a run would block every rescan of this clip.
        let _ = fs::remove_dir_all(&metadata.output_dir);
        return Err(e);
    }
    Ok(metadata)
}

pub fn write_detections(metadata: &RunMetadata, detections: &[Detection]) -> Result<()> {
    let content = serde_json::to_string(detections)?;
    fs::write(metadata.output_dir.join(DETECTIONS_FILE), content)?;
    Ok(())
}

pub fn read_detections(output_dir: &Path) -> Result<Vec<Detection>> {
    let content = fs::read_to_string(output_dir.join(DETECTIONS_FILE))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn list_runs(output_root: &Path) -> Result<Vec<(String, RunMetadata)>> {
    let mut runs = Vec::new();

    if !output_root.exists() {
        return Ok(runs);
    }

    for entry in fs::read_dir(output_root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let metadata_path = path.join(METADATA_FILE);
            if metadata_path.exists() {
                let content = fs::read_to_string(metadata_path)?;
                let mut metadata: RunMetadata = serde_json::from_str(&content)?;
                metadata.output_dir = path.clone();
                let name = path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .to_string();
                runs.push((name, metadata));
            }
        }
    }

    runs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(runs)
}

/// Recover the capture time from the camera's folder layout:
/// `<YYYYMMDDHH>/<MM>M<rest>.mp4`.
pub fn capture_time_from_path(filepath: &Path) -> Option<NaiveDateTime> {
    let folder = filepath.parent()?.file_name()?.to_str()?;
    let filename = filepath.file_name()?.to_str()?;

    let date = NaiveDate::parse_from_str(folder.get(0..8)?, "%Y%m%d").ok()?;
    let hour: u32 = folder.get(8..10)?.parse().ok()?;
    let minute: u32 = filename.split('M').next()?.parse().ok()?;

    date.and_hms_opt(hour, minute, 0)
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .ok()?
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Remove run directories whose source clip no longer exists (the camera
/// rotates old footage away). Returns how many runs were removed.
pub fn sweep_stale_runs(output_root: &Path) -> Result<usize> {
    let mut removed = 0;
    for (name, metadata) in list_runs(output_root)? {
        if !Path::new(&metadata.source_path).exists() {
            tracing::info!("removing stale run {}", name);
            fs::remove_dir_all(&metadata.output_dir)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn capture_time_follows_the_camera_layout() {
        let dt = capture_time_from_path(Path::new("/clips/2023111014/05M00S.mp4")).unwrap();
        assert_eq!(dt.to_string(), "2023-11-10 14:05:00");
    }

    #[test]
    fn capture_time_rejects_other_layouts() {
        assert!(capture_time_from_path(Path::new("/clips/holiday/beach.mp4")).is_none());
        assert!(capture_time_from_path(Path::new("/clips/2023111099/05M.mp4")).is_none());
    }

    #[test]
    fn run_ids_flatten_the_relative_path() {
        let id = run_id_for(
            Path::new("/clips"),
            Path::new("/clips/2023111014/05M00S.mp4"),
        );
        assert_eq!(id, "2023111014-05M00S");
    }

    #[test]
    fn create_then_list_round_trips_metadata() {
        let video_root = tempdir().unwrap();
        let output_root = tempdir().unwrap();

        let clip_dir = video_root.path().join("2023111014");
        fs::create_dir_all(&clip_dir).unwrap();
        let clip = clip_dir.join("05M00S.mp4");
        fs::write(&clip, b"not really a video").unwrap();

        let metadata = create_run(output_root.path(), video_root.path(), &clip).unwrap();
        assert!(has_run(output_root.path(), video_root.path(), &clip));

        write_detections(
            &metadata,
            &[Detection {
                ts: 5,
                bb: [1, 2, 3, 4],
            }],
        )
        .unwrap();

        let runs = list_runs(output_root.path()).unwrap();
        assert_eq!(runs.len(), 1);
        let (name, listed) = &runs[0];
        assert_eq!(name, "2023111014-05M00S");
        assert_eq!(listed.source_path, clip.to_string_lossy());

        let detections = read_detections(&listed.output_dir).unwrap();
        assert_eq!(
            detections,
            vec![Detection {
                ts: 5,
                bb: [1, 2, 3, 4],
            }]
        );
    }

    #[test]
    fn record_run_persists_metadata_and_detections_together() {
        let video_root = tempdir().unwrap();
        let output_root = tempdir().unwrap();
        let clip = video_root.path().join("clip.mp4");
        fs::write(&clip, b"x").unwrap();

        let detections = vec![Detection {
            ts: 0,
            bb: [1, 2, 3, 4],
        }];
        let metadata =
            record_run(output_root.path(), video_root.path(), &clip, &detections).unwrap();

        // Every recorded run is immediately readable; no metadata-only runs.
        assert!(metadata.output_dir.join(METADATA_FILE).exists());
        assert_eq!(read_detections(&metadata.output_dir).unwrap(), detections);
    }

    #[test]
    fn recording_over_an_existing_run_fails_and_leaves_it_intact() {
        let video_root = tempdir().unwrap();
        let output_root = tempdir().unwrap();
        let clip = video_root.path().join("clip.mp4");
        fs::write(&clip, b"x").unwrap();

        let first = record_run(output_root.path(), video_root.path(), &clip, &[]).unwrap();
        assert!(record_run(output_root.path(), video_root.path(), &clip, &[]).is_err());
        assert!(first.output_dir.join(DETECTIONS_FILE).exists());
    }

    #[test]
    fn creating_the_same_run_twice_fails() {
        let video_root = tempdir().unwrap();
        let output_root = tempdir().unwrap();
        let clip = video_root.path().join("clip.mp4");
        fs::write(&clip, b"x").unwrap();

        create_run(output_root.path(), video_root.path(), &clip).unwrap();
        assert!(create_run(output_root.path(), video_root.path(), &clip).is_err());
    }

    #[test]
    fn sweep_removes_runs_for_deleted_clips() {
        let video_root = tempdir().unwrap();
        let output_root = tempdir().unwrap();

        let kept = video_root.path().join("kept.mp4");
        let rotated = video_root.path().join("rotated.mp4");
        fs::write(&kept, b"x").unwrap();
        fs::write(&rotated, b"x").unwrap();

        create_run(output_root.path(), video_root.path(), &kept).unwrap();
        create_run(output_root.path(), video_root.path(), &rotated).unwrap();

        fs::remove_file(&rotated).unwrap();

        assert_eq!(sweep_stale_runs(output_root.path()).unwrap(), 1);
        let runs = list_runs(output_root.path()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "kept");
    }

    #[test]
    fn list_videos_skips_dotfiles_and_other_extensions() {
        let video_root = tempdir().unwrap();
        fs::write(video_root.path().join("a.mp4"), b"x").unwrap();
        fs::write(video_root.path().join(".partial.mp4"), b"x").unwrap();
        fs::write(video_root.path().join("notes.txt"), b"x").unwrap();

        let videos = list_videos(video_root.path());
        assert_eq!(videos.len(), 1);
        assert!(videos[0].ends_with("a.mp4"));
    }
}
