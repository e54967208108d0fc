use super::{DetectedObject, Detector};
use crate::video::mat_to_rgb_image;
use anyhow::Result;
use image::DynamicImage;
use opencv::core::{Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use usls::models::RTDETR;
use usls::{Config, Image};

/// Default short-edge size frames are scaled to before inference.
pub const DEFAULT_TARGET_SIZE: u32 = 320;

/// A wrapper around the USLS RT-DETR model that handles BGR-to-RGB conversion,
/// downscaling to the inference resolution, and the aspect-ratio correction
/// the model library needs for non-square inputs. Reported boxes come back in
/// original-frame pixel coordinates.
pub struct RtdetrDetector {
    model: RTDETR,
    target_size: u32,
}

impl RtdetrDetector {
    /// Load the model once; the caller owns the lifecycle and reuses the
    /// detector across clips.
    pub fn new(model_path: &str, target_size: u32) -> Result<Self> {
        let config = Config::default()
            .with_model_file(model_path)
            .with_class_names(&usls::NAMES_COCO_80);

        let config = config.commit()?;
        let model = RTDETR::new(config)?;
        Ok(Self { model, target_size })
    }
}

impl Detector for RtdetrDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<DetectedObject>> {
        let size = frame.size()?;
        let short_edge = size.width.min(size.height);

        // Downscale so the short edge matches the inference size; never
        // upscale small frames.
        let scale = if short_edge > self.target_size as i32 {
            self.target_size as f32 / short_edge as f32
        } else {
            1.0
        };

        let scaled = if scale < 1.0 {
            let dst_size = Size::new(
                (size.width as f32 * scale).round() as i32,
                (size.height as f32 * scale).round() as i32,
            );
            let mut scaled = Mat::default();
            imgproc::resize(frame, &mut scaled, dst_size, 0.0, 0.0, imgproc::INTER_AREA)?;
            scaled
        } else {
            frame.clone()
        };

        // Correction calculations (USLS RT-DETR bug workaround). The resize
        // above preserves aspect ratio, so the distortion matches the
        // original frame's.
        let scaled_size = scaled.size()?;
        let (x_corr, y_corr) = aspect_correction(scaled_size.width, scaled_size.height);

        let dynamic_image = DynamicImage::ImageRgb8(mat_to_rgb_image(&scaled)?);
        let results = self.model.forward(&[Image::from(dynamic_image)])?;

        let inverse = 1.0 / scale;
        let mut objects = Vec::new();
        for y in results {
            for hbb in y.hbbs {
                let x1 = hbb.xmin() * x_corr * inverse;
                let y1 = hbb.ymin() * y_corr * inverse;
                let x2 = (hbb.xmin() + hbb.width()) * x_corr * inverse;
                let y2 = (hbb.ymin() + hbb.height()) * y_corr * inverse;

                objects.push(DetectedObject {
                    class_id: hbb.id().unwrap_or(0),
                    class_name: hbb.name().map(|s| s.to_string()),
                    confidence: hbb.confidence().unwrap_or(0.0),
                    bbox: [
                        x1.round() as i32,
                        y1.round() as i32,
                        x2.round() as i32,
                        y2.round() as i32,
                    ],
                });
            }
        }

        Ok(objects)
    }
}

/// Per-axis factors that undo the model library's squeeze of non-square
/// inputs: x coordinates stretch by `w/h` on landscape frames, y by `h/w` on
/// portrait ones.
fn aspect_correction(width: i32, height: i32) -> (f32, f32) {
    let w = width as f32;
    let h = height as f32;
    if width > height {
        (w / h, 1.0)
    } else if height > width {
        (1.0, h / w)
    } else {
        (1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_frames_stretch_x_only() {
        let (x_corr, y_corr) = aspect_correction(1920, 1080);
        assert!((x_corr - 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(y_corr, 1.0);
    }

    #[test]
    fn portrait_frames_stretch_y_only() {
        let (x_corr, y_corr) = aspect_correction(1080, 1920);
        assert_eq!(x_corr, 1.0);
        assert!((y_corr - 16.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn square_frames_need_no_correction() {
        assert_eq!(aspect_correction(640, 640), (1.0, 1.0));
    }
}
