// src/detector.rs

use std::path::Path;

use anyhow::{anyhow, Result};
use ndarray::Array3;
use opencv::{
    core::Mat,
    imgproc,
    prelude::{MatTraitConst, MatTraitConstManual},
};
use tracing::info;
use ultralytics_inference::{InferenceConfig, YOLOModel};

use crate::state::{BBox, Detection};

/// Opaque detection collaborator: raw frame in, bounding boxes with
/// confidence and class label out. Assumed synchronous and blocking inside
/// the producer loop.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>>;
}

pub struct YoloDetector {
    model: YOLOModel,
}

impl YoloDetector {
    pub fn load(model_path: &Path, confidence: f32, threads: Option<usize>) -> Result<Self> {
        if !model_path.exists() {
            return Err(anyhow!("Model not found: {}", model_path.display()));
        }

        let mut cfg = InferenceConfig::new()
            .with_confidence(confidence)
            .with_iou(0.45)
            .with_max_det(100);
        let default_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cfg = cfg.with_threads(threads.unwrap_or(default_threads));

        let model = YOLOModel::load_with_config(model_path, cfg)?;
        info!(model = %model_path.display(), "detection model loaded");
        Ok(Self { model })
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let input = mat_to_array3_rgb(frame)?;
        let results = self.model.predict_array(&input, String::new())?;

        let mut detections = Vec::new();
        if let Some(r0) = results.first() {
            if let Some(boxes) = r0.boxes.as_ref() {
                let xyxy = boxes.xyxy().to_owned();
                let conf = boxes.conf().to_owned();
                let cls = boxes.cls().to_owned();

                for i in 0..boxes.len() {
                    let x1 = xyxy[[i, 0]];
                    let y1 = xyxy[[i, 1]];
                    let x2 = xyxy[[i, 2]];
                    let y2 = xyxy[[i, 3]];
                    if x2 <= x1 || y2 <= y1 {
                        continue;
                    }
                    detections.push(Detection {
                        bbox: BBox {
                            x: x1,
                            y: y1,
                            width: x2 - x1,
                            height: y2 - y1,
                        },
                        confidence: conf[i],
                        label: class_label(cls[i] as i64).to_string(),
                    });
                }
            }
        }
        Ok(detections)
    }
}

// COCO class ids; only "person" matters for this deployment.
fn class_label(cid: i64) -> &'static str {
    match cid {
        0 => "person",
        _ => "obj",
    }
}

// convert Mat -> RGB ndarray
pub fn mat_to_array3_rgb(mat: &Mat) -> Result<Array3<u8>> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let rows = rgb.rows() as usize;
    let cols = rgb.cols() as usize;

    let data = rgb.data_bytes()?.to_vec();
    Ok(Array3::from_shape_vec((rows, cols, 3), data)?)
}
