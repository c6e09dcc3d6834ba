// src/pipeline.rs

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use opencv::{
    core::{Mat, Point, Rect, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::VectorToVec,
};
use tracing::{info, warn};

use crate::camera::CaptureWorker;
use crate::classifier::is_fall_candidate;
use crate::config::Config;
use crate::detector::Detector;
use crate::state::{BBox, PipelineStatus, Snapshot};
use crate::store::FrameStore;
use crate::tracker::{Candidate, Tracker};

/// Spawn the producer loop on its own OS thread: inference is CPU-bound and
/// must never sit on the async runtime.
pub fn spawn(
    worker: CaptureWorker,
    detector: Box<dyn Detector>,
    config: Config,
    store: Arc<FrameStore>,
    status: Arc<PipelineStatus>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        run(worker, detector, config, store, status, running);
    })
}

fn run(
    worker: CaptureWorker,
    mut detector: Box<dyn Detector>,
    config: Config,
    store: Arc<FrameStore>,
    status: Arc<PipelineStatus>,
    running: Arc<AtomicBool>,
) {
    let mut tracker = Tracker::new(config.tracker.match_distance, config.tracker.evict_frames);
    let mut fps_frames = 0usize;
    let mut fps_last_update = Instant::now();

    status.set_processing(true);
    info!("producer loop started");

    while running.load(Ordering::Relaxed) {
        let mut frame = match worker.rx.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => frame,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };

        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                warn!("detection failed: {err:#}");
                continue;
            }
        };

        let mut candidates = Vec::new();
        for detection in &detections {
            let is_fall = is_fall_candidate(&detection.bbox, config.classifier.aspect_ratio_min);
            if let Err(err) = draw_detection(&mut frame, detection.bbox, &detection.label, detection.confidence, is_fall) {
                warn!("annotation failed: {err:#}");
            }
            if is_fall {
                candidates.push(Candidate {
                    bbox: detection.bbox,
                    confidence: detection.confidence,
                });
            }
        }

        let events = tracker.associate(&candidates, Utc::now());

        match encode_jpeg(&frame, config.stream.jpeg_quality) {
            Ok(jpeg) => store.publish(Snapshot {
                jpeg: Some(Arc::new(jpeg)),
                events: Arc::new(events),
            }),
            Err(err) => warn!("jpeg encode failed: {err:#}"),
        }

        fps_frames += 1;
        let elapsed = fps_last_update.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let secs = elapsed.as_secs_f32().max(0.001);
            status.set_fps(fps_frames as f32 / secs);
            fps_frames = 0;
            fps_last_update = Instant::now();
        }
    }

    status.set_processing(false);
    if let Err(err) = worker.stop() {
        warn!("capture worker shutdown: {err:#}");
    }
    info!("producer loop stopped");
}

// draw one detection, red with a FALL DETECTED label for candidates
fn draw_detection(frame: &mut Mat, bbox: BBox, label: &str, confidence: f32, is_fall: bool) -> Result<()> {
    let rect = Rect::new(
        bbox.x.max(0.0) as i32,
        bbox.y.max(0.0) as i32,
        bbox.width.max(2.0) as i32,
        bbox.height.max(2.0) as i32,
    );

    let color = if is_fall {
        Scalar::new(0.0, 0.0, 255.0, 0.0)
    } else {
        Scalar::new(255.0, 0.0, 0.0, 0.0)
    };

    imgproc::rectangle(frame, rect, color, 2, imgproc::LINE_AA, 0)?;

    let text = if is_fall {
        format!("{label} {confidence:.2} FALL DETECTED")
    } else {
        format!("{label} {confidence:.2}")
    };

    imgproc::put_text(
        frame,
        &text,
        Point::new(rect.x, (rect.y - 4).max(0)),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        color,
        1,
        imgproc::LINE_AA,
        false,
    )?;
    Ok(())
}

fn encode_jpeg(frame: &Mat, quality: i32) -> Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    let params = Vector::<i32>::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    imgcodecs::imencode(".jpg", frame, &mut buf, &params)?;
    Ok(buf.to_vec())
}
