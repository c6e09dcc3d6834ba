// src/camera.rs

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver};
use opencv::{
    core::Mat,
    prelude::{MatTraitConst, VideoCaptureTrait, VideoCaptureTraitConst},
    videoio,
};
use tracing::{debug, info};

/// Pulls raw frames from a camera or stream. Opened once at startup,
/// released once the capture thread is joined. A `None` frame is a
/// transient read failure, not an error.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Option<Mat>>;
}

pub struct CameraSource {
    cap: videoio::VideoCapture,
}

impl CameraSource {
    /// Numeric sources are webcam device indices, anything else is handed
    /// to the backend as a path or URL. Failure to open is fatal for the
    /// pipeline.
    pub fn open(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        let cap = if trimmed.chars().all(|c| c.is_ascii_digit()) && !trimmed.is_empty() {
            let index = trimmed
                .parse::<i32>()
                .map_err(|_| anyhow!("Invalid camera index: {trimmed}"))?;
            videoio::VideoCapture::new(index, videoio::CAP_ANY)?
        } else {
            videoio::VideoCapture::from_file(trimmed, videoio::CAP_ANY)?
        };
        if !cap.is_opened()? {
            return Err(anyhow!("Cannot open video source: {trimmed}"));
        }
        info!(source = trimmed, "video source opened");
        Ok(Self { cap })
    }
}

impl FrameSource for CameraSource {
    fn read_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.cap.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

pub struct CaptureWorker {
    pub rx: Receiver<Mat>,
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl CaptureWorker {
    /// Signals the capture thread and waits for it to exit; the camera
    /// handle is released when the thread drops the source.
    pub fn stop(self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        self.join
            .join()
            .map_err(|_| anyhow!("Capture thread panicked"))
    }
}

/// Dedicated capture thread feeding the producer loop through a small
/// bounded channel. The newest frame is dropped when the buffer is full so
/// capture never blocks on inference; a read failure is logged and the next
/// iteration is the retry.
pub fn start_capture_thread(mut source: Box<dyn FrameSource>, buffer: usize) -> CaptureWorker {
    let (tx, rx) = bounded::<Mat>(buffer.max(1));
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = Arc::clone(&stop);
    let join = thread::spawn(move || {
        loop {
            if stop_thread.load(Ordering::Relaxed) {
                break;
            }
            match source.read_frame() {
                Ok(Some(frame)) => {
                    if tx.try_send(frame).is_err() {
                        // Inference is behind; drop this frame.
                    }
                }
                Ok(None) => {
                    debug!("empty frame from source, retrying");
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => {
                    debug!("capture read failed: {err:#}, retrying");
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
        debug!("capture thread exiting");
    });

    CaptureWorker { rx, stop, join }
}
