// src/state.rs

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

// Tracker defaults
pub const DEFAULT_MATCH_DISTANCE: f32 = 100.0;
pub const DEFAULT_EVICT_FRAMES: u32 = 30;

// Alert defaults
pub const DEFAULT_COOLDOWN_SECS: f32 = 3.0;
pub const DEFAULT_POLL_MS: u64 = 100;

// Stream defaults
pub const DEFAULT_STREAM_FPS: f64 = 25.0;
pub const DEFAULT_JPEG_QUALITY: i32 = 80;

// Classifier defaults
pub const DEFAULT_ASPECT_RATIO_MIN: f32 = 1.2;

// Detection defaults
pub const DEFAULT_CONF_THRESH: f32 = 0.25;

// ================== CORE TYPES ==================

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }
}

/// One detected object in one frame. Not retained beyond classification.
#[derive(Clone, Debug)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub label: String,
}

/// A fall candidate resolved to a track identity, emitted once per frame cycle.
#[derive(Clone, Debug)]
pub struct FallEvent {
    pub track_id: u64,
    pub bbox: BBox,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

/// The paired (frame, event-list) unit consumers read atomically. The frame
/// is already annotated and JPEG-encoded by the producer, so readers at any
/// cadence never touch raw pixels.
#[derive(Clone, Default)]
pub struct Snapshot {
    pub jpeg: Option<Arc<Vec<u8>>>,
    pub events: Arc<Vec<FallEvent>>,
}

// ================== PIPELINE STATUS ==================

/// Shared counters behind the /api/stats endpoint. The fall counter numbers
/// alerts, not tracks; only the broadcaster increments it.
#[derive(Default)]
pub struct PipelineStatus {
    is_processing: AtomicBool,
    fps_bits: AtomicU32,
    fall_count: AtomicU64,
}

impl PipelineStatus {
    pub fn set_processing(&self, on: bool) {
        self.is_processing.store(on, Ordering::Relaxed);
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::Relaxed)
    }

    pub fn set_fps(&self, fps: f32) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn fps(&self) -> f32 {
        f32::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub fn bump_fall_count(&self) -> u64 {
        self.fall_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn fall_count(&self) -> u64 {
        self.fall_count.load(Ordering::Relaxed)
    }
}
