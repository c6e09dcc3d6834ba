// src/broadcast.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::SecondsFormat;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::state::{BBox, FallEvent, PipelineStatus};
use crate::store::FrameStore;

// ================== WIRE FORMAT ==================

#[derive(Serialize)]
pub struct AlertMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: AlertData,
}

#[derive(Serialize)]
pub struct AlertData {
    pub patient_id: String,
    pub person_tracking_id: u64,
    pub fall_count: u64,
    pub timestamp: String,
    pub metadata: AlertMetadata,
}

#[derive(Serialize)]
pub struct AlertMetadata {
    pub bounding_box: BBox,
    pub confidence: f32,
}

impl AlertMessage {
    fn new(event: &FallEvent, fall_count: u64, patient_id: &str) -> Self {
        Self {
            kind: "fall_detected",
            data: AlertData {
                patient_id: patient_id.to_string(),
                person_tracking_id: event.track_id,
                fall_count,
                timestamp: event
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
                metadata: AlertMetadata {
                    bounding_box: event.bbox,
                    confidence: event.confidence,
                },
            },
        }
    }
}

// ================== SUBSCRIBER REGISTRY ==================

/// Currently connected alert subscribers. Delivery is best-effort: iteration
/// works on a copy of the sender list, so a send failure (or an unregister
/// racing the broadcast) only drops that subscriber and never disturbs
/// delivery to the rest.
pub struct Registry {
    subscribers: Mutex<HashMap<u64, UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self) -> (u64, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, tx);
        }
        debug!(subscriber = id, "alert subscriber registered");
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        if let Ok(mut subs) = self.subscribers.lock() {
            if subs.remove(&id).is_some() {
                debug!(subscriber = id, "alert subscriber removed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn broadcast(&self, message: &str) {
        let targets: Vec<(u64, UnboundedSender<String>)> = match self.subscribers.lock() {
            Ok(subs) => subs.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            Err(_) => return,
        };

        for (id, tx) in targets {
            if tx.send(message.to_string()).is_err() {
                self.unregister(id);
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ================== ALERT THROTTLE ==================

/// Per-track cooldown state, owned exclusively by the broadcaster loop.
/// Entries are never removed: track ids are never reused within a process
/// lifetime, so the map grows with the number of distinct alerting tracks.
pub struct Throttle {
    last_alert: HashMap<u64, Instant>,
    cooldown: Duration,
}

impl Throttle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_alert: HashMap::new(),
            cooldown,
        }
    }

    /// Returns true (and arms the cooldown) at most once per track per
    /// cooldown window.
    pub fn should_alert(&mut self, track_id: u64, now: Instant) -> bool {
        match self.last_alert.get(&track_id) {
            Some(last) if now.duration_since(*last) <= self.cooldown => false,
            _ => {
                self.last_alert.insert(track_id, now);
                true
            }
        }
    }
}

// ================== BROADCASTER LOOP ==================

fn process_events(
    events: &[FallEvent],
    throttle: &mut Throttle,
    status: &PipelineStatus,
    registry: &Registry,
    patient_id: &str,
    now: Instant,
) {
    for event in events {
        if !throttle.should_alert(event.track_id, now) {
            continue;
        }
        let fall_count = status.bump_fall_count();
        info!(
            track = event.track_id,
            fall_count, "broadcasting fall alert"
        );
        let message = AlertMessage::new(event, fall_count, patient_id);
        match serde_json::to_string(&message) {
            Ok(json) => registry.broadcast(&json),
            Err(err) => debug!("failed to serialize alert: {err}"),
        }
    }
}

/// Fixed-interval polling task, independent of the producer's frame rate.
/// Samples the latest snapshot each tick, applies the per-track cooldown and
/// fans alerts out to every registered subscriber. Exits when the shared
/// running flag clears.
pub async fn run(
    store: Arc<FrameStore>,
    registry: Arc<Registry>,
    status: Arc<PipelineStatus>,
    patient_id: String,
    cooldown: Duration,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
) {
    let mut throttle = Throttle::new(cooldown);
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        let snapshot = store.read();
        if snapshot.events.is_empty() {
            continue;
        }
        process_events(
            &snapshot.events,
            &mut throttle,
            &status,
            &registry,
            &patient_id,
            Instant::now(),
        );
    }
    info!("alert broadcaster stopped");
}
