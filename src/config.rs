// src/config.rs

use std::{env, fs, path::{Path, PathBuf}};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::state::{
    DEFAULT_ASPECT_RATIO_MIN, DEFAULT_CONF_THRESH, DEFAULT_COOLDOWN_SECS, DEFAULT_EVICT_FRAMES,
    DEFAULT_JPEG_QUALITY, DEFAULT_MATCH_DISTANCE, DEFAULT_POLL_MS, DEFAULT_STREAM_FPS,
};

pub const DEFAULT_CAPTURE_BUFFER: usize = 4;

/// Deployment tuning. Every heuristic threshold in the pipeline is a
/// configuration surface; the defaults match a single indoor camera.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: String,
    pub model: PathBuf,
    pub bind: String,
    pub patient_id: String,
    pub confidence: f32,
    pub threads: Option<usize>,
    pub capture_buffer: usize,
    pub tracker: TrackerConfig,
    pub alerts: AlertConfig,
    pub stream: StreamConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub match_distance: f32,
    pub evict_frames: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub cooldown_secs: f32,
    pub poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub fps: f64,
    pub jpeg_quality: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub aspect_ratio_min: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            model: PathBuf::from("models/yolo11n.onnx"),
            bind: "0.0.0.0:8000".to_string(),
            patient_id: "room-1".to_string(),
            confidence: DEFAULT_CONF_THRESH,
            threads: None,
            capture_buffer: DEFAULT_CAPTURE_BUFFER,
            tracker: TrackerConfig::default(),
            alerts: AlertConfig::default(),
            stream: StreamConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_distance: DEFAULT_MATCH_DISTANCE,
            evict_frames: DEFAULT_EVICT_FRAMES,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            poll_ms: DEFAULT_POLL_MS,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_STREAM_FPS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            aspect_ratio_min: DEFAULT_ASPECT_RATIO_MIN,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| anyhow!("Cannot read config {}: {err}", path.display()))?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[derive(Debug, Default)]
pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub source: Option<String>,
    pub model: Option<PathBuf>,
    pub bind: Option<String>,
    pub patient_id: Option<String>,
    pub threads: Option<usize>,
}

pub fn parse_args() -> Result<CliOptions> {
    let mut opts = CliOptions::default();

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or_else(|| anyhow!("--config requires a value"))?;
                opts.config = Some(PathBuf::from(path));
            }
            "--source" => {
                let source = iter.next().ok_or_else(|| anyhow!("--source requires a value"))?;
                opts.source = Some(source);
            }
            "--model" => {
                let model = iter.next().ok_or_else(|| anyhow!("--model requires a value"))?;
                opts.model = Some(PathBuf::from(model));
            }
            "--bind" => {
                let bind = iter.next().ok_or_else(|| anyhow!("--bind requires a value"))?;
                opts.bind = Some(bind);
            }
            "--patient-id" => {
                let id = iter.next().ok_or_else(|| anyhow!("--patient-id requires a value"))?;
                opts.patient_id = Some(id);
            }
            "--threads" => {
                let threads = iter.next().ok_or_else(|| anyhow!("--threads requires a value"))?;
                let parsed = threads
                    .parse::<usize>()
                    .map_err(|_| anyhow!("--threads must be a non-negative integer"))?;
                opts.threads = Some(parsed);
            }
            _ if opts.source.is_none() && !arg.starts_with("--") => {
                opts.source = Some(arg);
            }
            _ => return Err(anyhow!("Unknown argument: {arg}")),
        }
    }

    Ok(opts)
}

/// Config file first, CLI flags on top.
pub fn resolve(opts: CliOptions) -> Result<Config> {
    let mut config = match &opts.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(source) = opts.source {
        config.source = source;
    }
    if let Some(model) = opts.model {
        config.model = model;
    }
    if let Some(bind) = opts.bind {
        config.bind = bind;
    }
    if let Some(patient_id) = opts.patient_id {
        config.patient_id = patient_id;
    }
    if opts.threads.is_some() {
        config.threads = opts.threads;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_tuning() {
        let config = Config::default();
        assert_eq!(config.tracker.match_distance, 100.0);
        assert_eq!(config.tracker.evict_frames, 30);
        assert_eq!(config.alerts.cooldown_secs, 3.0);
        assert_eq!(config.alerts.poll_ms, 100);
        assert_eq!(config.stream.fps, 25.0);
        assert_eq!(config.classifier.aspect_ratio_min, 1.2);
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_the_rest() {
        let config: Config = serde_yaml::from_str(
            "source: rtsp://cam.local/stream\nalerts:\n  cooldown_secs: 5.0\n",
        )
        .unwrap();
        assert_eq!(config.source, "rtsp://cam.local/stream");
        assert_eq!(config.alerts.cooldown_secs, 5.0);
        assert_eq!(config.alerts.poll_ms, 100);
        assert_eq!(config.tracker.evict_frames, 30);
    }

    #[test]
    fn cli_overrides_win_over_defaults() {
        let config = resolve(CliOptions {
            source: Some("1".to_string()),
            bind: Some("127.0.0.1:9000".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.source, "1");
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.patient_id, "room-1");
    }
}
