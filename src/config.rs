//! `dwelld` configuration.
//!
//! Layering: built-in defaults, then an optional config file (path from
//! `DWELL_CONFIG`; `.toml` is parsed as TOML, anything else as JSON), then
//! `DWELL_*` environment overrides, then validation. Everything is fixed
//! once `load` returns.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::alert::AlertPolicy;
use crate::detect::{Anchor, ClassId, DetectionFilter};
use crate::geometry::{Polygon, ZoneSpec};
use crate::ingest::SourceConfig;

const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 30;
/// COCO "cow"; the livestock class tracked by default.
const DEFAULT_TARGET_CLASS: ClassId = 19;
const DEFAULT_TARGET_LABEL: &str = "cattle";
const DEFAULT_THRESHOLD_SECS: f64 = 5.0;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_NOTIFY_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: f64 = 5.0;
const DEFAULT_SNAPSHOT_EVERY: u32 = 10;

// ----------------------------------------------------------------------------
// File layout
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DwellConfigFile {
    source: Option<SourceConfigFile>,
    zone: Option<ZoneConfigFile>,
    target: Option<TargetConfigFile>,
    alert: Option<AlertConfigFile>,
    detector: Option<DetectorConfigFile>,
    notifier: Option<NotifierConfigFile>,
    annotator: Option<AnnotatorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_consecutive_failures: Option<u32>,
    threaded: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ZoneConfigFile {
    polygon: Option<ZoneSpec>,
    anchor: Option<Anchor>,
}

#[derive(Debug, Deserialize, Default)]
struct TargetConfigFile {
    class_id: Option<ClassId>,
    label: Option<String>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    threshold_secs: Option<f64>,
    repeat_after_secs: Option<f64>,
    context: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    loop_script: Option<bool>,
    confidence: Option<f32>,
    iou: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifierConfigFile {
    kind: Option<NotifierKind>,
    command: Option<String>,
    args: Option<Vec<String>>,
    webhook_url: Option<String>,
    timeout_secs: Option<f64>,
    shutdown_timeout_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotatorConfigFile {
    kind: Option<AnnotatorKind>,
    snapshot_path: Option<PathBuf>,
    every_n_frames: Option<u32>,
}

// ----------------------------------------------------------------------------
// Resolved settings
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DwellConfig {
    pub source: SourceSettings,
    pub zone: ZoneSettings,
    pub target: TargetSettings,
    pub alert: AlertSettings,
    pub detector: DetectorSettings,
    pub notifier: NotifierSettings,
    pub annotator: AnnotatorSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub max_consecutive_failures: u32,
    /// Acquire on a background thread through the depth-1 slot.
    pub threaded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSettings {
    pub polygon: ZoneSpec,
    pub anchor: Anchor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetSettings {
    pub class_id: ClassId,
    pub label: String,
    pub min_confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertSettings {
    pub threshold_secs: f64,
    pub repeat_after_secs: Option<f64>,
    /// Identifier sent with alerts; the source URL when unset.
    pub context: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    #[default]
    Stub,
    Scripted,
    Tract,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub loop_script: bool,
    pub confidence: f32,
    pub iou: f32,
    pub input_size: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Log,
    Command,
    Webhook,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifierSettings {
    pub kind: NotifierKind,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub webhook_url: Option<String>,
    pub timeout: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotatorKind {
    #[default]
    Log,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatorSettings {
    pub kind: AnnotatorKind,
    pub snapshot_path: Option<PathBuf>,
    pub every_n_frames: u32,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "scripted" => Ok(Self::Scripted),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected stub, scripted or tract",
                other
            )),
        }
    }
}

impl FromStr for NotifierKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "command" => Ok(Self::Command),
            "webhook" => Ok(Self::Webhook),
            other => Err(anyhow!(
                "unknown notifier '{}'; expected log, command or webhook",
                other
            )),
        }
    }
}

impl DwellConfig {
    /// Defaults, then `DWELL_CONFIG` file, then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DWELL_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_with_path(config_path.as_deref())
    }

    /// Same as `load` with an explicit config file instead of `DWELL_CONFIG`.
    pub fn load_with_path(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DwellConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DwellConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let zone = file.zone.unwrap_or_default();
        let target = file.target.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let notifier = file.notifier.unwrap_or_default();
        let annotator = file.annotator.unwrap_or_default();

        let timeout = seconds(
            "notifier.timeout_secs",
            notifier.timeout_secs.unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS),
        )?;
        let shutdown_timeout = seconds(
            "notifier.shutdown_timeout_secs",
            notifier
                .shutdown_timeout_secs
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        )?;

        Ok(Self {
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
                target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                max_consecutive_failures: source
                    .max_consecutive_failures
                    .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
                threaded: source.threaded.unwrap_or(true),
            },
            zone: ZoneSettings {
                polygon: zone.polygon.unwrap_or_default(),
                anchor: zone.anchor.unwrap_or_default(),
            },
            target: TargetSettings {
                class_id: target.class_id.unwrap_or(DEFAULT_TARGET_CLASS),
                label: target
                    .label
                    .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
                min_confidence: target.min_confidence.unwrap_or(0.0),
            },
            alert: AlertSettings {
                threshold_secs: alert.threshold_secs.unwrap_or(DEFAULT_THRESHOLD_SECS),
                repeat_after_secs: alert.repeat_after_secs,
                context: alert.context,
            },
            detector: DetectorSettings {
                kind: detector.backend.unwrap_or_default(),
                model_path: detector.model_path,
                script_path: detector.script_path,
                loop_script: detector.loop_script.unwrap_or(false),
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                iou: detector.iou.unwrap_or(DEFAULT_IOU),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            notifier: NotifierSettings {
                kind: notifier.kind.unwrap_or_default(),
                command: notifier.command,
                args: notifier.args.unwrap_or_default(),
                webhook_url: notifier.webhook_url,
                timeout,
                shutdown_timeout,
            },
            annotator: AnnotatorSettings {
                kind: annotator.kind.unwrap_or_default(),
                snapshot_path: annotator.snapshot_path,
                every_n_frames: annotator.every_n_frames.unwrap_or(DEFAULT_SNAPSHOT_EVERY),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("DWELL_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(resolution) = env_value("DWELL_RESOLUTION") {
            let (width, height) = parse_resolution(&resolution)?;
            self.source.width = width;
            self.source.height = height;
        }
        if let Some(zone) = env_value("DWELL_ZONE") {
            self.zone.polygon = ZoneSpec::parse(&zone)?;
        }
        if let Some(class_id) = env_value("DWELL_TARGET_CLASS") {
            self.target.class_id = class_id
                .parse()
                .map_err(|_| anyhow!("DWELL_TARGET_CLASS must be a non-negative integer"))?;
        }
        if let Some(threshold) = env_value("DWELL_THRESHOLD_SECS") {
            self.alert.threshold_secs = threshold
                .parse()
                .map_err(|_| anyhow!("DWELL_THRESHOLD_SECS must be a number of seconds"))?;
        }
        if let Some(context) = env_value("DWELL_ALERT_CONTEXT") {
            self.alert.context = Some(context);
        }
        if let Some(backend) = env_value("DWELL_DETECTOR") {
            self.detector.kind = backend.parse()?;
        }
        if let Some(kind) = env_value("DWELL_NOTIFIER") {
            self.notifier.kind = kind.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source.url must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source resolution must be non-zero, got {}x{}",
                self.source.width,
                self.source.height
            ));
        }
        if self.source.max_consecutive_failures == 0 {
            return Err(anyhow!("source.max_consecutive_failures must be at least 1"));
        }
        self.zone.polygon.validate()?;

        if !(0.0..=1.0).contains(&self.target.min_confidence) {
            return Err(anyhow!("target.min_confidence must lie within [0, 1]"));
        }
        seconds("alert.threshold_secs", self.alert.threshold_secs)?;
        if let Some(repeat) = self.alert.repeat_after_secs {
            if seconds("alert.repeat_after_secs", repeat)?.is_zero() {
                return Err(anyhow!(
                    "alert.repeat_after_secs must be positive, got {}",
                    repeat
                ));
            }
        }

        match self.detector.kind {
            DetectorKind::Scripted if self.detector.script_path.is_none() => {
                return Err(anyhow!("scripted detector requires detector.script_path"));
            }
            DetectorKind::Tract if self.detector.model_path.is_none() => {
                return Err(anyhow!("tract detector requires detector.model_path"));
            }
            _ => {}
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) || !(0.0..=1.0).contains(&self.detector.iou)
        {
            return Err(anyhow!("detector.confidence and detector.iou must lie within [0, 1]"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be non-zero"));
        }

        match self.notifier.kind {
            NotifierKind::Command if blank(&self.notifier.command) => {
                return Err(anyhow!("command notifier requires notifier.command"));
            }
            NotifierKind::Webhook if blank(&self.notifier.webhook_url) => {
                return Err(anyhow!("webhook notifier requires notifier.webhook_url"));
            }
            _ => {}
        }
        if self.notifier.timeout.is_zero() {
            return Err(anyhow!("notifier.timeout_secs must be positive"));
        }
        if self.notifier.shutdown_timeout.is_zero() {
            return Err(anyhow!("notifier.shutdown_timeout_secs must be positive"));
        }

        if self.annotator.kind == AnnotatorKind::Snapshot && self.annotator.snapshot_path.is_none() {
            return Err(anyhow!("snapshot annotator requires annotator.snapshot_path"));
        }
        if self.annotator.every_n_frames == 0 {
            return Err(anyhow!("annotator.every_n_frames must be at least 1"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Derived views
    // ------------------------------------------------------------------------

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            url: self.source.url.clone(),
            width: self.source.width,
            height: self.source.height,
            target_fps: self.source.target_fps,
        }
    }

    /// Zone in pixels for the configured resolution.
    pub fn zone_polygon(&self) -> Polygon {
        self.zone
            .polygon
            .materialize(self.source.width, self.source.height)
    }

    pub fn detection_filter(&self) -> DetectionFilter {
        DetectionFilter::new(self.target.class_id)
            .with_anchor(self.zone.anchor)
            .with_min_confidence(self.target.min_confidence)
    }

    /// Values `validate` would reject saturate instead of panicking.
    pub fn alert_policy(&self) -> AlertPolicy {
        let threshold = Duration::try_from_secs_f64(self.alert.threshold_secs.max(0.0))
            .unwrap_or(Duration::MAX);
        let policy = AlertPolicy::once_after(threshold);
        match self.alert.repeat_after_secs {
            Some(secs) if secs > 0.0 => policy.with_repeat(
                Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX),
            ),
            _ => policy,
        }
    }

    pub fn alert_context(&self) -> &str {
        self.alert.context.as_deref().unwrap_or(&self.source.url)
    }
}

fn read_config_file(path: &Path) -> Result<DwellConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Negative, non-finite and unrepresentably large values are errors.
fn seconds(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds, got {}", key, secs))
}

/// Parse `WIDTHxHEIGHT`, e.g. `1280x720`.
pub fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .trim()
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| anyhow!("resolution '{}' must look like 1280x720", value))?;
    let width = width
        .trim()
        .parse()
        .map_err(|_| anyhow!("resolution '{}' has an invalid width", value))?;
    let height = height
        .trim()
        .parse()
        .map_err(|_| anyhow!("resolution '{}' has an invalid height", value))?;
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> DwellConfig {
        DwellConfig::from_file(DwellConfigFile::default()).expect("defaults are valid")
    }

    #[test]
    fn defaults_match_livestock_deployment() -> Result<()> {
        let cfg = defaults();
        cfg.validate()?;
        assert_eq!(cfg.source.url, "stub://camera");
        assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));
        assert_eq!(cfg.target.class_id, 19);
        assert_eq!(cfg.alert_policy(), AlertPolicy::once_after(Duration::from_secs(5)));
        assert_eq!(cfg.alert_context(), "stub://camera");
        assert_eq!(cfg.zone_polygon().vertices().len(), 4);
        assert_eq!(cfg.notifier.shutdown_timeout, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn parses_resolution() -> Result<()> {
        assert_eq!(parse_resolution("1920x1080")?, (1920, 1080));
        assert_eq!(parse_resolution(" 640X480 ")?, (640, 480));
        assert!(parse_resolution("640").is_err());
        assert!(parse_resolution("ax480").is_err());
        Ok(())
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = defaults();
        cfg.alert.threshold_secs = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.alert.repeat_after_secs = Some(0.0);
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.source.width = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.notifier.kind = NotifierKind::Command;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.detector.kind = DetectorKind::Scripted;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.annotator.kind = AnnotatorKind::Snapshot;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.target.min_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.alert.threshold_secs = 1e20;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.alert.repeat_after_secs = Some(f64::INFINITY);
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.notifier.shutdown_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_timeouts_are_rejected_while_reading() {
        let file = DwellConfigFile {
            notifier: Some(NotifierConfigFile {
                timeout_secs: Some(1e20),
                ..NotifierConfigFile::default()
            }),
            ..DwellConfigFile::default()
        };
        let err = DwellConfig::from_file(file).unwrap_err();
        assert!(err.to_string().contains("notifier.timeout_secs"));
    }

    #[test]
    fn unvalidated_policy_saturates() {
        let mut cfg = defaults();
        cfg.alert.threshold_secs = 1e20;
        cfg.alert.repeat_after_secs = Some(1e20);
        let policy = cfg.alert_policy();
        assert_eq!(policy.threshold, Duration::MAX);
        assert_eq!(policy.repeat_after, Some(Duration::MAX));
    }

    #[test]
    fn kinds_parse_case_insensitively() -> Result<()> {
        assert_eq!("Tract".parse::<DetectorKind>()?, DetectorKind::Tract);
        assert_eq!("WEBHOOK".parse::<NotifierKind>()?, NotifierKind::Webhook);
        assert!("smtp".parse::<NotifierKind>().is_err());
        Ok(())
    }

    #[test]
    fn repeat_interval_becomes_policy() {
        let mut cfg = defaults();
        cfg.alert.repeat_after_secs = Some(60.0);
        assert_eq!(cfg.alert_policy().repeat_after, Some(Duration::from_secs(60)));
    }
}
