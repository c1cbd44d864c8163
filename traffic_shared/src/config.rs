//! Configuration system.
//!
//! Loads client configuration from JSON strings/files. Every field has a
//! default so partial files are accepted.

use std::{path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::math::{Axis, Vec3};

/// Root configuration for the visualizer client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the simulation authority, e.g. `http://localhost:8585`.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Poll period in seconds.
    #[serde(default = "default_poll_period_secs")]
    pub poll_period_secs: f32,
    /// Render frame rate of the frame loop.
    #[serde(default = "default_frame_hz")]
    pub frame_hz: u32,
    /// Optional per-request timeout in seconds; the transport default applies when unset.
    #[serde(default)]
    pub request_timeout_secs: Option<f32>,
    #[serde(default)]
    pub endpoints: EndpointPaths,
    /// Form fields posted once at startup.
    #[serde(default)]
    pub init_form: Vec<(String, String)>,
    /// Re-fetch traffic lights every tick so signal changes show up.
    #[serde(default = "default_true")]
    pub refresh_signals: bool,
    #[serde(default)]
    pub progress_policy: ProgressPolicy,
    /// Consecutive batches an id may be missing before it is dropped.
    /// `None` keeps destination-only removal. Must be at least 1.
    #[serde(default)]
    pub missing_batch_limit: Option<u32>,
    #[serde(default)]
    pub body: BodyConfig,
}

/// Paths of the authority's endpoints, relative to `server_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointPaths {
    pub init: String,
    pub update: String,
    pub cars: String,
    pub obstacles: String,
    pub traffic_lights: String,
    pub roads: String,
    pub destinations: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            init: "/init".to_string(),
            update: "/update".to_string(),
            cars: "/getCars".to_string(),
            obstacles: "/getObstacles".to_string(),
            traffic_lights: "/getTrafficLights".to_string(),
            roads: "/getRoad".to_string(),
            destinations: "/getDestination".to_string(),
        }
    }
}

/// How tick-progress behaves once a poll runs late.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProgressPolicy {
    /// Hold at the current snapshot.
    #[default]
    Clamp,
    /// Keep extrapolating past the current snapshot, up to `1 + limit`.
    Overshoot { limit: f32 },
}

/// Vehicle body parameters for the transform compositor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Uniform scale applied to the root mesh.
    pub scale: f32,
    /// Wheel spin rate in radians per second.
    pub spin_rate: f32,
    pub spin_axis: Axis,
    /// Offset added to the interpolated position before it reaches the renderer.
    pub display_offset: Vec3,
    pub wheel_sides: u32,
    pub wheel_radius: f32,
    pub wheel_width: f32,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            scale: 0.2,
            spin_rate: 6.0,
            spin_axis: Axis::X,
            display_offset: Vec3::new(0.0, -1.0, 1.0),
            wheel_sides: 8,
            wheel_radius: 0.06,
            wheel_width: 0.07,
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:8585".to_string()
}

fn default_poll_period_secs() -> f32 {
    5.0
}

fn default_frame_hz() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            poll_period_secs: default_poll_period_secs(),
            frame_hz: default_frame_hz(),
            request_timeout_secs: None,
            endpoints: EndpointPaths::default(),
            init_form: Vec::new(),
            refresh_signals: default_true(),
            progress_policy: ProgressPolicy::default(),
            missing_batch_limit: None,
            body: BodyConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses and validates config from JSON.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(s).context("decode config json")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values the runtime cannot represent.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.poll_period()?;
        self.request_timeout()?;
        if self.missing_batch_limit == Some(0) {
            bail!("missing_batch_limit must be at least 1");
        }
        Ok(())
    }

    /// Poll period as a `Duration`; must be positive and finite.
    pub fn poll_period(&self) -> anyhow::Result<Duration> {
        let period = Duration::try_from_secs_f32(self.poll_period_secs)
            .with_context(|| format!("poll_period_secs {} out of range", self.poll_period_secs))?;
        if period.is_zero() {
            bail!("poll_period_secs must be positive");
        }
        Ok(period)
    }

    /// Per-request timeout, if one is configured.
    pub fn request_timeout(&self) -> anyhow::Result<Option<Duration>> {
        self.request_timeout_secs
            .map(|secs| {
                Duration::try_from_secs_f32(secs)
                    .with_context(|| format!("request_timeout_secs {secs} out of range"))
            })
            .transpose()
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg = ClientConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.server_url, "http://localhost:8585");
        assert_eq!(cfg.poll_period_secs, 5.0);
        assert_eq!(cfg.endpoints.cars, "/getCars");
        assert_eq!(cfg.progress_policy, ProgressPolicy::Clamp);
        assert_eq!(cfg.missing_batch_limit, None);
        assert_eq!(cfg.body.scale, 0.2);
    }

    #[test]
    fn overrides_and_tagged_policy() {
        let cfg = ClientConfig::from_json_str(
            r#"{
                "server_url": "http://10.0.0.2:9000",
                "poll_period_secs": 1.5,
                "progress_policy": { "mode": "overshoot", "limit": 0.25 },
                "missing_batch_limit": 3,
                "endpoints": { "cars": "/cars" },
                "init_form": [["width", "24"]]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.poll_period_secs, 1.5);
        assert_eq!(cfg.progress_policy, ProgressPolicy::Overshoot { limit: 0.25 });
        assert_eq!(cfg.missing_batch_limit, Some(3));
        assert_eq!(cfg.endpoints.cars, "/cars");
        assert_eq!(cfg.endpoints.roads, "/getRoad");
        assert_eq!(cfg.init_form, vec![("width".to_string(), "24".to_string())]);
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        let err = ClientConfig::from_json_str(r#"{"poll_period_secs": 1e39}"#).unwrap_err();
        assert!(format!("{err:#}").contains("poll_period_secs"), "{err:#}");
        assert!(ClientConfig::from_json_str(r#"{"poll_period_secs": 0}"#).is_err());
        assert!(ClientConfig::from_json_str(r#"{"poll_period_secs": -2}"#).is_err());

        let err = ClientConfig::from_json_str(r#"{"request_timeout_secs": -1.0}"#).unwrap_err();
        assert!(format!("{err:#}").contains("request_timeout_secs"), "{err:#}");

        let cfg = ClientConfig::from_json_str(r#"{"request_timeout_secs": 2.5}"#).unwrap();
        assert_eq!(cfg.request_timeout().unwrap(), Some(Duration::from_millis(2500)));
        assert_eq!(cfg.poll_period().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn zero_missing_batch_limit_is_rejected() {
        assert!(ClientConfig::from_json_str(r#"{"missing_batch_limit": 0}"#).is_err());
        assert!(ClientConfig::from_json_str(r#"{"missing_batch_limit": 1}"#).is_ok());
    }

    #[test]
    fn load_reports_the_file() {
        let path = std::env::temp_dir().join(format!("traffic_cfg_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"poll_period_secs": -5}"#).unwrap();
        let err = ClientConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(format!("{err:#}").contains("parse config"), "{err:#}");
    }
}
