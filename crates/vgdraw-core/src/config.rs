//! Kernel configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Gesture recognition thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Per-axis movement (display pixels) below which a move is noise.
    pub noise_threshold: f64,
    /// Distance from the down point that starts a scroll.
    pub touch_slop: f64,
    /// Hold time before a press becomes a long press.
    pub long_press_ms: u64,
    /// A second finger landing within this window cancels the one-finger gesture.
    pub quick_two_finger_ms: u64,
    /// Pending coordinate capacity (x and y each take one slot).
    pub pending_coords: usize,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            noise_threshold: 1.0,
            touch_slop: 8.0,
            long_press_ms: 500,
            quick_two_finger_ms: 800,
            pending_coords: 20,
        }
    }
}

/// Configuration for a kernel view and its workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub gesture: GestureConfig,
    /// Hit-test tolerance in display pixels.
    pub hit_tolerance: f64,
    /// Handle grab radius in display pixels.
    pub handle_tolerance: f64,
    /// Minimum display size of a newly drawn shape.
    pub min_shape_size: f64,
    /// Minimum display distance between consecutive freehand samples.
    pub min_spline_step: f64,
    /// Pending frames per record engine.
    pub record_queue_capacity: usize,
    /// Pending appended shapes per render scheduler.
    pub append_capacity: usize,
    /// Concurrent graphics handles per view.
    pub graphics_pool_size: usize,
    /// Bounded wait when stopping a worker.
    pub stop_timeout_ms: u64,
    /// Drawing command used for `@draw` before any other was chosen.
    pub default_draw_command: String,
    /// Zoom to fit after the first regenerate of a non-empty document.
    pub fit_on_first_regen: bool,
    /// Padding used by zoom-to-fit, in display pixels.
    pub fit_padding: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            gesture: GestureConfig::default(),
            hit_tolerance: 10.0,
            handle_tolerance: 12.0,
            min_shape_size: 2.0,
            min_spline_step: 2.0,
            record_queue_capacity: 20,
            append_capacity: 10,
            graphics_pool_size: 8,
            stop_timeout_ms: 1000,
            default_draw_command: "splines".to_string(),
            fit_on_first_regen: true,
            fit_padding: 16.0,
            min_zoom: 0.01,
            max_zoom: 20.0,
        }
    }
}

impl KernelConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.record_queue_capacity, 20);
        assert_eq!(config.gesture.quick_two_finger_ms, 800);
        assert_eq!(config.stop_timeout_ms, 1000);
        assert!((config.gesture.noise_threshold - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = KernelConfig::from_json(r#"{"hit_tolerance": 4.0, "gesture": {"touch_slop": 2.0}}"#)
            .unwrap();
        assert!((config.hit_tolerance - 4.0).abs() < f64::EPSILON);
        assert!((config.gesture.touch_slop - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.gesture.long_press_ms, 500);
        assert_eq!(config.default_draw_command, "splines");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json");
        std::fs::write(&path, r#"{"graphics_pool_size": 2}"#).unwrap();
        let config = KernelConfig::load(&path).unwrap();
        assert_eq!(config.graphics_pool_size, 2);

        assert!(matches!(
            KernelConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(KernelConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
