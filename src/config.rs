// src/config.rs

//! Defines the configuration structures for the pipeline.
//!
//! This module provides a set of structs that can be deserialized from a
//! configuration file (JSON via [`PipelineConfig::from_json_str`]) to
//! customize buffer pool sizing, throttling thresholds, and per-stage
//! policy. Default values are provided for every option and mirror the
//! policy the pipeline ships with on reference hardware.

use crate::buffer::format::PixelFormat;
use serde::{Deserialize, Serialize};

/// Represents the complete configuration for the pipeline.
///
/// This struct is the root of the configuration and is intended to be
/// deserialized from a configuration file. It groups settings by the
/// worker they apply to.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)] // Apply default values for the entire struct if a field is missing.
pub struct PipelineConfig {
    /// Preview/display circulation settings.
    pub preview: PreviewConfig,
    /// Video encode settings.
    pub video: VideoConfig,
    /// Thermal throttling settings.
    pub thermal: ThermalConfig,
}

impl PipelineConfig {
    /// Parse a configuration from its JSON representation, filling in
    /// defaults for anything not mentioned.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Settings for the preview worker and its window buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Window pool size to request. Raised automatically to the surface's
    /// minimum-undequeued count plus one when the surface demands more.
    pub buffer_count: usize,
    /// Loan pool buffers to the capture side instead of copying frames.
    pub zero_copy: bool,
    /// Pixel format rendered to the display surface.
    pub format: PixelFormat,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        PreviewConfig {
            // Enough for the display to hold two while three circulate.
            buffer_count: 6,
            zero_copy: true,
            format: PixelFormat::Nv12,
        }
    }
}

/// Settings for the video worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Upper bound on frames queued to the encoder before the capture side
    /// should start shedding; advisory.
    pub max_queued_frames: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            max_queued_frames: 4,
        }
    }
}

/// Settings for the thermal throttle worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// Probe polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Temperature above which mild throttling engages.
    pub mild_c: f32,
    /// Temperature above which severe throttling engages.
    pub severe_c: f32,
    /// Band a reading must clear before stepping a level back down.
    pub hysteresis_c: f32,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        ThermalConfig {
            poll_interval_ms: 2000,
            mild_c: 70.0,
            severe_c: 85.0,
            hysteresis_c: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PipelineConfig::default();
        assert!(config.preview.buffer_count >= 2);
        assert!(config.thermal.mild_c < config.thermal.severe_c);
        assert!(config.thermal.hysteresis_c > 0.0);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config =
            PipelineConfig::from_json_str(r#"{ "preview": { "buffer_count": 8 } }"#).unwrap();
        assert_eq!(config.preview.buffer_count, 8);
        // Untouched sections keep their defaults.
        assert!(config.preview.zero_copy);
        assert_eq!(config.thermal.poll_interval_ms, 2000);
    }

    #[test]
    fn round_trips_through_json() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = PipelineConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.preview.buffer_count, config.preview.buffer_count);
        assert_eq!(parsed.video.max_queued_frames, config.video.max_queued_frames);
    }
}
