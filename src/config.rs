//! Stream and pipeline configuration. Deserialized from whatever the out-of-scope
//! configuration loader hands us (JSON over the wire, a config file, ...); unknown
//! keys are ignored rather than rejected.

use serde::Deserialize;

use crate::prelude::*;

pub const MAX_STREAM_NAME_LEN: usize = 64;
const DEFAULT_SEGMENT_DURATION_SECS: f64 = 0.5;

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub segment_duration: Option<f64>,
    #[serde(default)]
    pub record_audio: bool,
    #[serde(default)]
    pub detection_based_recording: bool,
    #[serde(default)]
    pub detection_model: Option<String>,
    #[serde(default)]
    pub detection_threshold: Option<f64>,
    #[serde(default)]
    pub detection_interval: Option<f64>,
    #[serde(default)]
    pub memory_constrained: bool,
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.name.len() > MAX_STREAM_NAME_LEN {
            return Err(ConfigError::NameTooLong(self.name.clone(), MAX_STREAM_NAME_LEN));
        }
        if self.url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if let Some(interval) = self.detection_interval {
            if interval <= 0.0 {
                return Err(ConfigError::NonPositiveDetectionInterval(interval));
            }
        }
        Ok(())
    }

    /// The segment duration the HLS segmenter should actually use: the configured
    /// value when it is positive, otherwise the 0.5s default (§3, §4.1 step 5).
    pub fn effective_segment_duration_secs(&self) -> f64 {
        match self.segment_duration {
            Some(d) if d > 0.0 => d,
            _ => DEFAULT_SEGMENT_DURATION_SECS,
        }
    }

    pub fn detection_interval_secs(&self) -> f64 {
        self.detection_interval.unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub streams: Vec<StreamConfig>,
    #[serde(default)]
    pub detection_worker_count: Option<usize>,
    #[serde(default)]
    pub prebuffer_capacity: Option<usize>,
}

impl PipelineConfig {
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(data)?;
        for stream in &config.streams {
            stream.validate()?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> StreamConfig {
        StreamConfig {
            name: "cam-a".to_string(),
            url: "rtsp://example.invalid/stream".to_string(),
            protocol: None,
            segment_duration: None,
            record_audio: false,
            detection_based_recording: false,
            detection_model: None,
            detection_threshold: None,
            detection_interval: None,
            memory_constrained: false,
        }
    }

    #[test]
    fn rejects_empty_name() {
        let mut cfg = base_config();
        cfg.name.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyName)));
    }

    #[test]
    fn rejects_name_over_limit() {
        let mut cfg = base_config();
        cfg.name = "x".repeat(MAX_STREAM_NAME_LEN + 1);
        assert!(matches!(cfg.validate(), Err(ConfigError::NameTooLong(_, _))));
    }

    #[test]
    fn defaults_segment_duration_to_half_second() {
        let cfg = base_config();
        assert_eq!(cfg.effective_segment_duration_secs(), 0.5);
    }

    #[test]
    fn zero_segment_duration_falls_back_to_default() {
        let mut cfg = base_config();
        cfg.segment_duration = Some(0.0);
        assert_eq!(cfg.effective_segment_duration_secs(), 0.5);
    }

    #[test]
    fn positive_segment_duration_is_kept() {
        let mut cfg = base_config();
        cfg.segment_duration = Some(2.0);
        assert_eq!(cfg.effective_segment_duration_secs(), 2.0);
    }

    #[test]
    fn rejects_non_positive_detection_interval() {
        let mut cfg = base_config();
        cfg.detection_interval = Some(0.0);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositiveDetectionInterval(_))
        ));
    }

    #[test]
    fn ignores_unknown_keys() {
        let json = r#"{
            "streams": [{"name": "cam-a", "url": "rtsp://x", "unexpected_key": 123}]
        }"#;
        let config = PipelineConfig::from_json(json).expect("parses despite unknown key");
        assert_eq!(config.streams.len(), 1);
    }
}
