//! Pipeline configuration.
//!
//! Tunables for the metrics pipeline with serde support, environment
//! friendly defaults, and validation.

use crate::core::{MetricsError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default explicit histogram bucket boundaries, in milliseconds.
pub const DEFAULT_HISTOGRAM_BOUNDARIES: &[f64] = &[
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// Configuration for a metrics pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Exemplars retained per stream per collection window. Zero disables sampling.
    pub exemplar_reservoir_size: usize,
    /// Maximum nesting depth for array-valued attributes before truncation.
    pub attribute_depth_limit: usize,
    /// Bucket boundaries used when a histogram instrument has no matching view.
    pub default_histogram_boundaries: Vec<f64>,
    /// How long an unreferenced instrument lingers before reclamation.
    /// Zero reclaims synchronously inside the release that orphaned it.
    #[serde(with = "humantime_serde")]
    pub staleness_delay: Duration,
    /// Allow reader bitmasks to widen past one machine word. When disabled
    /// the 65th reader registration becomes a warned no-op sink.
    pub wide_reader_masks: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            exemplar_reservoir_size: 4,
            attribute_depth_limit: crate::core::attributes::DEFAULT_ATTRIBUTE_DEPTH,
            default_histogram_boundaries: DEFAULT_HISTOGRAM_BOUNDARIES.to_vec(),
            staleness_delay: Duration::ZERO,
            wide_reader_masks: true,
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.attribute_depth_limit == 0 {
            return Err(MetricsError::configuration(
                "attribute_depth_limit must be at least 1",
            ));
        }
        for pair in self.default_histogram_boundaries.windows(2) {
            if pair[0] >= pair[1] {
                return Err(MetricsError::configuration(
                    "default_histogram_boundaries must be strictly increasing",
                ));
            }
        }
        if self
            .default_histogram_boundaries
            .iter()
            .any(|b| !b.is_finite())
        {
            return Err(MetricsError::configuration(
                "default_histogram_boundaries must be finite",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.wide_reader_masks);
        assert_eq!(config.attribute_depth_limit, 4);
    }

    #[test]
    fn test_unsorted_boundaries_rejected() {
        let config = PipelineConfig {
            default_histogram_boundaries: vec![10.0, 5.0],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_boundaries_rejected() {
        let config = PipelineConfig {
            default_histogram_boundaries: vec![1.0, f64::INFINITY],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_depth_rejected() {
        let config = PipelineConfig {
            attribute_depth_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = PipelineConfig {
            staleness_delay: Duration::from_secs(30),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.staleness_delay, Duration::from_secs(30));
    }
}
