//! Tunables of the index and its render-list worker

use crate::bounds::AltitudeBand;
use crate::{IndexError, Result};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Deepest quadtree level accepted by [`IndexConfig::validate`]
const MAX_SUPPORTED_DEPTH: u32 = 30;

/// Configuration for a [`crate::SpatialIndex`] and [`crate::QuadtreeRenderer`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IndexConfig {
    /// Maximum quadtree depth; the root is depth 0.
    /// Default: 18
    pub max_depth: u32,
    /// Vertical envelope assumed for items without altitude limits.
    /// Default: -900 m to 19 000 m
    pub altitude_fallback: AltitudeBand,
    /// Minimum distance (meters) an orthographic camera is pulled back along
    /// its view direction before measuring depth-sort distances.
    /// Default: 4000
    pub ortho_min_pullback: f64,
    /// Delay before the worker services a request after waking, so bursts of
    /// view changes coalesce into one query.
    /// Default: 0
    pub query_state_capture_delay: Duration,
    /// Name of the render-list worker thread
    pub worker_thread_name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_depth: 18,
            altitude_fallback: AltitudeBand::default(),
            ortho_min_pullback: 4_000.0,
            query_state_capture_delay: Duration::ZERO,
            worker_thread_name: "quadtree-render-list".to_string(),
        }
    }
}

impl IndexConfig {
    /// Check that the values describe a usable index
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 || self.max_depth > MAX_SUPPORTED_DEPTH {
            return Err(IndexError::InvalidConfig(format!(
                "max_depth must be within 1..={MAX_SUPPORTED_DEPTH}, got {}",
                self.max_depth
            )));
        }
        let band = self.altitude_fallback;
        if !(band.min.is_finite() && band.max.is_finite()) || band.min > band.max {
            return Err(IndexError::InvalidConfig(format!(
                "altitude_fallback must be a finite, ordered band, got {}..{}",
                band.min, band.max
            )));
        }
        if !(self.ortho_min_pullback >= 0.0) {
            return Err(IndexError::InvalidConfig(format!(
                "ortho_min_pullback must be non-negative, got {}",
                self.ortho_min_pullback
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = IndexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_depth, 18);
        assert_eq!(config.ortho_min_pullback, 4_000.0);
        assert_eq!(config.altitude_fallback, AltitudeBand::new(-900.0, 19_000.0));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad = [
            IndexConfig {
                max_depth: 0,
                ..Default::default()
            },
            IndexConfig {
                max_depth: 31,
                ..Default::default()
            },
            IndexConfig {
                altitude_fallback: AltitudeBand::new(100.0, -100.0),
                ..Default::default()
            },
            IndexConfig {
                ortho_min_pullback: -1.0,
                ..Default::default()
            },
            IndexConfig {
                ortho_min_pullback: f64::NAN,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(IndexError::InvalidConfig(_))),
                "{config:?}"
            );
        }
    }
}
