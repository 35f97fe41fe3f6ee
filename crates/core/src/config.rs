//! Runtime configuration
//!
//! All sizes and thresholds are fixed when the runtime is opened.

use crate::error::{Result, StrandError};
use crate::types::{MAX_SEGMENTS, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of a runtime instance.
///
/// # Example
///
/// ```
/// use strand_core::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     segments: 2,
///     nursery_size: 64 * 1024,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    // =========================================================================
    // Segments
    // =========================================================================
    /// Number of segments, the cap on concurrently running transactions.
    ///
    /// Default: 4
    pub segments: usize,

    // =========================================================================
    // Nursery (Young Generation)
    // =========================================================================
    /// Size of each segment's nursery in bytes.
    ///
    /// Default: 1MB
    pub nursery_size: usize,

    /// Objects at least this large (header included) bypass the nursery and
    /// are allocated directly in the old generation.
    ///
    /// Default: 16KB
    pub large_object_threshold: usize,

    // =========================================================================
    // Old Generation
    // =========================================================================
    /// Size of the old-generation region in pages. Pages are materialized
    /// lazily, so this bounds address space rather than resident memory.
    ///
    /// Default: 65536 (256MB)
    pub heap_pages: usize,

    /// Committed old-generation pages above which a major collection runs.
    ///
    /// Default: 1024 (4MB)
    pub major_watermark_pages: usize,

    /// After a major collection the watermark becomes
    /// `max(major_watermark_pages, live_pages * major_growth)`.
    ///
    /// Default: 1.82
    pub major_growth: f64,

    // =========================================================================
    // Safe Points
    // =========================================================================
    /// How long the collector waits for one segment per attempt.
    ///
    /// Default: 5ms
    pub safe_point_timeout_ms: u64,

    /// Attempts to stop every segment before deferring a major collection.
    ///
    /// Default: 4
    pub safe_point_attempts: u32,

    /// Consecutive deferrals tolerated before the runtime gives up.
    ///
    /// Default: 100000
    pub max_major_deferrals: u64,

    // =========================================================================
    // Retry Policy
    // =========================================================================
    /// Maximum executions of a transaction body in `atomically`, `None` for
    /// unbounded.
    ///
    /// Default: None
    pub retry_limit: Option<u32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            segments: 4,
            nursery_size: 1024 * 1024,
            large_object_threshold: 16 * 1024,
            heap_pages: 65536,
            major_watermark_pages: 1024,
            major_growth: 1.82,
            safe_point_timeout_ms: 5,
            safe_point_attempts: 4,
            max_major_deferrals: 100_000,
            retry_limit: None,
        }
    }
}

impl RuntimeConfig {
    /// Small heap and nursery, for tests that want frequent collections.
    pub fn compact() -> Self {
        Self {
            segments: 4,
            nursery_size: 16 * 1024,
            large_object_threshold: 4 * 1024,
            heap_pages: 4096,
            major_watermark_pages: 64,
            ..Default::default()
        }
    }

    /// Per-attempt safe-point timeout.
    pub fn safe_point_timeout(&self) -> Duration {
        Duration::from_millis(self.safe_point_timeout_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.segments == 0 || self.segments > MAX_SEGMENTS {
            return Err(StrandError::InvalidConfig(format!(
                "segments must be between 1 and {}",
                MAX_SEGMENTS
            )));
        }
        if self.nursery_size < PAGE_SIZE {
            return Err(StrandError::InvalidConfig(
                "nursery size must be at least one page".to_string(),
            ));
        }
        if self.nursery_size >= 1 << 40 {
            return Err(StrandError::InvalidConfig(
                "nursery size must be below 1TB".to_string(),
            ));
        }
        if self.large_object_threshold == 0 {
            return Err(StrandError::InvalidConfig(
                "large object threshold must be positive".to_string(),
            ));
        }
        if self.heap_pages < 16 || self.heap_pages > u32::MAX as usize / 2 {
            return Err(StrandError::InvalidConfig(
                "heap must span between 16 and 2^31 pages".to_string(),
            ));
        }
        if self.major_growth < 1.0 {
            return Err(StrandError::InvalidConfig(
                "major growth factor must be at least 1.0".to_string(),
            ));
        }
        if self.safe_point_attempts == 0 {
            return Err(StrandError::InvalidConfig(
                "safe point attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_limit == Some(0) {
            return Err(StrandError::InvalidConfig(
                "retry limit must allow at least one execution".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
        assert!(RuntimeConfig::compact().validate().is_ok());
    }

    #[test]
    fn test_invalid_segment_count() {
        let config = RuntimeConfig {
            segments: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StrandError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_nursery_size() {
        let config = RuntimeConfig {
            nursery_size: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_limit_rejected() {
        let config = RuntimeConfig {
            retry_limit: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"segments": 8, "retry_limit": 5}"#).unwrap();
        assert_eq!(config.segments, 8);
        assert_eq!(config.retry_limit, Some(5));
        assert_eq!(config.nursery_size, RuntimeConfig::default().nursery_size);
    }
}
