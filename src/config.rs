//! Crate-level constants and the aggregated pipeline configuration.

use crate::pipeline::intake::IntakeConfig;
use crate::pipeline::recognition::{EngineConfig, ProgressConfig};

/// Application-level constants
pub const APP_NAME: &str = "Chatlens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> String {
    "chatlens=info".to_string()
}

/// Aggregated configuration for one pipeline instance.
///
/// Each stage owns its config struct; this bundles them so a caller can
/// construct a `BatchSession` from a single value.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub intake: IntakeConfig,
    pub engine: EngineConfig,
    pub progress: ProgressConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_chatlens() {
        assert_eq!(APP_NAME, "Chatlens");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.4.0");
    }

    #[test]
    fn default_filter_scopes_to_crate() {
        assert!(default_log_filter().starts_with("chatlens"));
    }

    #[test]
    fn pipeline_config_default_builds() {
        let config = PipelineConfig::default();
        assert!(config.intake.max_upload_bytes > config.intake.reencode_threshold_bytes);
        assert_eq!(config.engine.max_retries, 2);
    }
}
