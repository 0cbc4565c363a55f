use reunite_core::{ModelPaths, DEFAULT_EXTRACT_TIMEOUT, DEFAULT_SIMILARITY_THRESHOLD};
use reunite_notify::NoticeConfig;
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity a candidate must exceed to match.
    pub similarity_threshold: f32,
    /// Timeout in seconds for one extraction.
    pub extract_timeout_secs: u64,
    /// Whether to load the age model and estimate upload ages.
    pub age_estimation: bool,
    /// Recipient of match notices.
    pub admin_email: String,
    /// Sender address on notices.
    pub from_email: String,
    /// When set, notices are written here as JSON instead of logged.
    pub outbox_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `REUNITE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let notice = NoticeConfig::default();

        Self {
            model_dir: var("REUNITE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(reunite_core::default_model_dir),
            similarity_threshold: checked_threshold(
                parse_or(var("REUNITE_SIMILARITY_THRESHOLD"), DEFAULT_SIMILARITY_THRESHOLD),
                "REUNITE_SIMILARITY_THRESHOLD",
            ),
            extract_timeout_secs: parse_or(
                var("REUNITE_EXTRACT_TIMEOUT_SECS"),
                DEFAULT_EXTRACT_TIMEOUT.as_secs(),
            ),
            age_estimation: var("REUNITE_AGE_ESTIMATION").map(|v| v != "0").unwrap_or(true),
            admin_email: var("REUNITE_ADMIN_EMAIL").unwrap_or(notice.admin_email),
            from_email: var("REUNITE_FROM_EMAIL").unwrap_or(notice.from_email),
            outbox_dir: var("REUNITE_OUTBOX_DIR").map(PathBuf::from),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir, self.age_estimation)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn notice_config(&self) -> NoticeConfig {
        NoticeConfig {
            admin_email: self.admin_email.clone(),
            from_email: self.from_email.clone(),
            ..NoticeConfig::default()
        }
    }
}

/// `value` when finite, else the default threshold.
pub fn checked_threshold(value: f32, source: &str) -> f32 {
    if value.is_finite() {
        return value;
    }
    tracing::warn!(source, value = %value, default = DEFAULT_SIMILARITY_THRESHOLD, "non-finite similarity threshold ignored");
    DEFAULT_SIMILARITY_THRESHOLD
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.similarity_threshold, 0.35);
        assert_eq!(c.extract_timeout(), Duration::from_secs(30));
        assert!(c.age_estimation);
        assert!(c.outbox_dir.is_none());
        assert_eq!(c.admin_email, "admin@localhost");
        assert!(c.model_dir.ends_with("reunite/models"));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("REUNITE_MODEL_DIR", "/opt/models"),
            ("REUNITE_SIMILARITY_THRESHOLD", "0.5"),
            ("REUNITE_EXTRACT_TIMEOUT_SECS", "5"),
            ("REUNITE_AGE_ESTIMATION", "0"),
            ("REUNITE_ADMIN_EMAIL", "ops@example.org"),
            ("REUNITE_OUTBOX_DIR", "/var/spool/reunite"),
        ]);
        assert_eq!(c.similarity_threshold, 0.5);
        assert_eq!(c.extract_timeout_secs, 5);
        assert!(c.model_paths().age.is_none());
        assert_eq!(c.model_paths().detector, PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(c.notice_config().admin_email, "ops@example.org");
        assert_eq!(c.outbox_dir, Some(PathBuf::from("/var/spool/reunite")));
    }

    #[test]
    fn test_unparseable_falls_back() {
        let c = config(&[("REUNITE_SIMILARITY_THRESHOLD", "high"), ("REUNITE_EXTRACT_TIMEOUT_SECS", "-1")]);
        assert_eq!(c.similarity_threshold, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(c.extract_timeout_secs, 30);
    }

    #[test]
    fn test_non_finite_threshold_falls_back() {
        for raw in ["NaN", "nan", "inf", "-inf"] {
            let c = config(&[("REUNITE_SIMILARITY_THRESHOLD", raw)]);
            assert_eq!(c.similarity_threshold, DEFAULT_SIMILARITY_THRESHOLD, "{raw}");
        }
        assert_eq!(checked_threshold(f32::NAN, "--threshold"), DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(checked_threshold(0.6, "--threshold"), 0.6);
    }
}
