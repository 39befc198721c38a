//! Tunable delays for a fill session.
//!
//! Everything has a built-in default; a JSON file passed with `--config`
//! overrides any subset of the keys.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::autofill::FieldKind;

/// Waits between and inside actuations, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timing {
    /// After focusing a control, before writing to it.
    pub focus_settle_ms: u64,
    /// Between the `input` and `change` events of a text control.
    pub input_settle_ms: u64,
    /// Before re-reading a checkbox after clicking it.
    pub verify_delay_ms: u64,
    pub text_pacing_ms: u64,
    pub single_choice_pacing_ms: u64,
    pub multi_choice_pacing_ms: u64,
    pub notice_ms: u64,
    /// Between a successful fill and the submit-button search.
    pub submit_delay_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            focus_settle_ms: 50,
            input_settle_ms: 50,
            verify_delay_ms: 100,
            text_pacing_ms: 150,
            single_choice_pacing_ms: 300,
            multi_choice_pacing_ms: 400,
            notice_ms: 3000,
            submit_delay_ms: 1000,
        }
    }
}

impl Timing {
    /// No waits at all.
    pub fn immediate() -> Self {
        Self {
            focus_settle_ms: 0,
            input_settle_ms: 0,
            verify_delay_ms: 0,
            text_pacing_ms: 0,
            single_choice_pacing_ms: 0,
            multi_choice_pacing_ms: 0,
            notice_ms: 0,
            submit_delay_ms: 0,
        }
    }

    pub fn focus_settle(&self) -> Duration {
        Duration::from_millis(self.focus_settle_ms)
    }

    pub fn input_settle(&self) -> Duration {
        Duration::from_millis(self.input_settle_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn notice(&self) -> Duration {
        Duration::from_millis(self.notice_ms)
    }

    pub fn submit_delay(&self) -> Duration {
        Duration::from_millis(self.submit_delay_ms)
    }

    /// Pause after actuating a field of `kind`, so the host page can react
    /// before the next field is touched.
    pub fn pacing(&self, kind: FieldKind) -> Duration {
        Duration::from_millis(match kind {
            FieldKind::Text => self.text_pacing_ms,
            FieldKind::SingleChoice => self.single_choice_pacing_ms,
            FieldKind::MultiChoice => self.multi_choice_pacing_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FillConfig {
    pub timing: Timing,
    /// Offsets from session start at which a fill is retried regardless of
    /// mutations, for forms that render without observable churn.
    pub fallback_delays_ms: Vec<u64>,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            fallback_delays_ms: vec![1000, 2000, 4000],
        }
    }
}

impl FillConfig {
    /// Fallback offsets, sorted ascending.
    pub fn fallback_delays(&self) -> Vec<Duration> {
        let mut delays: Vec<Duration> = self
            .fallback_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        delays.sort();
        delays
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Load a config file. Keys missing from the file keep their defaults.
pub fn load(path: &Path) -> Result<FillConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `path` when given, otherwise the defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<FillConfig, ConfigError> {
    match path {
        Some(path) => load(path),
        None => Ok(FillConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config: FillConfig = serde_json::from_str(
            r#"{"timing": {"textPacingMs": 10}, "fallbackDelaysMs": [500]}"#,
        )
        .unwrap_or_else(|err| panic!("parse failed: {err}"));
        assert_eq!(config.timing.text_pacing_ms, 10);
        assert_eq!(config.timing.multi_choice_pacing_ms, 400);
        assert_eq!(config.fallback_delays(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn pacing_follows_field_kind() {
        let timing = Timing::default();
        assert_eq!(timing.pacing(FieldKind::Text), Duration::from_millis(150));
        assert_eq!(
            timing.pacing(FieldKind::SingleChoice),
            Duration::from_millis(300)
        );
        assert_eq!(
            timing.pacing(FieldKind::MultiChoice),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn fallback_delays_are_sorted() {
        let config = FillConfig {
            fallback_delays_ms: vec![4000, 1000, 2000],
            ..FillConfig::default()
        };
        assert_eq!(
            config.fallback_delays(),
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load(Path::new("/nonexistent/signup-autofill.json")).err();
        assert!(matches!(err, Some(ConfigError::Io { .. })));
    }
}
