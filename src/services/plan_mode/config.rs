//! Plan Mode Configuration
//!
//! Tunables for outline validation, step streaming and the model invoker.
//! Every field has a default, so an empty TOML document is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

/// Outline quality-gate limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutlineLimits {
    pub min_title_chars: usize,
    pub min_steps: usize,
    pub max_steps: usize,
    pub min_step_title_chars: usize,
    pub max_step_title_chars: usize,
}

impl Default for OutlineLimits {
    fn default() -> Self {
        Self {
            min_title_chars: 3,
            min_steps: 2,
            max_steps: 15,
            min_step_title_chars: 2,
            max_step_title_chars: 50,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanModeConfig {
    /// Buffered step text is flushed once it grows past this many characters.
    pub text_flush_threshold: usize,
    /// Cap on a single step output threaded into later steps' context.
    pub max_context_chars_per_step: usize,
    /// Tool-loop turns per model invocation.
    pub max_invocation_turns: usize,
    /// Bound of the invocation event channel.
    pub event_channel_capacity: usize,
    pub outline: OutlineLimits,
}

impl Default for PlanModeConfig {
    fn default() -> Self {
        Self {
            text_flush_threshold: 20,
            max_context_chars_per_step: 16_000,
            max_invocation_turns: 16,
            event_channel_capacity: 128,
            outline: OutlineLimits::default(),
        }
    }
}

impl PlanModeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject zero sizes and inverted ranges.
    pub fn validate(&self) -> AppResult<()> {
        let nonzero = [
            ("text_flush_threshold", self.text_flush_threshold),
            ("max_context_chars_per_step", self.max_context_chars_per_step),
            ("max_invocation_turns", self.max_invocation_turns),
            ("event_channel_capacity", self.event_channel_capacity),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(AppError::config(format!(
                    "{} must be greater than zero",
                    key
                )));
            }
        }

        let limits = &self.outline;
        if limits.min_steps > limits.max_steps {
            return Err(AppError::config(format!(
                "outline.min_steps ({}) exceeds outline.max_steps ({})",
                limits.min_steps, limits.max_steps
            )));
        }
        if limits.min_step_title_chars > limits.max_step_title_chars {
            return Err(AppError::config(format!(
                "outline.min_step_title_chars ({}) exceeds outline.max_step_title_chars ({})",
                limits.min_step_title_chars, limits.max_step_title_chars
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_default() {
        let config = PlanModeConfig::from_toml_str("").unwrap();
        assert_eq!(config, PlanModeConfig::default());
        assert_eq!(config.text_flush_threshold, 20);
        assert_eq!(config.outline.max_steps, 15);
    }

    #[test]
    fn test_partial_override() {
        let config = PlanModeConfig::from_toml_str(
            r#"
text_flush_threshold = 64

[outline]
max_steps = 8
"#,
        )
        .unwrap();
        assert_eq!(config.text_flush_threshold, 64);
        assert_eq!(config.outline.max_steps, 8);
        assert_eq!(config.outline.min_steps, 2);
        assert_eq!(config.max_context_chars_per_step, 16_000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = PlanModeConfig::from_toml_str("flush = 3").unwrap_err();
        assert!(matches!(err, AppError::Toml(_)));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = PlanModeConfig::from_toml_str("text_flush_threshold = 0").unwrap_err();
        assert!(err.to_string().contains("text_flush_threshold"));
    }

    #[test]
    fn test_inverted_step_range_rejected() {
        let err = PlanModeConfig::from_toml_str(
            r#"
[outline]
min_steps = 10
max_steps = 4
"#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_invocation_turns = 4").unwrap();

        let config = PlanModeConfig::load(file.path()).unwrap();
        assert_eq!(config.max_invocation_turns, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PlanModeConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
