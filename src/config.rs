use crate::codegen::{EmissionMode, GeneratorOptions, DEFAULT_STATEMENT_PREFIX};
use crate::diagnostics::DEFAULT_WRAPPER_LINE_OFFSET;
use crate::interpreter::DEFAULT_INSTRUCTION_BUDGET;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend_url: String,
    pub poll_interval_ms: u64,
    /// Upper bound for one remote run; the poll loop gives up after this long.
    pub max_poll_duration_ms: u64,
    pub step_delay_ms: u64,
    pub sleep_per_line_ms: Option<u64>,
    pub completion_cooldown_ms: u64,
    pub wrapper_line_offset: usize,
    pub instruction_budget: usize,
    /// Empty string turns highlighting off.
    pub statement_prefix: String,
    pub value_cache: bool,
    pub strict: bool,
    pub per_block: bool,
    pub disabled_types: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8080".to_string(),
            poll_interval_ms: 250,
            max_poll_duration_ms: 60_000,
            step_delay_ms: 1_000,
            sleep_per_line_ms: None,
            completion_cooldown_ms: 2_000,
            wrapper_line_offset: DEFAULT_WRAPPER_LINE_OFFSET,
            instruction_budget: DEFAULT_INSTRUCTION_BUDGET,
            statement_prefix: DEFAULT_STATEMENT_PREFIX.to_string(),
            value_cache: false,
            strict: false,
            per_block: false,
            disabled_types: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file '{}'.", path.display()))?;
        Config::from_toml_str(&text)
            .with_context(|| format!("Invalid config file '{}'.", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text)?;
        if config.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero.");
        }
        if config.instruction_budget == 0 {
            anyhow::bail!("instruction_budget must be greater than zero.");
        }
        Ok(config)
    }

    pub fn generator_options(&self) -> GeneratorOptions {
        GeneratorOptions {
            mode: if self.per_block {
                EmissionMode::SingleBlock
            } else {
                EmissionMode::WholeProgram
            },
            statement_prefix: if self.statement_prefix.is_empty() {
                None
            } else {
                Some(self.statement_prefix.clone())
            },
            value_cache: self.value_cache,
            strict: self.strict,
            disabled_types: self.disabled_types.iter().cloned().collect::<HashSet<_>>(),
            ..GeneratorOptions::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_duration(&self) -> Duration {
        Duration::from_millis(self.max_poll_duration_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn completion_cooldown(&self) -> Duration {
        Duration::from_millis(self.completion_cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn keys_override_defaults() {
        let config = Config::from_toml_str(
            "backend_url = \"http://10.0.0.2:9000\"\nper_block = true\nstatement_prefix = \"\"\ndisabled_types = [\"move_up\"]\n",
        )
        .unwrap();
        assert_eq!(config.backend_url, "http://10.0.0.2:9000");
        assert_eq!(config.poll_interval_ms, 250);
        let options = config.generator_options();
        assert_eq!(options.mode, EmissionMode::SingleBlock);
        assert_eq!(options.statement_prefix, None);
        assert!(options.disabled_types.contains("move_up"));
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        assert!(Config::from_toml_str("pol_interval_ms = 5").is_err());
        assert!(Config::from_toml_str("poll_interval_ms = \"fast\"").is_err());
        assert!(Config::from_toml_str("poll_interval_ms = 0").is_err());
    }

    #[test]
    fn load_reports_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "strict = 3").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));

        let missing = file.path().with_extension("missing");
        assert!(Config::load(&missing).is_err());
    }
}
