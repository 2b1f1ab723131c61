//! # Configuration
//!
//! SU2-style option files (`KEY= value`, `%` comments, parenthesised lists)
//! and the typed views the adaptation pipeline derives from them.
//!
//! - `options` - validated adaptation options, sensor and back-end selection
//! - `schedule` - per-level adaptation schedule

pub mod options;
pub mod schedule;

pub use options::{
    add_suffix, adjoint_suffix, check_required, AdaptOptions, BackendKind, SensorKind,
    ADAPTATION_OPTIONS, REQUIRED_OPTIONS,
};
pub use schedule::{AdaptationLevel, AdaptationSchedule, ScheduleBuilder, ScheduleStep};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{ConfigError, PipelineError};

fn option_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$").expect("valid option regex")
    })
}

/// A parsed option file.
///
/// Keys are stored upper-case; values are kept verbatim (trimmed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    options: BTreeMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse option-file text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut options = BTreeMap::new();

        for (index, raw) in text.lines().enumerate() {
            let line = match raw.find('%') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            if line.trim().is_empty() {
                continue;
            }

            let captures = option_line()
                .captures(line)
                .ok_or_else(|| ConfigError::Syntax {
                    line: index + 1,
                    content: raw.trim().to_string(),
                })?;

            options.insert(captures[1].to_ascii_uppercase(), captures[2].to_string());
        }

        Ok(Self { options })
    }

    /// Load and parse an option file from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        Ok(Self::parse(&text)?)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Display) {
        self.options
            .insert(key.to_ascii_uppercase(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.options.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    /// `true` when the option is present and set to `YES`.
    pub fn is_yes(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("YES"))
            .unwrap_or(false)
    }

    /// A list option: `(a, b, c)`, `a, b, c` or a single value.
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(split_list)
    }

    /// A required string option.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingOptions(vec![key.to_string()]))
    }

    /// A required floating-point option.
    pub fn require_f64(&self, key: &str) -> Result<f64, ConfigError> {
        parse_f64(key, self.require(key)?)
    }

    /// Render back to option-file text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.options {
            out.push_str(key);
            out.push_str("= ");
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// A copy with the given keys removed.
    pub fn without(&self, keys: &[&str]) -> Self {
        let mut copy = self.clone();
        for key in keys {
            copy.options.remove(*key);
        }
        copy
    }
}

pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn parse_f64(option: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConfigError::InvalidValue {
            option: option.to_string(),
            value: value.to_string(),
            reason: "expected a finite number".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
% ------------- Mesh adaptation -------------
%
PYADAP_COMPLEXITY= (1000, 2000)
PYADAP_SUBITE= (2,1)
pyadap_sensor = MACH   % lower-case key is accepted
MESH_FILENAME= naca0012.su2
"#;

    #[test]
    fn test_parse_options_and_comments() {
        let config = Config::parse(SAMPLE).unwrap();

        assert_eq!(config.get("PYADAP_SENSOR"), Some("MACH"));
        assert_eq!(config.get("MESH_FILENAME"), Some("naca0012.su2"));
        assert_eq!(
            config.get_list("PYADAP_COMPLEXITY"),
            Some(vec!["1000".to_string(), "2000".to_string()])
        );
        assert_eq!(config.get_list("PYADAP_SUBITE").unwrap().len(), 2);
    }

    #[test]
    fn test_parse_rejects_garbage_line() {
        let err = Config::parse("MESH_FILENAME= a.su2\nthis is not an option\n").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_render_round_trips_values() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.set("ITER", 250);
        let reparsed = Config::parse(&config.render()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_without_strips_keys() {
        let config = Config::parse(SAMPLE).unwrap();
        let stripped = config.without(&["PYADAP_SENSOR", "PYADAP_SUBITE"]);
        assert!(!stripped.contains("PYADAP_SENSOR"));
        assert!(stripped.contains("PYADAP_COMPLEXITY"));
    }

    #[test]
    fn test_is_yes() {
        let config = Config::parse("WRT_INRIA_MESH= yes\nPYADAP_RDG= NO\n").unwrap();
        assert!(config.is_yes("WRT_INRIA_MESH"));
        assert!(!config.is_yes("PYADAP_RDG"));
        assert!(!config.is_yes("PYADAP_ORTHO"));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adap.cfg");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = tokio_test::block_on(Config::load(&path)).unwrap();
        assert!(config.contains("PYADAP_SENSOR"));

        let missing = dir.path().join("missing.cfg");
        let err = tokio_test::block_on(Config::load(&missing)).unwrap_err();
        assert!(err.to_string().contains("missing.cfg"));
    }
}
