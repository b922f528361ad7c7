use serde::Deserialize;

/// Analyzer behavior toggles.
///
/// Mirrors the environment switches of the original deployment; each field
/// can come from YAML or be overlaid from the process environment.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ParserConfig {
    pub enable_tidb_parser: bool,
    pub enable_postgresql_parser: bool,
    pub fallback_to_original: bool,
    pub enable_benchmarking: bool,
    pub log_parsing_errors: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            enable_tidb_parser: false,
            enable_postgresql_parser: true,
            fallback_to_original: true,
            enable_benchmarking: false,
            log_parsing_errors: true,
        }
    }
}

impl ParserConfig {
    /// Overlay any of the recognized environment variables onto `self`.
    pub fn overlay_env(mut self) -> Self {
        if let Some(v) = env_bool("ENABLE_TIDB_PARSER") {
            self.enable_tidb_parser = v;
        }
        if let Some(v) = env_bool("AUTO_ENABLE_TIDB") {
            self.enable_tidb_parser = v;
        }
        if let Some(v) = env_bool("ENABLE_POSTGRESQL_PARSER") {
            self.enable_postgresql_parser = v;
        }
        if let Some(v) = env_bool("FALLBACK_TO_ORIGINAL") {
            self.fallback_to_original = v;
        }
        if let Some(v) = env_bool("ENABLE_BENCHMARKING") {
            self.enable_benchmarking = v;
        }
        if let Some(v) = env_bool("LOG_PARSING_ERRORS") {
            self.log_parsing_errors = v;
        }
        self
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|raw| parse_bool(&raw))
}

/// Lenient boolean parsing: `true/1/yes/on/enable[d]` and the matching
/// negatives. Unrecognized values are ignored rather than erroring.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enable" | "enabled" => Some(true),
        "false" | "0" | "no" | "off" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}
