//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/mtool/config.toml";

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    shellexpand::path::tilde(path.as_ref()).into_owned()
}

/// Catalog persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    /// Path of the JSON catalog document (default `~/.mtooldb`)
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("~/.mtooldb")
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

/// Transcoding run configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    /// Number of concurrent workers (0 = one per logical CPU, default 1)
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Preferred audio and subtitle language tag (default "eng")
    #[serde(default = "default_language")]
    pub language: String,
    /// Per-item timeout in seconds (0 = wait forever)
    #[serde(default)]
    pub item_timeout_secs: u64,
}

fn default_parallelism() -> u32 {
    1
}

fn default_language() -> String {
    "eng".to_string()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            language: default_language(),
            item_timeout_secs: 0,
        }
    }
}

/// External programs invoked for probing, decoding and encoding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub flac: String,
    pub metaflac: String,
    pub opusenc: String,
    pub lame: String,
    pub fdkaac: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            flac: "flac".to_string(),
            metaflac: "metaflac".to_string(),
            opusenc: "opusenc".to_string(),
            lame: "lame".to_string(),
            fdkaac: "fdkaac".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MTOOL_CATALOG -> catalog.path
    /// - MTOOL_PARALLELISM -> transcode.parallelism
    /// - MTOOL_LANGUAGE -> transcode.language
    /// - MTOOL_ITEM_TIMEOUT_SECS -> transcode.item_timeout_secs
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MTOOL_CATALOG") {
            if !val.is_empty() {
                self.catalog.path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("MTOOL_PARALLELISM") {
            if let Ok(parallelism) = val.parse::<u32>() {
                self.transcode.parallelism = parallelism;
            }
        }

        if let Ok(val) = env::var("MTOOL_LANGUAGE") {
            let val = val.trim();
            if !val.is_empty() {
                self.transcode.language = val.to_string();
            }
        }

        if let Ok(val) = env::var("MTOOL_ITEM_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.transcode.item_timeout_secs = secs;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(expand_tilde(path)) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// The catalog path with `~` expanded.
    pub fn catalog_path(&self) -> PathBuf {
        expand_tilde(&self.catalog.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("MTOOL_CATALOG");
        env::remove_var("MTOOL_PARALLELISM");
        env::remove_var("MTOOL_LANGUAGE");
        env::remove_var("MTOOL_ITEM_TIMEOUT_SECS");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            catalog in "/[a-z0-9_]{1,12}/[a-z0-9_.]{1,12}",
            parallelism in 0u32..64,
            language in "[a-z]{3}",
            timeout in 0u64..86_400,
            ffmpeg in "/[a-z0-9/]{1,20}",
        ) {
            let toml_str = format!(
                r#"
[catalog]
path = "{}"

[transcode]
parallelism = {}
language = "{}"
item_timeout_secs = {}

[tools]
ffmpeg = "{}"
"#,
                catalog, parallelism, language, timeout, ffmpeg
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.catalog.path, PathBuf::from(&catalog));
            prop_assert_eq!(config.transcode.parallelism, parallelism);
            prop_assert_eq!(&config.transcode.language, &language);
            prop_assert_eq!(config.transcode.item_timeout_secs, timeout);
            prop_assert_eq!(&config.tools.ffmpeg, &ffmpeg);
            // tools not mentioned keep their defaults
            prop_assert_eq!(config.tools.ffprobe.as_str(), "ffprobe");
        }

        #[test]
        fn prop_env_overrides_parallelism(
            initial in 0u32..32,
            override_value in 0u32..64,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[transcode]\nparallelism = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("MTOOL_PARALLELISM", override_value.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.transcode.parallelism, override_value);
        }

        #[test]
        fn prop_env_overrides_language(
            initial in "[a-z]{3}",
            override_value in "[a-z]{3}",
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[transcode]\nlanguage = \"{}\"\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("MTOOL_LANGUAGE", &override_value);
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.transcode.language, override_value);
        }
    }

    #[test]
    fn test_invalid_env_value_keeps_existing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::parse_toml("[transcode]\nparallelism = 3\n").unwrap();
        env::set_var("MTOOL_PARALLELISM", "lots");
        env::set_var("MTOOL_ITEM_TIMEOUT_SECS", "-5");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.transcode.parallelism, 3);
        assert_eq!(config.transcode.item_timeout_secs, 0);
    }

    #[test]
    fn test_env_overrides_catalog_path() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("MTOOL_CATALOG", "/srv/media/catalog.json");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.catalog.path, PathBuf::from("/srv/media/catalog.json"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.catalog.path, PathBuf::from("~/.mtooldb"));
        assert_eq!(config.transcode.parallelism, 1);
        assert_eq!(config.transcode.language, "eng");
        assert_eq!(config.transcode.item_timeout_secs, 0);
        assert_eq!(config.tools, ToolsConfig::default());
    }

    #[test]
    fn test_malformed_config_is_parse_error() {
        let err = Config::parse_toml("[transcode]\nparallelism = \"four\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/mtool/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/var/lib/mtooldb"), PathBuf::from("/var/lib/mtooldb"));
    }
}
