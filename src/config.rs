use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
#[cfg(feature = "config")]
use std::fs;
#[cfg(feature = "config")]
use std::path::Path;

/// Environment type for configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Get environment from string
    pub fn from_name(env: &str) -> Self {
        match env.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// Get environment name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "dev",
            Environment::Production => "prod",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Reads `MINIMY_ENV`, defaulting to development
    pub fn detect() -> Self {
        env::var("MINIMY_ENV")
            .map(|env| Environment::from_name(&env))
            .unwrap_or_default()
    }
}

/// Settings for loading, compiling and rendering templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Base directory of the filesystem loader
    #[serde(default = "default_views_dir")]
    pub directory: String,

    /// Appended to template names that have no extension
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Keep compiled templates in memory between renders
    #[serde(default)]
    pub cache_enabled: bool,

    /// Remove indentation and trailing newline of lines holding only a block tag
    #[serde(default = "default_true")]
    pub strip_tag_lines: bool,

    /// HTML-escape variable output unless marked safe
    #[serde(default = "default_true")]
    pub autoescape: bool,

    /// Propagate unresolvable expressions as errors instead of rendering nothing
    #[serde(default)]
    pub strict_undefined: bool,

    /// Reject unterminated `{{`, `{%` and `{#` instead of keeping them as text
    #[serde(default)]
    pub strict_delimiters: bool,

    /// Maximum nesting of include/extends during one render
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_views_dir() -> String {
    "views".to_string()
}

fn default_extension() -> String {
    "html".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    32
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            directory: default_views_dir(),
            extension: default_extension(),
            cache_enabled: false,
            strip_tag_lines: true,
            autoescape: true,
            strict_undefined: false,
            strict_delimiters: false,
            max_depth: default_max_depth(),
        }
    }
}

/// Layout of a configuration file; only the `[views]` table is read
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    views: ViewConfig,
}

impl ViewConfig {
    /// Load `config.toml` from `base_dir`, merged with `config.<env>.toml`
    #[cfg(feature = "config")]
    pub fn load_with_base_dir<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let env = Environment::detect();

        let base_config_path = base_dir.join("config.toml");
        let mut merged_value = if base_config_path.exists() {
            Self::load_toml_value(&base_config_path)?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let env_config_path = base_dir.join(format!("config.{}.toml", env.as_str()));
        if env_config_path.exists() {
            log::debug!(
                "Loading environment-specific config from: {}",
                env_config_path.display()
            );
            let env_value = Self::load_toml_value(&env_config_path)?;
            merged_value = serde_toml_merge::merge(merged_value, env_value).map_err(|e| {
                Error::config(format!("Failed to merge configuration files: {}", e))
            })?;
        }

        // Round-trip through JSON so serde defaults apply to missing keys
        let json_value = serde_json::to_value(&merged_value).map_err(|e| {
            Error::config(format!("Failed to convert merged configuration: {}", e))
        })?;
        let file: ConfigFile = serde_json::from_value(json_value).map_err(|e| {
            Error::config(format!("Failed to deserialize merged configuration: {}", e))
        })?;

        let mut config = file.views;
        config.apply_env_overrides()?;
        if env.is_production() {
            config.cache_enabled = true;
        }
        config.validate()?;

        log::info!(
            "View configuration loaded (environment: {})",
            env.as_str()
        );
        Ok(config)
    }

    /// Load configuration from a single TOML file
    #[cfg(feature = "config")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = fs::read_to_string(path_ref).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path_ref.display(),
                e
            ))
        })?;

        let config = Self::from_toml_str(&content)?;
        log::debug!(
            "Successfully loaded configuration from: {}",
            path_ref.display()
        );
        Ok(config)
    }

    /// Parse the `[views]` table out of TOML text
    #[cfg(feature = "config")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        file.views.validate()?;
        Ok(file.views)
    }

    #[cfg(feature = "config")]
    fn load_toml_value(path: &Path) -> Result<toml::Value> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Apply `MINIMY_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(views_dir) = env::var("MINIMY_VIEWS_DIR") {
            self.directory = views_dir;
        }
        if let Ok(cache) = env::var("MINIMY_VIEWS_CACHE") {
            self.cache_enabled = cache
                .parse()
                .map_err(|_| Error::config("Invalid MINIMY_VIEWS_CACHE value"))?;
        }
        if let Ok(strict) = env::var("MINIMY_STRICT_UNDEFINED") {
            self.strict_undefined = strict
                .parse()
                .map_err(|_| Error::config("Invalid MINIMY_STRICT_UNDEFINED value"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(Error::config("views.max_depth must be at least 1"));
        }
        if self.extension.starts_with('.') {
            return Err(Error::config(
                "views.extension is given without the leading dot",
            ));
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "config"))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ViewConfig::default();
        assert_eq!(config.directory, "views");
        assert_eq!(config.extension, "html");
        assert!(config.autoescape);
        assert!(config.strip_tag_lines);
        assert!(!config.strict_undefined);
        assert_eq!(config.max_depth, 32);
    }

    #[test]
    fn test_from_toml_str_fills_missing_keys() {
        let config = ViewConfig::from_toml_str(
            r#"
            [views]
            directory = "templates"
            strict_delimiters = true
            "#,
        )
        .unwrap();

        assert_eq!(config.directory, "templates");
        assert!(config.strict_delimiters);
        assert_eq!(config.extension, "html");
        assert!(config.autoescape);
    }

    #[test]
    fn test_missing_views_table_uses_defaults() {
        let config = ViewConfig::from_toml_str("[server]\nport = 8000\n").unwrap();
        assert_eq!(config.directory, "views");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ViewConfig::from_toml_str("[views]\nmax_depth = 0\n").is_err());
        assert!(ViewConfig::from_toml_str("[views]\nextension = \".html\"\n").is_err());
        assert!(ViewConfig::from_toml_str("[views\n").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[views]\ncache_enabled = true\nmax_depth = 4\n").unwrap();

        let config = ViewConfig::from_file(&path).unwrap();
        assert!(config.cache_enabled);
        assert_eq!(config.max_depth, 4);

        assert!(ViewConfig::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_load_with_base_dir_merges_short_env_file() {
        let dir = TempDir::new().unwrap();
        let env = Environment::detect();
        fs::write(
            dir.path().join("config.toml"),
            "[views]\nextension = \"tpl\"\nmax_depth = 8\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(format!("config.{}.toml", env.as_str())),
            "[views]\nmax_depth = 4\n",
        )
        .unwrap();
        // Long environment names are not used for file lookup
        fs::write(
            dir.path().join("config.development.toml"),
            "[views]\nmax_depth = 2\n",
        )
        .unwrap();

        let config = ViewConfig::load_with_base_dir(dir.path()).unwrap();
        assert_eq!(config.extension, "tpl");
        assert_eq!(config.max_depth, 4);
    }

    #[test]
    fn test_environment_names() {
        assert_eq!(Environment::from_name("PROD"), Environment::Production);
        assert_eq!(Environment::from_name("staging"), Environment::Development);
        assert!(Environment::Production.is_production());
        assert_eq!(Environment::Development.as_str(), "dev");
        assert_eq!(Environment::Production.as_str(), "prod");
    }
}
