//! `kiln.config.json` loading and validation.
//!
//! Sources are merged lowest to highest priority: built-in defaults, the
//! config file, `KILN_*` environment variables, command-line flags.
//!
//! ```json
//! {
//!   "client": "src/main.tsx",
//!   "server": "src/server.tsx",
//!   "api": "src/api.ts",
//!   "outDir": ".kiln",
//!   "watch": { "debounceMs": 100, "ignore": ["coverage"] },
//!   "port": 3000
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format as _, Json, Serialized};
use kiln_build::{Mode, SourceMapMode};
use path_clean::PathClean;
use serde::{Deserialize, Serialize};

use crate::cli::ProjectArgs;
use crate::error::{ConfigError, Result};

pub const CONFIG_FILE: &str = "kiln.config.json";
pub const DEFAULT_PORT: u16 = 3000;
pub const MAX_DEBOUNCE_MS: u64 = 10_000;

// Keys read from `KILN_*`. Figment lowercases environment keys, so only
// single-word fields can be set this way.
const ENV_KEYS: &[&str] = &["root", "sourcemap", "port"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KilnConfig {
    /// Project root, relative to the directory kiln was pointed at.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Build output; each target writes to `<outDir>/<target>/`.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Browser entry point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<PathBuf>,

    /// Server-rendering entry point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<PathBuf>,

    /// API entry point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<PathBuf>,

    /// Overrides the mode's default source maps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourcemap: Option<SourceMapMode>,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Extra directories never watched, on top of the built-in list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            ignore: Vec::new(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from(".kiln")
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            out_dir: default_out_dir(),
            client: None,
            server: None,
            api: None,
            sourcemap: None,
            watch: WatchConfig::default(),
            port: default_port(),
        }
    }
}

/// Values from command-line flags. Only the ones given are merged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl KilnConfig {
    /// Load, resolve and validate the configuration for a project.
    ///
    /// The base directory is `--root` or the current directory. The config
    /// file is `--config` (which must exist) or `<base>/kiln.config.json`
    /// (used when present). Every path in the result is absolute.
    pub fn load(project: &ProjectArgs, overrides: &CliOverrides) -> Result<Self> {
        let base = match &project.root {
            Some(root) => absolute(root)?,
            None => std::env::current_dir()?,
        };

        let config_file = match &project.config {
            Some(path) => {
                let path = absolute(path)?;
                if !path.is_file() {
                    return Err(ConfigError::NotFound(path).into());
                }
                Some(path)
            }
            None => {
                let default_path = base.join(CONFIG_FILE);
                default_path.is_file().then_some(default_path)
            }
        };

        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = &config_file {
            tracing::debug!("Loading configuration from {}", path.display());
            figment = figment.merge(Json::file(path));
        }
        figment = figment
            .merge(Env::prefixed("KILN_").only(ENV_KEYS))
            .merge(Serialized::defaults(overrides));

        let config: Self = figment.extract().map_err(|e| ConfigError::InvalidValue {
            field: "configuration".to_string(),
            value: e.to_string(),
            hint: format!("Check {} syntax and field types", CONFIG_FILE),
        })?;

        let config = config.resolve(&base);
        config.validate()?;
        Ok(config)
    }

    /// Make every path absolute: `root` against `base`, the rest against `root`.
    pub fn resolve(mut self, base: &Path) -> Self {
        self.root = base.join(&self.root).clean();
        let root = self.root.clone();
        self.out_dir = root.join(&self.out_dir).clean();
        for entry in [&mut self.client, &mut self.server, &mut self.api] {
            if let Some(path) = entry.take() {
                *entry = Some(root.join(path).clean());
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let Some(client) = &self.client else {
            return Err(ConfigError::MissingField {
                field: "client".to_string(),
                hint: format!("Add \"client\": \"src/main.tsx\" to {}", CONFIG_FILE),
            }
            .into());
        };

        for (field, path) in [("client", Some(client)), ("server", self.server.as_ref()), ("api", self.api.as_ref())] {
            if let Some(path) = path {
                if !path.is_file() {
                    return Err(ConfigError::EntryNotFound {
                        field: field.to_string(),
                        path: path.clone(),
                    }
                    .into());
                }
            }
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port".to_string(),
                value: "0".to_string(),
                hint: "Use a port between 1 and 65535".to_string(),
            }
            .into());
        }

        if self.watch.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::InvalidValue {
                field: "watch.debounceMs".to_string(),
                value: self.watch.debounce_ms.to_string(),
                hint: format!("Debounce must be at most {}ms", MAX_DEBOUNCE_MS),
            }
            .into());
        }

        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }

    /// Configured source maps, else external in development and none in production.
    pub fn sourcemap_for(&self, mode: Mode) -> SourceMapMode {
        self.sourcemap.unwrap_or(if mode.is_production() {
            SourceMapMode::None
        } else {
            SourceMapMode::External
        })
    }

    /// `<outDir>/<target>`.
    pub fn target_out_dir(&self, target: &str) -> PathBuf {
        self.out_dir.join(target)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.clean())
    } else {
        Ok(std::env::current_dir()?.join(path).clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn project(dir: &Path) -> ProjectArgs {
        ProjectArgs {
            root: Some(dir.to_path_buf()),
            config: None,
        }
    }

    fn scaffold(config: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.tsx"), "export {};\n").unwrap();
        fs::write(dir.path().join(CONFIG_FILE), config).unwrap();
        dir
    }

    #[test]
    #[serial]
    fn test_load_resolves_paths_against_root() {
        let dir = scaffold(r#"{ "client": "src/main.tsx", "watch": { "ignore": ["coverage"] } }"#);
        let config = KilnConfig::load(&project(dir.path()), &CliOverrides::default()).unwrap();

        let root = dir.path().to_path_buf().clean();
        assert_eq!(config.root, root);
        assert_eq!(config.client, Some(root.join("src/main.tsx")));
        assert_eq!(config.out_dir, root.join(".kiln"));
        assert_eq!(config.target_out_dir("client"), root.join(".kiln/client"));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.watch.debounce_ms, 100);
        assert_eq!(config.watch.ignore, vec!["coverage".to_string()]);
    }

    #[test]
    #[serial]
    fn test_missing_client_is_reported() {
        let dir = scaffold(r#"{ "port": 4000 }"#);
        let err = KilnConfig::load(&project(dir.path()), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::MissingField { ref field, .. }) if field == "client"));
    }

    #[test]
    #[serial]
    fn test_entry_must_exist() {
        let dir = scaffold(r#"{ "client": "src/main.tsx", "api": "src/api.ts" }"#);
        let err = KilnConfig::load(&project(dir.path()), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::EntryNotFound { ref field, .. }) if field == "api"));
    }

    #[test]
    #[serial]
    fn test_unknown_fields_are_rejected() {
        let dir = scaffold(r#"{ "client": "src/main.tsx", "entry": "src/index.ts" }"#);
        let err = KilnConfig::load(&project(dir.path()), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    #[serial]
    fn test_explicit_config_must_exist() {
        let dir = scaffold("{}");
        let args = ProjectArgs {
            root: Some(dir.path().to_path_buf()),
            config: Some(dir.path().join("missing.json")),
        };
        let err = KilnConfig::load(&args, &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::NotFound(_))));
    }

    #[test]
    #[serial]
    fn test_env_then_flags_override_file() {
        let dir = scaffold(r#"{ "client": "src/main.tsx", "port": 3100 }"#);
        unsafe {
            std::env::set_var("KILN_PORT", "3200");
            std::env::set_var("KILN_SOURCEMAP", "hidden");
        }

        let from_env = KilnConfig::load(&project(dir.path()), &CliOverrides::default());
        let from_flag = KilnConfig::load(&project(dir.path()), &CliOverrides { port: Some(3300) });

        unsafe {
            std::env::remove_var("KILN_PORT");
            std::env::remove_var("KILN_SOURCEMAP");
        }

        let from_env = from_env.unwrap();
        assert_eq!(from_env.port, 3200);
        assert_eq!(from_env.sourcemap, Some(SourceMapMode::Hidden));
        assert_eq!(from_flag.unwrap().port, 3300);
    }

    #[test]
    fn test_validate_limits() {
        let dir = scaffold("{}");
        let base = KilnConfig {
            client: Some(PathBuf::from("src/main.tsx")),
            ..KilnConfig::default()
        }
        .resolve(dir.path());
        assert!(base.validate().is_ok());

        let zero_port = KilnConfig { port: 0, ..base.clone() };
        assert!(zero_port.validate().is_err());

        let slow = KilnConfig {
            watch: WatchConfig {
                debounce_ms: MAX_DEBOUNCE_MS + 1,
                ignore: Vec::new(),
            },
            ..base
        };
        assert!(slow.validate().unwrap_err().to_string().contains("watch.debounceMs"));
    }

    #[test]
    fn test_sourcemap_defaults_follow_mode() {
        let config = KilnConfig::default();
        assert_eq!(config.sourcemap_for(Mode::Development), SourceMapMode::External);
        assert_eq!(config.sourcemap_for(Mode::Production), SourceMapMode::None);

        let inline = KilnConfig {
            sourcemap: Some(SourceMapMode::Inline),
            ..KilnConfig::default()
        };
        assert_eq!(inline.sourcemap_for(Mode::Production), SourceMapMode::Inline);
    }
}
