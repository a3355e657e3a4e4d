//! Settings shared by the client library and the bundled binaries.
//!
//! Sources, lowest to highest precedence:
//!
//! 1. built-in defaults
//! 2. the TOML file (`--config`, else `$XDG_CONFIG_HOME/authkit/config.toml`,
//!    else `/etc/authkit/config.toml`); a missing file is fine
//! 3. environment variables prefixed `AUTHKIT` with `__` separating
//!    sections, e.g. `AUTHKIT__HELPER__IDLE_TIMEOUT_SECS=30`
//!
//! ```toml
//! [client]
//! socket_dir = "/run/authkit"
//! reply_timeout_secs = 0
//!
//! [client.helpers."org.authkit.demo"]
//! exec = ["/usr/libexec/authkit-helper"]
//! start_timeout_ms = 5000
//!
//! [helper]
//! idle_timeout_secs = 10
//! socket_mode = 0o660
//!
//! [policy.actions."org.authkit.demo.echo"]
//! allow_any = true
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{AuthkitError, Result};

pub const APP_NAME: &str = "authkit";
pub const ENV_PREFIX: &str = "AUTHKIT";
pub const DEFAULT_SOCKET_DIR: &str = "/run/authkit";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/authkit/config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthkitConfig {
    pub client: ClientConfig,
    pub helper: HelperServerConfig,
    pub policy: PolicyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Directory holding `<helper_id>.sock` sockets.
    pub socket_dir: PathBuf,
    /// Bound on every helper reply; 0 waits forever.
    pub reply_timeout_secs: u64,
    pub helpers: BTreeMap<String, HelperConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            reply_timeout_secs: 0,
            helpers: BTreeMap::new(),
        }
    }
}

/// Per-helper client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,
    /// Command started when the helper's socket is absent.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exec: Vec<String>,
    pub start_timeout_ms: u64,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            socket: None,
            exec: Vec::new(),
            start_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperServerConfig {
    pub socket_dir: PathBuf,
    /// Exit after this many idle seconds; 0 disables.
    pub idle_timeout_secs: u64,
    pub socket_mode: u32,
}

impl Default for HelperServerConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            idle_timeout_secs: 10,
            socket_mode: 0o660,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub actions: BTreeMap<String, ActionPolicy>,
}

/// Who may run one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPolicy {
    pub allow_uids: Vec<u32>,
    pub allow_gids: Vec<u32>,
    pub allow_any: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AuthkitConfig {
    /// Load from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };
        Self::load_from(&path, Environment::with_prefix(ENV_PREFIX).separator("__"))
    }

    fn load_from(path: &Path, env: Environment) -> Result<Self> {
        let built = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("helper.idle_timeout_secs", 10_i64)?
            .set_default("helper.socket_mode", 0o660_i64)?
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(env)
            .build()?;

        let mut config: AuthkitConfig = built.try_deserialize()?;
        config.expand_paths()?;
        Ok(config)
    }

    fn expand_paths(&mut self) -> Result<()> {
        self.client.socket_dir = expand_path(&self.client.socket_dir)?;
        self.helper.socket_dir = expand_path(&self.helper.socket_dir)?;
        for helper in self.client.helpers.values_mut() {
            if let Some(socket) = &helper.socket {
                helper.socket = Some(expand_path(socket)?);
            }
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let Some(text) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    let expanded = shellexpand::full(text)
        .map_err(|e| AuthkitError::InvalidPath(format!("{text}: {e}")))?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn user_config_path() -> Option<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir).join(APP_NAME).join("config.toml"));
    }
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

/// The user's config file if it exists, else the system-wide one.
pub fn default_config_path() -> PathBuf {
    user_config_path()
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(Some(HashMap::new()))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuthkitConfig::load_from(&dir.path().join("absent.toml"), no_env()).unwrap();
        assert_eq!(config, AuthkitConfig::default());
        assert_eq!(config.helper.idle_timeout_secs, 10);
        assert_eq!(config.helper.socket_mode, 0o660);
    }

    #[test]
    fn file_values_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[client]
socket_dir = "/tmp/ak"
reply_timeout_secs = 15

[client.helpers."org.authkit.demo"]
exec = ["/usr/libexec/authkit-helper", "--foreground"]

[helper]
idle_timeout_secs = 0

[policy.actions."org.authkit.demo.echo"]
allow_uids = [1000]
"#,
        )
        .unwrap();

        let config = AuthkitConfig::load_from(&path, no_env()).unwrap();
        assert_eq!(config.client.socket_dir, PathBuf::from("/tmp/ak"));
        assert_eq!(config.client.reply_timeout_secs, 15);
        let demo = &config.client.helpers["org.authkit.demo"];
        assert_eq!(demo.exec.len(), 2);
        assert_eq!(demo.start_timeout_ms, 5000);
        assert_eq!(config.helper.idle_timeout_secs, 0);
        assert_eq!(
            config.policy.actions["org.authkit.demo.echo"].allow_uids,
            vec![1000]
        );
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[helper]\nidle_timeout_secs = 5\n").unwrap();

        let mut vars = HashMap::new();
        vars.insert(
            "AUTHKIT__HELPER__IDLE_TIMEOUT_SECS".to_string(),
            "42".to_string(),
        );
        let env = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(Some(vars));

        let config = AuthkitConfig::load_from(&path, env).unwrap();
        assert_eq!(config.helper.idle_timeout_secs, 42);
    }

    #[test]
    fn home_is_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[client]\nsocket_dir = \"~/sockets\"\n").unwrap();
        let config = AuthkitConfig::load_from(&path, no_env()).unwrap();
        assert!(!config.client.socket_dir.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn toml_output_reloads() {
        let mut config = AuthkitConfig::default();
        config
            .client
            .helpers
            .insert("org.example".to_string(), HelperConfig::default());
        let text = config.to_toml().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();
        assert_eq!(AuthkitConfig::load_from(&path, no_env()).unwrap(), config);
    }
}
