use crate::domain::{
    config::BridgeConfig,
    error::{BridgeError, BridgeResult},
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding a project configuration
pub const PROJECT_DIR: &str = ".serial-bridge";

/// Configuration file name
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable providing the AI API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Environment variable providing the serial port
pub const PORT_ENV: &str = "SERIAL_BRIDGE_PORT";

const PROJECT_TEMPLATE_HEADER: &str = "\
# serial-bridge project configuration
#
# Values left out fall back to built-in defaults. The serial port is
# auto-detected when [device].port is not set; SERIAL_BRIDGE_PORT overrides it.
# Keep the AI key out of version control: prefer GEMINI_API_KEY.

";

/// Configuration manager.
///
/// Files are layered: global file, then project file, each overriding only the
/// keys it sets. An explicit path replaces both. Environment variables are
/// applied last.
pub struct ConfigManager {
    global_config_path: Option<PathBuf>,
    project_config_path: Option<PathBuf>,
    explicit_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> Self {
        Self {
            global_config_path: Self::find_global_config_path(),
            project_config_path: Self::find_project_config_path(),
            explicit_path: None,
        }
    }

    /// Manager over fixed locations
    pub fn with_paths(global: Option<PathBuf>, project: Option<PathBuf>) -> Self {
        Self {
            global_config_path: global,
            project_config_path: project,
            explicit_path: None,
        }
    }

    /// Use `path` instead of the discovered files
    pub fn with_explicit_path(mut self, path: Option<PathBuf>) -> Self {
        self.explicit_path = path;
        self
    }

    /// Load configuration from files and the process environment
    pub fn load_config(&self) -> BridgeResult<BridgeConfig> {
        self.load_config_with_env(|key| std::env::var(key).ok())
    }

    /// Load configuration using `env` to look up environment variables
    pub fn load_config_with_env<F>(&self, env: F) -> BridgeResult<BridgeConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = toml::Table::new();
        for path in self.sources()? {
            debug!(path = %path.display(), "loading configuration file");
            merge_tables(&mut merged, read_table(&path)?);
        }

        let mut config: BridgeConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e| BridgeError::Config {
                message: format!("Invalid configuration: {}", e),
            })?;

        apply_env(&mut config, env);
        Ok(config)
    }

    fn sources(&self) -> BridgeResult<Vec<PathBuf>> {
        if let Some(path) = &self.explicit_path {
            if !path.exists() {
                return Err(BridgeError::Config {
                    message: format!("Config file {} does not exist", path.display()),
                });
            }
            return Ok(vec![path.clone()]);
        }

        Ok([&self.global_config_path, &self.project_config_path]
            .into_iter()
            .flatten()
            .filter(|path| path.exists())
            .cloned()
            .collect())
    }

    /// Write a default project configuration under `dir`
    pub fn init_project_config(&self, dir: &Path) -> BridgeResult<PathBuf> {
        let config_dir = dir.join(PROJECT_DIR);
        let config_file = config_dir.join(CONFIG_FILE);

        if config_file.exists() {
            return Err(BridgeError::Config {
                message: format!("Project configuration already exists at {}", config_file.display()),
            });
        }

        fs::create_dir_all(&config_dir).map_err(|e| BridgeError::Config {
            message: format!("Failed to create {} directory: {}", PROJECT_DIR, e),
        })?;

        let body = toml::to_string_pretty(&BridgeConfig::default()).map_err(|e| BridgeError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(&config_file, format!("{PROJECT_TEMPLATE_HEADER}{body}")).map_err(|e| {
            BridgeError::Config {
                message: format!("Failed to write config file {}: {}", config_file.display(), e),
            }
        })?;

        Ok(config_file)
    }

    /// Get the current project config path (if any)
    pub fn project_config_path(&self) -> Option<&Path> {
        self.project_config_path.as_deref()
    }

    /// Get the global config path (if a home directory is known)
    pub fn global_config_path(&self) -> Option<&Path> {
        self.global_config_path.as_deref()
    }

    fn find_global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("serial-bridge").join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        find_project_config_from(&current_dir)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn find_project_config_from(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_DIR).join(CONFIG_FILE))
        .find(|path| path.exists())
}

fn read_table(path: &Path) -> BridgeResult<toml::Table> {
    let content = fs::read_to_string(path).map_err(|e| BridgeError::Config {
        message: format!("Failed to read config file {}: {}", path.display(), e),
    })?;

    content.parse::<toml::Table>().map_err(|e| BridgeError::Config {
        message: format!("Failed to parse config file {}: {}", path.display(), e),
    })
}

/// Overlay `incoming` onto `base`, recursing into nested tables
fn merge_tables(base: &mut toml::Table, incoming: toml::Table) {
    for (key, value) in incoming {
        let both_tables = matches!(
            (base.get(&key), &value),
            (Some(toml::Value::Table(_)), toml::Value::Table(_))
        );

        if both_tables {
            if let (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) =
                (base.get_mut(&key), value)
            {
                merge_tables(existing, nested);
            }
        } else {
            base.insert(key, value);
        }
    }
}

fn apply_env<F>(config: &mut BridgeConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    if let Some(key) = non_empty(API_KEY_ENV) {
        config.ai.api_key = Some(key);
    }
    if let Some(port) = non_empty(PORT_ENV) {
        config.device.port = Some(port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_default_config() {
        let manager = ConfigManager::with_paths(None, None);
        let config = manager.load_config_with_env(no_env).unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.device.baud_rate, 9600);
        assert!(config.device.port.is_none());
        assert!(config.ai.api_key.is_none());
    }

    #[test]
    fn test_project_overrides_global_per_key() {
        let temp_dir = TempDir::new().unwrap();
        let global = write(
            temp_dir.path(),
            "global.toml",
            "[device]\nport = \"/dev/ttyUSB0\"\nbaud_rate = 115200\n\n[ai]\nmodel = \"global-model\"\n",
        );
        let project = write(temp_dir.path(), "project.toml", "[device]\nport = \"/dev/ttyACM1\"\n");

        let manager = ConfigManager::with_paths(Some(global), Some(project));
        let config = manager.load_config_with_env(no_env).unwrap();

        assert_eq!(config.device.port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(config.device.baud_rate, 115200);
        assert_eq!(config.ai.model, "global-model");
    }

    #[test]
    fn test_explicit_path_replaces_discovery() {
        let temp_dir = TempDir::new().unwrap();
        let global = write(temp_dir.path(), "global.toml", "[device]\nbaud_rate = 115200\n");
        let explicit = write(temp_dir.path(), "explicit.toml", "[session]\ncall_timeout_ms = 500\n");

        let manager = ConfigManager::with_paths(Some(global), None).with_explicit_path(Some(explicit));
        let config = manager.load_config_with_env(no_env).unwrap();

        assert_eq!(config.device.baud_rate, 9600);
        assert_eq!(config.session.call_timeout_ms, 500);

        let missing = ConfigManager::with_paths(None, None)
            .with_explicit_path(Some(temp_dir.path().join("missing.toml")));
        assert!(matches!(
            missing.load_config_with_env(no_env),
            Err(BridgeError::Config { .. })
        ));
    }

    #[test]
    fn test_environment_overrides_files() {
        let temp_dir = TempDir::new().unwrap();
        let project = write(
            temp_dir.path(),
            "project.toml",
            "[device]\nport = \"/dev/ttyACM1\"\n\n[ai]\napi_key = \"from-file\"\n",
        );

        let manager = ConfigManager::with_paths(None, Some(project));
        let config = manager
            .load_config_with_env(|key| match key {
                API_KEY_ENV => Some("from-env".to_string()),
                PORT_ENV => Some(String::new()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.ai.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.device.port.as_deref(), Some("/dev/ttyACM1"));
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let broken = write(temp_dir.path(), "broken.toml", "[device\nport = ");

        let manager = ConfigManager::with_paths(Some(broken), None);
        let error = manager.load_config_with_env(no_env).unwrap_err();

        assert!(error.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_init_project_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(None, None);

        let config_file = manager.init_project_config(temp_dir.path()).unwrap();

        assert_eq!(config_file, temp_dir.path().join(PROJECT_DIR).join(CONFIG_FILE));
        let content = fs::read_to_string(&config_file).unwrap();
        assert!(content.starts_with("# serial-bridge project configuration"));

        let config = ConfigManager::with_paths(None, None)
            .with_explicit_path(Some(config_file.clone()))
            .load_config_with_env(|_| None)
            .unwrap();
        assert_eq!(config.supervisor.grace_ms, 5000);

        assert!(manager.init_project_config(temp_dir.path()).is_err());
    }

    #[test]
    fn test_project_config_found_in_ancestor() {
        let temp_dir = TempDir::new().unwrap();
        ConfigManager::with_paths(None, None)
            .init_project_config(temp_dir.path())
            .unwrap();
        let nested = temp_dir.path().join("firmware").join("src");
        fs::create_dir_all(&nested).unwrap();

        let found = find_project_config_from(&nested).unwrap();

        assert_eq!(found, temp_dir.path().join(PROJECT_DIR).join(CONFIG_FILE));
    }
}
