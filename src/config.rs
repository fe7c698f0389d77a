//! Daemon configuration
//!
//! Loaded once at startup from a YAML file. The API password may be left out
//! of the file and supplied through the `PROXBALANCE_PASSWORD` environment
//! variable instead (an `--env-file` can populate it).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable consulted when no password is configured.
pub const PASSWORD_ENV: &str = "PROXBALANCE_PASSWORD";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub proxmox: ProxmoxConfig,
    #[serde(default)]
    pub parameters: Parameters,
}

fn default_port() -> u16 {
    8006
}

/// Where and how to reach the Proxmox API.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxmoxConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Full Proxmox user, e.g. `root@pam`.
    pub username: String,
    /// Optional in the file; falls back to [`PASSWORD_ENV`].
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxmoxConfig {
    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }

    /// Configured password, or the environment fallback.
    pub fn password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok())
    }
}

/// Balancing behavior knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Parameters {
    /// Minimum imbalance worth acting on, in percent of memory load.
    pub deviation: f64,
    /// Whether containers are eligible for relocation at all.
    pub container_migration: bool,
    /// Only balance from the elected HA manager node.
    pub only_on_manager: bool,
    pub sleep: SleepConfig,
    pub migration: MigrationConfig,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            deviation: 5.0,
            container_migration: true,
            only_on_manager: true,
            sleep: SleepConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

/// Inter-cycle pacing, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// Backoff after an ineligible cycle (no quorum, not the manager).
    pub error: u64,
    /// Pause after a completed cycle, letting the cluster calm down.
    pub success: u64,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            error: 60,
            success: 300,
        }
    }
}

impl SleepConfig {
    pub fn error_interval(&self) -> Duration {
        Duration::from_secs(self.error)
    }

    pub fn success_interval(&self) -> Duration {
        Duration::from_secs(self.success)
    }
}

/// Timing of the migration completion protocol, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Pause between migration status polls.
    pub poll_interval: u64,
    /// Wait between arrival on the destination and the resume call.
    pub settle: u64,
    /// Give up on a single migration after this long and try the next
    /// candidate.
    pub timeout: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            poll_interval: 20,
            settle: 10,
            timeout: 3600,
        }
    }
}

impl MigrationConfig {
    pub fn poll_every(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn settle_for(&self) -> Duration {
        Duration::from_secs(self.settle)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.deviation <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "deviation threshold must be positive, got {}",
                self.parameters.deviation
            )));
        }
        if self.parameters.migration.poll_interval == 0 {
            return Err(ConfigError::Invalid(
                "migration poll interval must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate the configuration file.
///
/// This is the I/O boundary; parsing and validation are pure.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let content = r#"
proxmox:
  host: 10.0.0.1
  username: root@pam
  password: secret
"#;
        let file = create_temp_file(content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.proxmox.port, 8006);
        assert_eq!(config.proxmox.base_url(), "https://10.0.0.1:8006");
        assert_eq!(config.parameters.deviation, 5.0);
        assert!(config.parameters.container_migration);
        assert!(config.parameters.only_on_manager);
        assert_eq!(config.parameters.sleep.error, 60);
        assert_eq!(config.parameters.sleep.success, 300);
        assert_eq!(config.parameters.migration.poll_interval, 20);
        assert_eq!(config.parameters.migration.settle, 10);
        assert_eq!(config.parameters.migration.timeout, 3600);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
proxmox:
  host: pve.example.org
  port: 443
  username: balancer@pve
  password: hunter2
parameters:
  deviation: 10.0
  container_migration: false
  only_on_manager: false
  sleep:
    error: 30
    success: 120
  migration:
    poll_interval: 5
    settle: 2
    timeout: 600
"#;
        let file = create_temp_file(content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.proxmox.port, 443);
        assert_eq!(config.parameters.deviation, 10.0);
        assert!(!config.parameters.container_migration);
        assert!(!config.parameters.only_on_manager);
        assert_eq!(config.parameters.sleep.error_interval(), Duration::from_secs(30));
        assert_eq!(config.parameters.migration.poll_every(), Duration::from_secs(5));
        assert_eq!(config.parameters.migration.deadline(), Duration::from_secs(600));
    }

    #[test]
    fn test_password_env_fallback() {
        let _guard = test_support::ENV_LOCK.lock().unwrap();

        let mut proxmox = ProxmoxConfig {
            host: "10.0.0.1".to_string(),
            port: 8006,
            username: "root@pam".to_string(),
            password: Some("from-file".to_string()),
        };

        // A configured password wins even when the variable is set.
        std::env::set_var(PASSWORD_ENV, "from-env");
        assert_eq!(proxmox.password(), Some("from-file".to_string()));

        // Without one in the file, the environment supplies it.
        proxmox.password = None;
        assert_eq!(proxmox.password(), Some("from-env".to_string()));

        // Neither source set means no password at all.
        std::env::remove_var(PASSWORD_ENV);
        assert_eq!(proxmox.password(), None);
    }

    #[test]
    fn test_zero_deviation_rejected() {
        let content = r#"
proxmox:
  host: 10.0.0.1
  username: root@pam
parameters:
  deviation: 0.0
"#;
        let file = create_temp_file(content);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let content = r#"
proxmox:
  host: 10.0.0.1
  username: root@pam
parameters:
  migration:
    poll_interval: 0
"#;
        let file = create_temp_file(content);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_nonexistent_file() {
        let result = load_config(Path::new("/nonexistent/config.yml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let file = create_temp_file("proxmox: [not, a, mapping");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }
}
