//! Run configuration, loaded from TOML with a default for every field.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use relmatrix_core::{MatrixError, MatrixResult, ReleaseTarget, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::lease::LeaseSettings;
use crate::pool::{HttpPoolConfig, PoolRequest};
use crate::stage::{BuildTool, StageTimeouts};

/// Environment variable naming the config file, consulted by the CLI.
pub const CONFIG_ENV: &str = "RELMATRIX_CONFIG";

/// Upper bound for any stage timeout: one week.
pub const MAX_STAGE_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

/// Provisioning pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolSettings {
    /// Pool the host is requested from.
    pub name: String,
    pub base_url: String,
    /// Environment variable holding the API key; unset means no key.
    pub api_key_env: String,
    /// Pool-side retry budget passed along with every request.
    pub retry_count: u32,
    pub retry_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            name: "virt-ec2".to_string(),
            base_url: "http://localhost:8080/api/v1".to_string(),
            api_key_env: "RELMATRIX_POOL_API_KEY".to_string(),
            retry_count: 3,
            retry_interval_secs: 60,
        }
    }
}

impl PoolSettings {
    pub fn request(&self) -> PoolRequest {
        PoolRequest {
            pool: self.name.clone(),
            retry_count: self.retry_count,
            retry_interval_secs: self.retry_interval_secs,
        }
    }

    /// HTTP client settings with the API key resolved from the environment.
    pub fn http_config(&self) -> HttpPoolConfig {
        HttpPoolConfig {
            base_url: self.base_url.clone(),
            api_key: std::env::var(&self.api_key_env).ok(),
        }
    }
}

/// The three retry groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    pub allocation: RetryPolicy,
    pub configuration: RetryPolicy,
    /// Required stages: build, integration-build, integration-download.
    pub stages: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            allocation: RetryPolicy {
                max_attempts: 5,
                interval_secs: 60,
            },
            configuration: RetryPolicy::default(),
            stages: RetryPolicy::default(),
        }
    }
}

/// Paths moved between the control side and the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathSettings {
    /// Local directory pushed to the host before any stage runs.
    pub payload: PathBuf,
    /// Directory on the host that pushed paths land in.
    pub remote_root: PathBuf,
    /// Results directory, relative to `remote_root`, pulled back at the end.
    pub artifacts: PathBuf,
    /// Local directory pulled artifacts land in.
    pub local_root: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            payload: PathBuf::from("."),
            remote_root: PathBuf::from("/root/payload"),
            artifacts: PathBuf::from("test_results"),
            local_root: PathBuf::from("."),
        }
    }
}

impl PathSettings {
    /// Where the pulled results directory ends up locally.
    pub fn local_results(&self) -> PathBuf {
        let name = self.artifacts.file_name().unwrap_or(self.artifacts.as_os_str());
        self.local_root.join(name)
    }
}

/// Which status sink to post to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Log,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifierSettings {
    pub kind: NotifierKind,
    pub api_url: String,
    /// `owner/name` of the repository under test.
    pub repository: String,
    pub commit_sha: String,
    /// Environment variable holding the API token.
    pub token_env: String,
    pub target_url: Option<String>,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Log,
            api_url: "https://api.github.com".to_string(),
            repository: String::new(),
            commit_sha: String::new(),
            token_env: "RELMATRIX_STATUS_TOKEN".to_string(),
            target_url: None,
        }
    }
}

/// Full configuration of one matrix run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MatrixConfig {
    /// Commands installing the runtime dependencies on the host, in order.
    pub setup_commands: Vec<String>,
    pub pool: PoolSettings,
    pub retry: RetrySettings,
    pub build_tool: BuildTool,
    pub timeouts: StageTimeouts,
    pub paths: PathSettings,
    pub notifier: NotifierSettings,
    /// Releases in configured order; integration stages follow this order.
    pub releases: Vec<ReleaseTarget>,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            setup_commands: vec![
                "dnf install -y docker python3 rsync".to_string(),
                "systemctl start docker".to_string(),
            ],
            pool: PoolSettings::default(),
            retry: RetrySettings::default(),
            build_tool: BuildTool::default(),
            timeouts: StageTimeouts::default(),
            paths: PathSettings::default(),
            notifier: NotifierSettings::default(),
            releases: vec![ReleaseTarget::new("f32"), ReleaseTarget::primary("pip")],
        }
    }
}

impl MatrixConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> MatrixResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> MatrixResult<Self> {
        let config: MatrixConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> MatrixResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> MatrixResult<()> {
        self.retry.allocation.validate()?;
        self.retry.configuration.validate()?;
        self.retry.stages.validate()?;

        if self.releases.is_empty() {
            return Err(MatrixError::Config("at least one release is required".to_string()));
        }
        let mut seen = HashSet::new();
        for release in &self.releases {
            if release.name.trim().is_empty() {
                return Err(MatrixError::Config("release name must not be empty".to_string()));
            }
            if !seen.insert(release.name.as_str()) {
                return Err(MatrixError::Config(format!(
                    "release {} listed more than once",
                    release.name
                )));
            }
        }
        if self.pool.name.trim().is_empty() {
            return Err(MatrixError::Config("pool name must not be empty".to_string()));
        }
        if self.build_tool.program.trim().is_empty() {
            return Err(MatrixError::Config("build tool program must not be empty".to_string()));
        }
        let t = &self.timeouts;
        for (name, minutes) in [
            ("build_minutes", t.build_minutes),
            ("check_minutes", t.check_minutes),
            ("unit_minutes", t.unit_minutes),
            ("integration_minutes", t.integration_minutes),
        ] {
            if minutes > MAX_STAGE_TIMEOUT_MINUTES {
                return Err(MatrixError::Config(format!(
                    "timeouts.{name} = {minutes} exceeds {MAX_STAGE_TIMEOUT_MINUTES}"
                )));
            }
        }
        Ok(())
    }

    /// Keep only the named releases, preserving configured order.
    pub fn select_releases(&mut self, names: &[String]) -> MatrixResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.releases.iter().any(|r| &r.name == *n))
        {
            return Err(MatrixError::Config(format!("unknown release {unknown}")));
        }
        self.releases.retain(|r| names.contains(&r.name));
        Ok(())
    }

    pub fn lease_settings(&self) -> LeaseSettings {
        LeaseSettings {
            request: self.pool.request(),
            allocation: self.retry.allocation,
            configuration: self.retry.configuration,
            setup_commands: self.setup_commands.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = MatrixConfig::default();
        config.validate().unwrap();
        assert_eq!(config.releases.iter().filter(|r| r.primary).count(), 1);
        assert_eq!(config.retry.allocation.max_attempts, 5);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = MatrixConfig::from_toml(
            r#"
            setup_commands = []

            [pool]
            name = "fedora-x86"

            [[releases]]
            name = "f33"

            [[releases]]
            name = "pip"
            primary = true
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.name, "fedora-x86");
        assert_eq!(config.pool.retry_count, 3);
        assert!(config.setup_commands.is_empty());
        assert_eq!(config.releases[0], ReleaseTarget::new("f33"));
        assert_eq!(config.timeouts, StageTimeouts::default());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = MatrixConfig::default();
        let rendered = config.to_toml().unwrap();
        assert_eq!(MatrixConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn test_rejects_duplicate_release() {
        let err = MatrixConfig::from_toml(
            r#"
            [[releases]]
            name = "f32"

            [[releases]]
            name = "f32"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, MatrixError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = MatrixConfig::from_toml(
            r#"
            [retry.stages]
            max_attempts = 0
            interval_secs = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, MatrixError::Config(_)));
    }

    #[test]
    fn test_rejects_oversized_timeout() {
        let err = MatrixConfig::from_toml("[timeouts]\nbuild_minutes = 9223372036854775807\n")
            .unwrap_err();
        assert!(matches!(err, MatrixError::Config(ref m) if m.contains("build_minutes")));

        let config = MatrixConfig::from_toml(&format!(
            "[timeouts]\nintegration_minutes = {MAX_STAGE_TIMEOUT_MINUTES}\n"
        ))
        .unwrap();
        assert_eq!(config.timeouts.integration_minutes, MAX_STAGE_TIMEOUT_MINUTES);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relmatrix.toml");
        std::fs::write(&path, "setup_commands = []\n").unwrap();

        let config = MatrixConfig::load(&path).unwrap();
        assert!(config.setup_commands.is_empty());
        assert!(matches!(
            MatrixConfig::load(&dir.path().join("missing.toml")),
            Err(MatrixError::Io(_))
        ));
    }

    #[test]
    fn test_select_releases() {
        let mut config = MatrixConfig::default();
        config.select_releases(&["pip".to_string()]).unwrap();
        assert_eq!(config.releases, vec![ReleaseTarget::primary("pip")]);
        assert!(config.select_releases(&["f99".to_string()]).is_err());
    }

    #[test]
    fn test_local_results_path() {
        let paths = PathSettings {
            local_root: PathBuf::from("/tmp/out"),
            artifacts: PathBuf::from("build/test_results"),
            ..PathSettings::default()
        };
        assert_eq!(paths.local_results(), PathBuf::from("/tmp/out/test_results"));
    }
}
