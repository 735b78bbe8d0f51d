//! `intentmesh.toml` loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use intentmesh_memory::RankOptions;
use intentmesh_sync::{JoinTimeouts, PipelineTimeouts};
use serde::Deserialize;
use tracing::info;

/// Environment variable consulted when the config carries no signing key.
pub const SIGNING_KEY_ENV: &str = "INTENTMESH_SIGNING_KEY";

#[derive(Debug, Deserialize)]
pub struct MeshConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Name given to a newly created store.
    #[serde(default = "default_store_name")]
    pub store_name: String,
    #[serde(default)]
    pub ranking: RankOptions,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Deadlines in milliseconds.
#[derive(Debug, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_dial_ms")]
    pub dial_ms: u64,
    #[serde(default = "default_write_ms")]
    pub write_ms: u64,
    #[serde(default = "default_read_ms")]
    pub read_ms: u64,
    #[serde(default = "default_medium_open_ms")]
    pub medium_open_ms: u64,
    #[serde(default = "default_long_open_ms")]
    pub long_open_ms: u64,
    #[serde(default = "default_new_store_ms")]
    pub new_store_ms: u64,
    #[serde(default = "default_stabilize_ms")]
    pub stabilize_ms: u64,
    #[serde(default = "default_direct_read_ms")]
    pub direct_read_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            dial_ms: default_dial_ms(),
            write_ms: default_write_ms(),
            read_ms: default_read_ms(),
            medium_open_ms: default_medium_open_ms(),
            long_open_ms: default_long_open_ms(),
            new_store_ms: default_new_store_ms(),
            stabilize_ms: default_stabilize_ms(),
            direct_read_ms: default_direct_read_ms(),
        }
    }
}

impl TimeoutsConfig {
    pub fn join(&self) -> JoinTimeouts {
        JoinTimeouts {
            dial: Duration::from_millis(self.dial_ms),
            stabilize: Duration::from_millis(self.stabilize_ms),
            open_after_dial: Duration::from_millis(self.medium_open_ms),
            open_via_discovery: Duration::from_millis(self.long_open_ms),
            open_remembered: Duration::from_millis(self.medium_open_ms),
            create_store: Duration::from_millis(self.new_store_ms),
        }
    }

    /// Pipeline deadlines; `direct` selects the shorter direct-adapter read.
    pub fn pipeline(&self, direct: bool) -> PipelineTimeouts {
        PipelineTimeouts {
            write: Duration::from_millis(self.write_ms),
            read: Duration::from_millis(if direct {
                self.direct_read_ms
            } else {
                self.read_ms
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IdentityConfig {
    /// Author reference stamped on created intentions.
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub signing_key: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            author: default_author(),
            signing_key: None,
        }
    }
}

impl IdentityConfig {
    /// The configured signing key, falling back to the environment.
    pub fn resolve_signing_key(&self) -> Option<String> {
        self.signing_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(SIGNING_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_store_name() -> String {
    "intentions".to_string()
}
fn default_author() -> String {
    "anonymous".to_string()
}
fn default_dial_ms() -> u64 {
    10_000
}
fn default_write_ms() -> u64 {
    15_000
}
fn default_read_ms() -> u64 {
    30_000
}
fn default_medium_open_ms() -> u64 {
    30_000
}
fn default_long_open_ms() -> u64 {
    90_000
}
fn default_new_store_ms() -> u64 {
    15_000
}
fn default_stabilize_ms() -> u64 {
    1_000
}
fn default_direct_read_ms() -> u64 {
    10_000
}

impl MeshConfig {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("invalid intentmesh config")
    }

    /// Load `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::parse(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Self::parse("")
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            )),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("cache").join("intentions.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MeshConfig::parse("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.store_name, "intentions");
        assert_eq!(config.ranking.semantic_weight, 0.7);
        assert_eq!(config.ranking.base_width, 320.0);
        assert_eq!(config.timeouts.join(), JoinTimeouts::default());
        assert_eq!(config.timeouts.pipeline(false), PipelineTimeouts::default());
        assert_eq!(
            config.timeouts.pipeline(true),
            PipelineTimeouts::direct_adapter()
        );
        assert_eq!(config.identity.author, "anonymous");
    }

    #[test]
    fn test_partial_sections() {
        let config = MeshConfig::parse(
            r#"
            data_dir = "/var/lib/intentmesh"

            [ranking]
            min_score = 0.25
            max_results = 10

            [timeouts]
            dial_ms = 2500

            [identity]
            author = "did:key:z6Mk"
            signing_key = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_path(), PathBuf::from("/var/lib/intentmesh/cache/intentions.json"));
        assert_eq!(config.ranking.min_score, 0.25);
        assert_eq!(config.ranking.max_results, 10);
        assert_eq!(config.ranking.geo_weight, 0.3);
        assert_eq!(config.timeouts.join().dial, Duration::from_millis(2500));
        assert_eq!(config.timeouts.join().open_via_discovery, Duration::from_secs(90));
        assert_eq!(config.identity.resolve_signing_key().as_deref(), Some("secret"));
    }

    #[test]
    fn test_unknown_types_are_rejected() {
        assert!(MeshConfig::parse("[timeouts]\ndial_ms = \"soon\"").is_err());
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MeshConfig::load(&tmp.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.timeouts.dial_ms, 10_000);
    }
}
