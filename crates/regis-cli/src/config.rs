//! Application configuration: an optional TOML file layered under
//! `REGIS__*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use regis_client::RegistryConfig;
use regis_ingest::{GatewayConfig, IngestConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
}

impl Default for ServerConfig {
  fn default() -> Self { Self { host: "127.0.0.1".into(), port: 8080 } }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub store_path: PathBuf,
  pub server:     ServerConfig,
  pub registry:   RegistryConfig,
  pub ingest:     IngestConfig,
  pub gateway:    GatewayConfig,
}

impl AppConfig {
  /// Read `path` if it exists, then apply `REGIS__SECTION__KEY` overrides,
  /// e.g. `REGIS__REGISTRY__API_KEY`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("REGIS")
          .prefix_separator("__")
          .separator("__")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("ingest.localities")
          .with_list_parse_key("ingest.legal_forms"),
      )
      .build()
      .context("failed to read configuration")?;

    let mut config: AppConfig = settings
      .try_deserialize()
      .context("failed to deserialise configuration")?;

    if config.store_path.as_os_str().is_empty() {
      config.store_path = PathBuf::from("regis.db");
    }
    config.store_path = expand_tilde(&config.store_path);
    Ok(config)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
