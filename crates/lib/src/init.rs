//! Initialize the configuration directory: default config with generated secrets, and the data directory.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::path::{Path, PathBuf};

use crate::config;

static DEFAULT_CONFIG: &str = include_str!("../config/config.yaml");

const SECRET_BYTES: usize = 24;

const DATA_DIR_LINE: &str = "# dataDir: /var/lib/sms-bridge";

/// Ensure the config file exists before serving.
pub fn require_initialized(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `sms-bridge init` first (config file not found: {})",
            config_path.display()
        );
    }
    Ok(())
}

/// Random URL-safe secret for signing.
pub fn generate_secret() -> Result<String> {
    let mut bytes = [0u8; SECRET_BYTES];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("generating secret: {}", e))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Render the default config template with fresh per-transport secrets.
/// `data_dir`, if given, is written as the configured `dataDir`.
pub fn render_default_config(data_dir: Option<&Path>) -> Result<String> {
    let mut rendered = DEFAULT_CONFIG
        .replace("{{HTTP_SECRET}}", &generate_secret()?)
        .replace("{{WS_SECRET}}", &generate_secret()?);
    if let Some(dir) = data_dir {
        let value = serde_yaml::to_string(dir).context("encoding data directory")?;
        rendered = rendered.replace(DATA_DIR_LINE, &format!("dataDir: {}", value.trim_end()));
    }
    Ok(rendered)
}

/// Create the config directory and default files if they do not exist.
/// - Writes the config template (with generated secrets) if the file is missing.
/// - Creates the data directory the config resolves to, or `data_dir` when given.
///
/// Returns the data directory.
pub fn init_config_dir(config_path: &Path, data_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = config::config_dir(config_path);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating config directory {}", dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, render_default_config(data_dir)?)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    let (cfg, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let data_dir = cfg.resolve_data_dir(data_dir.map(Path::to_path_buf));
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        log::info!("created data directory at {}", data_dir.display());
    }
    Ok(data_dir)
}
