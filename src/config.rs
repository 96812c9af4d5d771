use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{Currency, parse_currency_list};
use crate::ledger::OpeningLookup;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub current_workspace: String,

    /// Currency codes the counter keeps inventory for. Validated against the
    /// closed `Currency` set whenever the ledger is built.
    #[serde(default = "default_currency_codes")]
    pub currencies: Vec<String>,

    #[serde(default)]
    pub opening_lookup: OpeningLookup,

    /// Staff name stamped on transactions when `--staff` is not given.
    #[serde(default)]
    pub default_staff: Option<String>,

    #[serde(default)]
    pub last_daily_update_at: Option<DateTime<Utc>>,
}

fn default_currency_codes() -> Vec<String> {
    Currency::ALL.iter().map(|c| c.code().to_string()).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            current_workspace: "main".to_string(),
            currencies: default_currency_codes(),
            opening_lookup: OpeningLookup::default(),
            default_staff: None,
            last_daily_update_at: None,
        }
    }
}

impl AppConfig {
    pub fn currencies(&self) -> Result<Vec<Currency>> {
        parse_currency_list(&self.currencies).context("Invalid currency list in config")
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

pub fn app_paths(override_home: Option<PathBuf>) -> Result<AppPaths> {
    if let Some(home) = override_home {
        return Ok(AppPaths {
            config_dir: home.join("config"),
            data_dir: home.join("data"),
        });
    }

    let proj = ProjectDirs::from("com", "cambio", "cambio")
        .context("Failed to resolve platform directories")?;

    Ok(AppPaths {
        config_dir: proj.config_dir().to_path_buf(),
        data_dir: proj.data_dir().to_path_buf(),
    })
}

pub fn load_or_init_config(paths: &AppPaths) -> Result<(AppConfig, PathBuf)> {
    fs::create_dir_all(&paths.config_dir)
        .with_context(|| format!("Failed to create config dir {}", paths.config_dir.display()))?;

    let cfg_path = paths.config_dir.join("config.json");
    if !cfg_path.exists() {
        let cfg = AppConfig::default();
        write_config(&cfg_path, &cfg)?;
        return Ok((cfg, cfg_path));
    }

    let raw = fs::read_to_string(&cfg_path)
        .with_context(|| format!("Failed to read {}", cfg_path.display()))?;
    let mut cfg: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", cfg_path.display()))?;

    // Normalise codes written by hand ("usd", " EUR").
    let normalised: Vec<String> = cfg
        .currencies
        .iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .collect();
    let mut changed = false;
    if normalised != cfg.currencies {
        cfg.currencies = normalised;
        changed = true;
    }
    if cfg.currencies.is_empty() {
        cfg.currencies = default_currency_codes();
        changed = true;
    }
    if changed {
        write_config(&cfg_path, &cfg)?;
    }

    Ok((cfg, cfg_path))
}

pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn workspace_slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' | '-' | '_' => Some(ch),
            'A'..='Z' => Some(ch.to_ascii_lowercase()),
            ' ' | ':' | '/' | '\\' => Some('-'),
            _ => None,
        };
        if let Some(c) = mapped {
            if !(c == '-' && out.ends_with('-')) {
                out.push(c);
            }
        }
    }

    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "workspace".to_string()
    } else {
        trimmed.to_string()
    }
}
