use std::{fs, io, path::Path, time::Duration};

use anyhow::Context;
use client_core::ControllerConfig;
use serde::Deserialize;
use shared::domain::ViewerMode;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "gallery.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub api_base_url: String,
    pub session_cookie: Option<String>,
    pub page_size: usize,
    pub cooldown_ms: u64,
    pub toggle_timeout_ms: u64,
    pub default_mode: ViewerMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/gallery.db".into(),
            api_base_url: "http://127.0.0.1:8000".into(),
            session_cookie: None,
            page_size: 20,
            cooldown_ms: 1000,
            toggle_timeout_ms: 5000,
            default_mode: ViewerMode::default(),
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            cooldown: Duration::from_millis(self.cooldown_ms),
            toggle_timeout: Duration::from_millis(self.toggle_timeout_ms),
        }
    }
}

/// Shape of `gallery.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    database_url: Option<String>,
    api_base_url: Option<String>,
    session_cookie: Option<String>,
    page_size: Option<usize>,
    cooldown_ms: Option<u64>,
    toggle_timeout_ms: Option<u64>,
    default_mode: Option<String>,
}

/// Defaults, then the config file (if it exists), then the environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()));
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings.database_url = normalize_database_url(&settings.database_url);
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if file_cfg.session_cookie.is_some() {
        settings.session_cookie = file_cfg.session_cookie;
    }
    if let Some(v) = file_cfg.page_size {
        settings.page_size = v;
    }
    if let Some(v) = file_cfg.cooldown_ms {
        settings.cooldown_ms = v;
    }
    if let Some(v) = file_cfg.toggle_timeout_ms {
        settings.toggle_timeout_ms = v;
    }
    if let Some(v) = file_cfg.default_mode {
        set_mode(settings, "default_mode", &v);
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("GALLERY_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = var("APP__SESSION_COOKIE") {
        settings.session_cookie = Some(v).filter(|cookie| !cookie.trim().is_empty());
    }
    if let Some(v) = var("APP__PAGE_SIZE") {
        set_parsed(&mut settings.page_size, "APP__PAGE_SIZE", &v);
    }
    if let Some(v) = var("APP__COOLDOWN_MS") {
        set_parsed(&mut settings.cooldown_ms, "APP__COOLDOWN_MS", &v);
    }
    if let Some(v) = var("APP__TOGGLE_TIMEOUT_MS") {
        set_parsed(&mut settings.toggle_timeout_ms, "APP__TOGGLE_TIMEOUT_MS", &v);
    }
    if let Some(v) = var("APP__DEFAULT_MODE") {
        set_mode(settings, "APP__DEFAULT_MODE", &v);
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value = raw, "config: ignoring unparsable value"),
    }
}

fn set_mode(settings: &mut Settings, key: &str, raw: &str) {
    match raw.parse() {
        Ok(mode) => settings.default_mode = mode,
        Err(err) => warn!(key, "config: {err}, keeping {}", settings.default_mode),
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
