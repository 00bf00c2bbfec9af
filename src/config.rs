/*
 *  config.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Layered configuration: built-in defaults, then a YAML file, then
 *  CLI flags on top. Everything in the file/CLI layers is optional;
 *  `resolved()` collapses the layers into concrete settings.
 */

use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;
use thiserror::Error;

const DEFAULT_WIDTH: u32 = 800;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_SATURATION: f32 = 0.75;
const DEFAULT_POLL_SECS: u64 = 30;
const DEFAULT_MARGIN: u32 = 15;
const DEFAULT_THEME_CACHE_BYTES: u64 = 512 * 1024;

/// Consulted for the bearer token when the file and CLI layers leave it
/// unset.
pub const TOKEN_ENV_VAR: &str = "SPOTIFY_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>,
    pub display: Option<DisplayConfig>,
    pub spotify: Option<SpotifyConfig>,
    pub cache: Option<CacheConfig>,
    pub fonts_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplayConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub saturation: Option<f32>,
    pub margin: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpotifyConfig {
    pub token: Option<String>,
    pub base_url: Option<String>,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Directory for the persisted theme-colour store. Unset disables
    /// persistence; colours are then memoized in memory only.
    pub theme_dir: Option<PathBuf>,
    pub theme_size_limit_bytes: Option<u64>,
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "inkbeat", about = "inkbeat - now playing, on paper")]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub display_width: Option<u32>,
    #[arg(long)]
    pub display_height: Option<u32>,
    #[arg(long)]
    pub saturation: Option<f32>,
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
    #[arg(long)]
    pub token: Option<String>,
    #[arg(long)]
    pub base_url: Option<String>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub fonts_dir: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub theme_cache_dir: Option<PathBuf>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Layer collapse: every optional knob resolved to a usable value.
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: String,
    pub resolution: (u32, u32),
    pub saturation: f32,
    pub margin: u32,
    pub token: Option<String>,
    pub base_url: String,
    pub poll_interval: Duration,
    pub fonts_dir: PathBuf,
    pub theme_cache_dir: Option<PathBuf>,
    pub theme_cache_limit: u64,
}

impl Config {
    pub fn resolved(&self) -> Settings {
        let display = self.display.clone().unwrap_or_default();
        let spotify = self.spotify.clone().unwrap_or_default();
        let cache = self.cache.clone().unwrap_or_default();
        Settings {
            log_level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
            resolution: (
                display.width.unwrap_or(DEFAULT_WIDTH),
                display.height.unwrap_or(DEFAULT_HEIGHT),
            ),
            saturation: display.saturation.unwrap_or(DEFAULT_SATURATION),
            margin: display.margin.unwrap_or(DEFAULT_MARGIN),
            token: spotify
                .token
                .clone()
                .or_else(|| std::env::var(TOKEN_ENV_VAR).ok()),
            base_url: spotify
                .base_url
                .clone()
                .unwrap_or_else(|| crate::spotify::DEFAULT_BASE_URL.to_string()),
            poll_interval: Duration::from_secs(
                spotify.poll_interval_secs.unwrap_or(DEFAULT_POLL_SECS),
            ),
            fonts_dir: self
                .fonts_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("fonts")),
            theme_cache_dir: cache.theme_dir.clone(),
            theme_cache_limit: cache
                .theme_size_limit_bytes
                .unwrap_or(DEFAULT_THEME_CACHE_BYTES),
        }
    }
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<Config, ConfigError> {
    let cli = Cli::parse();
    let cfg = build(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok(cfg)
}

fn build(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/inkbeat/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/inkbeat/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/inkbeat.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["inkbeat.yaml", "config.yaml", "config/inkbeat.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some() { dst.log_level = src.log_level; }
    if src.fonts_dir.is_some() { dst.fonts_dir = src.fonts_dir; }
    match (&mut dst.display, src.display) {
        (None, Some(c)) => dst.display = Some(c),
        (Some(d), Some(s)) => merge_display(d, s),
        _ => {}
    }
    match (&mut dst.spotify, src.spotify) {
        (None, Some(c)) => dst.spotify = Some(c),
        (Some(d), Some(s)) => merge_spotify(d, s),
        _ => {}
    }
    match (&mut dst.cache, src.cache) {
        (None, Some(c)) => dst.cache = Some(c),
        (Some(d), Some(s)) => merge_cache(d, s),
        _ => {}
    }
}

fn merge_display(dst: &mut DisplayConfig, src: DisplayConfig) {
    if src.width.is_some()      { dst.width = src.width; }
    if src.height.is_some()     { dst.height = src.height; }
    if src.saturation.is_some() { dst.saturation = src.saturation; }
    if src.margin.is_some()     { dst.margin = src.margin; }
}

fn merge_spotify(dst: &mut SpotifyConfig, src: SpotifyConfig) {
    if src.token.is_some()              { dst.token = src.token; }
    if src.base_url.is_some()           { dst.base_url = src.base_url; }
    if src.poll_interval_secs.is_some() { dst.poll_interval_secs = src.poll_interval_secs; }
}

fn merge_cache(dst: &mut CacheConfig, src: CacheConfig) {
    if src.theme_dir.is_some()             { dst.theme_dir = src.theme_dir; }
    if src.theme_size_limit_bytes.is_some() { dst.theme_size_limit_bytes = src.theme_size_limit_bytes; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some() { cfg.log_level = cli.log_level.clone(); }
    if cli.fonts_dir.is_some() { cfg.fonts_dir = cli.fonts_dir.clone(); }

    let any_display = cli.display_width.is_some()
        || cli.display_height.is_some()
        || cli.saturation.is_some();
    if any_display && cfg.display.is_none() {
        cfg.display = Some(DisplayConfig::default());
    }
    if let Some(display) = cfg.display.as_mut() {
        if cli.display_width.is_some()  { display.width = cli.display_width; }
        if cli.display_height.is_some() { display.height = cli.display_height; }
        if cli.saturation.is_some()     { display.saturation = cli.saturation; }
    }

    let any_spotify =
        cli.token.is_some() || cli.base_url.is_some() || cli.poll_interval_secs.is_some();
    if any_spotify && cfg.spotify.is_none() {
        cfg.spotify = Some(SpotifyConfig::default());
    }
    if let Some(spotify) = cfg.spotify.as_mut() {
        if cli.token.is_some()              { spotify.token = cli.token.clone(); }
        if cli.base_url.is_some()           { spotify.base_url = cli.base_url.clone(); }
        if cli.poll_interval_secs.is_some() { spotify.poll_interval_secs = cli.poll_interval_secs; }
    }

    if cli.theme_cache_dir.is_some() {
        cfg.cache
            .get_or_insert_with(CacheConfig::default)
            .theme_dir = cli.theme_cache_dir.clone();
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(display) = cfg.display.as_ref() {
        if let (Some(w), Some(h)) = (display.width, display.height) {
            if w == 0 || h == 0 {
                return Err(ConfigError::Validation("display width/height must be > 0".into()));
            }
        }
        if let Some(s) = display.saturation {
            if !(0.0..=1.0).contains(&s) {
                return Err(ConfigError::Validation("saturation must be within 0.0..=1.0".into()));
            }
        }
        // Composition is portrait, so the margins come out of the
        // smaller axis.
        let width = display.width.unwrap_or(DEFAULT_WIDTH);
        let height = display.height.unwrap_or(DEFAULT_HEIGHT);
        let margin = display.margin.unwrap_or(DEFAULT_MARGIN);
        if 2 * margin >= width.min(height) {
            return Err(ConfigError::Validation(format!(
                "margin {margin} leaves no room on a {width}x{height} panel"
            )));
        }
    }
    if let Some(spotify) = cfg.spotify.as_ref() {
        if spotify.poll_interval_secs == Some(0) {
            return Err(ConfigError::Validation("poll_interval_secs must be > 0".into()));
        }
    }
    Ok(())
}
