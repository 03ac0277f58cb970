use crate::{
    constants::{DEFAULT_BUFFER_CAPACITY, WAVE_MAPPER},
    voice::{Language, Voice},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::read_to_string;

const CONFIG_FILE: &str = "Dectalk.toml";
const CONFIG_ENV: &str = "DECTALK_CONFIG";

/// The speaking rate assigned to new engines, in words per minute.
pub const DEFAULT_RATE: u32 = 200;

/// Settings applied when an engine starts.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineOptions {
    /// Language resource to load, `None` for the engine default
    pub language: Language,

    pub voice: Voice,

    /// Words per minute
    pub rate: u32,

    /// Main volume, 0-100. Left untouched when unset.
    pub volume: Option<i32>,

    /// Wave output device, `0xFFFFFFFF` for the system default
    pub device_id: u32,

    /// Capture buffer size in bytes
    pub buffer_capacity: usize,

    /// Phoneme/index slots allocated alongside each capture buffer
    pub max_phoneme_changes: usize,
    pub max_index_marks: usize,

    /// Sends `[:phone on]` after startup so phoneme input (and singing) works
    pub enable_phonemes: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            language: Language::default(),
            voice: Voice::default(),
            rate: DEFAULT_RATE,
            volume: None,
            device_id: WAVE_MAPPER,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_phoneme_changes: 0,
            max_index_marks: 0,
            enable_phonemes: true,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub engine: EngineOptions,

    /// Print phoneme events to stdout as JSON lines
    pub print_phonemes: bool,
}

pub fn path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Loads the config file, falling back to defaults when it doesn't exist.
pub async fn load() -> Result<Config> {
    let path = path();

    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let config = read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&config).with_context(|| format!("parsing {}", path.display()))?;

    Ok(config)
}
