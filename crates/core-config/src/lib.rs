//! Configuration loading and parsing (`hexed.toml`).
//!
//! Every knob tunes behavior the editing core already has a built-in value
//! for, so a missing file, a missing key, or an unparsable file all degrade
//! to the defaults; a parse failure is logged and otherwise ignored. Unknown
//! fields are tolerated so older binaries keep working against newer config
//! files.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize, Clone)]
pub struct JumpConfig {
    /// Bytes scanned on each side of the cursor when parsing a jump target.
    #[serde(default = "JumpConfig::default_context")]
    pub context: usize,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            context: Self::default_context(),
        }
    }
}

impl JumpConfig {
    const fn default_context() -> usize {
        50
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Screens of context searched per request. The byte budget for one
    /// search is `viewport_bytes * window`, floored by a per-pattern
    /// minimum, so a tiny terminal still searches a useful distance.
    #[serde(default = "SearchConfig::default_window")]
    pub window: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            window: Self::default_window(),
        }
    }
}

impl SearchConfig {
    const fn default_window() -> usize {
        50
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct HistoryConfig {
    /// Maximum retained undo snapshots; 0 keeps the timeline unbounded.
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub jump: JumpConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file contents, retained for diagnostics.
    pub raw: Option<String>,
    pub file: ConfigFile,
}

/// Best-effort config path: prefer `hexed.toml` in the working directory,
/// then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("hexed.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("hexed").join("hexed.toml");
    }
    PathBuf::from("hexed.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let Ok(content) = fs::read_to_string(&path) else {
        return Ok(Config::default());
    };
    match toml::from_str::<ConfigFile>(&content) {
        Ok(file) => Ok(Config {
            raw: Some(content),
            file,
        }),
        Err(e) => {
            warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed_using_defaults");
            Ok(Config::default())
        }
    }
}

impl Config {
    /// Jump context with the zero value mapped back to the default; a zero
    /// window would make every jump a no-op.
    pub fn jump_context(&self) -> usize {
        if self.file.jump.context == 0 {
            JumpConfig::default_context()
        } else {
            self.file.jump.context
        }
    }

    /// Search window with the zero value mapped back to the default.
    pub fn search_window(&self) -> usize {
        if self.file.search.window == 0 {
            SearchConfig::default_window()
        } else {
            self.file.search.window
        }
    }

    pub fn history_limit(&self) -> usize {
        self.file.history.limit
    }
}
