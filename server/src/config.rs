//! Runtime configuration — a TOML file of server and dictionary tunables.
//!
//! The file is read at startup and re-read by the dispatcher every 100
//! completion requests so editors can tweak limits without a restart. A
//! missing file is not an error: defaults are written back so users have
//! something to edit.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};
use wordserve_core::complete::EngineOptions;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Hard cap on a request's suggestion limit.
    pub max_limit: usize,
    pub min_prefix: usize,
    pub max_prefix: usize,
    pub enable_filter: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection { max_limit: 64, min_prefix: 1, max_prefix: 60, enable_filter: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictSection {
    /// Initial load target: enough chunks to cover this many words.
    pub max_words: usize,
    /// Words per chunk as produced by the corpus pipeline.
    pub chunk_size: usize,
    pub min_frequency_threshold: u32,
    pub min_frequency_short_prefix: u32,
    /// Sanity bound on a chunk header's entry count.
    pub max_word_count_validation: u32,
}

impl Default for DictSection {
    fn default() -> Self {
        DictSection {
            max_words: 50_000,
            chunk_size: 10_000,
            min_frequency_threshold: 20,
            min_frequency_short_prefix: 24,
            max_word_count_validation: 1_000_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSection,
    pub dict: DictSection,
}

impl Settings {
    /// Read settings from `path`. A missing file yields defaults and writes
    /// them back; a malformed file is an error (the caller decides whether
    /// that is fatal).
    pub fn load_or_init(path: &Path) -> Result<Self, toml::de::Error> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let settings = toml::from_str(&text)?;
                debug!(path = %path.display(), "Loaded configuration");
                Ok(settings)
            }
            Err(_) => {
                let settings = Settings::default();
                settings.write(path);
                Ok(settings)
            }
        }
    }

    /// Best-effort write, used for persisting defaults. Serialization of
    /// `Settings` cannot fail; only the filesystem can.
    pub fn write(&self, path: &Path) {
        let text = match toml::to_string_pretty(self) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Could not serialize default configuration");
                return;
            }
        };
        if let Err(e) = std::fs::write(path, text) {
            warn!(path = %path.display(), error = %e, "Could not write default configuration");
        } else {
            debug!(path = %path.display(), "Wrote default configuration");
        }
    }

    /// The engine tunables this file carries. The dispatcher applies these
    /// to the running completer on periodic reload.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_limit: self.server.max_limit,
            min_prefix: self.server.min_prefix,
            max_prefix: self.server.max_prefix,
            enable_filter: self.server.enable_filter,
            min_frequency_threshold: self.dict.min_frequency_threshold,
            min_frequency_short_prefix: self.dict.min_frequency_short_prefix,
        }
    }

    /// How many chunks the startup load should make resident.
    pub fn initial_chunk_target(&self) -> usize {
        self.dict.max_words.div_ceil(self.dict.chunk_size.max(1)).max(1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.server.max_limit, 64);
        assert_eq!(s.server.min_prefix, 1);
        assert_eq!(s.server.max_prefix, 60);
        assert!(s.server.enable_filter);
        assert_eq!(s.dict.max_words, 50_000);
        assert_eq!(s.dict.chunk_size, 10_000);
        assert_eq!(s.dict.min_frequency_threshold, 20);
        assert_eq!(s.dict.min_frequency_short_prefix, 24);
        assert_eq!(s.dict.max_word_count_validation, 1_000_000);
    }

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wordserve.toml");
        let s = Settings::load_or_init(&path).unwrap();
        assert_eq!(s, Settings::default());
        assert!(path.exists(), "defaults should be persisted");
        // And the persisted file round-trips
        assert_eq!(Settings::load_or_init(&path).unwrap(), s);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wordserve.toml");
        std::fs::write(&path, "[server]\nmax_limit = 10\n").unwrap();
        let s = Settings::load_or_init(&path).unwrap();
        assert_eq!(s.server.max_limit, 10);
        assert_eq!(s.server.max_prefix, 60);
        assert_eq!(s.dict.chunk_size, 10_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wordserve.toml");
        std::fs::write(&path, "[server\nmax_limit = ").unwrap();
        assert!(Settings::load_or_init(&path).is_err());
    }

    #[test]
    fn engine_options_mirror_settings() {
        let mut s = Settings::default();
        s.server.enable_filter = false;
        s.dict.min_frequency_threshold = 5;
        let o = s.engine_options();
        assert!(!o.enable_filter);
        assert_eq!(o.min_frequency_threshold, 5);
        assert_eq!(o.max_limit, 64);
    }

    #[test]
    fn initial_chunk_target_rounds_up() {
        let mut s = Settings::default();
        assert_eq!(s.initial_chunk_target(), 5);
        s.dict.max_words = 50_001;
        assert_eq!(s.initial_chunk_target(), 6);
        s.dict.max_words = 1;
        assert_eq!(s.initial_chunk_target(), 1);
    }
}
