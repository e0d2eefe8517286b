//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory (or
//! the file given with `-f`), then applies `CORPUS_VOCAB_DB` and
//! `CORPUS_VOCAB_LOG_LEVEL` env overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::embed::EmbedOptions;
use crate::error::AppError;
use crate::pipeline::BuildOptions;
use crate::retry::RetryPolicy;
use crate::store::StoreOptions;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Database file and connection tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database file (already expanded, no `~`).
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub page_size: usize,
}

/// Vocabulary build tuning (`[vocab]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabConfig {
    pub min_ngram_frequency: i64,
    /// Merge threads; `0` means one per available core.
    pub workers: usize,
    pub max_merge_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    pub batch_size: usize,
    pub max_attempts: u32,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub store: StoreConfig,
    pub vocab: VocabConfig,
    pub embedding: EmbeddingConfig,
}

impl Config {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout_ms: self.store.busy_timeout_ms,
            page_size: self.store.page_size,
        }
    }

    pub fn build_options(&self, resume: bool) -> BuildOptions {
        BuildOptions {
            resume,
            min_ngram_frequency: self.vocab.min_ngram_frequency,
            workers: self.vocab.workers,
            merge_retry: RetryPolicy {
                max_attempts: self.vocab.max_merge_attempts,
                base_delay: Duration::from_millis(self.vocab.backoff_base_ms),
                max_delay: Duration::from_millis(self.vocab.backoff_max_ms),
            },
        }
    }

    pub fn embed_options(&self) -> EmbedOptions {
        let defaults = EmbedOptions::default();
        EmbedOptions {
            batch_size: self.embedding.batch_size,
            retry: RetryPolicy { max_attempts: self.embedding.max_attempts, ..defaults.retry },
        }
    }
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    store: RawStore,
    #[serde(default)]
    vocab: RawVocab,
    #[serde(default)]
    embedding: RawEmbedding,
}

#[derive(Deserialize)]
struct RawStore {
    #[serde(default = "default_store_path")]
    path: String,
    #[serde(default = "default_busy_timeout_ms")]
    busy_timeout_ms: u64,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

impl Default for RawStore {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Deserialize)]
struct RawVocab {
    /// Defaults to `2`: a term must appear at least twice in a document.
    #[serde(default = "default_min_ngram_frequency")]
    min_ngram_frequency: i64,
    #[serde(default)]
    workers: usize,
    #[serde(default = "default_max_merge_attempts")]
    max_merge_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    backoff_max_ms: u64,
}

impl Default for RawVocab {
    fn default() -> Self {
        Self {
            min_ngram_frequency: default_min_ngram_frequency(),
            workers: 0,
            max_merge_attempts: default_max_merge_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Deserialize)]
struct RawEmbedding {
    #[serde(default = "default_dimensions")]
    dimensions: usize,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default = "default_embed_attempts")]
    max_attempts: u32,
}

impl Default for RawEmbedding {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
            batch_size: default_batch_size(),
            max_attempts: default_embed_attempts(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_store_path() -> String { "~/.corpus-vocab/corpus.db".to_string() }
fn default_busy_timeout_ms() -> u64 { 5000 }
fn default_page_size() -> usize { 1000 }
fn default_min_ngram_frequency() -> i64 { 2 }
fn default_max_merge_attempts() -> u32 { 8 }
fn default_backoff_base_ms() -> u64 { 10 }
fn default_backoff_max_ms() -> u64 { 1000 }
fn default_dimensions() -> usize { 256 }
fn default_batch_size() -> usize { 64 }
fn default_embed_attempts() -> u32 { 3 }

/// Overrides applied on top of the file; each one wins when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub db_path: Option<String>,
    pub log_level: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("CORPUS_VOCAB_DB").ok(),
            log_level: env::var("CORPUS_VOCAB_LOG_LEVEL").ok(),
        }
    }
}

/// Load config from `path` (or `config/default.toml`), then apply env-var
/// overrides.  A missing default file falls back to built-in defaults; a
/// missing explicit file is an error.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();
    match path {
        Some(p) => load_from(p, &overrides),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_from(default, &overrides)
            } else {
                resolve_str("", &overrides)
            }
        }
    }
}

/// Internal loader — accepts an explicit path and overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    resolve_str(&raw, overrides)
        .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
}

fn resolve_str(raw: &str, overrides: &Overrides) -> Result<Config, AppError> {
    let parsed: RawConfig =
        toml::from_str(raw).map_err(|e| AppError::Config(format!("parse error: {e}")))?;

    if parsed.store.page_size == 0 {
        return Err(AppError::Config("store.page_size must be at least 1".into()));
    }
    if parsed.embedding.batch_size == 0 {
        return Err(AppError::Config("embedding.batch_size must be at least 1".into()));
    }
    if parsed.vocab.min_ngram_frequency < 1 {
        return Err(AppError::Config("vocab.min_ngram_frequency must be at least 1".into()));
    }
    if parsed.vocab.max_merge_attempts == 0 {
        return Err(AppError::Config("vocab.max_merge_attempts must be at least 1".into()));
    }

    let db_path = overrides.db_path.as_deref().unwrap_or(&parsed.store.path);
    let log_level = overrides.log_level.clone().unwrap_or(parsed.log_level);

    Ok(Config {
        log_level,
        store: StoreConfig {
            path: expand_home(db_path),
            busy_timeout_ms: parsed.store.busy_timeout_ms,
            page_size: parsed.store.page_size,
        },
        vocab: VocabConfig {
            min_ngram_frequency: parsed.vocab.min_ngram_frequency,
            workers: parsed.vocab.workers,
            max_merge_attempts: parsed.vocab.max_merge_attempts,
            backoff_base_ms: parsed.vocab.backoff_base_ms,
            backoff_max_ms: parsed.vocab.backoff_max_ms,
        },
        embedding: EmbeddingConfig {
            dimensions: parsed.embedding.dimensions,
            batch_size: parsed.embedding.batch_size,
            max_attempts: parsed.embedding.max_attempts,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
log_level = "warn"

[store]
path = "/tmp/corpus.db"
page_size = 50

[vocab]
min_ngram_frequency = 1
workers = 4
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.log_level, "warn");
        assert_eq!(cfg.store.path, PathBuf::from("/tmp/corpus.db"));
        assert_eq!(cfg.store.page_size, 50);
        assert_eq!(cfg.store.busy_timeout_ms, 5000);
        assert_eq!(cfg.vocab.min_ngram_frequency, 1);
        assert_eq!(cfg.vocab.workers, 4);
        assert_eq!(cfg.embedding.dimensions, 256);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let f = write_toml("");
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.vocab.min_ngram_frequency, 2);
        assert_eq!(cfg.build_options(false), BuildOptions::default());
        assert_eq!(cfg.embed_options(), EmbedOptions::default());
        assert_eq!(cfg.store_options(), StoreOptions::default());
    }

    #[test]
    fn build_options_carry_retry_settings() {
        let f = write_toml("[vocab]\nmax_merge_attempts = 3\nbackoff_base_ms = 5\nbackoff_max_ms = 40\n");
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        let options = cfg.build_options(true);
        assert!(options.resume);
        assert_eq!(options.merge_retry.max_attempts, 3);
        assert_eq!(options.merge_retry.base_delay, Duration::from_millis(5));
        assert_eq!(options.merge_retry.max_delay, Duration::from_millis(40));
    }

    #[test]
    fn zero_page_size_rejected() {
        let f = write_toml("[store]\npage_size = 0\n");
        let err = load_from(f.path(), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn non_positive_ngram_threshold_rejected() {
        for value in ["0", "-3"] {
            let f = write_toml(&format!("[vocab]\nmin_ngram_frequency = {value}\n"));
            let err = load_from(f.path(), &Overrides::default()).unwrap_err();
            assert!(err.to_string().contains("min_ngram_frequency"), "{value}: {err}");
        }
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.corpus-vocab");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".corpus-vocab"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_overrides_win() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            db_path: Some("/tmp/override.db".into()),
            log_level: Some("debug".into()),
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.store.path, PathBuf::from("/tmp/override.db"));
        assert_eq!(cfg.log_level, "debug");
    }
}
