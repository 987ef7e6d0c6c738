//! Runtime preferences and the per-cycle pipeline configuration.
//!
//! Preferences are a flat key/value store shared with whatever settings
//! surface edits them. The coordinator takes one [`PipelineConfig`] snapshot
//! at the start of every cycle, so edits land on the next cycle boundary.

use calib_stream_core::{PatternSpec, ResizeSpec, SizeParseError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Convert frames to grayscale before detection (bool).
pub const KEY_GRAYSCALE: &str = "preGrayScaled";
/// Inner-corner pattern, `"WxH"` (string).
pub const KEY_PATTERN: &str = "prefCalibSize";
/// Detection resolution, `"WxH"`, `"0x0"` for native (string).
pub const KEY_RESIZE: &str = "prefSizeResize";

pub const DEFAULT_GRAYSCALE: bool = true;
pub const DEFAULT_PATTERN: &str = "4x5";
pub const DEFAULT_RESIZE: &str = "0x0";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("preference {key:?} = {value:?} is not a valid size")]
    Parse {
        key: String,
        value: String,
        #[source]
        source: SizeParseError,
    },
    #[error("preference {key:?} is not a {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("failed to read preferences from {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed preferences file")]
    Json(#[from] serde_json::Error),
}

/// A stored preference value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Str(String),
}

/// Read access to runtime preferences.
pub trait PreferenceStore: Send + Sync {
    /// Raw value for `key`, if set.
    fn get(&self, key: &str) -> Option<PrefValue>;

    fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(PrefValue::Bool(b)) => Ok(b),
            Some(PrefValue::Str(_)) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "bool",
            }),
        }
    }

    fn get_string(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.get(key) {
            None => Ok(default.to_string()),
            Some(PrefValue::Str(s)) => Ok(s),
            Some(PrefValue::Bool(_)) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    /// Read all pipeline keys as one configuration.
    fn snapshot(&self) -> Result<PipelineConfig, ConfigError> {
        PipelineConfig::read(|key| self.get(key))
    }
}

/// Configuration used for exactly one pipeline cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub grayscale: bool,
    pub pattern: PatternSpec,
    pub resize: ResizeSpec,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grayscale: DEFAULT_GRAYSCALE,
            pattern: PatternSpec::new(4, 5),
            resize: ResizeSpec::NONE,
        }
    }
}

impl PipelineConfig {
    fn read(get: impl Fn(&str) -> Option<PrefValue>) -> Result<Self, ConfigError> {
        let grayscale = match get(KEY_GRAYSCALE) {
            None => DEFAULT_GRAYSCALE,
            Some(PrefValue::Bool(b)) => b,
            Some(PrefValue::Str(_)) => {
                return Err(ConfigError::WrongType {
                    key: KEY_GRAYSCALE.to_string(),
                    expected: "bool",
                })
            }
        };
        let pattern: PatternSpec = parse_size_pref(KEY_PATTERN, get(KEY_PATTERN), DEFAULT_PATTERN)?;
        let resize: ResizeSpec = parse_size_pref(KEY_RESIZE, get(KEY_RESIZE), DEFAULT_RESIZE)?;
        Ok(Self {
            grayscale,
            pattern,
            resize,
        })
    }

    /// Write this configuration into a preference map.
    pub fn to_prefs(&self) -> HashMap<String, PrefValue> {
        HashMap::from([
            (KEY_GRAYSCALE.to_string(), PrefValue::Bool(self.grayscale)),
            (KEY_PATTERN.to_string(), PrefValue::Str(self.pattern.to_string())),
            (KEY_RESIZE.to_string(), PrefValue::Str(self.resize.to_string())),
        ])
    }
}

fn parse_size_pref<T>(key: &str, value: Option<PrefValue>, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = SizeParseError>,
{
    let value = match value {
        None => default.to_string(),
        Some(PrefValue::Str(s)) => s,
        Some(PrefValue::Bool(_)) => {
            return Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "string",
            })
        }
    };
    value.parse().map_err(|source| ConfigError::Parse {
        key: key.to_string(),
        value,
        source,
    })
}

/// In-memory preferences; writers may update while the pipeline runs.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, PrefValue>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            values: RwLock::new(config.to_prefs()),
        }
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.set(key, PrefValue::Bool(value));
    }

    pub fn set_string(&self, key: &str, value: impl Into<String>) {
        self.set(key, PrefValue::Str(value.into()));
    }

    pub fn set(&self, key: &str, value: PrefValue) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
    }

    /// Apply several edits under one write lock; a concurrent
    /// [`snapshot`](PreferenceStore::snapshot) sees all of them or none.
    pub fn update<R>(&self, edit: impl FnOnce(&mut HashMap<String, PrefValue>) -> R) -> R {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        edit(&mut values)
    }

    /// Store every key of `config` in one atomic update.
    pub fn apply(&self, config: &PipelineConfig) {
        self.update(|values| values.extend(config.to_prefs()));
    }

    fn replace_all(&self, new_values: HashMap<String, PrefValue>) {
        self.update(|values| *values = new_values);
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    /// All keys are read under one lock, so a concurrent writer never
    /// produces a half-updated configuration.
    fn snapshot(&self) -> Result<PipelineConfig, ConfigError> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        PipelineConfig::read(|key| values.get(key).cloned())
    }
}

/// Preferences loaded from a JSON object file, e.g.
/// `{"preGrayScaled": true, "prefCalibSize": "9x6", "prefSizeResize": "0x0"}`.
#[derive(Debug)]
pub struct JsonPreferences {
    path: PathBuf,
    inner: MemoryPreferences,
}

impl JsonPreferences {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let values = read_json(&path)?;
        Ok(Self {
            path,
            inner: MemoryPreferences {
                values: RwLock::new(values),
            },
        })
    }

    /// Re-read the file; the previous values stay in place on error.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let values = read_json(&self.path)?;
        self.inner.replace_all(values);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_json(path: &Path) -> Result<HashMap<String, PrefValue>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

impl PreferenceStore for JsonPreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.inner.get(key)
    }

    fn snapshot(&self) -> Result<PipelineConfig, ConfigError> {
        self.inner.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn empty_store_yields_defaults() {
        let prefs = MemoryPreferences::new();
        let cfg = prefs.snapshot().unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert!(cfg.grayscale);
        assert_eq!(cfg.pattern, PatternSpec::new(4, 5));
        assert!(cfg.resize.is_passthrough());
    }

    #[test]
    fn values_are_parsed_from_size_strings() {
        let prefs = MemoryPreferences::new();
        prefs.set_bool(KEY_GRAYSCALE, false);
        prefs.set_string(KEY_PATTERN, "9x6");
        prefs.set_string(KEY_RESIZE, " 320 x 240 ");
        let cfg = prefs.snapshot().unwrap();
        assert!(!cfg.grayscale);
        assert_eq!(cfg.pattern, PatternSpec::new(9, 6));
        assert_eq!(cfg.resize, ResizeSpec::new(320, 240));
    }

    #[test]
    fn malformed_size_is_a_parse_error() {
        let prefs = MemoryPreferences::new();
        prefs.set_string(KEY_PATTERN, "abcx5");
        match prefs.snapshot() {
            Err(ConfigError::Parse { key, value, .. }) => {
                assert_eq!(key, KEY_PATTERN);
                assert_eq!(value, "abcx5");
            }
            other => panic!("unexpected {other:?}"),
        }

        prefs.set_string(KEY_PATTERN, "4x5");
        prefs.set_string(KEY_RESIZE, "640");
        assert!(matches!(prefs.snapshot(), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn wrong_types_are_reported() {
        let prefs = MemoryPreferences::new();
        prefs.set_string(KEY_GRAYSCALE, "yes");
        assert!(matches!(
            prefs.snapshot(),
            Err(ConfigError::WrongType { expected: "bool", .. })
        ));
        assert!(prefs.get_bool(KEY_GRAYSCALE, true).is_err());
        assert_eq!(prefs.get_string("missing", "d").unwrap(), "d");
    }

    #[test]
    fn config_round_trips_through_prefs() {
        let cfg = PipelineConfig {
            grayscale: false,
            pattern: PatternSpec::new(7, 5),
            resize: ResizeSpec::new(320, 240),
        };
        assert_eq!(MemoryPreferences::from_config(&cfg).snapshot().unwrap(), cfg);
    }

    #[test]
    fn batched_updates_are_never_seen_half_applied() {
        let a = PipelineConfig {
            grayscale: true,
            pattern: PatternSpec::new(4, 5),
            resize: ResizeSpec::new(320, 240),
        };
        let b = PipelineConfig {
            grayscale: false,
            pattern: PatternSpec::new(9, 6),
            resize: ResizeSpec::new(640, 480),
        };
        let prefs = Arc::new(MemoryPreferences::from_config(&a));
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let prefs = prefs.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut flip = false;
                while !stop.load(Ordering::Relaxed) {
                    prefs.apply(if flip { &a } else { &b });
                    flip = !flip;
                }
            })
        };

        for _ in 0..20_000 {
            let cfg = prefs.snapshot().unwrap();
            assert!(cfg == a || cfg == b, "torn snapshot {cfg:?}");
        }
        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }

    #[test]
    fn update_closure_sees_and_returns_current_values() {
        let prefs = MemoryPreferences::new();
        prefs.set_string(KEY_PATTERN, "9x6");
        let previous = prefs.update(|values| {
            let old = values.insert(KEY_PATTERN.to_string(), PrefValue::Str("7x5".into()));
            values.insert(KEY_RESIZE.to_string(), PrefValue::Str("160x120".into()));
            old
        });
        assert_eq!(previous, Some(PrefValue::Str("9x6".into())));
        let cfg = prefs.snapshot().unwrap();
        assert_eq!(cfg.pattern, PatternSpec::new(7, 5));
        assert_eq!(cfg.resize, ResizeSpec::new(160, 120));
    }

    #[test]
    fn json_file_is_loaded_and_reloaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"preGrayScaled": false, "prefCalibSize": "6x4"}}"#).unwrap();
        let prefs = JsonPreferences::load(file.path()).unwrap();
        let cfg = prefs.snapshot().unwrap();
        assert!(!cfg.grayscale);
        assert_eq!(cfg.pattern, PatternSpec::new(6, 4));

        std::fs::write(file.path(), r#"{"prefSizeResize": "160x120"}"#).unwrap();
        prefs.reload().unwrap();
        let cfg = prefs.snapshot().unwrap();
        assert!(cfg.grayscale);
        assert_eq!(cfg.resize, ResizeSpec::new(160, 120));

        std::fs::write(file.path(), "not json").unwrap();
        assert!(matches!(prefs.reload(), Err(ConfigError::Json(_))));
        assert_eq!(prefs.snapshot().unwrap().resize, ResizeSpec::new(160, 120));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = JsonPreferences::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
