//! Typed settings registry.
//!
//! Every key is registered with a type, a default and either a numeric range
//! or a list of allowed strings. Values are validated on write; invalid
//! writes are rejected and leave the stored value untouched.

use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registered setting names.
pub mod keys {
    /// `"sample"` (advanced by rendering) or `"system"` (timer thread).
    pub const PLAYER_TIMING_SOURCE: &str = "player.timing-source";
    /// Send a System Reset to the synth between songs.
    pub const PLAYER_RESET_SYNTH: &str = "player.reset-synth";
    /// Period of the player's system timer.
    pub const PLAYER_TIMER_PERIOD_MS: &str = "player.timer-period-ms";
    /// Maximum number of events waiting in a sequencer queue.
    pub const SEQUENCER_QUEUE_CAPACITY: &str = "sequencer.queue-capacity";
    /// Drive the sequencer clock from the system clock.
    pub const SEQUENCER_USE_SYSTEM_TIMER: &str = "sequencer.use-system-timer";
    pub const SYNTH_MIDI_CHANNELS: &str = "synth.midi-channels";
    pub const SYNTH_SAMPLE_RATE: &str = "synth.sample-rate";
}

/// A setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingValue {
    Int(i64),
    Num(f64),
    Str(String),
}

#[derive(Debug, Clone)]
enum Constraint {
    Int { min: i64, max: i64 },
    Num { min: f64, max: f64 },
    Str { options: Vec<String> },
}

#[derive(Debug, Clone)]
struct Entry {
    value: SettingValue,
    default: SettingValue,
    constraint: Constraint,
}

type ChangeCallback = Arc<dyn Fn(&str, &SettingValue) -> bool + Send + Sync>;

/// Concurrent settings store, cheap to clone.
#[derive(Clone)]
pub struct Settings {
    entries: Arc<DashMap<String, Entry>>,
    callbacks: Arc<DashMap<String, Vec<ChangeCallback>>>,
}

impl Settings {
    /// Settings with every engine key registered at its default.
    pub fn new() -> Self {
        let settings = Self::empty();
        settings.register_str(keys::PLAYER_TIMING_SOURCE, "sample", &["sample", "system"]);
        settings.register_int(keys::PLAYER_RESET_SYNTH, 1, 0, 1);
        settings.register_int(keys::PLAYER_TIMER_PERIOD_MS, 4, 1, 1000);
        settings.register_int(keys::SEQUENCER_QUEUE_CAPACITY, 1000, 1, 1 << 20);
        settings.register_int(keys::SEQUENCER_USE_SYSTEM_TIMER, 0, 0, 1);
        settings.register_int(keys::SYNTH_MIDI_CHANNELS, 16, 16, 256);
        settings.register_num(keys::SYNTH_SAMPLE_RATE, 44100.0, 8000.0, 384000.0);
        settings
    }

    /// A registry with no keys.
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            callbacks: Arc::new(DashMap::new()),
        }
    }

    pub fn register_int(&self, name: &str, default: i64, min: i64, max: i64) {
        self.register(
            name,
            SettingValue::Int(default),
            Constraint::Int { min, max },
        );
    }

    pub fn register_num(&self, name: &str, default: f64, min: f64, max: f64) {
        self.register(
            name,
            SettingValue::Num(default),
            Constraint::Num { min, max },
        );
    }

    /// An empty `options` list accepts any string.
    pub fn register_str(&self, name: &str, default: &str, options: &[&str]) {
        self.register(
            name,
            SettingValue::Str(default.to_string()),
            Constraint::Str {
                options: options.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    fn register(&self, name: &str, default: SettingValue, constraint: Constraint) {
        self.entries.insert(
            name.to_string(),
            Entry {
                value: default.clone(),
                default,
                constraint,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<SettingValue> {
        self.entries
            .get(name)
            .map(|e| e.value.clone())
            .ok_or_else(|| Error::UnknownSetting(name.to_string()))
    }

    pub fn default_value(&self, name: &str) -> Result<SettingValue> {
        self.entries
            .get(name)
            .map(|e| e.default.clone())
            .ok_or_else(|| Error::UnknownSetting(name.to_string()))
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            SettingValue::Int(v) => Ok(v),
            _ => Err(Error::SettingType {
                name: name.to_string(),
                expected: "int",
            }),
        }
    }

    pub fn get_num(&self, name: &str) -> Result<f64> {
        match self.get(name)? {
            SettingValue::Num(v) => Ok(v),
            _ => Err(Error::SettingType {
                name: name.to_string(),
                expected: "num",
            }),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<String> {
        match self.get(name)? {
            SettingValue::Str(v) => Ok(v),
            _ => Err(Error::SettingType {
                name: name.to_string(),
                expected: "str",
            }),
        }
    }

    /// Int settings used as booleans (non-zero is true).
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        Ok(self.get_int(name)? != 0)
    }

    pub fn set_int(&self, name: &str, value: i64) -> Result<()> {
        self.set(name, SettingValue::Int(value))
    }

    pub fn set_num(&self, name: &str, value: f64) -> Result<()> {
        self.set(name, SettingValue::Num(value))
    }

    pub fn set_str(&self, name: &str, value: &str) -> Result<()> {
        self.set(name, SettingValue::Str(value.to_string()))
    }

    pub fn set_bool(&self, name: &str, value: bool) -> Result<()> {
        self.set_int(name, i64::from(value))
    }

    /// Validate and store `value`, then run the change callbacks for `name`.
    pub fn set(&self, name: &str, value: SettingValue) -> Result<()> {
        {
            let mut entry = self
                .entries
                .get_mut(name)
                .ok_or_else(|| Error::UnknownSetting(name.to_string()))?;
            if let Err(e) = Self::check(name, &entry.constraint, &value) {
                warn!("Rejected setting {}: {}", name, e);
                return Err(e);
            }
            entry.value = value.clone();
        }
        debug!("Setting {} = {:?}", name, value);

        // Clone out so callbacks may touch the registry.
        let callbacks: Vec<ChangeCallback> = self
            .callbacks
            .get(name)
            .map(|cbs| cbs.value().clone())
            .unwrap_or_default();
        let finished: Vec<ChangeCallback> = callbacks
            .into_iter()
            .filter(|callback| !callback(name, &value))
            .collect();
        if !finished.is_empty() {
            if let Some(mut list) = self.callbacks.get_mut(name) {
                list.retain(|c| !finished.iter().any(|f| Arc::ptr_eq(c, f)));
            }
            debug!("Dropped {} change callback(s) for {}", finished.len(), name);
        }
        Ok(())
    }

    fn check(name: &str, constraint: &Constraint, value: &SettingValue) -> Result<()> {
        match (constraint, value) {
            (Constraint::Int { min, max }, SettingValue::Int(v)) => {
                if v < min || v > max {
                    return Err(Error::InvalidConfig(format!(
                        "{name} = {v} out of range ({min}-{max})"
                    )));
                }
            }
            (Constraint::Num { min, max }, SettingValue::Num(v)) => {
                if !v.is_finite() || v < min || v > max {
                    return Err(Error::InvalidConfig(format!(
                        "{name} = {v} out of range ({min}-{max})"
                    )));
                }
            }
            (Constraint::Str { options }, SettingValue::Str(v)) => {
                if !options.is_empty() && !options.iter().any(|o| o == v) {
                    return Err(Error::InvalidConfig(format!(
                        "{name} = {v:?} is not one of {options:?}"
                    )));
                }
            }
            (Constraint::Int { .. }, _) => {
                return Err(Error::SettingType {
                    name: name.to_string(),
                    expected: "int",
                })
            }
            (Constraint::Num { .. }, _) => {
                return Err(Error::SettingType {
                    name: name.to_string(),
                    expected: "num",
                })
            }
            (Constraint::Str { .. }, _) => {
                return Err(Error::SettingType {
                    name: name.to_string(),
                    expected: "str",
                })
            }
        }
        Ok(())
    }

    /// Run `callback` after every successful write to `name`. The callback
    /// stays registered while it returns `true`.
    pub fn on_change<F>(&self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(&str, &SettingValue) -> bool + Send + Sync + 'static,
    {
        if !self.contains(name) {
            return Err(Error::UnknownSetting(name.to_string()));
        }
        self.callbacks
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(callback));
        Ok(())
    }

    /// Number of change callbacks registered for `name`.
    pub fn callback_count(&self, name: &str) -> usize {
        self.callbacks.get(name).map_or(0, |cbs| cbs.len())
    }

    /// Current values, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, SettingValue> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}
