//! Error types for timbrel-core.

use thiserror::Error;

/// Error type for timbrel-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Setting '{name}' is not of type {expected}")]
    SettingType { name: String, expected: &'static str },

    #[error("Invalid seek position: {0}")]
    InvalidSeek(i64),

    #[error("A seek is already pending")]
    SeekPending,

    #[error("Invalid tempo: {0}")]
    InvalidTempo(f64),

    #[error("Invalid time scale: {0}. Must be a positive number")]
    InvalidTimeScale(f64),

    #[error("Event queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Unknown sequencer client: {0}")]
    UnknownClient(u32),

    #[error("Invalid router rule: {0}")]
    InvalidRule(String),

    #[error("Routing dropped {dropped} event(s)")]
    RouteFailed { dropped: usize },

    #[error("Failed to spawn timer thread: {0}")]
    TimerSpawn(#[source] std::io::Error),

    #[error(transparent)]
    Midi(#[from] timbrel_midi::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
