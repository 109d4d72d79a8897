//! Player status and tempo source.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerStatus {
    /// Created, nothing played yet.
    #[default]
    Ready,
    Playing,
    /// Stopped, or the playlist has run out.
    Done,
}

impl PlayerStatus {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PlayerStatus::Ready => 0,
            PlayerStatus::Playing => 1,
            PlayerStatus::Done => 2,
        }
    }

    pub(crate) fn from_u8(val: u8) -> Self {
        match val {
            1 => PlayerStatus::Playing,
            2 => PlayerStatus::Done,
            _ => PlayerStatus::Ready,
        }
    }
}

/// How [`Player::set_tempo`](super::Player::set_tempo) interprets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempoKind {
    /// Follow the file's tempo events, scaled by a multiplier.
    Internal,
    /// Fixed tempo in beats per minute, ignoring the file.
    ExternalBpm,
    /// Fixed tempo in µs per quarter note, ignoring the file.
    ExternalMidi,
}

/// Multiplier range for [`TempoKind::Internal`].
pub const MIN_TEMPO_MULTIPLIER: f64 = 0.001;
pub const MAX_TEMPO_MULTIPLIER: f64 = 1000.0;

/// Range for [`TempoKind::ExternalBpm`] and [`TempoKind::ExternalMidi`].
pub const MIN_TEMPO_VALUE: f64 = 1.0;
pub const MAX_TEMPO_VALUE: f64 = 60_000_000.0;
