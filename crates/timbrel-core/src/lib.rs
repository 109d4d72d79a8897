//! Sequencing and timing core for Timbrel.
//!
//! # Primary API
//!
//! - [`Player`]: Standard MIDI File playback with playlist, loop, seek and tempo
//! - [`Sequencer`]: time-stamped event queue with named clients
//! - [`MidiRouter`]: rule-based channel/parameter remapping
//! - [`Settings`]: typed configuration registry
//!
//! Each [`Player`] and [`Sequencer`] is driven either by a [`SystemTimer`]
//! thread or from the render loop through a [`SampleTimer`].
//!
//! # Example
//!
//! ```ignore
//! use timbrel_core::{Player, Settings};
//! use timbrel_midi::TracingHandler;
//! use std::sync::Arc;
//!
//! let settings = Settings::new();
//! let player = Player::new(&settings, Arc::new(TracingHandler::sink("player")))?;
//! player.add("song.mid");
//! player.play()?;
//!
//! // In the render loop:
//! player.advance_samples(64);
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{keys, SettingValue, Settings};

pub(crate) mod lockfree;
pub use lockfree::{AtomicDouble, AtomicFlag};

pub mod timer;
pub use timer::{ClockClient, SampleTimer, SystemTimer};

pub mod router;
pub use router::{MidiRouter, RouterRule, RuleType, Window};

pub mod sequencer;
pub use sequencer::{
    ClientCallback, ClientId, SeqEventKind, SeqEventType, Sequencer, SequencerEvent,
    SynthBinding,
};

pub mod player;
pub use player::{Player, PlayerStatus, PlaylistItem, TempoKind};
