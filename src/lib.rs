//! # Timbrel - MIDI sequencing core
//!
//! The timing and routing layer of a software synthesizer.
//!
//! ## Architecture
//!
//! Timbrel is an umbrella crate that coordinates:
//! - **timbrel-midi** - MIDI events, Standard MIDI File parsing, handler plumbing
//! - **timbrel-core** - Player, Sequencer, MidiRouter, settings and clocks
//!
//! The synth itself is supplied by the caller through the [`Synth`] trait.
//!
//! ## Quick Start
//!
//! ```ignore
//! use timbrel::prelude::*;
//!
//! let engine = TimbrelEngine::builder(Arc::new(MySynth::new())).build()?;
//!
//! // Play a file
//! engine.queue_file("song.mid")?;
//! engine.player().play()?;
//!
//! // Schedule a note 500 ms from now
//! let note = SequencerEvent::note(0, 60, 100, 250).with_dest(engine.synth_client());
//! engine.sequencer().send_at(&note, 500, false)?;
//!
//! // Audio callback
//! engine.render(&mut left, &mut right);
//! ```

/// Re-export of timbrel-core for direct access
pub use timbrel_core as core;

/// Re-export of timbrel-midi for direct access
pub use timbrel_midi as midi;

pub use timbrel_core::{
    keys,
    ClientCallback,
    ClientId,
    // Router
    MidiRouter,
    // Player
    Player,
    PlayerStatus,
    PlaylistItem,
    RouterRule,
    RuleType,
    SeqEventKind,
    SeqEventType,
    // Sequencer
    Sequencer,
    SequencerEvent,
    SettingValue,
    // Settings
    Settings,
    SynthBinding,
    TempoKind,
};

pub use timbrel_midi::{
    handler_fn, EventType, MidiEvent, MidiEventBuilder, MidiEventHandler, MidiFile,
    SharedHandler, Track, TracingHandler,
};

mod builder;
mod engine;

pub mod error;

pub use builder::TimbrelEngineBuilder;
pub use engine::{Synth, TimbrelEngine};
pub use error::{Error, Result};

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{Error, Result, Synth, TimbrelEngine, TimbrelEngineBuilder};

    pub use crate::{
        keys, EventType, MidiEvent, MidiEventHandler, MidiFile, Player, PlayerStatus,
        RouterRule, RuleType, SeqEventKind, SequencerEvent, Settings, TempoKind,
    };

    pub use std::sync::Arc;
}
