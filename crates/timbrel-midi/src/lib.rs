//! MIDI data model for Timbrel.
//!
//! Events, delta-timed tracks, Standard MIDI File loading and writing, and
//! the [`MidiEventHandler`] dispatch trait used throughout the engine.
//!
//! # Example
//!
//! ```ignore
//! use timbrel_midi::{MidiEvent, MidiFile, Track};
//!
//! let mut song = MidiFile::new(480)?;
//! song.add_track(Track::with_events(vec![
//!     MidiEvent::note_on(0, 60, 100),
//!     MidiEvent::note_off(0, 60, 0).with_dtime(480),
//!     MidiEvent::end_of_track(),
//! ]))?;
//! let bytes = song.to_bytes()?;
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod event;
pub use event::{
    cc, EventType, MidiEvent, MidiEventBuilder, DEFAULT_TEMPO, MAX_NUMBER_OF_CHANNELS,
    MAX_NUMBER_OF_TRACKS, PITCH_BEND_CENTER, PITCH_BEND_MAX,
};

pub mod track;
pub use track::Track;

pub mod file;
pub use file::MidiFile;

pub mod handler;
pub use handler::{handler_fn, MidiEventHandler, SharedHandler, TracingHandler};
