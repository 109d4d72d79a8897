//! Centralized error type for the timbrel umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] timbrel_core::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] timbrel_midi::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
