//! Error types for the MIDI data model.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI parse error: {0}")]
    MidiFileParse(String),

    #[error("Unsupported MIDI timing format")]
    MidiUnsupportedTiming,

    #[error("Too many tracks: {count} (maximum {max})")]
    TooManyTracks { count: usize, max: usize },

    #[error("Invalid division: {0}")]
    InvalidDivision(u16),

    #[error("Event cannot be encoded: {0}")]
    Unencodable(String),

    #[error("Event rejected: {0}")]
    EventRejected(String),
}

impl From<midly::Error> for Error {
    fn from(e: midly::Error) -> Self {
        Error::MidiFileParse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
