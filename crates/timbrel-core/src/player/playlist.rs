//! Songs queued on a player.

use std::path::PathBuf;
use std::sync::Arc;
use timbrel_midi::{MidiFile, MAX_NUMBER_OF_TRACKS};

/// One playlist entry. Entries are only parsed when the player reaches them.
#[derive(Debug, Clone)]
pub enum PlaylistItem {
    File(PathBuf),
    Memory(Arc<[u8]>),
    Song(Arc<MidiFile>),
}

impl PlaylistItem {
    /// Produce a fresh copy of the song with every track rewound.
    pub fn load(&self) -> timbrel_midi::Result<MidiFile> {
        let mut song = match self {
            PlaylistItem::File(path) => MidiFile::load(path)?,
            PlaylistItem::Memory(bytes) => MidiFile::parse(bytes)?,
            PlaylistItem::Song(song) => MidiFile::clone(song),
        };
        if song.tracks.len() > MAX_NUMBER_OF_TRACKS {
            return Err(timbrel_midi::Error::TooManyTracks {
                count: song.tracks.len(),
                max: MAX_NUMBER_OF_TRACKS,
            });
        }
        for track in &mut song.tracks {
            track.reset();
        }
        Ok(song)
    }

    /// Short description for log lines.
    pub fn describe(&self) -> String {
        match self {
            PlaylistItem::File(path) => path.display().to_string(),
            PlaylistItem::Memory(bytes) => format!("<{} bytes in memory>", bytes.len()),
            PlaylistItem::Song(song) => format!("<song, {} tracks>", song.tracks.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timbrel_midi::{MidiEvent, Track};

    #[test]
    fn test_song_entries_are_rewound() {
        let mut song = MidiFile::new(96).unwrap();
        song.add_track(Track::with_events(vec![
            MidiEvent::note_on(0, 60, 100),
            MidiEvent::end_of_track().with_dtime(96),
        ]))
        .unwrap();
        song.tracks[0].next_due(u64::MAX);

        let loaded = PlaylistItem::Song(Arc::new(song)).load().unwrap();
        assert_eq!(loaded.tracks[0].ticks(), 0);
        assert!(!loaded.tracks[0].is_eot());
    }

    #[test]
    fn test_garbage_bytes_fail() {
        let item = PlaylistItem::Memory(Arc::from(&b"not a midi file"[..]));
        assert!(item.load().is_err());
        assert!(item.describe().contains("15 bytes"));
    }
}
