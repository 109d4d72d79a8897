//! Delta-timed event list with a replay cursor.

use crate::event::{EventType, MidiEvent};

/// One track of a song.
///
/// `ticks` is the absolute position of the last event handed out by
/// [`Track::next_due`]. It only moves forward; [`Track::reset`] is the only
/// way back to the head.
#[derive(Debug, Clone, Default)]
pub struct Track {
    name: Option<String>,
    events: Vec<MidiEvent>,
    cursor: usize,
    ticks: u64,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<MidiEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Append an event, its `dtime` relative to the previous one.
    pub fn push(&mut self, event: MidiEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Rewind the cursor to the first event.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.ticks = 0;
    }

    /// True once every event has been replayed.
    #[inline]
    pub fn is_eot(&self) -> bool {
        self.cursor >= self.events.len()
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Sum of all delta times.
    pub fn total_ticks(&self) -> u64 {
        self.events.iter().map(|e| u64::from(e.dtime)).sum()
    }

    /// Absolute tick of the event under the cursor.
    pub fn next_tick(&self) -> Option<u64> {
        self.events
            .get(self.cursor)
            .map(|e| self.ticks + u64::from(e.dtime))
    }

    /// Hand out the next event if it falls at or before `until`.
    ///
    /// An `EndOfTrack` meta event moves the cursor past the end so the track
    /// counts as finished even if stray events follow it.
    pub fn next_due(&mut self, until: u64) -> Option<&MidiEvent> {
        let at = self.next_tick()?;
        if at > until {
            return None;
        }
        self.ticks = at;
        let index = self.cursor;
        self.cursor = if self.events[index].kind == EventType::EndOfTrack {
            self.events.len()
        } else {
            index + 1
        };
        Some(&self.events[index])
    }
}

impl FromIterator<MidiEvent> for Track {
    fn from_iter<I: IntoIterator<Item = MidiEvent>>(iter: I) -> Self {
        Self::with_events(iter.into_iter().collect())
    }
}
