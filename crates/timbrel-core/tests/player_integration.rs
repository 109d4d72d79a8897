//! Player integration tests.
//!
//! Songs are built in memory (or written to temp files) and the player is
//! driven by calling `process` with a hand-fed millisecond clock.

use approx::assert_relative_eq;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use timbrel_core::{keys, Player, PlayerStatus, Settings, TempoKind};
use timbrel_midi::{handler_fn, EventType, MidiEvent, MidiFile, Track};

type Log = Arc<Mutex<Vec<(u64, MidiEvent)>>>;

struct Harness {
    player: Player,
    log: Log,
    now: Arc<AtomicU64>,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(&Settings::new())
    }

    fn with_settings(settings: &Settings) -> Self {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let now = Arc::new(AtomicU64::new(0));
        let (sink, clock) = (log.clone(), now.clone());
        let player = Player::new(
            settings,
            handler_fn(move |e| {
                sink.lock().push((clock.load(Ordering::SeqCst), e.clone()));
                Ok(())
            }),
        )
        .unwrap();
        Self { player, log, now }
    }

    fn tick(&self, msec: u64) -> bool {
        self.now.store(msec, Ordering::SeqCst);
        self.player.process(msec)
    }

    /// Drive the clock in 10 ms steps over `range`.
    fn run(&self, range: std::ops::RangeInclusive<u64>) {
        for msec in range.step_by(10) {
            self.tick(msec);
        }
    }

    fn notes_on(&self) -> Vec<(u64, u32)> {
        self.log
            .lock()
            .iter()
            .filter(|(_, e)| e.is_note_on())
            .map(|(t, e)| (*t, e.param1))
            .collect()
    }
}

/// One track with a note every `spacing` ticks (each lasting `spacing / 2`).
fn scale_song(division: u16, keys: &[u32], spacing: u32) -> MidiFile {
    let mut events = Vec::new();
    for (i, &key) in keys.iter().enumerate() {
        let gap = if i == 0 { 0 } else { spacing / 2 };
        events.push(MidiEvent::note_on(0, key, 100).with_dtime(gap));
        events.push(MidiEvent::note_off(0, key, 0).with_dtime(spacing / 2));
    }
    events.push(MidiEvent::end_of_track());
    let mut song = MidiFile::new(division).unwrap();
    song.add_track(Track::with_events(events)).unwrap();
    song
}

// =============================================================================
// Timing
// =============================================================================

#[test]
fn test_end_to_end_tempo() {
    let mut song = MidiFile::new(480).unwrap();
    song.add_track(Track::with_events(vec![
        MidiEvent::set_tempo(500_000),
        MidiEvent::note_on(0, 60, 100).with_dtime(480),
        MidiEvent::note_off(0, 60, 0).with_dtime(480),
        MidiEvent::end_of_track(),
    ]))
    .unwrap();
    let bytes = song.to_bytes().unwrap();

    let h = Harness::new();
    h.player.add_mem(&bytes);
    h.player.play().unwrap();
    h.run(0..=1500);

    let log = h.log.lock();
    let on = log.iter().find(|(_, e)| e.kind == EventType::NoteOn).unwrap();
    let off = log.iter().find(|(_, e)| e.kind == EventType::NoteOff).unwrap();
    assert_relative_eq!(on.0 as f64, 500.0, epsilon = 10.0);
    assert_relative_eq!(off.0 as f64, 1000.0, epsilon = 10.0);
    assert_eq!(h.player.status(), PlayerStatus::Done);
    assert_relative_eq!(h.player.bpm(), 120.0);
}

#[test]
fn test_multiple_tracks_serviced_together() {
    let mut song = MidiFile::new(96).unwrap();
    song.add_track(Track::with_events(vec![
        MidiEvent::set_tempo(1_000_000),
        MidiEvent::end_of_track().with_dtime(96),
    ]))
    .unwrap();
    for channel in 0..3 {
        song.add_track(Track::with_events(vec![
            MidiEvent::note_on(channel, 60 + channel, 90).with_dtime(48),
            MidiEvent::note_off(channel, 60 + channel, 0).with_dtime(48),
            MidiEvent::end_of_track(),
        ]))
        .unwrap();
    }

    let h = Harness::new();
    h.player.add_song(song);
    h.player.play().unwrap();
    h.run(0..=1200);

    // 48 ticks at 60 bpm and division 96 is half a second.
    assert_eq!(h.notes_on(), vec![(500, 60), (500, 61), (500, 62)]);
    assert_eq!(h.player.division(), 96);
    assert_eq!(h.player.total_ticks(), 96);
}

#[test]
fn test_external_tempo_ignores_file_tempo() {
    let mut song = MidiFile::new(480).unwrap();
    song.add_track(Track::with_events(vec![
        MidiEvent::set_tempo(1_000_000),
        MidiEvent::note_on(0, 60, 100).with_dtime(480),
        MidiEvent::end_of_track(),
    ]))
    .unwrap();

    let h = Harness::new();
    h.player.add_song(song);
    h.player.set_bpm(240.0).unwrap();
    h.player.play().unwrap();
    h.run(0..=1500);

    assert_eq!(h.notes_on(), vec![(250, 60)]);
    assert_relative_eq!(h.player.bpm(), 240.0);

    // The file's tempo still applies once internal sync is selected again.
    h.player.set_tempo(TempoKind::Internal, 1.0).unwrap();
    assert_relative_eq!(h.player.bpm(), 60.0);
}

proptest! {
    #[test]
    fn prop_tick_monotonic(
        steps in prop::collection::vec((0u64..40, prop::option::of(0.25f64..4.0)), 1..200)
    ) {
        let h = Harness::new();
        h.player.add_song(scale_song(480, &[60, 62, 64, 65, 67, 69, 71, 72], 48_000));
        h.player.play().unwrap();

        let mut msec = 0;
        let mut last = 0;
        for (step, multiplier) in steps {
            if let Some(m) = multiplier {
                h.player.set_tempo(TempoKind::Internal, m).unwrap();
            }
            msec += step;
            h.tick(msec);
            let tick = h.player.current_tick();
            prop_assert!(tick >= last, "tick went back from {} to {}", last, tick);
            last = tick;
        }
        prop_assert_eq!(h.player.status(), PlayerStatus::Playing);
    }
}

// =============================================================================
// Seek
// =============================================================================

#[test]
fn test_seek_skips_earlier_notes_and_applies_tempo() {
    let mut song = MidiFile::new(480).unwrap();
    song.add_track(Track::with_events(vec![
        MidiEvent::note_on(0, 60, 100),
        MidiEvent::note_on(0, 62, 100).with_dtime(480),
        MidiEvent::set_tempo(250_000).with_dtime(240),
        MidiEvent::note_on(0, 64, 100).with_dtime(240),
        MidiEvent::note_on(0, 65, 100).with_dtime(480),
        MidiEvent::end_of_track(),
    ]))
    .unwrap();

    let h = Harness::new();
    h.player.add_song(song);
    h.player.play().unwrap();
    h.run(0..=100);
    assert_eq!(h.notes_on(), vec![(0, 60)]);

    h.player.seek(1000).unwrap();
    h.tick(110);
    assert_eq!(h.player.current_tick(), 1000);
    assert_relative_eq!(h.player.midi_tempo(), 250_000.0);

    h.run(120..=600);
    // Key 60 was sounding, so the seek silenced channel 0.
    let sound_off = h
        .log
        .lock()
        .iter()
        .any(|(t, e)| *t == 110 && e.kind == EventType::ControlChange && e.param1 == 120);
    assert!(sound_off);
    // 440 ticks at 240 bpm after the seek.
    let notes = h.notes_on();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[1].1, 65);
    assert_relative_eq!(notes[1].0 as f64, 110.0 + 229.2, epsilon = 10.0);
}

#[test]
fn test_seek_backwards_replays_from_target() {
    let h = Harness::new();
    h.player.add_song(scale_song(480, &[60, 62, 64], 480));
    h.player.play().unwrap();
    h.run(0..=1100);
    assert_eq!(h.notes_on().len(), 3);

    h.player.seek(480).unwrap();
    h.run(1110..=1120);
    assert_eq!(h.player.current_tick(), 490);
    let notes = h.notes_on();
    // The note exactly at the target sounds again.
    assert_eq!(notes[3], (1110, 62));
}

#[test]
fn test_seek_before_play_is_applied_on_load() {
    let h = Harness::new();
    h.player.add_song(scale_song(480, &[60, 62, 64], 480));
    h.player.seek(960).unwrap();
    h.player.play().unwrap();
    h.tick(0);
    assert_eq!(h.player.current_tick(), 960);
    assert_eq!(h.notes_on(), vec![(0, 64)]);
}

// =============================================================================
// Playlist and loop
// =============================================================================

#[test]
fn test_loop_twice_over_two_songs() {
    let h = Harness::new();
    h.player.add_song(scale_song(480, &[60], 48));
    h.player.add_song(scale_song(480, &[72], 48));
    h.player.set_loop(2);
    h.player.play().unwrap();

    let mut msec = 0;
    while h.player.status() == PlayerStatus::Playing && msec < 10_000 {
        h.tick(msec);
        msec += 10;
    }
    assert_eq!(h.player.load_count(), 4);
    assert_eq!(h.player.status(), PlayerStatus::Done);
    let keys: Vec<u32> = h.notes_on().into_iter().map(|(_, k)| k).collect();
    assert_eq!(keys, vec![60, 72, 60, 72]);
}

#[test]
fn test_infinite_loop_never_finishes() {
    let h = Harness::new();
    h.player.add_song(scale_song(480, &[60], 48));
    h.player.add_song(scale_song(480, &[72], 48));
    h.player.set_loop(-1);
    h.player.play().unwrap();

    let mut msec = 0;
    while h.player.load_count() < 20 {
        assert!(h.tick(msec));
        assert_eq!(h.player.status(), PlayerStatus::Playing);
        msec += 10;
    }
    assert_eq!(h.player.loop_count(), -1);
}

#[test]
fn test_play_again_after_playlist_finished() {
    let h = Harness::new();
    h.player.add_song(scale_song(480, &[60], 48));
    h.player.play().unwrap();
    h.run(0..=200);
    assert_eq!(h.player.status(), PlayerStatus::Done);
    assert_eq!(h.player.loop_count(), 0);

    h.player.play().unwrap();
    h.run(210..=400);
    assert_eq!(h.player.load_count(), 2);
    assert_eq!(h.notes_on().len(), 2);
}

#[test]
fn test_file_playlist() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let bytes = scale_song(480, &[60, 64], 96).to_bytes().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let h = Harness::new();
    h.player.add(file.path());
    h.player.play().unwrap();
    h.run(0..=500);

    assert_eq!(h.notes_on(), vec![(0, 60), (100, 64)]);
    assert_eq!(h.player.status(), PlayerStatus::Done);
}

#[test]
fn test_broken_entries_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new();
    h.player.add(dir.path().join("missing.mid"));
    h.player.add_mem(b"MThd garbage");
    h.player.add_song(scale_song(480, &[67], 48));
    h.player.play().unwrap();
    h.run(0..=200);

    assert_eq!(h.notes_on(), vec![(0, 67)]);
    assert_eq!(h.player.load_count(), 1);
}

#[test]
fn test_all_entries_failing_stops_playback() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new();
    h.player.add(dir.path().join("a.mid"));
    h.player.add_mem(b"not midi");
    h.player.set_loop(-1);
    h.player.play().unwrap();

    assert!(!h.tick(0));
    assert_eq!(h.player.status(), PlayerStatus::Done);
    assert_eq!(h.player.load_count(), 0);
}

#[test]
fn test_reset_between_songs_follows_setting() {
    let settings = Settings::new();
    let h = Harness::with_settings(&settings);
    h.player.add_song(scale_song(480, &[60], 48));
    h.player.add_song(scale_song(480, &[62], 48));
    h.player.play().unwrap();
    h.run(0..=40);
    settings.set_bool(keys::PLAYER_RESET_SYNTH, false).unwrap();
    h.run(50..=300);

    let resets = h
        .log
        .lock()
        .iter()
        .filter(|(_, e)| e.kind == EventType::SystemReset)
        .count();
    assert_eq!(resets, 1);
}
