//! Standard MIDI File player.
//!
//! The player owns the tracks of the current song and replays their events
//! against a millisecond clock. Milliseconds are converted to ticks with
//!
//! ```text
//! cur_ticks = start_ticks + round((msec - start_msec) / deltatime)
//! deltatime = tempo / division / 1000 / multiplier     (internal tempo)
//! deltatime = tempo / division / 1000                  (external tempo)
//! ```
//!
//! Every tempo change rebases `start_ticks`/`start_msec` on the current
//! position so the tick count never jumps.
//!
//! The clock comes either from a [`SystemTimer`] thread or from the render
//! loop through [`Player::advance_samples`], chosen by the
//! `player.timing-source` setting. Control methods only touch atomics; the
//! playback state is taken with `try_lock` on the clock path so a busy
//! control thread delays a tick instead of blocking it.

mod playlist;
mod status;

pub use playlist::PlaylistItem;
pub use status::{
    PlayerStatus, TempoKind, MAX_TEMPO_MULTIPLIER, MAX_TEMPO_VALUE, MIN_TEMPO_MULTIPLIER,
    MIN_TEMPO_VALUE,
};

use crate::config::{keys, SettingValue, Settings};
use crate::lockfree::{AtomicDouble, AtomicFlag, HandlerCell, SlotCell};
use crate::timer::{ClockClient, SampleTimer, SystemTimer};
use crate::{Error, Result};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use timbrel_midi::{
    cc, EventType, MidiEvent, MidiFile, SharedHandler, Track, DEFAULT_TEMPO,
    MAX_NUMBER_OF_CHANNELS,
};
use tracing::{debug, info, warn};

/// Playlist passes played by default.
pub const DEFAULT_LOOP: i32 = 1;

/// Division assumed before the first song is loaded.
const DEFAULT_DIVISION: u16 = 480;

/// Called with the current tick whenever it changes.
pub type TickCallback = Box<dyn Fn(u64) + Send + Sync>;

enum Clock {
    System {
        period: Duration,
        timer: Mutex<Option<SystemTimer>>,
    },
    Sample(SampleTimer),
}

enum LoadOutcome {
    Loaded,
    /// Playlist busy; try again on the next tick.
    Retry,
    Exhausted,
}

struct PlaybackState {
    current: Option<usize>,
    tracks: Vec<Track>,
    division: u16,
    deltatime: f64,
    start_ticks: u64,
    cur_ticks: u64,
    start_msec: u64,
    cur_msec: u64,
    sounding: [bool; MAX_NUMBER_OF_CHANNELS],
    last_reported_tick: Option<u64>,
}

impl PlaybackState {
    fn new() -> Self {
        Self {
            current: None,
            tracks: Vec::new(),
            division: DEFAULT_DIVISION,
            deltatime: f64::from(DEFAULT_TEMPO) / f64::from(DEFAULT_DIVISION) / 1000.0,
            start_ticks: 0,
            cur_ticks: 0,
            start_msec: 0,
            cur_msec: 0,
            sounding: [false; MAX_NUMBER_OF_CHANNELS],
            last_reported_tick: None,
        }
    }

    #[inline]
    fn ticks_at(&self, msec: u64) -> u64 {
        let elapsed = msec.saturating_sub(self.start_msec) as f64;
        self.start_ticks + (elapsed / self.deltatime + 0.5) as u64
    }
}

struct PlayerInner {
    playlist: Mutex<Vec<PlaylistItem>>,
    state: Mutex<PlaybackState>,
    clock: Clock,

    status: AtomicU8,
    stopping: AtomicFlag,
    has_current: AtomicFlag,
    loop_count: AtomicI32,
    seek: SlotCell,

    miditempo: AtomicU32,
    exttempo: AtomicDouble,
    multiplier: AtomicDouble,
    sync_internal: AtomicFlag,
    tempo_dirty: AtomicFlag,

    cur_ticks: AtomicU64,
    total_ticks: AtomicU64,
    division: AtomicU32,
    load_count: AtomicU64,
    reset_synth: Arc<AtomicFlag>,

    handler: HandlerCell,
    tick_callback: ArcSwapOption<TickCallback>,
}

/// MIDI file player with a playlist.
///
/// Cheap to clone; clones control the same player.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    /// Create a player sending its events to `handler`.
    ///
    /// Reads `player.timing-source`, `player.timer-period-ms`,
    /// `player.reset-synth` and `synth.sample-rate`. Later changes to
    /// `player.reset-synth` are picked up live.
    pub fn new(settings: &Settings, handler: SharedHandler) -> Result<Self> {
        let clock = match settings.get_str(keys::PLAYER_TIMING_SOURCE)?.as_str() {
            "system" => {
                let period = settings.get_int(keys::PLAYER_TIMER_PERIOD_MS)?;
                Clock::System {
                    period: Duration::from_millis(period.max(1) as u64),
                    timer: Mutex::new(None),
                }
            }
            "sample" => Clock::Sample(SampleTimer::new(
                settings.get_num(keys::SYNTH_SAMPLE_RATE)?,
            )),
            other => {
                return Err(Error::InvalidConfig(format!(
                    "unknown timing source '{other}'"
                )))
            }
        };

        let reset_synth = Arc::new(AtomicFlag::new(
            settings.get_bool(keys::PLAYER_RESET_SYNTH)?,
        ));
        let observer: Weak<AtomicFlag> = Arc::downgrade(&reset_synth);
        settings.on_change(keys::PLAYER_RESET_SYNTH, move |_, value| {
            let Some(flag) = observer.upgrade() else {
                return false;
            };
            if let SettingValue::Int(v) = value {
                flag.set(*v != 0);
            }
            true
        })?;

        let inner = Arc::new(PlayerInner {
            playlist: Mutex::new(Vec::new()),
            state: Mutex::new(PlaybackState::new()),
            clock,
            status: AtomicU8::new(PlayerStatus::Ready.to_u8()),
            stopping: AtomicFlag::new(false),
            has_current: AtomicFlag::new(false),
            loop_count: AtomicI32::new(DEFAULT_LOOP),
            seek: SlotCell::new(),
            miditempo: AtomicU32::new(DEFAULT_TEMPO),
            exttempo: AtomicDouble::new(f64::from(DEFAULT_TEMPO)),
            multiplier: AtomicDouble::new(1.0),
            sync_internal: AtomicFlag::new(true),
            tempo_dirty: AtomicFlag::new(false),
            cur_ticks: AtomicU64::new(0),
            total_ticks: AtomicU64::new(0),
            division: AtomicU32::new(u32::from(DEFAULT_DIVISION)),
            load_count: AtomicU64::new(0),
            reset_synth,
            handler: HandlerCell::new(handler),
            tick_callback: ArcSwapOption::empty(),
        });
        debug!(
            "Created player (system timer: {})",
            matches!(inner.clock, Clock::System { .. })
        );
        Ok(Self { inner })
    }

    pub fn uses_system_timer(&self) -> bool {
        matches!(self.inner.clock, Clock::System { .. })
    }

    // -----------------------------------------------------------------
    // Playlist
    // -----------------------------------------------------------------

    /// Queue a MIDI file from disk. The file is read when it is reached.
    pub fn add(&self, path: impl AsRef<Path>) {
        self.push(PlaylistItem::File(path.as_ref().to_path_buf()));
    }

    /// Queue a copy of SMF bytes.
    pub fn add_mem(&self, bytes: &[u8]) {
        self.push(PlaylistItem::Memory(Arc::from(bytes)));
    }

    /// Queue an already parsed song.
    pub fn add_song(&self, song: MidiFile) {
        self.push(PlaylistItem::Song(Arc::new(song)));
    }

    fn push(&self, item: PlaylistItem) {
        debug!("Playlist += {}", item.describe());
        self.inner.playlist.lock().push(item);
    }

    pub fn playlist_len(&self) -> usize {
        self.inner.playlist.lock().len()
    }

    // -----------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------

    /// Start or resume playback.
    pub fn play(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.status() == PlayerStatus::Playing {
            return Ok(());
        }
        // Finished playlist with no passes left: play it once more.
        if !inner.has_current.get() && inner.loop_count.load(Ordering::Acquire) == 0 {
            inner.loop_count.store(1, Ordering::Release);
        }
        if let Clock::Sample(timer) = &inner.clock {
            timer.reset();
        }
        inner.stopping.set(false);
        inner.set_status(PlayerStatus::Playing);

        if let Clock::System { period, timer } = &inner.clock {
            let mut timer = timer.lock();
            if !timer.as_ref().is_some_and(SystemTimer::is_running) {
                let weak: Weak<dyn ClockClient> =
                    Arc::downgrade(&self.inner) as Weak<dyn ClockClient>;
                *timer = Some(SystemTimer::start("timbrel-player", *period, weak)?);
            }
        }
        info!("Playback started");
        Ok(())
    }

    /// Stop playback. The next clock tick silences sounding channels;
    /// [`Player::play`] resumes from the current position.
    pub fn stop(&self) {
        let inner = &self.inner;
        inner.set_status(PlayerStatus::Done);
        inner.stopping.set(true);
        if inner.has_current.get() {
            inner.seek.force(inner.cur_ticks.load(Ordering::Acquire) as i64);
        }
        info!("Playback stopped");
    }

    /// Jump to `ticks` in the current song.
    ///
    /// While playing, only one seek can be pending; a second one fails with
    /// [`Error::SeekPending`]. When stopped the request replaces any pending
    /// one. Before the first song is loaded the target is not range checked.
    pub fn seek(&self, ticks: i64) -> Result<()> {
        let inner = &self.inner;
        if ticks < 0 {
            warn!("Seek to negative tick {} rejected", ticks);
            return Err(Error::InvalidSeek(ticks));
        }
        let status = inner.status();
        if status != PlayerStatus::Ready && ticks as u64 > inner.total_ticks.load(Ordering::Acquire)
        {
            warn!("Seek to tick {} beyond the end of the song rejected", ticks);
            return Err(Error::InvalidSeek(ticks));
        }
        if status == PlayerStatus::Playing {
            if !inner.seek.offer(ticks) {
                return Err(Error::SeekPending);
            }
        } else {
            inner.seek.force(ticks);
        }
        debug!("Seek to tick {} requested", ticks);
        Ok(())
    }

    /// Number of playlist passes left. `-1` loops forever, `0` stops after
    /// the current song.
    pub fn set_loop(&self, count: i32) {
        self.inner.loop_count.store(count.max(-1), Ordering::Release);
    }

    pub fn loop_count(&self) -> i32 {
        self.inner.loop_count.load(Ordering::Acquire)
    }

    /// Poll until playback is done. With the sample clock this only returns
    /// if another thread keeps rendering.
    pub fn join(&self) {
        while self.inner.status() != PlayerStatus::Done {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // -----------------------------------------------------------------
    // Tempo
    // -----------------------------------------------------------------

    /// Set the tempo.
    ///
    /// [`TempoKind::Internal`] follows the song's tempo events scaled by
    /// `value`. The external kinds fix the tempo and ignore the song. Each
    /// mode keeps its last value when the other is selected.
    pub fn set_tempo(&self, kind: TempoKind, value: f64) -> Result<()> {
        let inner = &self.inner;
        let (min, max) = match kind {
            TempoKind::Internal => (MIN_TEMPO_MULTIPLIER, MAX_TEMPO_MULTIPLIER),
            TempoKind::ExternalBpm | TempoKind::ExternalMidi => (MIN_TEMPO_VALUE, MAX_TEMPO_VALUE),
        };
        if !(min..=max).contains(&value) {
            warn!("Tempo {} out of range for {:?}, ignored", value, kind);
            return Err(Error::InvalidTempo(value));
        }
        match kind {
            TempoKind::Internal => {
                inner.multiplier.set(value);
                inner.sync_internal.set(true);
            }
            TempoKind::ExternalBpm => {
                inner.exttempo.set(60_000_000.0 / value);
                inner.sync_internal.set(false);
            }
            TempoKind::ExternalMidi => {
                inner.exttempo.set(value);
                inner.sync_internal.set(false);
            }
        }
        inner.tempo_dirty.set(true);
        debug!("Tempo set to {} ({:?})", value, kind);
        Ok(())
    }

    /// Shortcut for [`TempoKind::ExternalBpm`].
    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        self.set_tempo(TempoKind::ExternalBpm, bpm)
    }

    /// Shortcut for [`TempoKind::ExternalMidi`].
    pub fn set_midi_tempo(&self, tempo: f64) -> Result<()> {
        self.set_tempo(TempoKind::ExternalMidi, tempo)
    }

    /// Effective tempo in µs per quarter note.
    pub fn midi_tempo(&self) -> f64 {
        let inner = &self.inner;
        if inner.sync_internal.get() {
            f64::from(inner.miditempo.load(Ordering::Acquire)) / inner.multiplier.get()
        } else {
            inner.exttempo.get()
        }
    }

    pub fn bpm(&self) -> f64 {
        60_000_000.0 / self.midi_tempo()
    }

    // -----------------------------------------------------------------
    // State
    // -----------------------------------------------------------------

    pub fn status(&self) -> PlayerStatus {
        self.inner.status()
    }

    pub fn current_tick(&self) -> u64 {
        self.inner.cur_ticks.load(Ordering::Acquire)
    }

    /// Length of the current song.
    pub fn total_ticks(&self) -> u64 {
        self.inner.total_ticks.load(Ordering::Acquire)
    }

    /// Ticks per quarter note of the current song.
    pub fn division(&self) -> u32 {
        self.inner.division.load(Ordering::Acquire)
    }

    /// Number of songs loaded so far.
    pub fn load_count(&self) -> u64 {
        self.inner.load_count.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------

    pub fn set_playback_handler(&self, handler: SharedHandler) {
        self.inner.handler.set(handler);
    }

    pub fn set_tick_callback<F>(&self, callback: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let boxed: TickCallback = Box::new(callback);
        self.inner.tick_callback.store(Some(Arc::new(boxed)));
    }

    pub fn clear_tick_callback(&self) {
        self.inner.tick_callback.store(None);
    }

    // -----------------------------------------------------------------
    // Clock
    // -----------------------------------------------------------------

    /// Run one clock tick at `msec`. Returns false once the playlist is
    /// exhausted.
    pub fn process(&self, msec: u64) -> bool {
        self.inner.process(msec)
    }

    /// Drive the sample clock after `frames` frames were rendered. Does
    /// nothing when the player runs on the system timer.
    pub fn advance_samples(&self, frames: u64) {
        if let Clock::Sample(timer) = &self.inner.clock {
            let msec = timer.msec();
            self.inner.process(msec);
            timer.advance(frames);
        }
    }

    /// Update the sample clock after a sample rate change.
    pub fn set_sample_rate(&self, sample_rate: f64) {
        if let Clock::Sample(timer) = &self.inner.clock {
            timer.set_sample_rate(sample_rate);
        }
    }
}

impl PlayerInner {
    #[inline]
    fn status(&self) -> PlayerStatus {
        PlayerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    #[inline]
    fn set_status(&self, status: PlayerStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    fn process(&self, msec: u64) -> bool {
        let Some(mut guard) = self.state.try_lock() else {
            return true;
        };
        let state = &mut *guard;

        if self.status() != PlayerStatus::Playing {
            if self.stopping.swap(false) {
                self.sounds_off(state);
            }
            return true;
        }

        // Rebase on the previous tick before the clock moves on.
        if self.tempo_dirty.swap(false) {
            self.update_tempo(state);
        }
        state.cur_msec = msec;

        // One load per entry plus the one that finds the playlist exhausted.
        let max_loads = self.playlist.try_lock().map_or(1, |p| p.len() + 1);
        let mut loads = 0;
        let status = loop {
            if !self.has_current.get() {
                if loads == max_loads {
                    break PlayerStatus::Playing;
                }
                loads += 1;
                match self.load_next(state, msec) {
                    LoadOutcome::Loaded => {}
                    LoadOutcome::Retry => break PlayerStatus::Playing,
                    LoadOutcome::Exhausted => break PlayerStatus::Done,
                }
            }

            if self.advance(state, msec) == PlayerStatus::Playing {
                break PlayerStatus::Playing;
            }

            debug!("Song finished at tick {}", state.cur_ticks);
            if self.reset_synth.get() {
                self.emit(&MidiEvent::system_reset(), &mut state.sounding);
                state.sounding = [false; MAX_NUMBER_OF_CHANNELS];
            }
            self.has_current.set(false);
        };

        if state.last_reported_tick != Some(state.cur_ticks) {
            state.last_reported_tick = Some(state.cur_ticks);
            if let Some(callback) = self.tick_callback.load_full() {
                callback(state.cur_ticks);
            }
        }

        if status == PlayerStatus::Done {
            let _ = self.status.compare_exchange(
                PlayerStatus::Playing.to_u8(),
                PlayerStatus::Done.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            info!("Playlist finished");
            return false;
        }
        true
    }

    /// Replay the current song up to `msec`. Returns `Done` once every
    /// track has reached its end.
    fn advance(&self, state: &mut PlaybackState, msec: u64) -> PlayerStatus {
        let previous = state.cur_ticks;
        let seek_target = self.seek.peek();
        let seeking = seek_target.is_some();
        let mut tempo_changed = false;
        let until = match seek_target {
            Some(target) => {
                let target = target as u64;
                self.sounds_off(state);
                if target < previous {
                    // Replaying from the head re-applies the song's tempo map.
                    state.tracks.iter_mut().for_each(Track::reset);
                    self.miditempo.store(DEFAULT_TEMPO, Ordering::Release);
                    tempo_changed = true;
                }
                target
            }
            None => {
                state.cur_ticks = state.ticks_at(msec);
                state.cur_ticks
            }
        };

        let PlaybackState {
            tracks, sounding, ..
        } = &mut *state;
        for track in tracks.iter_mut() {
            while let Some(at) = track.next_tick().filter(|&at| at <= until) {
                let Some(event) = track.next_due(until) else {
                    break;
                };
                if seeking
                    && at != until
                    && matches!(event.kind, EventType::NoteOn | EventType::NoteOff)
                {
                    continue;
                }
                tempo_changed |= self.emit(event, sounding);
            }
        }

        if seeking {
            state.start_ticks = until;
            state.cur_ticks = until;
            state.start_msec = msec;
            self.seek.clear_if(until as i64);
            debug!("Seeked to tick {}", until);
        }
        if tempo_changed {
            self.update_tempo(state);
        }
        self.cur_ticks.store(state.cur_ticks, Ordering::Release);

        if state.tracks.iter().all(Track::is_eot) {
            PlayerStatus::Done
        } else {
            PlayerStatus::Playing
        }
    }

    /// Send a song event to the handler. Returns true for a tempo change.
    fn emit(&self, event: &MidiEvent, sounding: &mut [bool; MAX_NUMBER_OF_CHANNELS]) -> bool {
        if let Some(tempo) = event.tempo() {
            if tempo == 0 {
                warn!("Ignoring zero tempo event");
                return false;
            }
            self.miditempo.store(tempo, Ordering::Release);
            debug!("MIDI tempo changed to {} µs/quarter", tempo);
            return true;
        }
        if event.is_meta() {
            return false;
        }
        if event.is_note_on() {
            if let Some(flag) = sounding.get_mut(event.channel as usize) {
                *flag = true;
            }
        }
        if let Err(e) = self.handler.dispatch(event) {
            debug!("Playback handler rejected {:?}: {}", event.kind, e);
        }
        false
    }

    /// All-Sound-Off on every channel that played a note.
    fn sounds_off(&self, state: &mut PlaybackState) {
        for (channel, sounding) in state.sounding.iter_mut().enumerate() {
            if std::mem::take(sounding) {
                let off = MidiEvent::control_change(channel as u32, cc::ALL_SOUND_OFF, 0);
                if let Err(e) = self.handler.dispatch(&off) {
                    debug!("All-Sound-Off on channel {} rejected: {}", channel, e);
                }
            }
        }
    }

    /// Recompute ms-per-tick and rebase on the current position.
    fn update_tempo(&self, state: &mut PlaybackState) {
        let division = f64::from(state.division);
        state.deltatime = if self.sync_internal.get() {
            f64::from(self.miditempo.load(Ordering::Acquire))
                / division
                / 1000.0
                / self.multiplier.get()
        } else {
            self.exttempo.get() / division / 1000.0
        };
        state.start_msec = state.cur_msec;
        state.start_ticks = state.cur_ticks;
        debug!("Player deltatime now {:.4} ms/tick", state.deltatime);
    }

    /// Move to the next playlist entry honoring the loop count, skipping
    /// entries that fail to load.
    fn load_next(&self, state: &mut PlaybackState, msec: u64) -> LoadOutcome {
        let Some(playlist) = self.playlist.try_lock() else {
            return LoadOutcome::Retry;
        };
        let items = playlist.clone();
        drop(playlist);

        for _ in 0..items.len() {
            let Some(index) = self.next_index(state.current, items.len()) else {
                break;
            };
            state.current = Some(index);
            match items[index].load() {
                Ok(song) => {
                    self.install(state, song, msec);
                    info!("Loaded playlist entry {}: {}", index, items[index].describe());
                    return LoadOutcome::Loaded;
                }
                Err(e) => warn!("Skipping {}: {}", items[index].describe(), e),
            }
        }
        if !items.is_empty() && state.current.is_some() {
            debug!("No playable playlist entry left");
        }
        state.current = None;
        LoadOutcome::Exhausted
    }

    fn next_index(&self, current: Option<usize>, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        if let Some(index) = current {
            if index + 1 < len {
                return Some(index + 1);
            }
        }
        let passes = self.loop_count.load(Ordering::Acquire);
        if passes == 0 {
            return None;
        }
        if passes > 0 {
            let _ = self
                .loop_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n > 0).then(|| n - 1)
                });
        }
        Some(0)
    }

    fn install(&self, state: &mut PlaybackState, song: MidiFile, msec: u64) {
        let total = song.total_ticks();
        state.division = song.division;
        state.tracks = song.tracks;
        state.cur_msec = msec;
        state.cur_ticks = 0;
        self.miditempo.store(DEFAULT_TEMPO, Ordering::Release);
        self.update_tempo(state);

        self.total_ticks.store(total, Ordering::Release);
        self.division
            .store(u32::from(state.division), Ordering::Release);
        self.cur_ticks.store(0, Ordering::Release);
        self.has_current.set(true);
        self.load_count.fetch_add(1, Ordering::AcqRel);
    }
}

impl ClockClient for PlayerInner {
    fn on_clock(&self, msec: u64) -> bool {
        self.process(msec)
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("status", &self.status())
            .field("tick", &self.current_tick())
            .field("total_ticks", &self.total_ticks())
            .field("loop", &self.loop_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use timbrel_midi::handler_fn;

    type Log = Arc<Mutex<Vec<(u64, MidiEvent)>>>;

    /// Player recording `(msec, event)` pairs; the test sets `now` before
    /// each tick.
    fn recording_player() -> (Player, Log, Arc<AtomicU64>) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let now = Arc::new(AtomicU64::new(0));
        let (sink, clock) = (log.clone(), now.clone());
        let player = Player::new(
            &Settings::new(),
            handler_fn(move |e| {
                sink.lock().push((clock.load(Ordering::SeqCst), e.clone()));
                Ok(())
            }),
        )
        .unwrap();
        (player, log, now)
    }

    fn run(player: &Player, now: &AtomicU64, range: std::ops::RangeInclusive<u64>) {
        for msec in range.step_by(10) {
            now.store(msec, Ordering::SeqCst);
            player.process(msec);
        }
    }

    fn one_note_song() -> MidiFile {
        let mut song = MidiFile::new(480).unwrap();
        song.add_track(Track::with_events(vec![
            MidiEvent::note_on(0, 60, 100).with_dtime(480),
            MidiEvent::note_off(0, 60, 0).with_dtime(480),
            MidiEvent::end_of_track(),
        ]))
        .unwrap();
        song
    }

    #[test]
    fn test_note_timing_at_default_tempo() {
        let (player, log, now) = recording_player();
        player.add_song(one_note_song());
        player.play().unwrap();
        run(&player, &now, 0..=1200);

        let log = log.lock();
        assert_eq!(log[0], (500, MidiEvent::note_on(0, 60, 100)));
        assert_eq!(log[1], (1000, MidiEvent::note_off(0, 60, 0)));
        assert_eq!(log[2].1.kind, EventType::SystemReset);
        assert_eq!(player.status(), PlayerStatus::Done);
        assert_eq!(player.current_tick(), 960);
        assert_relative_eq!(player.bpm(), 120.0);
    }

    #[test]
    fn test_reset_synth_setting_is_live() {
        let settings = Settings::new();
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let player = Player::new(
            &settings,
            handler_fn(move |e| {
                sink.lock().push((0, e.clone()));
                Ok(())
            }),
        )
        .unwrap();
        settings.set_bool(keys::PLAYER_RESET_SYNTH, false).unwrap();

        player.add_song(one_note_song());
        player.play().unwrap();
        for msec in (0..=1200).step_by(10) {
            player.process(msec);
        }
        assert!(log
            .lock()
            .iter()
            .all(|(_, e)| e.kind != EventType::SystemReset));
    }

    #[test]
    fn test_dropped_players_release_setting_callbacks() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        let settings = Settings::new();
        let handler = handler_fn(|_| Ok(()));
        let kept = Player::new(&settings, handler.clone()).unwrap();
        for _ in 0..8 {
            drop(Player::new(&settings, handler.clone()).unwrap());
        }
        assert_eq!(settings.callback_count(keys::PLAYER_RESET_SYNTH), 9);

        settings.set_bool(keys::PLAYER_RESET_SYNTH, false).unwrap();
        assert_eq!(settings.callback_count(keys::PLAYER_RESET_SYNTH), 1);
        assert!(!kept.inner.reset_synth.get());
    }

    #[test]
    fn test_stop_silences_sounding_channels_once() {
        let (player, log, now) = recording_player();
        player.add_song(one_note_song());
        player.play().unwrap();
        run(&player, &now, 0..=600);

        player.stop();
        run(&player, &now, 610..=700);
        let offs: Vec<MidiEvent> = log
            .lock()
            .iter()
            .filter(|(_, e)| e.kind == EventType::ControlChange)
            .map(|(_, e)| e.clone())
            .collect();
        assert_eq!(
            offs,
            vec![MidiEvent::control_change(0, cc::ALL_SOUND_OFF, 0)]
        );
        assert_eq!(player.status(), PlayerStatus::Done);
    }

    #[test]
    fn test_resume_after_stop_keeps_position() {
        let (player, log, now) = recording_player();
        player.add_song(one_note_song());
        player.play().unwrap();
        run(&player, &now, 0..=600);
        player.stop();
        run(&player, &now, 610..=620);
        let tick = player.current_tick();

        player.play().unwrap();
        run(&player, &now, 630..=630);
        assert_eq!(player.current_tick(), tick);
        // Only 400 ms of song left.
        run(&player, &now, 640..=1050);
        let note_offs: Vec<u64> = log
            .lock()
            .iter()
            .filter(|(_, e)| e.kind == EventType::NoteOff)
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(note_offs.len(), 1);
        assert!(note_offs[0] > 1000);
        assert_eq!(player.load_count(), 1);
    }

    #[test]
    fn test_seek_validation() {
        let (player, _log, now) = recording_player();
        assert!(matches!(player.seek(-1), Err(Error::InvalidSeek(-1))));
        // Ready: not range checked.
        player.seek(5000).unwrap();
        player.seek(0).unwrap();

        player.add_song(one_note_song());
        player.play().unwrap();
        run(&player, &now, 0..=0);
        assert_eq!(player.total_ticks(), 960);
        assert!(matches!(player.seek(961), Err(Error::InvalidSeek(961))));

        player.seek(100).unwrap();
        assert!(matches!(player.seek(200), Err(Error::SeekPending)));
        run(&player, &now, 10..=10);
        assert_eq!(player.current_tick(), 100);
        player.seek(200).unwrap();
    }

    #[test]
    fn test_tempo_ranges_and_modes() {
        let (player, _log, _now) = recording_player();
        assert!(player.set_tempo(TempoKind::Internal, 0.0005).is_err());
        assert!(player.set_tempo(TempoKind::Internal, 1001.0).is_err());
        assert!(player.set_tempo(TempoKind::ExternalBpm, 0.5).is_err());
        assert!(player.set_tempo(TempoKind::ExternalMidi, 6.1e7).is_err());
        assert!(player.set_tempo(TempoKind::Internal, f64::NAN).is_err());
        assert_relative_eq!(player.bpm(), 120.0);

        player.set_tempo(TempoKind::Internal, 2.0).unwrap();
        assert_relative_eq!(player.bpm(), 240.0);

        player.set_bpm(60.0).unwrap();
        assert_relative_eq!(player.midi_tempo(), 1_000_000.0);

        // Switching back keeps the multiplier.
        player.set_tempo(TempoKind::Internal, 2.0).unwrap();
        assert_relative_eq!(player.midi_tempo(), 250_000.0);
        player.set_midi_tempo(400_000.0).unwrap();
        assert_relative_eq!(player.bpm(), 150.0);
    }

    #[test]
    fn test_multiplier_speeds_up_playback() {
        let (player, log, now) = recording_player();
        player.add_song(one_note_song());
        player.set_tempo(TempoKind::Internal, 2.0).unwrap();
        player.play().unwrap();
        run(&player, &now, 0..=600);
        let log = log.lock();
        assert_eq!(log[0].0, 250);
        assert_eq!(log[1].0, 500);
    }

    #[test]
    fn test_tempo_event_rebases() {
        let mut song = MidiFile::new(480).unwrap();
        song.add_track(Track::with_events(vec![
            MidiEvent::set_tempo(250_000).with_dtime(480),
            MidiEvent::note_on(0, 60, 100).with_dtime(480),
            MidiEvent::end_of_track(),
        ]))
        .unwrap();
        let (player, log, now) = recording_player();
        player.add_song(song);
        player.play().unwrap();
        run(&player, &now, 0..=1000);

        // 480 ticks at 120 bpm then 480 ticks at 240 bpm.
        assert_eq!(log.lock()[0].0, 750);
        assert_relative_eq!(player.midi_tempo(), 250_000.0);
    }

    #[test]
    fn test_empty_playlist_is_done() {
        let (player, _log, _now) = recording_player();
        player.play().unwrap();
        assert!(!player.process(0));
        assert_eq!(player.status(), PlayerStatus::Done);
        assert_eq!(player.load_count(), 0);
    }

    #[test]
    fn test_tick_callback_fires_on_change() {
        let (player, _log, now) = recording_player();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        player.set_tick_callback(move |tick| sink.lock().push(tick));
        player.add_song(one_note_song());
        player.play().unwrap();

        now.store(0, Ordering::SeqCst);
        player.process(0);
        player.process(0);
        player.process(10);
        assert_eq!(*ticks.lock(), vec![0, 10]);

        player.clear_tick_callback();
        player.process(20);
        assert_eq!(ticks.lock().len(), 2);
    }

    #[test]
    fn test_sample_clock() {
        let (player, log, now) = recording_player();
        player.add_song(one_note_song());
        player.play().unwrap();
        // 441 frames at 44.1 kHz is 10 ms.
        for block in 0..60u64 {
            now.store(block * 10, Ordering::SeqCst);
            player.advance_samples(441);
        }
        assert_eq!(log.lock()[0].0, 500);
        assert!(!player.uses_system_timer());
    }

    #[test]
    fn test_system_timer_plays_to_the_end() {
        let settings = Settings::new();
        settings
            .set_str(keys::PLAYER_TIMING_SOURCE, "system")
            .unwrap();
        settings.set_int(keys::PLAYER_TIMER_PERIOD_MS, 1).unwrap();
        let player = Player::new(&settings, handler_fn(|_| Ok(()))).unwrap();

        let mut song = MidiFile::new(480).unwrap();
        song.add_track(Track::with_events(vec![
            MidiEvent::note_on(0, 60, 100),
            MidiEvent::end_of_track().with_dtime(24),
        ]))
        .unwrap();
        player.add_song(song);
        assert!(player.uses_system_timer());
        player.play().unwrap();
        player.join();
        assert_eq!(player.status(), PlayerStatus::Done);
        assert_eq!(player.load_count(), 1);
    }
}
