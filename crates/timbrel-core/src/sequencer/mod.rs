//! Event sequencer with named clients.
//!
//! Events are time-stamped in ticks and dispatched to the callback of their
//! destination client once the sequencer clock reaches them. The clock runs
//! either from the system clock (a timer thread processes the queue) or from
//! an external caller feeding milliseconds to [`Sequencer::process`].
//!
//! ```text
//! tick = start_ticks + (now_ms - start_ms) * scale / 1000
//! ```
//!
//! `scale` is in ticks per second (1000 by default, so a tick is a
//! millisecond). Changing it rebases `start_ticks`/`start_ms`, so the tick
//! count never jumps.

mod binding;
mod event;
mod queue;

pub use binding::SynthBinding;
pub use event::{ClientId, SeqEventKind, SeqEventType, SequencerEvent};

use crate::config::{keys, Settings};
use crate::lockfree::AtomicFlag;
use crate::timer::{ClockClient, SystemTimer};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use queue::EventQueue;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default time scale, in ticks per second.
pub const DEFAULT_TIME_SCALE: f64 = 1000.0;

/// Default event queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Callback run for every event delivered to a client.
///
/// Receives the current tick, the event and the sequencer, so it can
/// schedule follow-up events.
pub type ClientCallback = Arc<dyn Fn(u64, &SequencerEvent, &Sequencer) + Send + Sync>;

struct Client {
    id: ClientId,
    name: String,
    callback: Option<ClientCallback>,
}

#[derive(Debug, Clone, Copy)]
struct TimeBase {
    start_ms: u64,
    start_ticks: u64,
    scale: f64,
}

struct SequencerInner {
    weak_self: Weak<SequencerInner>,
    use_system_timer: bool,
    epoch: Instant,
    current_ms: AtomicU64,
    time_base: Mutex<TimeBase>,
    clients: RwLock<Vec<Client>>,
    next_client_id: AtomicU32,
    queue: Mutex<EventQueue>,
    timer: Mutex<Option<SystemTimer>>,
    shut_down: AtomicFlag,
}

/// Cheap-to-clone handle to a sequencer.
#[derive(Clone)]
pub struct Sequencer {
    inner: Arc<SequencerInner>,
}

impl Sequencer {
    /// Sequencer with the default queue capacity.
    pub fn new(use_system_timer: bool) -> Result<Self> {
        Self::build(use_system_timer, DEFAULT_QUEUE_CAPACITY)
    }

    /// Reads `sequencer.use-system-timer` and `sequencer.queue-capacity`.
    pub fn with_settings(settings: &Settings) -> Result<Self> {
        let use_system_timer = settings.get_bool(keys::SEQUENCER_USE_SYSTEM_TIMER)?;
        let capacity = settings.get_int(keys::SEQUENCER_QUEUE_CAPACITY)?;
        let capacity = usize::try_from(capacity)
            .map_err(|_| Error::InvalidConfig(format!("queue capacity {capacity}")))?;
        Self::build(use_system_timer, capacity)
    }

    fn build(use_system_timer: bool, capacity: usize) -> Result<Self> {
        let inner = Arc::new_cyclic(|weak| SequencerInner {
            weak_self: weak.clone(),
            use_system_timer,
            epoch: Instant::now(),
            current_ms: AtomicU64::new(0),
            time_base: Mutex::new(TimeBase {
                start_ms: 0,
                start_ticks: 0,
                scale: DEFAULT_TIME_SCALE,
            }),
            clients: RwLock::new(Vec::new()),
            next_client_id: AtomicU32::new(1),
            queue: Mutex::new(EventQueue::new(capacity)),
            timer: Mutex::new(None),
            shut_down: AtomicFlag::new(false),
        });
        let seq = Self { inner };
        if use_system_timer {
            seq.restart_timer(DEFAULT_TIME_SCALE)?;
        }
        debug!(
            "Created sequencer (system timer: {}, capacity: {})",
            use_system_timer, capacity
        );
        Ok(seq)
    }

    fn restart_timer(&self, scale: f64) -> Result<()> {
        let period_ms = (1000.0 / scale).clamp(1.0, 1000.0) as u64;
        let weak: Weak<dyn ClockClient> = Arc::downgrade(&self.inner) as Weak<dyn ClockClient>;
        let timer = SystemTimer::start(
            "timbrel-sequencer",
            Duration::from_millis(period_ms),
            weak,
        )?;
        // The previous timer (if any) is stopped outside the lock.
        let previous = self.inner.timer.lock().replace(timer);
        drop(previous);
        Ok(())
    }

    pub fn uses_system_timer(&self) -> bool {
        self.inner.use_system_timer
    }

    // -----------------------------------------------------------------
    // Clock
    // -----------------------------------------------------------------

    fn now_ms(&self) -> u64 {
        self.inner.now_ms()
    }

    /// Current tick.
    pub fn tick(&self) -> u64 {
        let base = *self.inner.time_base.lock();
        Self::tick_at(&base, self.now_ms())
    }

    #[inline]
    fn tick_at(base: &TimeBase, abs_ms: u64) -> u64 {
        let elapsed = abs_ms.saturating_sub(base.start_ms) as f64;
        base.start_ticks + (elapsed * base.scale / 1000.0) as u64
    }

    pub fn time_scale(&self) -> f64 {
        self.inner.time_base.lock().scale
    }

    /// Set the number of ticks per second. NaN and non-positive values are
    /// rejected and leave the clock untouched.
    pub fn set_time_scale(&self, scale: f64) -> Result<()> {
        if scale.is_nan() || scale <= 0.0 {
            warn!("Invalid sequencer time scale {}, ignored", scale);
            return Err(Error::InvalidTimeScale(scale));
        }
        {
            let mut base = self.inner.time_base.lock();
            let now = self.now_ms();
            *base = TimeBase {
                start_ticks: Self::tick_at(&base, now),
                start_ms: now,
                scale,
            };
        }
        debug!("Sequencer time scale set to {}", scale);
        if self.inner.use_system_timer && !self.inner.shut_down.get() {
            self.restart_timer(scale)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Clients
    // -----------------------------------------------------------------

    /// Register a destination client. Returns its ID.
    pub fn register_client<F>(&self, name: &str, callback: F) -> ClientId
    where
        F: Fn(u64, &SequencerEvent, &Sequencer) + Send + Sync + 'static,
    {
        self.add_client(name, Some(Arc::new(callback)))
    }

    /// Register a client that only sends events.
    pub fn register_source(&self, name: &str) -> ClientId {
        self.add_client(name, None)
    }

    fn add_client(&self, name: &str, callback: Option<ClientCallback>) -> ClientId {
        let id = self.inner.next_client_id.fetch_add(1, Ordering::AcqRel);
        self.inner.clients.write().push(Client {
            id,
            name: name.to_string(),
            callback,
        });
        debug!("Registered sequencer client {} '{}'", id, name);
        id
    }

    /// Remove a client. Its callback receives a final `Unregistering`
    /// event while still registered, then the client and its pending events
    /// are dropped.
    pub fn unregister_client(&self, id: ClientId) -> Result<()> {
        let callback = self
            .inner
            .clients
            .read()
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.callback.clone())
            .ok_or(Error::UnknownClient(id))?;

        if let Some(callback) = callback {
            let tick = self.tick();
            let mut event = SequencerEvent::unregistering().with_dest(id);
            event.time = tick;
            callback(tick, &event, self);
        }

        let removed_client = {
            let mut clients = self.inner.clients.write();
            clients
                .iter()
                .position(|c| c.id == id)
                .map(|index| clients.remove(index))
        };
        let removed = self.inner.queue.lock().remove(None, Some(id), None);
        match removed_client {
            Some(client) => debug!(
                "Unregistered sequencer client {} '{}' ({} queued events dropped)",
                id, client.name, removed
            ),
            // The callback unregistered itself.
            None => debug!("Sequencer client {} already removed", id),
        }
        Ok(())
    }

    pub fn count_clients(&self) -> usize {
        self.inner.clients.read().len()
    }

    /// IDs of all registered clients, in registration order.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.inner.clients.read().iter().map(|c| c.id).collect()
    }

    pub fn client_name(&self, id: ClientId) -> Option<String> {
        self.inner
            .clients
            .read()
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.clone())
    }

    /// Whether the client was registered with a callback.
    pub fn client_is_destination(&self, id: ClientId) -> bool {
        self.inner
            .clients
            .read()
            .iter()
            .any(|c| c.id == id && c.callback.is_some())
    }

    // -----------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------

    /// Deliver `event` right away on the calling thread, stamped with the
    /// current tick.
    pub fn send_now(&self, event: &SequencerEvent) -> Result<()> {
        let mut stamped = event.clone();
        stamped.time = self.tick();
        self.dispatch(&stamped)
    }

    fn dispatch(&self, event: &SequencerEvent) -> Result<()> {
        match event.kind {
            SeqEventKind::Unregistering => self.unregister_client(event.dest),
            SeqEventKind::Scale { scale } => self.set_time_scale(scale),
            _ => {
                let callback = self
                    .inner
                    .clients
                    .read()
                    .iter()
                    .find(|c| c.id == event.dest)
                    .map(|c| c.callback.clone());
                match callback {
                    Some(Some(callback)) => {
                        callback(self.tick(), event, self);
                        Ok(())
                    }
                    Some(None) => Ok(()),
                    None => Err(Error::UnknownClient(event.dest)),
                }
            }
        }
    }

    /// Queue a copy of `event` for `time`, either an absolute tick or
    /// relative to the current one.
    pub fn send_at(&self, event: &SequencerEvent, time: u64, absolute: bool) -> Result<()> {
        let time = if absolute {
            time
        } else {
            self.tick().saturating_add(time)
        };
        let mut queued = event.clone();
        queued.time = time;

        let result = self.inner.queue.lock().push(queued);
        if let Err(ref e) = result {
            warn!("Dropping {:?} for tick {}: {}", event.event_type(), time, e);
        }
        result
    }

    /// Remove queued events. `None` matches anything.
    pub fn remove_events(
        &self,
        source: Option<ClientId>,
        dest: Option<ClientId>,
        event_type: Option<SeqEventType>,
    ) -> usize {
        self.inner.queue.lock().remove(source, dest, event_type)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue.lock().capacity()
    }

    // -----------------------------------------------------------------
    // Processing
    // -----------------------------------------------------------------

    /// Advance the clock to `msec` and dispatch every event due.
    ///
    /// With the system timer, `msec` is ignored and the wall clock is used.
    pub fn process(&self, msec: u64) {
        if !self.inner.use_system_timer {
            self.inner.current_ms.store(msec, Ordering::Release);
        }
        let tick = self.tick();
        loop {
            let Some(event) = self.inner.queue.lock().pop_due(tick) else {
                break;
            };
            if let Err(e) = self.dispatch(&event) {
                debug!("Queued {:?} not delivered: {}", event.event_type(), e);
            }
        }
    }

    /// Stop the timer thread, if any.
    pub fn shutdown(&self) {
        self.inner.shut_down.set(true);
        let timer = self.inner.timer.lock().take();
        drop(timer);
    }
}

impl SequencerInner {
    fn now_ms(&self) -> u64 {
        if self.use_system_timer {
            self.epoch.elapsed().as_millis() as u64
        } else {
            self.current_ms.load(Ordering::Acquire)
        }
    }
}

impl ClockClient for SequencerInner {
    fn on_clock(&self, msec: u64) -> bool {
        if self.shut_down.get() {
            return false;
        }
        let Some(inner) = self.weak_self.upgrade() else {
            return false;
        };
        Sequencer { inner }.process(msec);
        true
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("tick", &self.tick())
            .field("clients", &self.count_clients())
            .field("queued", &self.queue_len())
            .finish()
    }
}
