//! Clock sources driving players and sequencers.
//!
//! [`SystemTimer`] runs a periodic thread against the wall clock.
//! [`SampleTimer`] derives milliseconds from the number of frames rendered,
//! so playback stays locked to the audio stream (and works offline).

use crate::lockfree::{AtomicDouble, AtomicFlag};
use crate::{Error, Result};
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Something advanced by a clock source.
pub trait ClockClient: Send + Sync {
    /// Called with the milliseconds elapsed since the clock started.
    /// Returning `false` stops a [`SystemTimer`].
    fn on_clock(&self, msec: u64) -> bool;
}

/// Periodic wall-clock timer thread.
///
/// The thread only holds a [`Weak`] reference to its client, so dropping the
/// client ends the thread on its next tick.
pub struct SystemTimer {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicFlag>,
}

impl SystemTimer {
    pub fn start(name: &str, period: Duration, client: Weak<dyn ClockClient>) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let running = Arc::new(AtomicFlag::new(true));
        let thread_running = Arc::clone(&running);
        let period = period.max(Duration::from_millis(1));

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let ticker = tick(period);
                let start = Instant::now();
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(client) = client.upgrade() else {
                                break;
                            };
                            let msec = start.elapsed().as_millis() as u64;
                            if !client.on_clock(msec) {
                                break;
                            }
                        }
                    }
                }
                thread_running.set(false);
            })
            .map_err(Error::TimerSpawn)?;

        debug!("Started system timer '{}' ({:?})", name, period);

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            running,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Stop the thread and wait for it, unless called from the timer
    /// thread itself.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("System timer thread panicked");
            }
        }
    }

    /// Block until the thread exits on its own.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SystemTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clock derived from rendered audio frames.
#[derive(Debug)]
pub struct SampleTimer {
    frames: AtomicU64,
    sample_rate: AtomicDouble,
}

impl SampleTimer {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate: AtomicDouble::new(sample_rate),
        }
    }

    pub fn reset(&self) {
        self.frames.store(0, Ordering::Release);
    }

    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.sample_rate.set(sample_rate);
    }

    /// Account for `frames` rendered frames and return the new time in ms.
    pub fn advance(&self, frames: u64) -> u64 {
        let total = self.frames.fetch_add(frames, Ordering::AcqRel) + frames;
        self.to_msec(total)
    }

    pub fn msec(&self) -> u64 {
        self.to_msec(self.frames.load(Ordering::Acquire))
    }

    #[inline]
    fn to_msec(&self, frames: u64) -> u64 {
        (1000.0 * frames as f64 / self.sample_rate.get()) as u64
    }
}
