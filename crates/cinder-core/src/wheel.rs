//! Timing wheel for keyed, cancelable delayed tasks.
//!
//! The expiration engine schedules one deletion task per expiring key;
//! rescheduling under the same task key replaces the previous task
//! instead of stacking a duplicate.
//!
//! The wheel runs as a single tokio task that owns all of its state and
//! is driven by a `select!` over an interval tick and an mpsc command
//! channel, so scheduling and firing never contend on shared locks.
//! Fired jobs run on the blocking pool: a deletion job takes the key's
//! write lock, and a contended lock must not stall the wheel itself.
//!
//! Each slot covers one tick (100ms); tasks further out than one
//! revolution carry a remaining-revolutions counter.

use std::time::Duration;

use ahash::AHashMap;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Work executed when a scheduled task fires.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Tick granularity. Deadlines resolve to the next tick boundary.
const TICK: Duration = Duration::from_millis(100);

/// Slots per revolution: one minute at the default tick.
const SLOTS: usize = 600;

enum WheelCmd {
    Schedule {
        key: String,
        delay: Duration,
        job: Job,
    },
    Cancel {
        key: String,
    },
}

/// Cloneable handle to the wheel task. Dropping every handle stops the
/// wheel.
#[derive(Debug, Clone)]
pub struct WheelHandle {
    tx: mpsc::UnboundedSender<WheelCmd>,
}

impl WheelHandle {
    /// Spawns the wheel task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Schedules `job` to run after `delay`, replacing any task already
    /// scheduled under `key`.
    pub fn schedule(&self, key: String, delay: Duration, job: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(WheelCmd::Schedule {
            key,
            delay,
            job: Box::new(job),
        });
    }

    /// Cancels the task scheduled under `key`, if any.
    pub fn cancel(&self, key: &str) {
        let _ = self.tx.send(WheelCmd::Cancel {
            key: key.to_string(),
        });
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<WheelCmd>) {
    let mut wheel = Wheel::new();
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for job in wheel.advance() {
                    tokio::task::spawn_blocking(job);
                }
            }
            cmd = rx.recv() => match cmd {
                Some(WheelCmd::Schedule { key, delay, job }) => {
                    wheel.schedule(key, delay, job);
                }
                Some(WheelCmd::Cancel { key }) => {
                    wheel.cancel(&key);
                }
                None => {
                    debug!("all wheel handles dropped, stopping timer wheel");
                    break;
                }
            }
        }
    }
}

struct Entry {
    /// Full revolutions left before the task is due.
    revolutions: usize,
    job: Job,
}

struct Wheel {
    slots: Vec<AHashMap<String, Entry>>,
    /// Task key → slot index holding it.
    locations: AHashMap<String, usize>,
    pos: usize,
}

impl Wheel {
    fn new() -> Self {
        Self {
            slots: (0..SLOTS).map(|_| AHashMap::new()).collect(),
            locations: AHashMap::new(),
            pos: 0,
        }
    }

    fn schedule(&mut self, key: String, delay: Duration, job: Job) {
        self.cancel(&key);
        // a zero delay still waits for the next tick; the read path's
        // lazy expiry check covers the gap
        let ticks = ((delay.as_millis() / TICK.as_millis()) as usize).max(1);
        let slot = (self.pos + ticks) % SLOTS;
        let revolutions = ticks / SLOTS;
        self.locations.insert(key.clone(), slot);
        self.slots[slot].insert(key, Entry { revolutions, job });
    }

    fn cancel(&mut self, key: &str) {
        if let Some(slot) = self.locations.remove(key) {
            self.slots[slot].remove(key);
        }
    }

    /// Moves to the next slot and returns the jobs that are due.
    fn advance(&mut self) -> Vec<Job> {
        self.pos = (self.pos + 1) % SLOTS;
        let pos = self.pos;
        let drained: Vec<(String, Entry)> = self.slots[pos].drain().collect();

        let mut due = Vec::new();
        for (key, mut entry) in drained {
            if entry.revolutions > 0 {
                entry.revolutions -= 1;
                self.slots[pos].insert(key, entry);
            } else {
                self.locations.remove(&key);
                due.push(entry.job);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn scheduled_job_fires() {
        let wheel = WheelHandle::spawn();
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        wheel.schedule("t1".into(), Duration::from_millis(50), move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let wheel = WheelHandle::spawn();
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        wheel.schedule("t1".into(), Duration::from_millis(100), move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        wheel.cancel("t1");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rescheduling_replaces_previous_task() {
        let wheel = WheelHandle::spawn();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&fired);
        wheel.schedule("t1".into(), Duration::from_millis(100), move || {
            first.fetch_add(100, Ordering::SeqCst);
        });
        let second = Arc::clone(&fired);
        wheel.schedule("t1".into(), Duration::from_millis(200), move || {
            second.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(800)).await;
        // only the replacement ran, exactly once
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_fire_independently() {
        let wheel = WheelHandle::spawn();
        let fired = Arc::new(AtomicUsize::new(0));
        for key in ["a", "b", "c"] {
            let flag = Arc::clone(&fired);
            wheel.schedule(key.into(), Duration::from_millis(50), move || {
                flag.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
