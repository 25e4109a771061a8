//! Cron timers: bind a schedule to a callback and hand back a trigger.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::debug;

/// Callback invoked on every fire. Each invocation returns its own future.
pub type FireCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Binds cron schedules to callbacks.
pub trait CronTimer: Send + Sync {
    /// Start firing `on_fire` at every time matched by `schedule`.
    fn bind(&self, schedule: cron::Schedule, on_fire: FireCallback) -> TriggerHandle;
}

/// Live binding returned by [`CronTimer::bind`]. Cancelling stops future
/// fires; a fire already in progress runs to completion. Dropping the handle
/// without cancelling is up to the timer.
pub struct TriggerHandle {
    cancel: Box<dyn FnOnce() + Send + Sync>,
}

impl TriggerHandle {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl fmt::Debug for TriggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerHandle").finish_non_exhaustive()
    }
}

/// Wall-clock timer backed by a tokio task per binding.
///
/// Each binding fires one callback at a time: a fire that overruns the next
/// scheduled time delays it, and times missed meanwhile are skipped. The
/// ticker stops when its handle is cancelled or dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCronTimer;

impl CronTimer for TokioCronTimer {
    fn bind(&self, schedule: cron::Schedule, on_fire: FireCallback) -> TriggerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut cursor = Utc::now();
            loop {
                let Some(next) = schedule.after(&cursor).next() else {
                    debug!("Cron schedule has no further fire times");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                on_fire().await;
                cursor = next.max(Utc::now());
            }
            debug!("Cron ticker stopped");
        });
        TriggerHandle::new(move || {
            let _ = stop_tx.send(());
        })
    }
}

struct ManualTrigger {
    cancelled: Arc<AtomicBool>,
    on_fire: FireCallback,
}

/// Timer that only fires when told to. Useful for tests and for embedders
/// that drive schedules from their own clock.
#[derive(Default, Clone)]
pub struct ManualCronTimer {
    triggers: Arc<Mutex<Vec<ManualTrigger>>>,
}

impl ManualCronTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every live trigger once and wait for the callbacks to finish.
    /// Returns the number of triggers fired.
    pub async fn fire(&self) -> usize {
        let callbacks: Vec<FireCallback> = match self.triggers.lock() {
            Ok(mut triggers) => {
                triggers.retain(|t| !t.cancelled.load(Ordering::SeqCst));
                triggers.iter().map(|t| t.on_fire.clone()).collect()
            }
            Err(_) => return 0,
        };
        let fired = callbacks.len();
        for callback in callbacks {
            callback().await;
        }
        fired
    }

    /// Number of bindings that have not been cancelled.
    pub fn live_triggers(&self) -> usize {
        self.triggers
            .lock()
            .map(|t| {
                t.iter()
                    .filter(|t| !t.cancelled.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl CronTimer for ManualCronTimer {
    fn bind(&self, _schedule: cron::Schedule, on_fire: FireCallback) -> TriggerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        if let Ok(mut triggers) = self.triggers.lock() {
            triggers.push(ManualTrigger {
                cancelled: cancelled.clone(),
                on_fire,
            });
        }
        TriggerHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::schedule::CronSpec;

    fn counting_callback(counter: Arc<AtomicUsize>) -> FireCallback {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    fn every_second() -> cron::Schedule {
        "* * * * * *".parse::<CronSpec>().unwrap().schedule().unwrap()
    }

    #[tokio::test]
    async fn manual_timer_stops_after_cancel() {
        let timer = ManualCronTimer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = timer.bind(every_second(), counting_callback(counter.clone()));

        assert_eq!(timer.fire().await, 1);
        assert_eq!(timer.fire().await, 1);
        handle.cancel();
        assert_eq!(timer.fire().await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(timer.live_triggers(), 0);
    }

    #[tokio::test]
    async fn tokio_timer_never_overlaps_fires() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let (f, p, d) = (in_flight.clone(), peak.clone(), done.clone());
        let slow: FireCallback = Arc::new(move || {
            let (f, p, d) = (f.clone(), p.clone(), d.clone());
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1200)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                d.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });
        let handle = TokioCronTimer.bind(every_second(), slow);

        tokio::time::timeout(Duration::from_secs(6), async {
            while done.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("timer never fired twice");
        handle.cancel();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_ticker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = TokioCronTimer.bind(every_second(), counting_callback(counter.clone()));
        drop(handle);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tokio_timer_fires_on_schedule() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = TokioCronTimer.bind(every_second(), counting_callback(counter.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("timer never fired");

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_cancel = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_cancel);
    }
}
