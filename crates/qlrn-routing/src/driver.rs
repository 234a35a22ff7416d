//! Tokio-backed timers
//!
//! The engine itself never sleeps. [`TokioScheduler`] turns each scheduled
//! timer into a sleeping task that posts the timer payload onto a channel
//! when it fires; [`run_timers`] drains that channel into
//! [`RoutingEngine::handle_timer`].
//!
//! [`TokioClock`] reads tokio's clock so that paused-time tests move the
//! engine's notion of "now" together with the timers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use qlrn_core::{Clock, NetworkStack, Scheduler, TimerHandle};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::engine::{RoutingEngine, RoutingTimer};

/// Clock that follows tokio's (possibly paused) time
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Scheduler that spawns one sleeping task per timer
///
/// A timer cancelled after it has already been posted may still be
/// delivered; timer handlers re-validate their state when they run.
pub struct TokioScheduler<T> {
    /// Runtime the timer tasks run on
    runtime: Handle,
    /// Where fired timers are posted
    fired: mpsc::UnboundedSender<T>,
    /// Live timers; the abort handle is filled in once the task is spawned
    live: Arc<DashMap<TimerHandle, Option<AbortHandle>>>,
    /// Handle counter
    next_id: AtomicU64,
}

impl<T: Send + 'static> TokioScheduler<T> {
    /// Create a scheduler on `runtime` and the receiver fired timers arrive on
    pub fn new(runtime: Handle) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            runtime,
            fired,
            live: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        };
        (scheduler, rx)
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.live.len()
    }
}

impl<T: Send + 'static> Scheduler<T> for TokioScheduler<T> {
    fn schedule(&self, delay: Duration, timer: T) -> TimerHandle {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.live.insert(handle, None);

        let live = Arc::clone(&self.live);
        let fired = self.fired.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if live.remove(&handle).is_some() && fired.send(timer).is_err() {
                trace!(%handle, "Timer receiver gone");
            }
        });

        // Absent if the timer already fired or was cancelled
        if let Some(mut slot) = self.live.get_mut(&handle) {
            *slot = Some(task.abort_handle());
        }
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some((_, abort)) = self.live.remove(&handle) {
            if let Some(abort) = abort {
                abort.abort();
            }
            trace!(%handle, "Timer cancelled");
        }
    }
}

/// Feed fired timers into an engine until the scheduler is dropped
pub async fn run_timers<N, S, C>(
    engine: Arc<RoutingEngine<N, S, C>>,
    mut fired: mpsc::UnboundedReceiver<RoutingTimer>,
) where
    N: NetworkStack,
    S: Scheduler<RoutingTimer>,
    C: Clock,
{
    while let Some(timer) = fired.recv().await {
        engine.handle_timer(timer);
    }
    debug!("Timer channel closed, driver stopping");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (scheduler, mut rx) = TokioScheduler::new(Handle::current());
        let start = TokioClock.now();

        scheduler.schedule(Duration::from_millis(250), 7u32);
        assert_eq!(scheduler.pending(), 1);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, 7);
        assert!(TokioClock.now() - start >= Duration::from_millis(250));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_order_follows_deadline() {
        let (scheduler, mut rx) = TokioScheduler::new(Handle::current());
        scheduler.schedule(Duration::from_secs(3), "late");
        scheduler.schedule(Duration::from_secs(1), "early");

        assert_eq!(rx.recv().await.unwrap(), "early");
        assert_eq!(rx.recv().await.unwrap(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (scheduler, mut rx) = TokioScheduler::new(Handle::current());
        let cancelled = scheduler.schedule(Duration::from_secs(1), 1u8);
        scheduler.schedule(Duration::from_secs(2), 2u8);
        scheduler.cancel(cancelled);
        scheduler.cancel(cancelled);

        assert_eq!(rx.recv().await.unwrap(), 2);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
