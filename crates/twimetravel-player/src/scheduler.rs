//! Playback scheduler: turns `(id, offset)` records and a rate into timed reveals.
//!
//! Each call to [`PlaybackScheduler::start`] or [`PlaybackScheduler::reset`]
//! creates a *run*: one timer per item, armed at `started_at + offset / rate`.
//! When a timer fires, the item's id is appended to the revealed output and a
//! [`PlaybackFlow::Revealed`] is published.
//!
//! # Runs and timers
//!
//! Exactly one run is active at a time. A run's timers are driven by a single
//! tokio task that walks them in `(deadline, input index)` order, so items
//! with equal offsets are revealed in the order they were supplied. Every
//! armed timer is tracked as a [`TimerHandle`] in the run's live set and is
//! removed from it when it fires.
//!
//! # Cancellation
//!
//! A timer only reveals its item after re-checking, under the state lock,
//! that its handle is still live in the active run. `cancel` drops the run
//! under that same lock, so once it returns no timer armed before the call can
//! append anything, even one whose deadline had already passed. `reset`
//! performs cancel, clear and start under a single lock acquisition.
//!
//! Rates are validated before any state is touched: a rejected `reset` leaves
//! the previous run playing.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use twimetravel_types::{ItemId, PlaybackItem, Rate, RunId};

use crate::error::{PlaybackError, PlaybackResult};
use crate::flows::{PlaybackFlow, SharedPlaybackBus};

// ============================================================================
// Public types
// ============================================================================

/// Handle of one armed timer. Belongs to exactly one run.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TimerHandle {
    pub run: RunId,
    /// Position of the item in the run's input list.
    pub index: usize,
}

/// One entry of the revealed output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reveal {
    pub id: ItemId,
    pub index: usize,
    /// Time between the run starting and this item being revealed.
    pub elapsed: Duration,
}

/// Coarse lifecycle of the scheduler, for display and logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing scheduled yet, or the last request had no items.
    #[default]
    Idle,
    /// A run has timers pending.
    Playing,
    /// The last run revealed every item.
    Finished,
    /// The last run was cancelled, reset or disposed.
    Cancelled,
}

/// Snapshot of the active run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunInfo {
    pub id: RunId,
    pub rate: Rate,
    pub items: usize,
    pub pending: usize,
    pub revealed: usize,
}

// ============================================================================
// Internal state
// ============================================================================

struct ScheduleRun {
    id: RunId,
    rate: Rate,
    started_at: Instant,
    items: Arc<[PlaybackItem]>,
    live: BTreeSet<TimerHandle>,
    revealed: usize,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl ScheduleRun {
    /// Invalidate every live timer. Returns how many were pending.
    fn teardown(mut self) -> usize {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        let pending = self.live.len();
        self.live.clear();
        pending
    }
}

#[derive(Default)]
struct SchedulerState {
    revealed: Vec<Reveal>,
    run: Option<ScheduleRun>,
    lifecycle: PlaybackState,
}

/// A timer as the driver task sees it.
struct Armed {
    handle: TimerHandle,
    deadline: Instant,
}

enum Fired {
    /// Item appended; more timers remain.
    Revealed,
    /// Item appended and it was the run's last timer.
    Finished,
    /// The run was superseded; nothing appended.
    Stale,
}

// ============================================================================
// PlaybackScheduler
// ============================================================================

/// Replays items at wall-clock moments derived from their offsets and a rate.
///
/// All methods take `&self` and return immediately; reveals happen on the
/// tokio runtime the scheduler was created with. Dropping the scheduler
/// cancels any pending timers.
pub struct PlaybackScheduler {
    runtime: Handle,
    bus: SharedPlaybackBus,
    state: Arc<Mutex<SchedulerState>>,
}

impl PlaybackScheduler {
    /// Create a scheduler whose timers run on `runtime`.
    pub fn new(runtime: Handle, bus: SharedPlaybackBus) -> Self {
        Self {
            runtime,
            bus,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Create a scheduler on the runtime of the calling context.
    pub fn current(bus: SharedPlaybackBus) -> PlaybackResult<Self> {
        let runtime = Handle::try_current().map_err(|_| PlaybackError::NoRuntime)?;
        Ok(Self::new(runtime, bus))
    }

    /// The bus this scheduler publishes to.
    pub fn bus(&self) -> &SharedPlaybackBus {
        &self.bus
    }

    /// Arm one timer per item at `offset / rate`.
    ///
    /// Any active run is superseded first, but already revealed ids are kept.
    /// Returns `None` for an empty item list: nothing is armed.
    pub fn start(&self, items: &[PlaybackItem], rate: f64) -> PlaybackResult<Option<RunId>> {
        let rate = Rate::new(rate)?;
        let mut state = self.state.lock();
        self.supersede(&mut state);
        Ok(self.arm(&mut state, items, rate))
    }

    /// Cancel the active run, clear the output, then start `items` at `rate`.
    ///
    /// Atomic for observers: no reveal from the old run can land after this
    /// call begins.
    pub fn reset(&self, items: &[PlaybackItem], rate: f64) -> PlaybackResult<Option<RunId>> {
        let rate = Rate::new(rate)?;
        let mut state = self.state.lock();
        self.supersede(&mut state);
        state.revealed.clear();
        Ok(self.arm(&mut state, items, rate))
    }

    /// Invalidate every pending timer. Idempotent.
    ///
    /// Returns the number of timers that were still pending.
    pub fn cancel(&self) -> usize {
        let mut state = self.state.lock();
        self.supersede(&mut state)
    }

    /// Final cancellation point for the owner's teardown.
    pub fn dispose(&self) {
        let pending = self.cancel();
        tracing::debug!(pending, "playback scheduler disposed");
    }

    /// Ids revealed so far, in the order their timers fired.
    pub fn output(&self) -> Vec<ItemId> {
        self.state.lock().revealed.iter().map(|r| r.id.clone()).collect()
    }

    /// Revealed entries with their timing.
    pub fn reveals(&self) -> Vec<Reveal> {
        self.state.lock().revealed.clone()
    }

    /// Number of armed timers that have neither fired nor been cancelled.
    pub fn live_timers(&self) -> usize {
        self.state
            .lock()
            .run
            .as_ref()
            .map_or(0, |run| run.live.len())
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().run.is_some()
    }

    pub fn state(&self) -> PlaybackState {
        self.state.lock().lifecycle
    }

    pub fn current_run(&self) -> Option<RunInfo> {
        self.state.lock().run.as_ref().map(|run| RunInfo {
            id: run.id,
            rate: run.rate,
            items: run.items.len(),
            pending: run.live.len(),
            revealed: run.revealed,
        })
    }

    // ------------------------------------------------------------------------

    /// Tear down the active run, if any. Caller holds the lock.
    fn supersede(&self, state: &mut SchedulerState) -> usize {
        let Some(run) = state.run.take() else {
            return 0;
        };
        let id = run.id;
        let pending = run.teardown();
        state.lifecycle = PlaybackState::Cancelled;
        tracing::info!(run = %id.short(), pending, "playback run cancelled");
        self.bus.publish(PlaybackFlow::Cancelled { run: id, pending });
        pending
    }

    /// Build and install a new run. Caller holds the lock and has already
    /// torn down the previous run.
    fn arm(&self, state: &mut SchedulerState, items: &[PlaybackItem], rate: Rate) -> Option<RunId> {
        if items.is_empty() {
            state.lifecycle = PlaybackState::Idle;
            tracing::debug!("empty playback request; nothing scheduled");
            return None;
        }

        let id = RunId::new();
        let started_at = Instant::now();
        let items: Arc<[PlaybackItem]> = items.into();

        let mut schedule = Vec::with_capacity(items.len());
        let mut live = BTreeSet::new();
        for (index, item) in items.iter().enumerate() {
            let delay = item.delay(rate);
            let handle = TimerHandle { run: id, index };
            tracing::debug!(
                run = %id.short(),
                index,
                id = %item.id,
                delay_ms = delay.as_millis() as u64,
                "scheduled reveal"
            );
            live.insert(handle);
            schedule.push(Armed {
                handle,
                deadline: started_at + delay,
            });
        }
        schedule.sort_by_key(|armed| (armed.deadline, armed.handle.index));

        let cancel = CancellationToken::new();
        state.run = Some(ScheduleRun {
            id,
            rate,
            started_at,
            items: items.clone(),
            live,
            revealed: 0,
            cancel: cancel.clone(),
            driver: None,
        });
        state.lifecycle = PlaybackState::Playing;

        tracing::info!(
            run = %id.short(),
            items = items.len(),
            rate = %rate,
            "playback run started"
        );
        self.bus.publish(PlaybackFlow::Started {
            run: id,
            items: items.len(),
            rate,
        });

        let driver = self.runtime.spawn(drive(
            Arc::clone(&self.state),
            Arc::clone(&self.bus),
            items,
            schedule,
            cancel,
        ));
        if let Some(run) = state.run.as_mut() {
            run.driver = Some(driver);
        }

        Some(id)
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PlaybackScheduler")
            .field("state", &state.lifecycle)
            .field("revealed", &state.revealed.len())
            .field("run", &state.run.as_ref().map(|run| run.id))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Sleep through a run's timers in deadline order, revealing each in turn.
async fn drive(
    state: Arc<Mutex<SchedulerState>>,
    bus: SharedPlaybackBus,
    items: Arc<[PlaybackItem]>,
    schedule: Vec<Armed>,
    cancel: CancellationToken,
) {
    for armed in schedule {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(armed.deadline) => {}
        }

        match fire(&state, &bus, &items, armed.handle) {
            Fired::Revealed => {}
            Fired::Finished | Fired::Stale => return,
        }
    }
}

/// Append one item to the output if its timer is still live.
fn fire(
    state: &Mutex<SchedulerState>,
    bus: &SharedPlaybackBus,
    items: &[PlaybackItem],
    handle: TimerHandle,
) -> Fired {
    let mut guard = state.lock();
    let state = &mut *guard;

    let Some(run) = state.run.as_mut() else {
        return Fired::Stale;
    };
    if run.id != handle.run || !run.live.remove(&handle) {
        return Fired::Stale;
    }

    let id = items[handle.index].id.clone();
    let elapsed = run.started_at.elapsed();
    run.revealed += 1;
    let finished = run.live.is_empty();

    tracing::trace!(run = %handle.run.short(), index = handle.index, id = %id, "revealed");
    state.revealed.push(Reveal {
        id: id.clone(),
        index: handle.index,
        elapsed,
    });
    bus.publish(PlaybackFlow::Revealed {
        run: handle.run,
        id,
        index: handle.index,
        elapsed,
    });

    if !finished {
        return Fired::Revealed;
    }

    let revealed = run.revealed;
    state.run = None;
    state.lifecycle = PlaybackState::Finished;
    tracing::info!(run = %handle.run.short(), revealed, "playback run finished");
    bus.publish(PlaybackFlow::Finished {
        run: handle.run,
        revealed,
    });
    Fired::Finished
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::shared_playback_bus;

    fn scheduler() -> PlaybackScheduler {
        PlaybackScheduler::current(shared_playback_bus(64)).unwrap()
    }

    fn items(spec: &[(&str, f64)]) -> Vec<PlaybackItem> {
        spec.iter().map(|(id, offset)| PlaybackItem::new(*id, *offset)).collect()
    }

    async fn at(t0: Instant, secs: f64) {
        tokio::time::sleep_until(t0 + Duration::from_secs_f64(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveals_follow_scaled_offsets() {
        let sched = scheduler();
        let t0 = Instant::now();
        sched
            .start(&items(&[("a", 0.0), ("b", 2.0), ("c", 4.0)]), 2.0)
            .unwrap();

        // Zero delay is still asynchronous.
        assert!(sched.output().is_empty());
        assert_eq!(sched.live_timers(), 3);

        at(t0, 0.5).await;
        assert_eq!(sched.output(), vec!["a"]);
        at(t0, 1.5).await;
        assert_eq!(sched.output(), vec!["a", "b"]);
        at(t0, 2.5).await;
        assert_eq!(sched.output(), vec!["a", "b", "c"]);
        assert_eq!(sched.live_timers(), 0);
        assert_eq!(sched.state(), PlaybackState::Finished);
        assert!(!sched.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_pending_run() {
        let sched = scheduler();
        let t0 = Instant::now();
        sched.start(&items(&[("x", 5.0)]), 1.0).unwrap();

        at(t0, 1.0).await;
        sched.reset(&items(&[("y", 0.0)]), 1.0).unwrap();
        at(t0, 1.1).await;
        assert_eq!(sched.output(), vec!["y"]);

        at(t0, 10.0).await;
        assert_eq!(sched.output(), vec!["y"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_suppresses_already_due_timer() {
        let sched = scheduler();
        let t0 = Instant::now();
        sched.start(&items(&[("old", 0.0)]), 1.0).unwrap();
        // The old timer is due but the driver has not been polled yet.
        sched.reset(&items(&[("new", 1.0)]), 1.0).unwrap();

        at(t0, 3.0).await;
        assert_eq!(sched.output(), vec!["new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_absolute_and_idempotent() {
        let sched = scheduler();
        let mut sub = sched.bus().subscribe("playback.cancelled");
        let t0 = Instant::now();
        sched
            .start(&items(&[("a", 0.0), ("b", 1.0), ("c", 2.0)]), 1.0)
            .unwrap();

        at(t0, 0.5).await;
        assert_eq!(sched.cancel(), 2);
        assert_eq!(sched.cancel(), 0);
        assert_eq!(sched.live_timers(), 0);
        assert_eq!(sched.state(), PlaybackState::Cancelled);

        at(t0, 60.0).await;
        assert_eq!(sched.output(), vec!["a"]);

        assert!(matches!(
            sub.try_recv().map(|m| m.payload),
            Some(PlaybackFlow::Cancelled { pending: 2, .. })
        ));
        assert!(sub.try_recv().is_none(), "second cancel must not publish");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_start_arms_nothing() {
        let sched = scheduler();
        let t0 = Instant::now();
        assert_eq!(sched.start(&[], 3.0).unwrap(), None);
        assert_eq!(sched.live_timers(), 0);
        assert!(!sched.is_active());
        at(t0, 30.0).await;
        assert!(sched.output().is_empty());
        assert_eq!(sched.state(), PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_rate_leaves_previous_run_untouched() {
        let sched = scheduler();
        let t0 = Instant::now();
        let run = sched
            .start(&items(&[("a", 0.0), ("b", 2.0)]), 1.0)
            .unwrap();

        at(t0, 1.0).await;
        for bad in [0.0, -1.0, f64::NAN] {
            let err = sched.reset(&items(&[("z", 0.0)]), bad).unwrap_err();
            assert!(matches!(err, PlaybackError::InvalidRate(_)));
        }
        assert_eq!(sched.current_run().map(|r| r.id), run);
        assert_eq!(sched.output(), vec!["a"]);

        at(t0, 3.0).await;
        assert_eq!(sched.output(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_offsets_fire_in_input_order() {
        let sched = scheduler();
        let t0 = Instant::now();
        let input = items(&[("p", 1.0), ("q", 1.0), ("late", 3.0), ("early", 2.0), ("r", 1.0)]);
        sched.start(&input, 1.0).unwrap();

        at(t0, 5.0).await;
        assert_eq!(sched.output(), vec!["p", "q", "r", "early", "late"]);
        let indices: Vec<usize> = sched.reveals().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 4, 3, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_playing_supersedes_but_keeps_output() {
        let sched = scheduler();
        let t0 = Instant::now();
        sched.start(&items(&[("a", 0.0), ("b", 5.0)]), 1.0).unwrap();
        at(t0, 1.0).await;

        sched.start(&items(&[("c", 1.0)]), 1.0).unwrap();
        assert_eq!(sched.live_timers(), 1);
        at(t0, 10.0).await;
        assert_eq!(sched.output(), vec!["a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_published_in_order() {
        let sched = scheduler();
        let mut sub = sched.bus().subscribe("playback.>");
        let run = sched
            .start(&items(&[("a", 0.0), ("b", 1.0)]), 1.0)
            .unwrap()
            .unwrap();

        let subjects: Vec<&str> = {
            let mut out = Vec::new();
            while out.len() < 4 {
                let msg = sub.recv().await.expect("bus open");
                assert_eq!(msg.payload.run(), run);
                out.push(msg.subject);
            }
            out
        };
        assert_eq!(
            subjects,
            vec!["playback.started", "playback.revealed", "playback.revealed", "playback.finished"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_timers() {
        let bus = shared_playback_bus(16);
        let mut sub = bus.subscribe("playback.cancelled");
        {
            let sched = PlaybackScheduler::current(bus.clone()).unwrap();
            sched.start(&items(&[("a", 10.0)]), 1.0).unwrap();
        }
        let msg = sub.try_recv().expect("cancelled on drop");
        assert!(matches!(msg.payload, PlaybackFlow::Cancelled { pending: 1, .. }));
    }

    #[test]
    fn test_current_requires_runtime() {
        let err = PlaybackScheduler::current(shared_playback_bus(4)).unwrap_err();
        assert!(matches!(err, PlaybackError::NoRuntime));
    }

    #[test]
    fn test_playback_state_strings() {
        assert_eq!(PlaybackState::Playing.to_string(), "playing");
        assert_eq!("cancelled".parse::<PlaybackState>().unwrap(), PlaybackState::Cancelled);
    }
}
