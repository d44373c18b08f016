//! Per-task timers.
//!
//! Every armed timer runs in its own context, selecting between its tick
//! source and its stop channel. Expiry is delivered as an ordinary message
//! into the owner's mailbox; a full mailbox blocks the timer, which is the
//! intended backpressure from a handler to its own timers.
//!
//! Kill protocol: the killer sends `true` on the stop channel *while
//! holding the owner's task lock* and then waits on the stopped
//! rendezvous. Timer cleanup runs under that same task lock, and the
//! expiry path drains a pending stop request after cleaning up, so the
//! killer is answered in every interleaving. The one accepted race is an
//! expiry already enqueued when the kill lands: the owner may observe a
//! single trailing expiry.

use crate::error::{Error, Result};
use crate::sched::msg::{Body, Message, Origin, EV_TIMER_BASE};
use crate::sched::scheduler::Scheduler;
use crate::sched::task::{StoppedChannel, TaskRef};
use crossbeam_channel::{after, bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Index of a timer within its owning task's timer table.
pub type TimerId = usize;

/// Timer behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once after the duration, delivers a single expiry, then
    /// self-cleans and releases its slot.
    OneShot,
    /// Ticks every duration until explicitly killed.
    Periodic,
}

/// Generation-checked handle to a timer slot (crate-internal; user code
/// addresses timers through their [`TimerId`] within the owning task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerRef {
    pub(crate) idx: u32,
    pub(crate) gen: u32,
}

impl TimerRef {
    pub(crate) fn new(idx: u32, gen: u32) -> Self {
        TimerRef { idx, gen }
    }

    pub(crate) fn index(&self) -> usize {
        self.idx as usize
    }
}

/// Description of a timer to arm.
#[derive(Clone)]
pub struct TimerDesc {
    pub(crate) name: String,
    /// User-defined tag, delivered back as `EV_TIMER_BASE + tag`.
    pub(crate) tag: u32,
    pub(crate) kind: TimerKind,
    pub(crate) dur: Duration,
    pub(crate) extra: Option<Body>,
}

impl TimerDesc {
    pub fn new(name: &str, tag: u32, kind: TimerKind, dur: Duration) -> Self {
        TimerDesc {
            name: name.to_string(),
            tag,
            kind,
            dur,
            extra: None,
        }
    }

    /// Opaque payload handed back in every expiry message.
    pub fn extra(mut self, extra: Body) -> Self {
        self.extra = Some(extra);
        self
    }
}

impl std::fmt::Debug for TimerDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerDesc")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("dur", &self.dur)
            .finish()
    }
}

/// Mutable timer control block, guarded by the slot lock.
pub(crate) struct TimerState {
    pub(crate) name: String,
    pub(crate) tag: u32,
    pub(crate) kind: TimerKind,
    pub(crate) dur: Duration,
    pub(crate) owner: Option<TaskRef>,
    pub(crate) extra: Option<Body>,
    pub(crate) stop: Option<StoppedChannel>,
    pub(crate) stopped: Option<StoppedChannel>,
}

/// One timer arena entry.
pub(crate) struct TimerSlot {
    pub(crate) state: Mutex<TimerState>,
    pub(crate) gen: AtomicU32,
}

impl TimerSlot {
    pub(crate) fn new() -> Self {
        TimerSlot {
            state: Mutex::new(TimerState {
                name: String::new(),
                tag: 0,
                kind: TimerKind::OneShot,
                dur: Duration::ZERO,
                owner: None,
                extra: None,
                stop: None,
                stopped: None,
            }),
            gen: AtomicU32::new(0),
        }
    }

    /// Clone out the stop sender and stopped receiver, if armed.
    pub(crate) fn endpoints(&self) -> Option<(Sender<bool>, Receiver<bool>)> {
        let state = self.state.lock();
        match (&state.stop, &state.stopped) {
            (Some(stop), Some(stopped)) => Some((stop.0.clone(), stopped.1.clone())),
            _ => None,
        }
    }
}

impl Scheduler {
    /// Arm a timer owned by `tref`. Returns the timer's id within the
    /// owner's table; the id is what `kill_timer` takes and what lets a
    /// handler discriminate expiry messages via the tag it chose.
    pub fn set_timer(self: &Arc<Self>, tref: TaskRef, desc: TimerDesc) -> Result<TimerId> {
        if desc.dur.is_zero() {
            return Err(Error::parameter("timer duration must be positive"));
        }

        let slot = &self.tasks[tref.index()];
        let mut state = slot.state.lock();
        state.check_ref(tref)?;
        if state.mailbox_capacity == 0 {
            return Err(Error::mismatched(
                "perpetual task has no mailbox to deliver expiries to",
            ));
        }

        let tid = state
            .timers
            .iter()
            .position(|t| t.is_none())
            .ok_or_else(|| Error::resource("timer table full"))?;

        // timer node from the pool; task lock -> scheduler lock order
        let tmref = {
            let mut core = self.core.lock();
            let core = &mut *core;
            let tm_idx = core.timer_free.pop_head(&mut core.timer_links)?;
            let tmref = TimerRef::new(tm_idx as u32, self.timers[tm_idx].gen.load(Ordering::Acquire));
            core.timer_owner.insert(tmref, tref);
            tmref
        };

        let (stop_rx, stopped_tx) = {
            let mut tstate = self.timers[tmref.index()].state.lock();
            tstate.name = desc.name.clone();
            tstate.tag = desc.tag;
            tstate.kind = desc.kind;
            tstate.dur = desc.dur;
            tstate.owner = Some(tref);
            tstate.extra = desc.extra.clone();
            let stop = bounded(1);
            let stopped = bounded(0);
            let endpoints = (stop.1.clone(), stopped.0.clone());
            tstate.stop = Some(stop);
            tstate.stopped = Some(stopped);
            endpoints
        };

        state.timers[tid] = Some(tmref);
        state.timer_index.insert(tmref, tid);
        let mailbox_tx = state
            .mailbox
            .as_ref()
            .ok_or_else(|| Error::internal("running task without mailbox"))?
            .tx
            .clone();
        drop(state);

        let sched = self.clone();
        let kind = desc.kind;
        let dur = desc.dur;
        let tag = desc.tag;
        let extra = desc.extra;
        let spawned = thread::Builder::new()
            .name(format!(
                "{}-timer-{}",
                self.config.thread_name_prefix,
                tmref.index()
            ))
            .spawn(move || {
                sched.timer_loop(tmref, tref, kind, dur, tag, extra, mailbox_tx, stop_rx, stopped_tx);
            });

        if let Err(e) = spawned {
            let mut state = slot.state.lock();
            state.timers[tid] = None;
            state.timer_index.remove(&tmref);
            self.core.lock().timer_owner.remove(&tmref);
            drop(state);
            self.release_timer_node(tmref);
            return Err(Error::internal(format!("timer spawn failed: {}", e)));
        }

        debug!(timer = tmref.index(), tid, name = %desc.name, task = ?tref, "timer armed");
        Ok(tid)
    }

    /// Kill a timer by owner handle and timer id. When this returns, no
    /// further expiry from that timer will be enqueued, tolerating at
    /// most one already in flight.
    pub fn kill_timer(&self, tref: TaskRef, tid: TimerId) -> Result<()> {
        if tid >= self.config.max_timers_per_task {
            return Err(Error::parameter(format!("timer id {} out of range", tid)));
        }

        let (_stop_tx, stopped_rx) = {
            let state = self.tasks[tref.index()].state.lock();
            state.check_ref(tref)?;
            let tmref = state.timers[tid]
                .ok_or_else(|| Error::not_found(format!("no timer at id {}", tid)))?;
            let endpoints = self.timers[tmref.index()]
                .endpoints()
                .ok_or_else(|| Error::internal("armed timer without stop channels"))?;
            // emitted under the task lock: timer cleanup takes the same
            // lock, so the stop request is visible to the expiry path's
            // post-cleanup drain
            let _ = endpoints.0.try_send(true);
            endpoints
        };

        let _ = stopped_rx.recv();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn timer_loop(
        self: Arc<Self>,
        tmref: TimerRef,
        owner: TaskRef,
        kind: TimerKind,
        dur: Duration,
        tag: u32,
        extra: Option<Body>,
        mailbox_tx: Sender<Message>,
        stop_rx: Receiver<bool>,
        stopped_tx: Sender<bool>,
    ) {
        let expiry_id = EV_TIMER_BASE + tag;
        let mut killed = false;

        match kind {
            TimerKind::Periodic => {
                let ticker = tick(dur);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            // a stop that raced the tick wins
                            if let Ok(true) = stop_rx.try_recv() {
                                killed = true;
                                break;
                            }
                            trace!(timer = tmref.index(), id = expiry_id, "periodic expiry");
                            let msg = Message {
                                sender: Origin::Timer,
                                receiver: owner,
                                id: expiry_id,
                                body: extra.clone(),
                            };
                            if mailbox_tx.send(msg).is_err() {
                                warn!(timer = tmref.index(), "owner mailbox gone, stopping");
                                break;
                            }
                        }
                        recv(stop_rx) -> req => {
                            killed = matches!(req, Ok(true));
                            break;
                        }
                    }
                }
            }
            TimerKind::OneShot => {
                let timeout = after(dur);
                select! {
                    recv(timeout) -> _ => {
                        trace!(timer = tmref.index(), id = expiry_id, "one-shot expiry");
                        let msg = Message {
                            sender: Origin::Timer,
                            receiver: owner,
                            id: expiry_id,
                            body: extra,
                        };
                        if mailbox_tx.send(msg).is_err() {
                            warn!(timer = tmref.index(), "owner mailbox gone");
                        }
                    }
                    recv(stop_rx) -> req => {
                        killed = matches!(req, Ok(true));
                    }
                }
            }
        }

        self.cleanup_timer(tmref, owner);

        // a killer that found our table entry before the cleanup has a
        // stop request pending; it is answered only once the node is back
        // in the free pool, so kill_timer returning implies the slot is
        // reusable
        if !killed {
            killed = matches!(stop_rx.try_recv(), Ok(true));
        }
        self.release_timer_node(tmref);
        if killed {
            let _ = stopped_tx.send(true);
        }
    }

    /// Remove the timer from the owner's table and reverse map and from
    /// the scheduler's owner registry. Task lock first, scheduler lock
    /// second.
    fn cleanup_timer(&self, tmref: TimerRef, owner: TaskRef) {
        let mut state = self.tasks[owner.index()].state.lock();
        if state.gen == owner.gen {
            if let Some(tid) = state.timer_index.remove(&tmref) {
                match state.timers.get_mut(tid) {
                    Some(entry) if *entry == Some(tmref) => *entry = None,
                    _ => warn!(
                        timer = tmref.index(),
                        tid, "timer table and reverse map disagree"
                    ),
                }
            }
        }
        self.core.lock().timer_owner.remove(&tmref);
    }

    /// Clear the control block and return the slot to the free pool.
    fn release_timer_node(&self, tmref: TimerRef) {
        {
            let mut tstate = self.timers[tmref.index()].state.lock();
            tstate.name.clear();
            tstate.tag = 0;
            tstate.kind = TimerKind::OneShot;
            tstate.dur = Duration::ZERO;
            tstate.owner = None;
            tstate.extra = None;
            tstate.stop = None;
            tstate.stopped = None;
        }
        self.timers[tmref.index()].gen.fetch_add(1, Ordering::AcqRel);

        let mut core = self.core.lock();
        let core = &mut *core;
        core.timer_free.push_head(&mut core.timer_links, tmref.index());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sched::task::TaskDesc;

    fn sched_with(max_timers: usize) -> Arc<Scheduler> {
        Scheduler::new(
            Config::builder()
                .task_pool_size(4)
                .timer_pool_size(8)
                .max_timers_per_task(max_timers)
                .build()
                .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_duration_rejected() {
        let sched = sched_with(2);
        let tref = sched.create_task(&TaskDesc::new("t", |_h, _m| {})).unwrap();
        let err = sched.set_timer(
            tref,
            TimerDesc::new("bad", 0, TimerKind::OneShot, Duration::ZERO),
        );
        assert!(matches!(err, Err(Error::Parameter(_))));
        sched.stop_task_ref(tref).unwrap();
    }

    #[test]
    fn test_timer_table_full() {
        let sched = sched_with(2);
        let tref = sched.create_task(&TaskDesc::new("t", |_h, _m| {})).unwrap();

        let long = Duration::from_secs(60);
        sched
            .set_timer(tref, TimerDesc::new("a", 1, TimerKind::Periodic, long))
            .unwrap();
        sched
            .set_timer(tref, TimerDesc::new("b", 2, TimerKind::Periodic, long))
            .unwrap();
        let err = sched.set_timer(tref, TimerDesc::new("c", 3, TimerKind::Periodic, long));
        assert!(matches!(err, Err(Error::Resource(_))));

        sched.stop_task_ref(tref).unwrap();
        // teardown killed both timers and returned their slots
        assert_eq!(sched.stats().armed_timer_slots, 0);
    }

    #[test]
    fn test_kill_unknown_timer() {
        let sched = sched_with(2);
        let tref = sched.create_task(&TaskDesc::new("t", |_h, _m| {})).unwrap();

        assert!(matches!(
            sched.kill_timer(tref, 0),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            sched.kill_timer(tref, 99),
            Err(Error::Parameter(_))
        ));

        sched.stop_task_ref(tref).unwrap();
    }

    #[test]
    fn test_kill_returns_slot_to_pool() {
        let sched = sched_with(2);
        let tref = sched.create_task(&TaskDesc::new("t", |_h, _m| {})).unwrap();

        let tid = sched
            .set_timer(
                tref,
                TimerDesc::new("tick", 5, TimerKind::Periodic, Duration::from_millis(10)),
            )
            .unwrap();
        assert_eq!(sched.stats().armed_timer_slots, 1);

        sched.kill_timer(tref, tid).unwrap();
        // the ack comes after the node is released, so the pool is
        // already whole
        assert_eq!(sched.stats().armed_timer_slots, 0);

        // the id is reusable afterwards
        assert!(matches!(
            sched.kill_timer(tref, tid),
            Err(Error::NotFound(_))
        ));
        sched.stop_task_ref(tref).unwrap();
    }
}
