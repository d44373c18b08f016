//! The scheduler: slot arenas, registries, task lifecycle and messaging.
//!
//! One scheduler-wide mutex guards the pools, the busy list and the name /
//! group / timer-owner registries. Each task slot carries its own lock for
//! the state its handler and timers touch. Lock order is always task lock
//! first, scheduler lock second; no lock is held while blocking on a
//! mailbox send.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::sched::msg::{Body, Message, Origin, EV_POWERON};
use crate::sched::pool::{full_chain, Link, SlotList};
use crate::sched::task::{
    Mailbox, RunState, StartMode, StaticTaskSpec, GroupDesc, TaskDesc, TaskRef, TaskSlot,
    WatchdogSpec,
};
use crate::sched::timer::{TimerRef, TimerSlot};
use crate::sched::watchdog;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};

/// Scheduler-wide state behind the single scheduler mutex.
pub(crate) struct Core {
    pub(crate) task_links: Box<[Link]>,
    pub(crate) timer_links: Box<[Link]>,
    pub(crate) task_free: SlotList,
    pub(crate) task_busy: SlotList,
    pub(crate) timer_free: SlotList,
    pub(crate) names: HashMap<String, TaskRef>,
    pub(crate) groups: HashMap<String, Vec<TaskRef>>,
    pub(crate) timer_owner: HashMap<TimerRef, TaskRef>,
}

/// Point-in-time resource counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub free_task_slots: usize,
    pub busy_task_slots: usize,
    pub free_timer_slots: usize,
    pub armed_timer_slots: usize,
    pub group_count: usize,
}

/// The cooperative task scheduler.
///
/// Constructed as an `Arc` because every spawned task and timer context
/// keeps a reference back into the arenas.
pub struct Scheduler {
    pub(crate) config: Config,
    pub(crate) tasks: Box<[TaskSlot]>,
    pub(crate) timers: Box<[TimerSlot]>,
    pub(crate) core: Mutex<Core>,
    watchdog_kill: Mutex<Option<Sender<Error>>>,
}

/// Handle given to user handlers and death callbacks: the task's own view
/// of the scheduler.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) sched: Arc<Scheduler>,
    pub(crate) tref: TaskRef,
}

impl Scheduler {
    /// Build pools and registries.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        config.validate()?;

        let tasks: Box<[TaskSlot]> = (0..config.task_pool_size)
            .map(|_| TaskSlot::new(config.max_timers_per_task))
            .collect();
        let timers: Box<[TimerSlot]> = (0..config.timer_pool_size).map(|_| TimerSlot::new()).collect();

        let core = Core {
            task_links: full_chain(config.task_pool_size),
            timer_links: full_chain(config.timer_pool_size),
            task_free: SlotList::full(config.task_pool_size),
            task_busy: SlotList::empty(),
            timer_free: SlotList::full(config.timer_pool_size),
            names: HashMap::new(),
            groups: HashMap::new(),
            timer_owner: HashMap::new(),
        };

        Ok(Arc::new(Scheduler {
            config,
            tasks,
            timers,
            core: Mutex::new(core),
            watchdog_kill: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create all tasks of the static table, deliver the power-on event to
    /// every entry flagged for it and to every name in `poweron`, then
    /// spawn the watchdog. Returns the name-to-handle map.
    pub fn start(
        self: &Arc<Self>,
        table: &[StaticTaskSpec],
        poweron: &[&str],
    ) -> Result<HashMap<String, TaskRef>> {
        if table.is_empty() {
            return Err(Error::parameter("static task table is empty"));
        }
        if self.watchdog_kill.lock().is_some() {
            return Err(Error::mismatched("scheduler already started"));
        }

        let mut name_map = HashMap::new();

        for spec in table {
            let desc = TaskDesc {
                name: spec.name.clone(),
                handler: spec.handler.clone(),
                mailbox_capacity: spec
                    .mailbox_capacity
                    .unwrap_or(self.config.max_mailbox_size),
                watchdog: WatchdogSpec {
                    enabled: false,
                    cycle: self.config.watchdog_cycle,
                    die_threshold: self.config.die_threshold,
                },
                death_cb: spec.death_cb.clone(),
                user_data: None,
                start: StartMode::Go,
            };

            let tref = self.create_task(&desc)?;
            name_map.insert(spec.name.clone(), tref);

            if spec.poweron {
                self.send(Message::new(Origin::Scheduler, tref, EV_POWERON))?;
            }
        }

        for name in poweron {
            let tref = match self.lookup(name) {
                Ok(tref) => tref,
                Err(_) => {
                    warn!(task = *name, "power-on target not found");
                    continue;
                }
            };
            self.send(Message::new(Origin::Scheduler, tref, EV_POWERON))?;
        }

        let kill = watchdog::spawn(self)?;
        *self.watchdog_kill.lock() = Some(kill);

        debug!(tasks = table.len(), "scheduler started");
        Ok(name_map)
    }

    /// Stop every remaining task, then the watchdog. Must not be called
    /// from inside a task.
    pub fn shutdown(self: &Arc<Self>) {
        let busy: Vec<usize> = {
            let core = self.core.lock();
            core.task_busy.iter(&core.task_links).collect()
        };

        for idx in busy {
            let tref = {
                let state = self.tasks[idx].state.lock();
                if state.run_state == RunState::Idle {
                    continue;
                }
                TaskRef::new(idx as u32, state.gen)
            };
            if let Err(e) = self.stop_task_ref(tref) {
                trace!(slot = idx, error = %e, "shutdown: task already gone");
            }
        }

        if let Some(kill) = self.watchdog_kill.lock().take() {
            let _ = kill.send(Error::Killed);
        }
        debug!("scheduler shut down");
    }

    // ------------------------------------------------------------------
    // task creation
    // ------------------------------------------------------------------

    /// Create a single task from its description.
    pub fn create_task(self: &Arc<Self>, desc: &TaskDesc) -> Result<TaskRef> {
        if desc.mailbox_capacity > self.config.max_mailbox_size {
            return Err(Error::parameter(format!(
                "mailbox capacity {} exceeds cap {}",
                desc.mailbox_capacity, self.config.max_mailbox_size
            )));
        }

        // acquire a free slot; the duplicate pre-check keeps a doomed
        // create from cycling a slot through the pool
        let idx = {
            let mut core = self.core.lock();
            if !desc.name.is_empty() && core.names.contains_key(&desc.name) {
                return Err(Error::Duplicated(desc.name.clone()));
            }
            let core = &mut *core;
            core.task_free.pop_head(&mut core.task_links)?
        };

        let slot = &self.tasks[idx];
        let tref = {
            let mut state = slot.state.lock();

            // a recycled slot must come back clean; stale endpoints are a
            // teardown bug worth hearing about
            if state.mailbox.is_some() || state.done.is_some() || state.stopped.is_some() {
                warn!(slot = idx, "recycled slot still holds channels");
            }
            for entry in state.timers.iter_mut() {
                if entry.take().is_some() {
                    warn!(slot = idx, "recycled slot still holds a timer entry");
                }
            }
            state.timer_index.clear();

            state.name = desc.name.clone();
            state.handler = Some(desc.handler.clone());
            let (tx, rx) = bounded(desc.mailbox_capacity);
            state.mailbox = Some(Mailbox { tx, rx });
            state.mailbox_capacity = desc.mailbox_capacity;
            state.done = Some(bounded(1));
            state.stopped = Some(bounded(1));
            state.dog = desc.watchdog.clone();
            state.death_cb = desc.death_cb.clone();
            state.user_data = desc.user_data.clone();
            state.run_state = RunState::Suspended;

            slot.dog_enabled.store(desc.watchdog.enabled, Ordering::Release);
            slot.die_threshold
                .store(desc.watchdog.die_threshold, Ordering::Release);
            slot.armed.store(false, Ordering::Release);
            slot.bite.store(0, Ordering::Release);

            TaskRef::new(idx as u32, state.gen)
        };

        // enroll and move to the busy list
        {
            let mut core = self.core.lock();
            if !desc.name.is_empty() {
                if core.names.contains_key(&desc.name) {
                    drop(core);
                    self.recycle_slot(idx);
                    return Err(Error::Duplicated(desc.name.clone()));
                }
                core.names.insert(desc.name.clone(), tref);
            }
            let core = &mut *core;
            core.task_busy.push_head(&mut core.task_links, idx);
        }

        debug!(slot = idx, name = %desc.name, "task created");

        if desc.start == StartMode::Go {
            self.spawn_loop(tref)?;
        }

        Ok(tref)
    }

    /// Create every member of a group from the shared description.
    ///
    /// Never short-circuits: all members are attempted, survivors are
    /// registered under the group name, and an aggregate failure is
    /// reported as `Unknown` with the failed count.
    pub fn create_group(self: &Arc<Self>, desc: &GroupDesc) -> Result<Vec<TaskRef>> {
        if desc.members.len() > self.config.max_group_size {
            return Err(Error::resource(format!(
                "group {} exceeds {} members",
                desc.group, self.config.max_group_size
            )));
        }
        if self.core.lock().groups.contains_key(&desc.group) {
            return Err(Error::Duplicated(desc.group.clone()));
        }

        let mut members = Vec::with_capacity(desc.members.len());
        let mut failed = 0usize;

        for name in &desc.members {
            let mut member_desc = desc.template.clone();
            member_desc.name = name.trim().to_string();
            match self.create_task(&member_desc) {
                Ok(tref) => members.push(tref),
                Err(e) => {
                    warn!(group = %desc.group, member = %name, error = %e, "group member creation failed");
                    failed += 1;
                }
            }
        }

        self.core.lock().groups.insert(desc.group.clone(), members.clone());

        if failed > 0 {
            return Err(Error::Unknown(failed));
        }
        Ok(members)
    }

    // ------------------------------------------------------------------
    // start / stop
    // ------------------------------------------------------------------

    /// Start a suspended task by name.
    pub fn start_task(self: &Arc<Self>, name: &str) -> Result<()> {
        let tref = self.lookup(name)?;
        self.spawn_loop(tref)
    }

    /// Start a suspended task by handle.
    pub fn start_task_ref(self: &Arc<Self>, tref: TaskRef) -> Result<()> {
        self.spawn_loop(tref)
    }

    /// Stop a task by name: deliver the killed reason and wait for the
    /// stopped acknowledgement. Must not be called from the task being
    /// stopped; self-termination goes through [`Scheduler::task_done`].
    pub fn stop_task(self: &Arc<Self>, name: &str) -> Result<()> {
        let tref = self.lookup(name)?;
        self.stop_task_ref(tref)
    }

    /// Stop a task by handle; see [`Scheduler::stop_task`].
    pub fn stop_task_ref(self: &Arc<Self>, tref: TaskRef) -> Result<()> {
        let (done_tx, stopped_rx) = {
            let mut state = self.tasks[tref.index()].state.lock();
            state.check_ref(tref)?;
            if state.run_state == RunState::Suspended {
                // no loop exists to observe the termination code; claim
                // the slot and tear it down inline
                state.run_state = RunState::Running;
                drop(state);
                let handle = TaskHandle {
                    sched: self.clone(),
                    tref,
                };
                self.finalize_task(tref, &handle);
                return Ok(());
            }
            let done = state
                .done
                .as_ref()
                .ok_or_else(|| Error::internal("running task without termination channel"))?;
            let stopped = state
                .stopped
                .as_ref()
                .ok_or_else(|| Error::internal("running task without stopped channel"))?;
            (done.0.clone(), stopped.1.clone())
        };

        if done_tx.try_send(Error::Killed).is_err() {
            trace!(task = ?tref, "termination already signalled");
        }

        // teardown completes before the acknowledgement is sent, so once
        // this returns the slot is back in the free pool
        let _ = stopped_rx.recv();
        Ok(())
    }

    /// Alias kept from the original surface: delete is stop.
    pub fn delete_task(self: &Arc<Self>, name: &str) -> Result<()> {
        self.stop_task(name)
    }

    /// Fire the termination reason without waiting for teardown. This is
    /// the self-kill path for a task ending itself from inside its own
    /// handler, where waiting for the stopped signal would deadlock.
    pub fn task_done(&self, tref: TaskRef, reason: Error) -> Result<()> {
        let done_tx = {
            let state = self.tasks[tref.index()].state.lock();
            state.check_ref(tref)?;
            state
                .done
                .as_ref()
                .ok_or_else(|| Error::internal("running task without termination channel"))?
                .0
                .clone()
        };
        if done_tx.try_send(reason).is_err() {
            trace!(task = ?tref, "termination already signalled");
        }
        Ok(())
    }

    /// Start every suspended member of a group. Returns the count of
    /// members that could not be started.
    pub fn start_group(self: &Arc<Self>, group: &str) -> Result<usize> {
        let members = self.group_members(group)?;
        let mut failed = 0usize;
        for tref in members {
            if let Err(e) = self.spawn_loop(tref) {
                warn!(group, task = ?tref, error = %e, "group member start failed");
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Stop every member of a group in registration order and remove the
    /// group entry. Returns the count of members that could not be
    /// stopped (already gone counts as a failure).
    pub fn stop_group(self: &Arc<Self>, group: &str) -> Result<usize> {
        let members = self.group_members(group)?;
        let mut failed = 0usize;
        for tref in members {
            if let Err(e) = self.stop_task_ref(tref) {
                debug!(group, task = ?tref, error = %e, "group member stop failed");
                failed += 1;
            }
        }
        self.core.lock().groups.remove(group);
        Ok(failed)
    }

    /// Alias kept from the original surface: delete is stop.
    pub fn delete_group(self: &Arc<Self>, group: &str) -> Result<usize> {
        self.stop_group(group)
    }

    // ------------------------------------------------------------------
    // messaging
    // ------------------------------------------------------------------

    /// Enqueue a message on the receiver's mailbox, blocking when the
    /// mailbox is full.
    pub fn send(&self, msg: Message) -> Result<()> {
        let tx = {
            let state = self.tasks[msg.receiver.index()].state.lock();
            state.check_ref(msg.receiver)?;
            if state.mailbox_capacity == 0 {
                return Err(Error::mismatched(
                    "perpetual task is not message-scheduled",
                ));
            }
            state
                .mailbox
                .as_ref()
                .ok_or_else(|| Error::internal("mailbox of target is empty"))?
                .tx
                .clone()
        };

        trace!(receiver = ?msg.receiver, id = msg.id, "send");
        tx.send(msg)
            .map_err(|_| Error::internal("receiver mailbox disconnected"))
    }

    /// Send to every group member, rewriting the receiver per member.
    /// Returns the count of members the message could not reach.
    pub fn send_to_group(&self, group: &str, msg: Message) -> Result<usize> {
        let members = self.group_members(group)?;
        let mut failed = 0usize;
        for tref in members {
            let mut member_msg = msg.clone();
            member_msg.receiver = tref;
            if let Err(e) = self.send(member_msg) {
                debug!(group, task = ?tref, error = %e, "group send failed");
                failed += 1;
            }
        }
        Ok(failed)
    }

    // ------------------------------------------------------------------
    // user data / names
    // ------------------------------------------------------------------

    pub fn get_user_data(&self, tref: TaskRef) -> Result<Option<Body>> {
        let state = self.tasks[tref.index()].state.lock();
        state.check_ref(tref)?;
        Ok(state.user_data.clone())
    }

    pub fn set_user_data(&self, tref: TaskRef, data: Body) -> Result<()> {
        let mut state = self.tasks[tref.index()].state.lock();
        state.check_ref(tref)?;
        state.user_data = Some(data);
        Ok(())
    }

    pub fn del_user_data(&self, tref: TaskRef) -> Result<()> {
        let mut state = self.tasks[tref.index()].state.lock();
        state.check_ref(tref)?;
        state.user_data = None;
        Ok(())
    }

    pub fn get_task_name(&self, tref: TaskRef) -> Result<String> {
        let state = self.tasks[tref.index()].state.lock();
        state.check_ref(tref)?;
        Ok(state.name.clone())
    }

    /// Resolve a task name.
    pub fn lookup(&self, name: &str) -> Result<TaskRef> {
        self.core
            .lock()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| Error::not_found(name.to_string()))
    }

    pub fn stats(&self) -> SchedulerStats {
        let core = self.core.lock();
        SchedulerStats {
            free_task_slots: core.task_free.len(),
            busy_task_slots: core.task_busy.len(),
            free_timer_slots: core.timer_free.len(),
            armed_timer_slots: self.config.timer_pool_size - core.timer_free.len(),
            group_count: core.groups.len(),
        }
    }

    // ------------------------------------------------------------------
    // handler loop and teardown
    // ------------------------------------------------------------------

    fn group_members(&self, group: &str) -> Result<Vec<TaskRef>> {
        self.core
            .lock()
            .groups
            .get(group)
            .cloned()
            .ok_or_else(|| Error::not_found(group.to_string()))
    }

    /// Transition a suspended task to running and spawn its loop.
    fn spawn_loop(self: &Arc<Self>, tref: TaskRef) -> Result<()> {
        let idx = tref.index();
        let slot = &self.tasks[idx];

        let (name, mailbox, done_rx, stopped_tx, handler, perpetual) = {
            let mut state = slot.state.lock();
            state.check_ref(tref)?;
            if state.run_state != RunState::Suspended {
                return Err(Error::mismatched(format!(
                    "task {:?} is not suspended",
                    tref
                )));
            }
            let mailbox = state
                .mailbox
                .clone()
                .ok_or_else(|| Error::internal("task without mailbox"))?;
            let done_rx = state
                .done
                .as_ref()
                .ok_or_else(|| Error::internal("task without termination channel"))?
                .1
                .clone();
            let stopped_tx = state
                .stopped
                .as_ref()
                .ok_or_else(|| Error::internal("task without stopped channel"))?
                .0
                .clone();
            let handler = state
                .handler
                .clone()
                .ok_or_else(|| Error::internal("task without handler"))?;
            state.run_state = RunState::Running;
            (
                state.name.clone(),
                mailbox,
                done_rx,
                stopped_tx,
                handler,
                state.mailbox_capacity == 0,
            )
        };

        let thread_name = if name.is_empty() {
            format!("{}-task-{}", self.config.thread_name_prefix, idx)
        } else {
            format!("{}-{}", self.config.thread_name_prefix, name)
        };

        let mut builder = thread::Builder::new().name(thread_name);
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let sched = self.clone();
        let spawned = builder.spawn(move || {
            sched.task_loop(tref, mailbox, done_rx, stopped_tx, handler, perpetual);
        });

        if let Err(e) = spawned {
            let mut state = slot.state.lock();
            state.run_state = RunState::Suspended;
            return Err(Error::internal(format!("spawn failed: {}", e)));
        }
        Ok(())
    }

    fn task_loop(
        self: Arc<Self>,
        tref: TaskRef,
        mailbox: Mailbox,
        done_rx: Receiver<Error>,
        stopped_tx: Sender<bool>,
        handler: Arc<crate::sched::task::Handler>,
        perpetual: bool,
    ) {
        let idx = tref.index();
        let slot = &self.tasks[idx];
        let handle = TaskHandle {
            sched: self.clone(),
            tref,
        };

        if perpetual {
            // zero-capacity mailbox: the handler owns its own loop; run it
            // once in a separate context and wait only for termination
            let run_handle = handle.clone();
            let run_handler = handler.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-run-{}", self.config.thread_name_prefix, idx))
                .spawn(move || {
                    if catch_unwind(AssertUnwindSafe(|| run_handler(&run_handle, None))).is_err() {
                        warn!(slot = idx, "perpetual handler panicked");
                    }
                });
            if spawned.is_err() {
                warn!(slot = idx, "failed to spawn perpetual handler");
            }

            match done_rx.recv() {
                Ok(reason) => debug!(slot = idx, %reason, "perpetual task done"),
                Err(_) => warn!(slot = idx, "termination channel dropped"),
            }
        } else {
            loop {
                select! {
                    recv(mailbox.rx) -> msg => {
                        let msg = match msg {
                            Ok(msg) => msg,
                            Err(_) => break,
                        };
                        let dog = slot.dog_enabled.load(Ordering::Acquire);
                        if dog {
                            slot.armed.store(true, Ordering::Release);
                        }
                        let id = msg.id;
                        if catch_unwind(AssertUnwindSafe(|| handler(&handle, Some(msg)))).is_err() {
                            warn!(slot = idx, event = id, "handler panicked");
                        }
                        if dog {
                            slot.armed.store(false, Ordering::Release);
                        }
                        slot.bite.store(0, Ordering::Release);
                    }
                    recv(done_rx) -> reason => {
                        match reason {
                            Ok(reason) => debug!(slot = idx, %reason, "task done"),
                            Err(_) => warn!(slot = idx, "termination channel dropped"),
                        }
                        break;
                    }
                }
            }
        }

        // release our mailbox endpoints before teardown: a timer blocked
        // on delivery can only observe disconnection once every receiver
        // is gone
        drop(mailbox);
        self.finalize_task(tref, &handle);

        // only after the slot is fully recycled does the stopper wake up
        let _ = stopped_tx.send(true);
    }

    /// Teardown in fixed order: busy dequeue, death callback, timers,
    /// control-block clean, registry removal, slot release.
    fn finalize_task(&self, tref: TaskRef, handle: &TaskHandle) {
        let idx = tref.index();
        let slot = &self.tasks[idx];

        // 1. off the busy list
        {
            let mut core = self.core.lock();
            let core = &mut *core;
            if let Err(e) = core.task_busy.remove(&mut core.task_links, idx) {
                warn!(slot = idx, error = %e, "busy dequeue failed");
            }
        }

        // 2. death callback; a failure is logged, never fatal
        let death_cb = slot.state.lock().death_cb.clone();
        if let Some(cb) = death_cb {
            if let Err(e) = cb(handle) {
                warn!(slot = idx, error = %e, "death callback failed");
            }
        }

        // 3. stop every owned timer, waiting on each acknowledgement;
        //    endpoints are snapshotted so no lock is held across the wait
        let timer_endpoints = {
            let mut state = slot.state.lock();
            // the mailbox closes before the stop handshake: a timer
            // mid-delivery into a full mailbox would otherwise never
            // reach its stop channel and the wait below would not end
            state.mailbox.take();
            let mut endpoints = Vec::new();
            for (tid, entry) in state.timers.iter().enumerate() {
                let tmref = match entry {
                    Some(tmref) => *tmref,
                    None => continue,
                };
                if state.timer_index.get(&tmref) != Some(&tid) {
                    warn!(slot = idx, tid, "timer table and reverse map disagree");
                }
                if let Some((stop_tx, stopped_rx)) = self.timers[tmref.index()].endpoints() {
                    let _ = stop_tx.try_send(true);
                    endpoints.push(stopped_rx);
                }
            }
            endpoints
        };
        for stopped_rx in timer_endpoints {
            let _ = stopped_rx.recv();
        }

        // 4. clean the control block; the generation bump retires every
        //    outstanding handle to this incarnation
        let name = {
            let mut state = slot.state.lock();
            let name = std::mem::take(&mut state.name);
            state.handler = None;
            state.mailbox = None;
            state.mailbox_capacity = 0;
            state.done = None;
            state.stopped = None;
            state.dog = Default::default();
            state.death_cb = None;
            state.user_data = None;
            for entry in state.timers.iter_mut() {
                if entry.take().is_some() {
                    warn!(slot = idx, "timer survived the kill sweep");
                }
            }
            state.timer_index.clear();
            state.run_state = RunState::Idle;
            state.gen = state.gen.wrapping_add(1);
            name
        };
        slot.dog_enabled.store(false, Ordering::Release);
        slot.armed.store(false, Ordering::Release);
        slot.bite.store(0, Ordering::Release);

        // 5. + 6. registry removal, then back to the free pool
        {
            let mut core = self.core.lock();
            if !name.is_empty() {
                core.names.remove(&name);
            }
            let core = &mut *core;
            core.task_free.push_head(&mut core.task_links, idx);
        }

        debug!(slot = idx, name = %name, "task stopped");
    }

    /// Roll back a half-created slot (duplicate-name loser).
    fn recycle_slot(&self, idx: usize) {
        {
            let mut state = self.tasks[idx].state.lock();
            state.name.clear();
            state.handler = None;
            state.mailbox = None;
            state.mailbox_capacity = 0;
            state.done = None;
            state.stopped = None;
            state.death_cb = None;
            state.user_data = None;
            state.run_state = RunState::Idle;
            state.gen = state.gen.wrapping_add(1);
        }
        let mut core = self.core.lock();
        let core = &mut *core;
        core.task_free.push_head(&mut core.task_links, idx);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("stats", &self.stats())
            .finish()
    }
}

impl TaskHandle {
    pub fn task_ref(&self) -> TaskRef {
        self.tref
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    pub fn name(&self) -> String {
        self.sched.get_task_name(self.tref).unwrap_or_default()
    }

    /// Send a message to another task with this task as the sender.
    pub fn send(&self, receiver: TaskRef, id: u32, body: Option<Body>) -> Result<()> {
        self.sched.send(Message {
            sender: Origin::Task(self.tref),
            receiver,
            id,
            body,
        })
    }

    /// Arm a timer owned by this task.
    pub fn set_timer(&self, desc: crate::sched::timer::TimerDesc) -> Result<crate::sched::timer::TimerId> {
        self.sched.set_timer(self.tref, desc)
    }

    /// Kill a timer owned by this task.
    pub fn kill_timer(&self, tid: crate::sched::timer::TimerId) -> Result<()> {
        self.sched.kill_timer(self.tref, tid)
    }

    /// End this task from inside its own handler.
    pub fn done(&self, reason: Error) -> Result<()> {
        self.sched.task_done(self.tref, reason)
    }

    pub fn user_data(&self) -> Option<Body> {
        self.sched.get_user_data(self.tref).ok().flatten()
    }

    pub fn set_user_data(&self, data: Body) -> Result<()> {
        self.sched.set_user_data(self.tref, data)
    }

    pub fn del_user_data(&self) -> Result<()> {
        self.sched.del_user_data(self.tref)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("tref", &self.tref).finish()
    }
}
