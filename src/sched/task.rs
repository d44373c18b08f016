//! Task slots and descriptions.
//!
//! A task slot is a reusable arena record carrying the full runtime state
//! of one task: its mailbox, termination and stopped channels, watchdog
//! descriptor, timer table and the user handler. Slots are recycled
//! through the free pool, so every field is re-initialized at creation
//! and cleared at teardown.

use crate::config::{DEFAULT_DIE_THRESHOLD, DEFAULT_WATCHDOG_CYCLE};
use crate::error::{Error, Result};
use crate::sched::msg::{Body, Message};
use crate::sched::scheduler::TaskHandle;
use crate::sched::timer::TimerRef;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::Arc;
use std::time::Duration;

/// User handler: invoked once per dequeued message. Perpetual tasks
/// (zero-capacity mailbox) are invoked exactly once with `None`.
pub type Handler = dyn Fn(&TaskHandle, Option<Message>) + Send + Sync + 'static;

/// Death callback, invoked during teardown. A failure is logged but does
/// not abort the teardown sequence.
pub type DeathCallback = dyn Fn(&TaskHandle) -> Result<()> + Send + Sync + 'static;

/// Generation-checked handle to a task slot.
///
/// The generation is bumped every time the slot is returned to the free
/// pool, so a handle that outlives its task resolves to `NotFound`
/// instead of addressing whatever task reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub(crate) idx: u32,
    pub(crate) gen: u32,
}

impl TaskRef {
    pub(crate) fn new(idx: u32, gen: u32) -> Self {
        TaskRef { idx, gen }
    }

    /// Slot index within the task pool.
    pub fn index(&self) -> usize {
        self.idx as usize
    }
}

/// Whether a created task is scheduled immediately or left dormant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Go,
    Suspend,
}

/// Run-state of a slot. `Idle` means the slot is on the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Idle,
    Suspended,
    Running,
}

/// Watchdog descriptor carried by every task.
#[derive(Debug, Clone)]
pub struct WatchdogSpec {
    pub enabled: bool,
    pub cycle: Duration,
    pub die_threshold: u32,
}

impl Default for WatchdogSpec {
    fn default() -> Self {
        WatchdogSpec {
            enabled: false,
            cycle: DEFAULT_WATCHDOG_CYCLE,
            die_threshold: DEFAULT_DIE_THRESHOLD,
        }
    }
}

impl WatchdogSpec {
    pub fn enabled(die_threshold: u32) -> Self {
        WatchdogSpec {
            enabled: true,
            die_threshold,
            ..Default::default()
        }
    }
}

/// Description of a task to create.
#[derive(Clone)]
pub struct TaskDesc {
    pub(crate) name: String,
    pub(crate) handler: Arc<Handler>,
    pub(crate) mailbox_capacity: usize,
    pub(crate) watchdog: WatchdogSpec,
    pub(crate) death_cb: Option<Arc<DeathCallback>>,
    pub(crate) user_data: Option<Body>,
    pub(crate) start: StartMode,
}

impl TaskDesc {
    /// A task named `name` (empty for anonymous tasks, which are then
    /// unreachable by name lookup) running `handler`, started
    /// immediately with a default-capacity mailbox.
    pub fn new<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&TaskHandle, Option<Message>) + Send + Sync + 'static,
    {
        TaskDesc {
            name: name.trim().to_string(),
            handler: Arc::new(handler),
            mailbox_capacity: 64,
            watchdog: WatchdogSpec::default(),
            death_cb: None,
            user_data: None,
            start: StartMode::Go,
        }
    }

    /// Mailbox capacity. Zero puts the task in perpetual mode: the
    /// handler is invoked once with no message and owns its own loop.
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn watchdog(mut self, spec: WatchdogSpec) -> Self {
        self.watchdog = spec;
        self
    }

    pub fn death_cb<F>(mut self, cb: F) -> Self
    where
        F: Fn(&TaskHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.death_cb = Some(Arc::new(cb));
        self
    }

    pub fn user_data(mut self, data: Body) -> Self {
        self.user_data = Some(data);
        self
    }

    /// Leave the task dormant until started by name or handle.
    pub fn suspended(mut self) -> Self {
        self.start = StartMode::Suspend;
        self
    }
}

impl std::fmt::Debug for TaskDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDesc")
            .field("name", &self.name)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("watchdog", &self.watchdog)
            .field("start", &self.start)
            .finish()
    }
}

/// Description of a task group: one shared description applied to every
/// member name.
#[derive(Clone)]
pub struct GroupDesc {
    pub(crate) group: String,
    pub(crate) members: Vec<String>,
    pub(crate) template: TaskDesc,
}

impl GroupDesc {
    pub fn new<F>(group: &str, members: Vec<String>, handler: F) -> Self
    where
        F: Fn(&TaskHandle, Option<Message>) + Send + Sync + 'static,
    {
        GroupDesc {
            group: group.to_string(),
            members,
            template: TaskDesc::new("", handler),
        }
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.template.mailbox_capacity = capacity;
        self
    }

    pub fn watchdog(mut self, spec: WatchdogSpec) -> Self {
        self.template.watchdog = spec;
        self
    }

    pub fn death_cb<F>(mut self, cb: F) -> Self
    where
        F: Fn(&TaskHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.template.death_cb = Some(Arc::new(cb));
        self
    }

    pub fn suspended(mut self) -> Self {
        self.template.start = StartMode::Suspend;
        self
    }
}

impl std::fmt::Debug for GroupDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupDesc")
            .field("group", &self.group)
            .field("members", &self.members)
            .finish()
    }
}

/// One entry of the static task table handed to `Scheduler::start`.
#[derive(Clone)]
pub struct StaticTaskSpec {
    pub(crate) name: String,
    pub(crate) handler: Arc<Handler>,
    pub(crate) mailbox_capacity: Option<usize>,
    pub(crate) death_cb: Option<Arc<DeathCallback>>,
    /// Send `EvPoweron` right after creation.
    pub(crate) poweron: bool,
}

impl StaticTaskSpec {
    pub fn new<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&TaskHandle, Option<Message>) + Send + Sync + 'static,
    {
        StaticTaskSpec {
            name: name.to_string(),
            handler: Arc::new(handler),
            mailbox_capacity: None,
            death_cb: None,
            poweron: true,
        }
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    pub fn death_cb<F>(mut self, cb: F) -> Self
    where
        F: Fn(&TaskHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.death_cb = Some(Arc::new(cb));
        self
    }

    /// Create without sending the power-on event.
    pub fn no_poweron(mut self) -> Self {
        self.poweron = false;
        self
    }
}

impl std::fmt::Debug for StaticTaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTaskSpec")
            .field("name", &self.name)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("poweron", &self.poweron)
            .finish()
    }
}

pub(crate) type DoneChannel = (Sender<Error>, Receiver<Error>);
pub(crate) type StoppedChannel = (Sender<bool>, Receiver<bool>);

/// The mailbox endpoints. Senders are cloned out to producers; the
/// receiver is drained only by the owning task's loop.
#[derive(Debug, Clone)]
pub(crate) struct Mailbox {
    pub(crate) tx: Sender<Message>,
    pub(crate) rx: Receiver<Message>,
}

/// Mutable task control block, guarded by the per-task lock.
pub(crate) struct TaskState {
    pub(crate) gen: u32,
    pub(crate) run_state: RunState,
    pub(crate) name: String,
    pub(crate) handler: Option<Arc<Handler>>,
    pub(crate) mailbox: Option<Mailbox>,
    pub(crate) mailbox_capacity: usize,
    pub(crate) done: Option<DoneChannel>,
    pub(crate) stopped: Option<StoppedChannel>,
    pub(crate) dog: WatchdogSpec,
    pub(crate) death_cb: Option<Arc<DeathCallback>>,
    pub(crate) user_data: Option<Body>,
    /// Fixed-arity timer table; `timer_index` is its reverse map.
    pub(crate) timers: Vec<Option<TimerRef>>,
    pub(crate) timer_index: HashMap<TimerRef, usize>,
}

/// One arena entry. The watchdog fields the sweep reads are atomics so
/// the sweep never has to take the per-task lock while holding the
/// scheduler lock (which would invert the task -> scheduler lock order).
pub(crate) struct TaskSlot {
    pub(crate) state: Mutex<TaskState>,
    pub(crate) dog_enabled: AtomicBool,
    /// Set only while a handler invocation is in flight.
    pub(crate) armed: AtomicBool,
    pub(crate) bite: AtomicU32,
    pub(crate) die_threshold: AtomicU32,
}

impl TaskSlot {
    pub(crate) fn new(max_timers: usize) -> Self {
        TaskSlot {
            state: Mutex::new(TaskState {
                gen: 0,
                run_state: RunState::Idle,
                name: String::new(),
                handler: None,
                mailbox: None,
                mailbox_capacity: 0,
                done: None,
                stopped: None,
                dog: WatchdogSpec::default(),
                death_cb: None,
                user_data: None,
                timers: vec![None; max_timers],
                timer_index: HashMap::new(),
            }),
            dog_enabled: AtomicBool::new(false),
            armed: AtomicBool::new(false),
            bite: AtomicU32::new(0),
            die_threshold: AtomicU32::new(DEFAULT_DIE_THRESHOLD),
        }
    }
}

impl TaskState {
    /// Check a handle against the slot's current generation and a
    /// live run-state.
    pub(crate) fn check_ref(&self, tref: TaskRef) -> Result<()> {
        if self.gen != tref.gen || self.run_state == RunState::Idle {
            return Err(Error::not_found(format!("stale task handle {:?}", tref)));
        }
        Ok(())
    }
}
