//! Liveness watchdog.
//!
//! A single context sweeps the busy list at a fixed cycle. A task whose
//! handler is in flight at sweep time (armed latch set) takes a bite; the
//! counter resets on every dispatch, so only a handler stuck across
//! consecutive sweeps accumulates bites. At the die threshold the dog
//! barks a diagnostic; it never kills the task.

use crate::error::{Error, Result};
use crate::sched::scheduler::Scheduler;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Spawn the watchdog; returns the sender that kills it.
pub(crate) fn spawn(sched: &Arc<Scheduler>) -> Result<Sender<Error>> {
    let (kill_tx, kill_rx) = bounded(1);
    let sched = sched.clone();
    thread::Builder::new()
        .name(format!("{}-watchdog", sched.config.thread_name_prefix))
        .spawn(move || run(sched, kill_rx))
        .map_err(|e| Error::internal(format!("watchdog spawn failed: {}", e)))?;
    Ok(kill_tx)
}

fn run(sched: Arc<Scheduler>, kill_rx: Receiver<Error>) {
    let ticker = tick(sched.config.watchdog_cycle);
    loop {
        select! {
            recv(ticker) -> _ => sweep(&sched),
            recv(kill_rx) -> why => {
                match why {
                    Ok(why) => debug!(%why, "watchdog killed"),
                    Err(_) => debug!("watchdog kill channel dropped"),
                }
                break;
            }
        }
    }
}

/// Walk the busy list under the scheduler lock. The fields read here are
/// atomics on the slot, so no per-task lock is taken.
fn sweep(sched: &Scheduler) {
    let core = sched.core.lock();
    for idx in core.task_busy.iter(&core.task_links) {
        let slot = &sched.tasks[idx];
        if !slot.dog_enabled.load(Ordering::Acquire) || !slot.armed.load(Ordering::Acquire) {
            continue;
        }
        let bites = slot.bite.fetch_add(1, Ordering::AcqRel) + 1;
        if bites >= slot.die_threshold.load(Ordering::Acquire) {
            warn!(slot = idx, bites, "task stuck in handler");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sched::task::{TaskDesc, WatchdogSpec};
    use std::time::Duration;

    #[test]
    fn test_sweep_bites_only_armed_dogs() {
        let sched = Scheduler::new(
            Config::builder()
                .task_pool_size(4)
                .timer_pool_size(8)
                .build()
                .unwrap(),
        )
        .unwrap();

        let guarded = sched
            .create_task(&TaskDesc::new("guarded", |_h, _m| {}).watchdog(WatchdogSpec::enabled(3)))
            .unwrap();
        let plain = sched.create_task(&TaskDesc::new("plain", |_h, _m| {})).unwrap();

        // neither task is inside a handler: no bites
        sweep(&sched);
        assert_eq!(sched.tasks[guarded.index()].bite.load(Ordering::Acquire), 0);

        // simulate an in-flight handler on the guarded task
        sched.tasks[guarded.index()].armed.store(true, Ordering::Release);
        sched.tasks[plain.index()].armed.store(true, Ordering::Release);
        sweep(&sched);
        sweep(&sched);
        assert_eq!(sched.tasks[guarded.index()].bite.load(Ordering::Acquire), 2);
        // no dog, no bites
        assert_eq!(sched.tasks[plain.index()].bite.load(Ordering::Acquire), 0);

        sched.tasks[guarded.index()].armed.store(false, Ordering::Release);
        sched.stop_task_ref(guarded).unwrap();
        sched.stop_task_ref(plain).unwrap();
    }

    #[test]
    fn test_watchdog_kill() {
        let sched = Scheduler::new(
            Config::builder()
                .task_pool_size(4)
                .timer_pool_size(8)
                .watchdog_cycle(Duration::from_millis(10))
                .build()
                .unwrap(),
        )
        .unwrap();

        let kill = spawn(&sched).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(kill.send(Error::Killed).is_ok());
    }
}
