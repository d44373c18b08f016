use peercore::prelude::*;
use peercore::sched::{StartMode, TimerId};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn small_config(tasks: usize) -> Config {
    Config::builder()
        .task_pool_size(tasks)
        .timer_pool_size(32)
        .max_timers_per_task(8)
        .build()
        .unwrap()
}

#[test]
fn test_static_start_delivers_poweron() {
    let sched = Scheduler::new(small_config(8)).unwrap();
    let (tx, rx) = crossbeam_channel::bounded(4);

    let table = vec![
        StaticTaskSpec::new("dht", {
            let tx = tx.clone();
            move |h, msg| {
                if let Some(msg) = msg {
                    let _ = tx.send((h.name(), msg.id));
                }
            }
        }),
        StaticTaskSpec::new("peers", move |h, msg| {
            if let Some(msg) = msg {
                let _ = tx.send((h.name(), msg.id));
            }
        })
        .no_poweron(),
    ];

    let name_map = sched.start(&table, &["peers"]).unwrap();
    assert_eq!(name_map.len(), 2);
    assert!(name_map.contains_key("dht"));

    // "dht" is powered on by its table flag, "peers" by the power-on list
    let mut seen: Vec<(String, u32)> = vec![
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
    ];
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("dht".to_string(), EV_POWERON),
            ("peers".to_string(), EV_POWERON)
        ]
    );

    sched.shutdown();
    let stats = sched.stats();
    assert_eq!(stats.busy_task_slots, 0);
}

#[test]
fn test_mailbox_fifo_order() {
    let sched = Scheduler::new(small_config(8)).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();

    let tref = sched
        .create_task(
            &TaskDesc::new("ordered", move |_h, msg| {
                if let Some(msg) = msg {
                    let _ = tx.send(msg.id);
                }
            })
            .mailbox_capacity(64),
        )
        .unwrap();

    for i in 0..50u32 {
        sched
            .send(Message::new(Origin::Scheduler, tref, EV_USER_BASE + i))
            .unwrap();
    }

    for i in 0..50u32 {
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            EV_USER_BASE + i
        );
    }

    sched.stop_task("ordered").unwrap();
}

#[test]
fn test_one_shot_timer_delivery() {
    let sched = Scheduler::new(small_config(8)).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();

    let armed_at = Instant::now();
    sched
        .create_task(&TaskDesc::new("oneshot", move |h, msg| {
            let msg = match msg {
                Some(msg) => msg,
                None => return,
            };
            if msg.id == EV_POWERON {
                h.set_timer(
                    TimerDesc::new("fire-once", 7, TimerKind::OneShot, Duration::from_millis(50))
                        .extra(Arc::new("x".to_string())),
                )
                .unwrap();
            } else {
                let body = msg.body_as::<String>().cloned();
                let _ = tx.send((msg.id, body, Instant::now()));
            }
        }))
        .unwrap();

    let tref = sched.lookup("oneshot").unwrap();
    sched
        .send(Message::new(Origin::Scheduler, tref, EV_POWERON))
        .unwrap();

    let (id, body, fired_at) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(id, EV_TIMER_BASE + 7);
    assert_eq!(body.as_deref(), Some("x"));

    let elapsed = fired_at - armed_at;
    assert!(elapsed >= Duration::from_millis(45), "fired early: {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(250), "fired late: {:?}", elapsed);

    // one-shot means exactly one expiry
    assert!(rx.recv_timeout(Duration::from_millis(120)).is_err());

    sched.stop_task("oneshot").unwrap();
    assert_eq!(sched.stats().armed_timer_slots, 0);
}

#[test]
fn test_periodic_timer_kill_race() {
    let sched = Scheduler::new(small_config(8)).unwrap();
    let (tick_tx, tick_rx) = crossbeam_channel::unbounded();
    let (tid_tx, tid_rx) = crossbeam_channel::bounded::<TimerId>(1);

    sched
        .create_task(&TaskDesc::new("pulse", move |h, msg| {
            let msg = match msg {
                Some(msg) => msg,
                None => return,
            };
            if msg.id == EV_POWERON {
                let tid = h
                    .set_timer(TimerDesc::new(
                        "pulse-10ms",
                        1,
                        TimerKind::Periodic,
                        Duration::from_millis(10),
                    ))
                    .unwrap();
                let _ = tid_tx.send(tid);
            } else if msg.id == EV_TIMER_BASE + 1 {
                let _ = tick_tx.send(Instant::now());
            }
        }))
        .unwrap();

    let tref = sched.lookup("pulse").unwrap();
    sched
        .send(Message::new(Origin::Scheduler, tref, EV_POWERON))
        .unwrap();
    let tid = tid_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    // three expiries, then kill from outside the task
    for _ in 0..3 {
        tick_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }
    sched.kill_timer(tref, tid).unwrap();

    // at most one expiry was in flight when the kill landed
    let mut trailing = 0;
    while tick_rx.recv_timeout(Duration::from_millis(60)).is_ok() {
        trailing += 1;
    }
    assert!(trailing <= 1, "observed {} trailing expiries", trailing);

    // the timer is gone; killing again reports it
    assert!(sched.kill_timer(tref, tid).is_err());

    sched.stop_task("pulse").unwrap();
    assert_eq!(sched.stats().armed_timer_slots, 0);
}

#[test]
fn test_duplicate_name_leaves_original_running() {
    let sched = Scheduler::new(small_config(8)).unwrap();
    let (tx, rx) = crossbeam_channel::bounded(1);

    let original = sched
        .create_task(&TaskDesc::new("A", move |_h, msg| {
            if let Some(msg) = msg {
                let _ = tx.send(msg.id);
            }
        }))
        .unwrap();

    let err = sched.create_task(&TaskDesc::new("A", |_h, _m| {}));
    assert_eq!(err.unwrap_err(), Error::Duplicated("A".to_string()));

    // the first "A" still receives messages
    assert_eq!(sched.lookup("A").unwrap(), original);
    sched
        .send(Message::new(Origin::Scheduler, original, EV_USER_BASE))
        .unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), EV_USER_BASE);

    // the loser's slot went back to the pool
    let stats = sched.stats();
    assert_eq!(stats.busy_task_slots, 1);
    assert_eq!(stats.free_task_slots, 7);

    sched.stop_task("A").unwrap();
}

#[test]
fn test_group_fanout_partial_failure() {
    let sched = Scheduler::new(small_config(16)).unwrap();

    let members: Vec<String> = (0..4).map(|i| format!("worker-{}", i)).collect();
    let handles = sched
        .create_group(&GroupDesc::new("workers", members, |_h, _m| {}))
        .unwrap();
    assert_eq!(handles.len(), 4);
    assert_eq!(sched.stats().group_count, 1);

    // stop one member directly by handle
    sched.stop_task_ref(handles[1]).unwrap();

    // group stop reports exactly that one failure and removes the group
    let failed = sched.stop_group("workers").unwrap();
    assert_eq!(failed, 1);
    assert_eq!(sched.stats().group_count, 0);
    assert!(sched.stop_group("workers").is_err());

    let stats = sched.stats();
    assert_eq!(stats.busy_task_slots, 0);
    assert_eq!(stats.free_task_slots, 16);
}

#[test]
fn test_group_send_counts_failures() {
    let sched = Scheduler::new(small_config(16)).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();

    let members: Vec<String> = (0..3).map(|i| format!("rx-{}", i)).collect();
    let handles = sched
        .create_group(&GroupDesc::new("receivers", members, move |h, msg| {
            if let Some(msg) = msg {
                let _ = tx.send((h.name(), msg.id));
            }
        }))
        .unwrap();

    sched.stop_task_ref(handles[0]).unwrap();

    let failed = sched
        .send_to_group(
            "receivers",
            Message::new(Origin::Scheduler, handles[0], EV_USER_BASE),
        )
        .unwrap();
    assert_eq!(failed, 1);

    let mut got = vec![
        rx.recv_timeout(Duration::from_secs(1)).unwrap().0,
        rx.recv_timeout(Duration::from_secs(1)).unwrap().0,
    ];
    got.sort();
    assert_eq!(got, vec!["rx-1".to_string(), "rx-2".to_string()]);

    sched.stop_group("receivers").unwrap();
}

#[test]
fn test_pool_exhaustion_and_reuse() {
    let pool = 8;
    let sched = Scheduler::new(small_config(pool)).unwrap();

    let mut handles = Vec::new();
    for i in 0..pool {
        handles.push(
            sched
                .create_task(&TaskDesc::new(&format!("t{}", i), |_h, _m| {}))
                .unwrap(),
        );
    }

    let err = sched.create_task(&TaskDesc::new("overflow", |_h, _m| {}));
    assert!(matches!(err, Err(Error::Resource(_))));

    // free one slot; the next create succeeds and reuses it
    sched.stop_task("t3").unwrap();
    let replacement = sched
        .create_task(&TaskDesc::new("replacement", |_h, _m| {}))
        .unwrap();
    assert_eq!(replacement.index(), handles[3].index());

    let stats = sched.stats();
    assert_eq!(stats.busy_task_slots, pool);
    assert_eq!(stats.free_task_slots, 0);

    for i in 0..pool {
        if i != 3 {
            sched.stop_task(&format!("t{}", i)).unwrap();
        }
    }
    sched.stop_task("replacement").unwrap();

    let stats = sched.stats();
    assert_eq!(stats.free_task_slots, pool);
    assert_eq!(stats.busy_task_slots, 0);
}

#[test]
fn test_stop_closes_task_resources() {
    let sched = Scheduler::new(small_config(8)).unwrap();

    let tref = sched
        .create_task(&TaskDesc::new("closable", |_h, _m| {}))
        .unwrap();

    sched.stop_task("closable").unwrap();

    // the handle is retired and the slot is back in the free pool
    assert!(matches!(sched.get_task_name(tref), Err(Error::NotFound(_))));
    assert!(matches!(
        sched.send(Message::new(Origin::Scheduler, tref, EV_USER_BASE)),
        Err(Error::NotFound(_))
    ));
    assert_eq!(sched.stats().free_task_slots, 8);
}

#[test]
fn test_zero_capacity_mailbox_is_perpetual() {
    let sched = Scheduler::new(small_config(8)).unwrap();
    let (tx, rx) = crossbeam_channel::bounded(1);

    let tref = sched
        .create_task(
            &TaskDesc::new("reader-loop", move |_h, msg| {
                // perpetual tasks are entered exactly once, with no message
                let _ = tx.send(msg.is_none());
            })
            .mailbox_capacity(0),
        )
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());

    // perpetual tasks are not message-scheduled
    assert!(matches!(
        sched.send(Message::new(Origin::Scheduler, tref, EV_USER_BASE)),
        Err(Error::Mismatched(_))
    ));

    sched.stop_task("reader-loop").unwrap();
    assert_eq!(sched.stats().free_task_slots, 8);
}

#[test]
fn test_suspended_group_starts_together() {
    let sched = Scheduler::new(small_config(16)).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();

    let members: Vec<String> = (0..3).map(|i| format!("late-{}", i)).collect();
    let handles = sched
        .create_group(
            &GroupDesc::new("latecomers", members, move |h, msg| {
                if let Some(msg) = msg {
                    let _ = tx.send((h.name(), msg.id));
                }
            })
            .suspended(),
        )
        .unwrap();

    // suspended members exist but have no loop yet; messages queue up
    for &tref in &handles {
        sched
            .send(Message::new(Origin::Scheduler, tref, EV_POWERON))
            .unwrap();
    }
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    let failed = sched.start_group("latecomers").unwrap();
    assert_eq!(failed, 0);
    for _ in 0..3 {
        let (_, id) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(id, EV_POWERON);
    }

    // starting again fails for every already-running member
    let failed = sched.start_group("latecomers").unwrap();
    assert_eq!(failed, 3);

    sched.stop_group("latecomers").unwrap();
}

#[test]
fn test_handler_to_handler_messaging() {
    let sched = Scheduler::new(small_config(8)).unwrap();
    let (tx, rx) = crossbeam_channel::bounded(1);

    sched
        .create_task(&TaskDesc::new("pong", |h, msg| {
            if let Some(msg) = msg {
                if let Origin::Task(sender) = msg.sender {
                    let _ = h.send(sender, msg.id + 1, None);
                }
            }
        }))
        .unwrap();

    sched
        .create_task(&TaskDesc::new("ping", move |h, msg| {
            let msg = match msg {
                Some(msg) => msg,
                None => return,
            };
            if msg.id == EV_POWERON {
                let pong = h.scheduler().lookup("pong").unwrap();
                h.send(pong, EV_USER_BASE, None).unwrap();
            } else {
                let _ = tx.send(msg.id);
            }
        }))
        .unwrap();

    let ping = sched.lookup("ping").unwrap();
    sched
        .send(Message::new(Origin::Scheduler, ping, EV_POWERON))
        .unwrap();

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        EV_USER_BASE + 1
    );

    sched.stop_task("ping").unwrap();
    sched.stop_task("pong").unwrap();
}

#[test]
fn test_create_task_with_explicit_suspend_flag() {
    let sched = Scheduler::new(small_config(8)).unwrap();

    let desc = TaskDesc::new("dormant", |_h, _m| {}).suspended();
    let tref = sched.create_task(&desc).unwrap();

    // suspended tasks are registered and on the busy list
    assert_eq!(sched.lookup("dormant").unwrap(), tref);
    assert_eq!(sched.stats().busy_task_slots, 1);

    // stopping a never-started task reclaims the slot
    sched.stop_task("dormant").unwrap();
    assert_eq!(sched.stats().free_task_slots, 8);

    // a round trip through StartMode keeps Go and Suspend distinct
    assert_ne!(StartMode::Go, StartMode::Suspend);
}
