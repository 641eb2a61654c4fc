// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_offload::{
    algo::{AlgoFlags, AlgorithmId},
    gate::{GlobalState, LifecycleGate, Transition},
    manager::{CoreConfig, OffloadCore},
    session::Session,
    sim::{Call, SimAllocator, SimRemote},
    Error,
};
use std::{
    error::Error as StdError,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

#[test]
fn test_gate_exclusive() -> Result<(), Box<dyn StdError>> {
    let gate = Arc::new(LifecycleGate::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let (gate, inside, peak) = (gate.clone(), inside.clone(), peak.clone());
            thread::spawn(move || {
                let transition = match i % 2 {
                    0 => Transition::Boot,
                    _ => Transition::Shutdown,
                };
                for _ in 0..50 {
                    let guard = gate.enter(transition);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert_eq!(gate.state(), GlobalState::from(guard.transition()));
                    thread::sleep(Duration::from_micros(50));
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().map_err(|_| "gate worker panicked")?;
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(gate.state(), GlobalState::Ready);

    Ok(())
}

#[test]
fn test_concurrent_boot_single_query() -> Result<(), Box<dyn StdError>> {
    let remote = Arc::new(SimRemote::with_default_tunings());
    remote.set_query_delay(Some(Duration::from_millis(2)));
    let core = OffloadCore::new(
        remote.clone(),
        Arc::new(SimAllocator::new()),
        CoreConfig::default(),
    );
    let flags = AlgoFlags::from(AlgorithmId::NR);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let core = core.clone();
            thread::spawn(move || core.boot(None, flags))
        })
        .collect();
    for worker in workers {
        let booted = worker.join().map_err(|_| "boot worker panicked")??;
        assert_eq!(booted, flags);
    }

    // Only the first boot queries the schema.
    assert_eq!(remote.calls(Call::GetTuningParamCount), 1);
    assert_eq!(remote.open_handles(), 0);

    core.shutdown(flags)?;
    assert!(core.registry().record_state(AlgorithmId::NR).is_none());

    Ok(())
}

#[test]
fn test_open_races_close() -> Result<(), Box<dyn StdError>> {
    let remote = Arc::new(SimRemote::with_default_tunings());
    let allocator = Arc::new(SimAllocator::new());
    let core = OffloadCore::new(remote.clone(), allocator.clone(), CoreConfig::default());
    let flags = AlgoFlags::from(AlgorithmId::NR);

    // Every close of the last dependent releases the record while other
    // threads are opening on it.
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let core = core.clone();
            thread::spawn(move || -> Result<(), Error> {
                for _ in 0..500 {
                    let mut session = Session::new(core.clone(), false);
                    session.open(flags, 0)?;
                    session.close()?;
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().map_err(|_| "session worker panicked")??;
    }

    assert!(core.registry().record_state(AlgorithmId::NR).is_none());
    assert_eq!(remote.open_handles(), 0);
    assert_eq!(allocator.live(), 0);

    Ok(())
}

#[test]
fn test_sessions_with_process_boot() -> Result<(), Box<dyn StdError>> {
    let remote = Arc::new(SimRemote::with_default_tunings());
    let allocator = Arc::new(SimAllocator::new());
    let core = OffloadCore::new(remote.clone(), allocator.clone(), CoreConfig::default());
    let flags = AlgoFlags::from(AlgorithmId::MVP) | AlgorithmId::NR | AlgorithmId::IE;

    let lifecycle = {
        let core = core.clone();
        thread::spawn(move || -> Result<(), Error> {
            for _ in 0..20 {
                core.boot(None, flags)?;
                thread::sleep(Duration::from_micros(200));
                // Busy while sessions depend on the records.
                match core.shutdown(flags) {
                    Ok(()) | Err(Error::ResourceBusy(_)) | Err(Error::InvalidState(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    };

    let sessions: Vec<_> = (0..4)
        .map(|_| {
            let core = core.clone();
            thread::spawn(move || -> Result<usize, Error> {
                let mut opened = 0;
                for _ in 0..25 {
                    let mut session = Session::new(core.clone(), false);
                    session.open(flags, 0)?;
                    opened += 1;
                    session.close()?;
                }
                Ok(opened)
            })
        })
        .collect();

    let mut opened = 0;
    for session in sessions {
        opened += session.join().map_err(|_| "session worker panicked")??;
    }
    lifecycle.join().map_err(|_| "lifecycle worker panicked")??;
    assert_eq!(opened, 4 * 25);

    // Clear whatever the last process boot left behind.
    let _ = core.shutdown(flags);
    for id in flags.iter() {
        assert!(core.registry().record_state(id).is_none());
    }
    assert_eq!(remote.open_handles(), 0);
    assert_eq!(remote.outstanding_contexts(), 0);
    assert_eq!(remote.registered_buffers(), 0);
    assert_eq!(allocator.live(), 0);
    assert_eq!(core.gate().state(), GlobalState::Ready);

    Ok(())
}
