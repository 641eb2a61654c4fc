// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_offload::{
    algo::AlgorithmId,
    remote::{RawTuningDef, RawTuningKind, RemoteHandle, RemoteService},
    sim::{Call, SimRemote},
    tuning::{SessionRef, TuningRegistry, MAX_TUNING_DEFS, MAX_TUNING_SESSIONS},
    Error,
};
use std::{error::Error as _, fs, path::PathBuf};

fn setup() -> Result<(SimRemote, RemoteHandle, TuningRegistry), Box<dyn std::error::Error>> {
    let remote = SimRemote::with_default_tunings();
    let handle = remote.open("offload://cdsp")?;
    Ok((remote, handle, TuningRegistry::new()))
}

fn tuning_file(name: &str, contents: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = std::env::temp_dir().join(format!(
        "edgefirst-offload-{}-{}.json",
        name,
        std::process::id()
    ));
    fs::write(&path, contents)?;
    Ok(path)
}

#[test]
fn test_session_refcount() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;
    let ie = AlgorithmId::new(2)?;
    let (a, b) = (SessionRef::next(), SessionRef::next());

    registry.register_algo_boot(&remote, handle, ie, false)?;
    registry.init_algo_parsed_block(ie, None, false)?;
    registry.register_session(ie, a)?;
    registry.register_session(ie, b)?;
    assert_eq!(registry.record_state(ie).map(|s| s.sessions), Some(2));

    assert!(registry.shutdown_algo(ie, false).is_err_and(|e| e.is_busy()));
    registry.unregister_session(ie, a)?;
    assert!(registry.shutdown_algo(ie, false).is_err_and(|e| e.is_busy()));
    assert!(!registry.release_record(ie));

    registry.unregister_session(ie, b)?;
    registry.term_algo_parsed_block(ie, false);
    registry.shutdown_algo(ie, false)?;
    let state = registry.record_state(ie).ok_or("record released early")?;
    assert!(!state.booted);
    assert_eq!(state.defs, 0);
    assert!(!state.block);

    assert!(registry.release_record(ie));
    assert!(registry.record_state(ie).is_none());
    assert!(registry.release_record(ie));

    Ok(())
}

#[test]
fn test_session_registration_errors() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;
    let session = SessionRef::next();

    assert!(matches!(
        registry.register_session(AlgorithmId::NR, session),
        Err(Error::InvalidState(_))
    ));

    registry.register_algo_boot(&remote, handle, AlgorithmId::NR, false)?;
    registry.register_session(AlgorithmId::NR, session)?;
    assert!(matches!(
        registry.register_session(AlgorithmId::NR, session),
        Err(Error::AlreadyInProgress(_))
    ));
    assert_eq!(
        registry.record_state(AlgorithmId::NR).map(|s| s.sessions),
        Some(1)
    );

    assert!(matches!(
        registry.unregister_session(AlgorithmId::NR, SessionRef::next()),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        registry.unregister_session(AlgorithmId::FRC, session),
        Err(Error::InvalidState(_))
    ));

    Ok(())
}

#[test]
fn test_session_table_full() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;
    registry.register_algo_boot(&remote, handle, AlgorithmId::MVP, false)?;

    let sessions: Vec<_> = (0..MAX_TUNING_SESSIONS).map(|_| SessionRef::next()).collect();
    for session in &sessions {
        registry.register_session(AlgorithmId::MVP, *session)?;
    }
    let err = registry
        .register_session(AlgorithmId::MVP, SessionRef::next())
        .err()
        .ok_or("17th session registered")?;
    assert!(matches!(err, Error::ResourceBusy(_)));

    registry.unregister_session(AlgorithmId::MVP, sessions[3])?;
    registry.register_session(AlgorithmId::MVP, SessionRef::next())?;

    Ok(())
}

#[test]
fn test_boot_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;

    registry.register_algo_boot(&remote, handle, AlgorithmId::NR, false)?;
    registry.register_algo_boot(&remote, handle, AlgorithmId::NR, true)?;
    assert_eq!(remote.calls(Call::GetTuningParamCount), 1);
    assert_eq!(remote.calls(Call::GetTuningParams), 1);

    let state = registry
        .record_state(AlgorithmId::NR)
        .ok_or("no record")?;
    assert!(state.booted);
    assert!(!state.boot_locked);
    assert_eq!(state.defs, 3);

    let defs = registry
        .definitions(AlgorithmId::NR)
        .ok_or("no definitions")?;
    assert_eq!(defs[0].name, "strength");
    assert_eq!(defs[0].max.to_string(), "4");

    Ok(())
}

#[test]
fn test_boot_all_or_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;
    remote.set_tuning_defs(
        AlgorithmId::FRC,
        vec![
            RawTuningDef {
                name: "gain".to_owned(),
                id: 0,
                count: 1,
                kind: RawTuningKind::U32,
                min: 0,
                max: 10,
            },
            RawTuningDef {
                name: "table".to_owned(),
                id: 1,
                count: 4,
                kind: RawTuningKind::Unknown(7),
                min: 0,
                max: 0,
            },
        ],
    );

    let err = registry
        .register_algo_boot(&remote, handle, AlgorithmId::FRC, false)
        .err()
        .ok_or("boot accepted unknown kind")?;
    assert!(matches!(err, Error::InvalidArgument(_)));

    let state = registry
        .record_state(AlgorithmId::FRC)
        .ok_or("no record")?;
    assert!(!state.booted);
    assert_eq!(state.defs, 0);
    assert!(registry.definitions(AlgorithmId::FRC).is_none());

    Ok(())
}

#[test]
fn test_boot_too_many_defs() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;
    let defs = (0..=MAX_TUNING_DEFS)
        .map(|id| RawTuningDef {
            name: format!("t{}", id),
            id,
            count: 1,
            kind: RawTuningKind::U32,
            min: 0,
            max: 1,
        })
        .collect();
    remote.set_tuning_defs(AlgorithmId::IE, defs);

    assert!(matches!(
        registry.register_algo_boot(&remote, handle, AlgorithmId::IE, false),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(remote.calls(Call::GetTuningParams), 0);

    Ok(())
}

#[test]
fn test_boot_query_failure() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;
    remote.fail_next(
        Call::GetTuningParamCount,
        edgefirst_offload::remote::RemoteStatus::FAILED,
    );

    let err = registry
        .register_algo_boot(&remote, handle, AlgorithmId::NR, false)
        .err()
        .ok_or("boot ignored failure")?;
    assert!(matches!(err, Error::RemoteService { .. }));
    assert!(err.source().is_none());

    // A later attempt succeeds on the same record.
    registry.register_algo_boot(&remote, handle, AlgorithmId::NR, false)?;
    assert!(registry
        .record_state(AlgorithmId::NR)
        .is_some_and(|s| s.booted));

    Ok(())
}

#[test]
fn test_boot_lock() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;
    registry.register_algo_boot(&remote, handle, AlgorithmId::NR, true)?;
    registry.init_algo_parsed_block(AlgorithmId::NR, None, false)?;

    registry.term_algo_parsed_block(AlgorithmId::NR, false);
    assert!(registry
        .record_state(AlgorithmId::NR)
        .is_some_and(|s| s.block));
    assert!(matches!(
        registry.shutdown_algo(AlgorithmId::NR, false),
        Err(Error::ResourceBusy(_))
    ));

    registry.term_algo_parsed_block(AlgorithmId::NR, true);
    registry.shutdown_algo(AlgorithmId::NR, true)?;
    assert!(matches!(
        registry.shutdown_algo(AlgorithmId::NR, true),
        Err(Error::InvalidState(_))
    ));
    assert!(registry.release_record(AlgorithmId::NR));

    Ok(())
}

#[test]
fn test_parsed_block() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;
    let path = tuning_file(
        "block",
        r#"{ "nr": { "strength": [1.5], "mode": [2], "bias": [-3, 4], "unknown": [1] } }"#,
    )?;

    assert!(matches!(
        registry.init_algo_parsed_block(AlgorithmId::NR, Some(&path), false),
        Err(Error::InvalidState(_))
    ));

    registry.register_algo_boot(&remote, handle, AlgorithmId::NR, false)?;
    registry.init_algo_parsed_block(AlgorithmId::NR, None, false)?;
    assert!(registry.packed_tunings(AlgorithmId::NR).is_none());

    // Without force the empty block is kept.
    registry.init_algo_parsed_block(AlgorithmId::NR, Some(&path), false)?;
    assert!(registry.packed_tunings(AlgorithmId::NR).is_none());

    registry.init_algo_parsed_block(AlgorithmId::NR, Some(&path), true)?;
    let packed = registry
        .packed_tunings(AlgorithmId::NR)
        .ok_or("no tunings packed")?;
    let words: Vec<u32> = packed
        .chunks_exact(4)
        .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    assert_eq!(
        words,
        vec![3, 0, 1, 0x0001_8000, 1, 1, 2, 2, 2, -3i32 as u32, 4]
    );

    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn test_parsed_block_bad_file() -> Result<(), Box<dyn std::error::Error>> {
    let (remote, handle, registry) = setup()?;
    let path = tuning_file("bad", "[1, 2, 3]")?;
    registry.register_algo_boot(&remote, handle, AlgorithmId::IE, false)?;

    assert!(registry
        .init_algo_parsed_block(AlgorithmId::IE, Some(&path), false)
        .is_err());
    assert!(registry
        .record_state(AlgorithmId::IE)
        .is_some_and(|s| s.booted && !s.block));

    let missing = std::env::temp_dir().join("edgefirst-offload-missing.json");
    assert!(matches!(
        registry.init_algo_parsed_block(AlgorithmId::IE, Some(&missing), false),
        Err(Error::Io(_))
    ));

    fs::remove_file(&path)?;
    Ok(())
}
