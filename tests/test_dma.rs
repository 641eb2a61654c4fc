// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use dma_heap::HeapKind;
use edgefirst_offload::{
    algo::{AlgoFlags, AlgorithmId},
    alloc::{Allocator, DmaHeapAllocator},
    manager::{CoreConfig, OffloadCore},
    session::{Session, SessionState},
    sim::SimRemote,
};
use serial_test::serial;
use std::{error::Error, sync::Arc};

#[test]
#[serial]
#[ignore = "requires DMA heap (run with --include-ignored to enable)"]
fn test_dma_alloc() -> Result<(), Box<dyn Error>> {
    let allocator = DmaHeapAllocator::new(HeapKind::Cma, None)?;

    let buf = allocator.alloc(1920 * 1080, false)?;
    assert_eq!(buf.len, 1920 * 1080);
    assert!(buf.vaddr.is_some());
    assert!(buf.fd >= 0);

    allocator.write(&buf, &[0xa5; 4096])?;
    assert!(allocator.write(&buf, &vec![0; 1920 * 1080 + 1]).is_err());
    allocator.free(buf);

    // Secure buffers need a secure heap.
    assert!(allocator.alloc(4096, true).is_err());

    Ok(())
}

#[test]
#[serial]
#[ignore = "requires DMA heap (run with --include-ignored to enable)"]
fn test_dma_session() -> Result<(), Box<dyn Error>> {
    let remote = Arc::new(SimRemote::with_default_tunings());
    let allocator = Arc::new(DmaHeapAllocator::new(HeapKind::Cma, None)?);
    let core = OffloadCore::new(remote.clone(), allocator, CoreConfig::default());

    let mut session = Session::new(core, false);
    session.open(AlgoFlags::from(AlgorithmId::NR) | AlgorithmId::IE, 0)?;
    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(remote.registered_buffers(), 3);

    session.close()?;
    assert_eq!(remote.registered_buffers(), 0);
    assert_eq!(remote.open_handles(), 0);

    Ok(())
}
