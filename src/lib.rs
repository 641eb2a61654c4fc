// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Offload Core Manager
//!
//! This library manages sessions on a hardware offload image-processing core.
//! It boots shared per-algorithm tuning state once for many concurrent
//! sessions, opens and closes per-session processing contexts on the remote
//! processor, and owns the shared-memory buffers exchanged with it.
//!
//! ## Features
//!
//! - **Shared Tuning State**: Per-algorithm tuning schemas are queried from
//!   the processor once and shared by every session, reference counted by
//!   dependent sessions and optionally pinned by a process-wide boot lock.
//! - **Serialized Boot/Shutdown**: A process-wide lifecycle gate ensures only
//!   one boot or shutdown runs at a time.
//! - **Session Lifecycle**: Open, reconfigure and close with staged unwind on
//!   failure, so a failed open never leaves buffers attached.
//! - **Secure Sessions**: Buffers from protected heaps registered at
//!   processor-assigned addresses, with bounded migration retries.
//! - **DMA Buffers**: Context and scratch buffers allocated from Linux DMA
//!   heaps.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_offload::{
//!     algo::{AlgoFlags, AlgorithmId},
//!     alloc::DmaHeapAllocator,
//!     manager::{CoreConfig, OffloadCore},
//!     session::Session,
//!     sim::SimRemote,
//! };
//! use dma_heap::HeapKind;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let allocator = Arc::new(DmaHeapAllocator::new(HeapKind::Cma, None)?);
//! let remote = Arc::new(SimRemote::with_default_tunings());
//! let core = OffloadCore::new(remote, allocator, CoreConfig::default());
//!
//! // Pre-warm tunings for the whole process
//! let algos = AlgoFlags::from(AlgorithmId::NR) | AlgorithmId::IE;
//! core.boot(None, algos)?;
//!
//! let mut session = Session::new(core.clone(), false);
//! session.open(algos, 0)?;
//! session.close()?;
//!
//! core.shutdown(algos)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: Kernel 5.10+ with DMA heap support for [`alloc::DmaHeapAllocator`]
//! - **Remote Processor**: An implementation of [`remote::RemoteService`]; the
//!   [`sim`] module provides an in-process one.
//!
//! ## Safety
//!
//! This library uses `unsafe` code only to map and unmap DMA buffers. All
//! unsafe operations are isolated in the [`alloc`] module and wrapped with
//! safe APIs.

pub mod algo;
pub mod alloc;
pub mod context;
pub mod error;
pub mod frame;
pub mod gate;
pub mod manager;
pub mod registration;
pub mod remote;
pub mod scratch;
pub mod session;
pub mod sim;
pub mod tuning;

pub use error::{Error, Result};
