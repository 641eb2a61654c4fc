// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Boundary to the remote offload processor.
//!
//! The processor is reached through a fixed, versionless call set. Every call
//! reports success or a failure status; only secure session migration
//! distinguishes a retryable failure from a fatal one.

use crate::{
    algo::{AlgoFlags, AlgorithmId},
    error::Error,
    frame::FrameProps,
};
use std::{fmt, os::fd::RawFd};
use tracing::error;

/// Opaque connection to the offload processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteHandle(pub u64);

/// Failure status reported by a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteStatus(pub i32);

impl RemoteStatus {
    pub const FAILED: RemoteStatus = RemoteStatus(-1);
    pub const NO_MEMORY: RemoteStatus = RemoteStatus(-2);
    pub const BAD_PARAM: RemoteStatus = RemoteStatus(-3);
    /// Call interrupted before completion; migration may be retried.
    pub const INTERRUPTED: RemoteStatus = RemoteStatus(-4);
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl std::error::Error for RemoteStatus {}

pub type RemoteResult<T> = Result<T, RemoteStatus>;

/// Logs a failed remote call and converts it into an [`Error`].
pub(crate) fn check<T>(call: &'static str, result: RemoteResult<T>) -> crate::Result<T> {
    result.map_err(|status| {
        error!("{} failed: {}", call, status);
        Error::remote(call, status)
    })
}

/// Outcome of a remote call that may be safely reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    Retryable(RemoteStatus),
    Fatal(RemoteStatus),
}

impl CallError {
    pub fn status(self) -> RemoteStatus {
        match self {
            CallError::Retryable(status) | CallError::Fatal(status) => status,
        }
    }
}

/// One algorithm the session asks the processor to enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub algo: AlgorithmId,
    pub feature_flags: u32,
}

impl Capability {
    pub fn list(flags: AlgoFlags) -> Vec<Capability> {
        flags
            .iter()
            .map(|algo| Capability {
                algo,
                feature_flags: 0,
            })
            .collect()
    }
}

/// Shared-memory region as seen by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub fd: RawFd,
    pub len: u32,
    pub offset: u32,
}

/// Value encoding of a tuning parameter as reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTuningKind {
    /// Signed 16.16 fixed point
    Fixed16p16,
    U32,
    S32,
    Unknown(u32),
}

/// Tuning parameter definition exactly as the processor reports it. Bounds
/// are raw 32-bit words interpreted according to `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTuningDef {
    pub name: String,
    pub id: u32,
    pub count: u32,
    pub kind: RawTuningKind,
    pub min: u32,
    pub max: u32,
}

/// Firmware logging and statistics controls pushed on every session open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugConfig {
    pub log_flags: u64,
    pub stats_flags: u32,
    pub stats_period: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockCorner {
    #[default]
    FirmwareDefault,
    Turbo,
}

/// The remote processor's call contract.
///
/// Implementations must be shareable across session threads; the manager
/// never retries a call except [`RemoteService::migrate_secure_session`].
pub trait RemoteService: Send + Sync {
    fn open(&self, uri: &str) -> RemoteResult<RemoteHandle>;
    fn close(&self, handle: RemoteHandle) -> RemoteResult<()>;
    fn init(&self, handle: RemoteHandle, caps: &[Capability]) -> RemoteResult<()>;
    fn deinit(&self, handle: RemoteHandle, caps: &[Capability]) -> RemoteResult<()>;
    fn set_debug_config(&self, handle: RemoteHandle, config: &DebugConfig) -> RemoteResult<()>;

    /// Firmware build version of `algo`, or `None` when the processor runs
    /// in protected mode and withholds it.
    fn build_version(&self, handle: RemoteHandle, algo: AlgorithmId)
        -> RemoteResult<Option<String>>;

    fn get_context_size(
        &self,
        handle: RemoteHandle,
        flags: AlgoFlags,
        frame_bytes: u32,
    ) -> RemoteResult<u32>;
    fn send_context(&self, handle: RemoteHandle, context: BufferDescriptor) -> RemoteResult<()>;
    fn retrieve_context(&self, handle: RemoteHandle) -> RemoteResult<()>;

    fn get_scratch_requirements(
        &self,
        handle: RemoteHandle,
        flags: AlgoFlags,
    ) -> RemoteResult<Vec<u32>>;
    fn set_scratch_buffers(
        &self,
        handle: RemoteHandle,
        flags: AlgoFlags,
        buffers: &[BufferDescriptor],
    ) -> RemoteResult<()>;
    fn retrieve_scratch_buffers(&self, handle: RemoteHandle) -> RemoteResult<()>;

    fn migrate_secure_session(&self, handle: RemoteHandle, heap_id: u32) -> Result<(), CallError>;

    fn get_tuning_param_count(&self, handle: RemoteHandle, algo: AlgorithmId)
        -> RemoteResult<u32>;
    fn get_tuning_params(
        &self,
        handle: RemoteHandle,
        algo: AlgorithmId,
        count: u32,
    ) -> RemoteResult<Vec<RawTuningDef>>;
    fn apply_tuning_params(
        &self,
        handle: RemoteHandle,
        algo: AlgorithmId,
        params: BufferDescriptor,
    ) -> RemoteResult<()>;

    fn prepare_context(
        &self,
        handle: RemoteHandle,
        props: &FrameProps,
        flags: AlgoFlags,
        context_size: u32,
        diag_size: u32,
    ) -> RemoteResult<()>;

    fn set_clock(&self, handle: RemoteHandle, corner: ClockCorner) -> RemoteResult<()>;

    /// Maps a buffer that is not mapped in this process (secure memory) and
    /// returns the processor-visible address assigned to it.
    fn register_fd(&self, fd: RawFd, len: u32) -> Option<u64>;

    /// Registers a buffer mapped at `addr` in this process.
    fn register_buf(&self, addr: usize, len: u32, fd: RawFd);

    fn unregister_buf(&self, addr: usize, len: u32);
}
