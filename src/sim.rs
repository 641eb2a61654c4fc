// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-process stand-ins for the offload processor and the shared-memory
//! allocator.
//!
//! Both keep call counters and support fault injection so lifecycle and
//! unwind behavior can be exercised without hardware.

use crate::{
    algo::{AlgoFlags, AlgorithmId},
    alloc::{Allocator, SharedBuffer},
    error::{Error, Result},
    frame::FrameProps,
    remote::{
        BufferDescriptor, CallError, Capability, ClockCorner, DebugConfig, RawTuningDef,
        RawTuningKind, RemoteHandle, RemoteResult, RemoteService, RemoteStatus,
    },
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    os::fd::RawFd,
    thread,
    time::Duration,
};

/// Calls of the remote contract, for counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Open,
    Close,
    Init,
    Deinit,
    SetDebugConfig,
    BuildVersion,
    GetContextSize,
    SendContext,
    RetrieveContext,
    GetScratchRequirements,
    SetScratchBuffers,
    RetrieveScratchBuffers,
    MigrateSecureSession,
    GetTuningParamCount,
    GetTuningParams,
    ApplyTuningParams,
    PrepareContext,
    SetClock,
    RegisterFd,
    RegisterBuf,
    UnregisterBuf,
}

#[derive(Default)]
struct RemoteState {
    next_handle: u64,
    open: HashSet<u64>,
    calls: HashMap<Call, usize>,
    failures: HashMap<Call, VecDeque<RemoteStatus>>,
    migration: VecDeque<Result<(), CallError>>,
    context_size: Option<u32>,
    scratch: Vec<u32>,
    tunings: HashMap<AlgorithmId, Vec<RawTuningDef>>,
    contexts: HashSet<u64>,
    scratch_sent: HashMap<u64, usize>,
    registered: HashSet<usize>,
    applied: Vec<(AlgorithmId, u32)>,
    last_props: Option<FrameProps>,
    debug: Option<DebugConfig>,
    clock: Option<ClockCorner>,
    query_delay: Option<Duration>,
}

/// Simulated offload processor.
pub struct SimRemote {
    state: Mutex<RemoteState>,
}

impl Default for SimRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRemote {
    /// A processor with no tunings and three scratch requirements.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState {
                next_handle: 0x100,
                scratch: vec![64 * 1024, 0, 128 * 1024],
                ..Default::default()
            }),
        }
    }

    /// A processor reporting a small tuning schema for every named algorithm.
    pub fn with_default_tunings() -> Self {
        let remote = Self::new();
        for algo in [
            AlgorithmId::MVP,
            AlgorithmId::NR,
            AlgorithmId::IE,
            AlgorithmId::FRC,
        ] {
            remote.set_tuning_defs(
                algo,
                vec![
                    RawTuningDef {
                        name: "strength".to_owned(),
                        id: 0,
                        count: 1,
                        kind: RawTuningKind::Fixed16p16,
                        min: 0,
                        max: 0x0004_0000,
                    },
                    RawTuningDef {
                        name: "mode".to_owned(),
                        id: 1,
                        count: 1,
                        kind: RawTuningKind::U32,
                        min: 0,
                        max: 3,
                    },
                    RawTuningDef {
                        name: "bias".to_owned(),
                        id: 2,
                        count: 2,
                        kind: RawTuningKind::S32,
                        min: -16i32 as u32,
                        max: 16,
                    },
                ],
            );
        }
        remote
    }

    /// Makes the next call to `call` fail with `status`. Repeated requests
    /// queue up.
    pub fn fail_next(&self, call: Call, status: RemoteStatus) {
        self.state
            .lock()
            .failures
            .entry(call)
            .or_default()
            .push_back(status);
    }

    /// Outcomes returned by successive migration calls; success once drained.
    pub fn script_migration(&self, outcomes: impl IntoIterator<Item = Result<(), CallError>>) {
        self.state.lock().migration.extend(outcomes);
    }

    /// Fixes the reported context size instead of deriving it from the frame.
    pub fn set_context_size(&self, size: Option<u32>) {
        self.state.lock().context_size = size;
    }

    pub fn set_scratch_requirements(&self, sizes: Vec<u32>) {
        self.state.lock().scratch = sizes;
    }

    pub fn set_tuning_defs(&self, algo: AlgorithmId, defs: Vec<RawTuningDef>) {
        self.state.lock().tunings.insert(algo, defs);
    }

    /// Delays tuning schema queries, widening boot race windows.
    pub fn set_query_delay(&self, delay: Option<Duration>) {
        self.state.lock().query_delay = delay;
    }

    pub fn calls(&self, call: Call) -> usize {
        self.state.lock().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Contexts sent and not yet retrieved.
    pub fn outstanding_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    /// Scratch buffers sent and not yet retrieved.
    pub fn outstanding_scratch(&self) -> usize {
        self.state.lock().scratch_sent.values().sum()
    }

    pub fn registered_buffers(&self) -> usize {
        self.state.lock().registered.len()
    }

    /// `(algorithm, bytes)` of every tuning block applied.
    pub fn applied_tunings(&self) -> Vec<(AlgorithmId, u32)> {
        self.state.lock().applied.clone()
    }

    pub fn last_frame_props(&self) -> Option<FrameProps> {
        self.state.lock().last_props
    }

    pub fn debug_config(&self) -> Option<DebugConfig> {
        self.state.lock().debug
    }

    pub fn clock(&self) -> Option<ClockCorner> {
        self.state.lock().clock
    }

    fn enter(&self, call: Call) -> RemoteResult<parking_lot::MutexGuard<'_, RemoteState>> {
        let mut state = self.state.lock();
        *state.calls.entry(call).or_default() += 1;
        let failure = state.failures.get_mut(&call).and_then(VecDeque::pop_front);
        match failure {
            Some(status) => Err(status),
            None => Ok(state),
        }
    }

    fn enter_open(
        &self,
        call: Call,
        handle: RemoteHandle,
    ) -> RemoteResult<parking_lot::MutexGuard<'_, RemoteState>> {
        let state = self.enter(call)?;
        if state.open.contains(&handle.0) {
            Ok(state)
        } else {
            Err(RemoteStatus::BAD_PARAM)
        }
    }
}

impl RemoteService for SimRemote {
    fn open(&self, _uri: &str) -> RemoteResult<RemoteHandle> {
        let mut state = self.enter(Call::Open)?;
        state.next_handle += 1;
        let handle = state.next_handle;
        state.open.insert(handle);
        Ok(RemoteHandle(handle))
    }

    fn close(&self, handle: RemoteHandle) -> RemoteResult<()> {
        let mut state = self.enter_open(Call::Close, handle)?;
        state.open.remove(&handle.0);
        state.contexts.remove(&handle.0);
        state.scratch_sent.remove(&handle.0);
        Ok(())
    }

    fn init(&self, handle: RemoteHandle, caps: &[Capability]) -> RemoteResult<()> {
        self.enter_open(Call::Init, handle)?;
        if caps.is_empty() {
            return Err(RemoteStatus::BAD_PARAM);
        }
        Ok(())
    }

    fn deinit(&self, handle: RemoteHandle, _caps: &[Capability]) -> RemoteResult<()> {
        self.enter_open(Call::Deinit, handle).map(|_| ())
    }

    fn set_debug_config(&self, handle: RemoteHandle, config: &DebugConfig) -> RemoteResult<()> {
        let mut state = self.enter_open(Call::SetDebugConfig, handle)?;
        state.debug = Some(*config);
        Ok(())
    }

    fn build_version(
        &self,
        handle: RemoteHandle,
        algo: AlgorithmId,
    ) -> RemoteResult<Option<String>> {
        self.enter_open(Call::BuildVersion, handle)?;
        Ok(Some(format!("sim-{}-1.0", algo)))
    }

    fn get_context_size(
        &self,
        handle: RemoteHandle,
        flags: AlgoFlags,
        frame_bytes: u32,
    ) -> RemoteResult<u32> {
        let state = self.enter_open(Call::GetContextSize, handle)?;
        Ok(state
            .context_size
            .unwrap_or(frame_bytes / 2 + 1000 * flags.len() as u32))
    }

    fn send_context(&self, handle: RemoteHandle, context: BufferDescriptor) -> RemoteResult<()> {
        let mut state = self.enter_open(Call::SendContext, handle)?;
        if context.len == 0 {
            return Err(RemoteStatus::BAD_PARAM);
        }
        state.contexts.insert(handle.0);
        Ok(())
    }

    fn retrieve_context(&self, handle: RemoteHandle) -> RemoteResult<()> {
        let mut state = self.enter_open(Call::RetrieveContext, handle)?;
        state.contexts.remove(&handle.0);
        Ok(())
    }

    fn get_scratch_requirements(
        &self,
        handle: RemoteHandle,
        _flags: AlgoFlags,
    ) -> RemoteResult<Vec<u32>> {
        let state = self.enter_open(Call::GetScratchRequirements, handle)?;
        Ok(state.scratch.clone())
    }

    fn set_scratch_buffers(
        &self,
        handle: RemoteHandle,
        _flags: AlgoFlags,
        buffers: &[BufferDescriptor],
    ) -> RemoteResult<()> {
        let mut state = self.enter_open(Call::SetScratchBuffers, handle)?;
        state.scratch_sent.insert(handle.0, buffers.len());
        Ok(())
    }

    fn retrieve_scratch_buffers(&self, handle: RemoteHandle) -> RemoteResult<()> {
        let mut state = self.enter_open(Call::RetrieveScratchBuffers, handle)?;
        state.scratch_sent.remove(&handle.0);
        Ok(())
    }

    fn migrate_secure_session(&self, handle: RemoteHandle, _heap_id: u32) -> Result<(), CallError> {
        let mut state = self
            .enter_open(Call::MigrateSecureSession, handle)
            .map_err(CallError::Fatal)?;
        state.migration.pop_front().unwrap_or(Ok(()))
    }

    fn get_tuning_param_count(
        &self,
        handle: RemoteHandle,
        algo: AlgorithmId,
    ) -> RemoteResult<u32> {
        let (count, delay) = {
            let state = self.enter_open(Call::GetTuningParamCount, handle)?;
            let count = state.tunings.get(&algo).map_or(0, |defs| defs.len() as u32);
            (count, state.query_delay)
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(count)
    }

    fn get_tuning_params(
        &self,
        handle: RemoteHandle,
        algo: AlgorithmId,
        count: u32,
    ) -> RemoteResult<Vec<RawTuningDef>> {
        let state = self.enter_open(Call::GetTuningParams, handle)?;
        let defs = state.tunings.get(&algo).cloned().unwrap_or_default();
        if defs.len() != count as usize {
            return Err(RemoteStatus::BAD_PARAM);
        }
        Ok(defs)
    }

    fn apply_tuning_params(
        &self,
        handle: RemoteHandle,
        algo: AlgorithmId,
        params: BufferDescriptor,
    ) -> RemoteResult<()> {
        let mut state = self.enter_open(Call::ApplyTuningParams, handle)?;
        state.applied.push((algo, params.len));
        Ok(())
    }

    fn prepare_context(
        &self,
        handle: RemoteHandle,
        props: &FrameProps,
        _flags: AlgoFlags,
        context_size: u32,
        _diag_size: u32,
    ) -> RemoteResult<()> {
        let mut state = self.enter_open(Call::PrepareContext, handle)?;
        if context_size == 0 || !state.contexts.contains(&handle.0) {
            return Err(RemoteStatus::FAILED);
        }
        state.last_props = Some(*props);
        Ok(())
    }

    fn set_clock(&self, handle: RemoteHandle, corner: ClockCorner) -> RemoteResult<()> {
        let mut state = self.enter_open(Call::SetClock, handle)?;
        state.clock = Some(corner);
        Ok(())
    }

    fn register_fd(&self, fd: RawFd, _len: u32) -> Option<u64> {
        let mut state = self.enter(Call::RegisterFd).ok()?;
        let addr = 0xe000_0000 + fd as u64 * 0x1000;
        state.registered.insert(addr as usize);
        Some(addr)
    }

    fn register_buf(&self, addr: usize, _len: u32, _fd: RawFd) {
        if let Ok(mut state) = self.enter(Call::RegisterBuf) {
            state.registered.insert(addr);
        }
    }

    fn unregister_buf(&self, addr: usize, _len: u32) {
        if let Ok(mut state) = self.enter(Call::UnregisterBuf) {
            state.registered.remove(&addr);
        }
    }
}

#[derive(Default)]
struct AllocState {
    next_id: u64,
    attempts: usize,
    allocations: usize,
    frees: usize,
    fail_at: Option<usize>,
    live: HashMap<u64, Vec<u8>>,
}

/// Simulated shared-memory allocator.
#[derive(Default)]
pub struct SimAllocator {
    state: Mutex<AllocState>,
}

impl SimAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`th allocation attempt from now fail (1-based).
    pub fn fail_allocation(&self, n: usize) {
        let mut state = self.state.lock();
        state.fail_at = Some(state.attempts + n);
    }

    pub fn allocations(&self) -> usize {
        self.state.lock().allocations
    }

    pub fn frees(&self) -> usize {
        self.state.lock().frees
    }

    pub fn live(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn contents(&self, id: u64) -> Option<Vec<u8>> {
        self.state.lock().live.get(&id).cloned()
    }
}

impl Allocator for SimAllocator {
    fn alloc(&self, len: u32, secure: bool) -> Result<SharedBuffer> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if state.fail_at == Some(state.attempts) {
            state.fail_at = None;
            return Err(Error::OutOfMemory(format!("{} bytes", len)));
        }
        if len == 0 {
            return Err(Error::InvalidArgument("zero length allocation".to_owned()));
        }
        state.next_id += 1;
        state.allocations += 1;
        let id = state.next_id;
        state.live.insert(id, vec![0; len as usize]);
        Ok(SharedBuffer {
            id,
            fd: 100 + id as RawFd,
            len,
            secure,
            vaddr: (!secure).then_some(0x1000_0000 + id as usize * 0x10_0000),
        })
    }

    fn free(&self, buf: SharedBuffer) {
        let mut state = self.state.lock();
        if state.live.remove(&buf.id).is_some() {
            state.frees += 1;
        }
    }

    fn write(&self, buf: &SharedBuffer, data: &[u8]) -> Result<()> {
        if buf.secure {
            return Err(Error::InvalidArgument(format!(
                "buffer {} is not mapped",
                buf.id
            )));
        }
        let mut state = self.state.lock();
        let contents = state
            .live
            .get_mut(&buf.id)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown buffer {}", buf.id)))?;
        if data.len() > contents.len() {
            return Err(Error::InvalidArgument(format!(
                "{} bytes do not fit in buffer {}",
                data.len(),
                buf.id
            )));
        }
        contents[..data.len()].copy_from_slice(data);
        Ok(())
    }
}
