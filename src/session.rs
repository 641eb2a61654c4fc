// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-session control of the offload processor.
//!
//! A [`Session`] walks `Created -> Opening -> Open -> Closing -> Closed`,
//! with `Open -> Reconfiguring -> Open` while open. It exclusively owns its
//! context and scratch buffers and depends on the shared tuning records of
//! the algorithms it processes.

use crate::{
    algo::{AlgoFlags, AlgorithmId},
    context::ContextBuffer,
    error::{Error, Result},
    frame::{FrameProps, PortParams},
    gate::Transition,
    manager::OffloadCore,
    registration::{self, PixelBuffer},
    remote::{check, CallError, Capability, ClockCorner, RemoteHandle, RemoteStatus},
    scratch::ScratchPool,
    tuning::SessionRef,
};
use std::{path::Path, sync::Arc};
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Opening,
    Open,
    Reconfiguring,
    Closing,
    Closed,
}

/// Progress through the buffer steps of an open, used to unwind exactly the
/// steps that completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum OpenStage {
    Started,
    ContextAllocated,
    ContextSent,
    ScratchAllocated,
    ScratchSent,
    Migrated,
}

/// Runs `call` until it succeeds, fails fatally, or `max_attempts` retryable
/// failures have been seen. Returns the failing status.
pub fn retry_bounded<T>(
    max_attempts: u32,
    mut call: impl FnMut() -> Result<T, CallError>,
) -> Result<T, RemoteStatus> {
    let mut last = RemoteStatus::INTERRUPTED;
    for attempt in 0..max_attempts {
        match call() {
            Ok(value) => {
                debug!("succeeded after {} retries", attempt);
                return Ok(value);
            }
            Err(CallError::Retryable(status)) => {
                trace!("attempt {} interrupted: {}", attempt, status);
                last = status;
            }
            Err(CallError::Fatal(status)) => return Err(status),
        }
    }
    error!("giving up after {} attempts", max_attempts);
    Err(last)
}

/// One client's connection to the offload processor.
///
/// # Example
///
/// ```
/// use edgefirst_offload::{
///     algo::{AlgoFlags, AlgorithmId},
///     manager::{CoreConfig, OffloadCore},
///     session::{Session, SessionState},
///     sim::{SimAllocator, SimRemote},
/// };
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let core = OffloadCore::new(
///     Arc::new(SimRemote::with_default_tunings()),
///     Arc::new(SimAllocator::new()),
///     CoreConfig::default(),
/// );
/// let mut session = Session::new(core, false);
/// session.open(AlgoFlags::from(AlgorithmId::NR), 0)?;
/// assert_eq!(session.state(), SessionState::Open);
/// session.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    core: Arc<OffloadCore>,
    id: SessionRef,
    secure: bool,
    state: SessionState,
    handle: Option<RemoteHandle>,
    /// Capabilities the service session was initialized with.
    flags: AlgoFlags,
    /// Algorithms whose tuning records list this session as a dependent.
    registered: AlgoFlags,
    context: ContextBuffer,
    scratch: ScratchPool,
    input: PortParams,
    output: PortParams,
    context_size: u32,
}

impl Session {
    pub fn new(core: Arc<OffloadCore>, secure: bool) -> Self {
        let alignment = core.config().context_alignment;
        Self {
            core,
            id: SessionRef::next(),
            secure,
            state: SessionState::Created,
            handle: None,
            flags: AlgoFlags::NONE,
            registered: AlgoFlags::NONE,
            context: ContextBuffer::new(secure, alignment),
            scratch: ScratchPool::new(secure),
            input: PortParams::default(),
            output: PortParams::default(),
            context_size: 0,
        }
    }

    pub fn id(&self) -> SessionRef {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn handle(&self) -> Option<RemoteHandle> {
        self.handle
    }

    pub fn registered(&self) -> AlgoFlags {
        self.registered
    }

    pub fn context(&self) -> &ContextBuffer {
        &self.context
    }

    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }

    /// Sets the port geometry used by the next open.
    pub fn set_port_params(&mut self, input: PortParams, output: PortParams) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(Error::InvalidState(format!(
                "port params set in state {:?}",
                self.state
            )));
        }
        input.validate()?;
        output.validate()?;
        self.input = input;
        self.output = output;
        Ok(())
    }

    /// Opens the session for `flags`.
    ///
    /// A zero `expected_frame_size` uses the input port's frame size. On
    /// failure every buffer step that completed is unwound and the session
    /// returns to `Created`, holding no context or scratch buffers. The
    /// service session and tuning registrations are kept for a retried open
    /// and released by [`Session::close`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is `Created`, and
    /// otherwise the failure of the first step that failed.
    #[instrument(skip(self), fields(session = ?self.id))]
    pub fn open(&mut self, flags: AlgoFlags, expected_frame_size: u32) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(Error::InvalidState(format!("open in state {:?}", self.state)));
        }
        if flags.is_empty() {
            return Err(Error::InvalidArgument("no processing flags".to_owned()));
        }
        let frame_bytes = match expected_frame_size {
            0 => self.input.frame_size(),
            n => n,
        };

        self.state = SessionState::Opening;
        match self.open_steps(flags, frame_bytes) {
            Ok(()) => {
                info!("session open: flags={} secure={}", flags, self.secure);
                self.state = SessionState::Open;
                Ok(())
            }
            Err(e) => {
                error!("session open failed: {}", e);
                self.state = SessionState::Created;
                Err(e)
            }
        }
    }

    fn open_steps(&mut self, flags: AlgoFlags, frame_bytes: u32) -> Result<()> {
        let handle = match self.handle {
            Some(handle) if self.flags == flags => handle,
            previous => {
                if let Some(handle) = previous {
                    self.core.close_service(handle, self.flags);
                    self.handle = None;
                }
                self.release_stale_dependencies(flags);
                let handle = self.core.open_service(self.secure, flags)?;
                self.handle = Some(handle);
                self.flags = flags;
                handle
            }
        };

        self.register_dependencies(handle, flags)?;

        let mut stage = OpenStage::Started;
        let result = self.open_buffers(handle, flags, frame_bytes, &mut stage);
        if result.is_err() {
            self.unwind_open(handle, stage);
        }
        result
    }

    fn open_buffers(
        &mut self,
        handle: RemoteHandle,
        flags: AlgoFlags,
        frame_bytes: u32,
        stage: &mut OpenStage,
    ) -> Result<()> {
        let remote = self.core.remote();
        let allocator = self.core.allocator();

        let context_size = check(
            "get_context_size",
            remote.get_context_size(handle, flags, frame_bytes),
        )?;
        debug!("frame_bytes={} context_size={}", frame_bytes, context_size);
        let context = self
            .context
            .ensure_capacity(allocator, remote, context_size)?;
        self.context_size = context_size;
        *stage = OpenStage::ContextAllocated;

        check("send_context", remote.send_context(handle, context.descriptor))?;
        *stage = OpenStage::ContextSent;

        let requirements = check(
            "get_scratch_requirements",
            remote.get_scratch_requirements(handle, flags),
        )?;
        self.scratch.allocate(allocator, remote, &requirements)?;
        *stage = OpenStage::ScratchAllocated;

        self.scratch.send(remote, handle, flags)?;
        *stage = OpenStage::ScratchSent;

        if self.secure {
            let heap = self.core.config().secure_heap_id;
            retry_bounded(self.core.config().max_migrate_attempts, || {
                remote.migrate_secure_session(handle, heap)
            })
            .map_err(|status| {
                error!("secure session migration failed: {}", status);
                Error::remote("migrate_secure_session", status)
            })?;
        }
        *stage = OpenStage::Migrated;

        let props = FrameProps::new(self.input, self.output);
        check(
            "prepare_context",
            remote.prepare_context(handle, &props, flags, context_size, 0),
        )
    }

    fn unwind_open(&mut self, handle: RemoteHandle, stage: OpenStage) {
        let remote = self.core.remote();
        let allocator = self.core.allocator();
        debug!("unwinding open from {:?}", stage);

        if stage >= OpenStage::ScratchSent {
            if let Err(status) = remote.retrieve_scratch_buffers(handle) {
                error!("retrieve_scratch_buffers during unwind: {}", status);
            }
        }
        self.scratch.free(allocator, remote);
        if stage >= OpenStage::ContextSent {
            if let Err(status) = remote.retrieve_context(handle) {
                error!("retrieve_context during unwind: {}", status);
            }
        }
        self.context.release(allocator, remote);
        self.context_size = 0;
    }

    /// Boots what is missing and adds this session to each pending record's
    /// dependents. The lifecycle gate is held from the boot check through the
    /// last registration.
    fn register_dependencies(&mut self, handle: RemoteHandle, flags: AlgoFlags) -> Result<()> {
        let pending: AlgoFlags = flags
            .iter()
            .filter(|id| !self.registered.contains(*id))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let registry = self.core.registry();
        let mut added = AlgoFlags::NONE;
        let mut result = Ok(());
        {
            let guard = self.core.gate().enter(Transition::Boot);
            let unbooted: AlgoFlags = pending
                .iter()
                .filter(|id| !registry.record_state(*id).is_some_and(|s| s.booted))
                .collect();
            if !unbooted.is_empty() {
                if self.core.config().runtime_boot {
                    let tuning_file = self.core.config().tuning_file.as_deref();
                    let booted = self.core.boot_unsynchronized(
                        &guard,
                        handle,
                        tuning_file,
                        unbooted,
                        false,
                        false,
                    );
                    debug!("booted on demand: {}", booted);
                } else {
                    warn!("{} not booted and runtime boot is disabled", unbooted);
                }
            }

            for id in pending.iter() {
                if let Err(e) = registry.register_session(id, self.id) {
                    result = Err(e);
                    break;
                }
                self.registered.insert(id);
                added.insert(id);
            }
        }

        for id in added.iter() {
            if let Err(e) = self.apply_tunings(handle, id) {
                error!("no tunings loaded for {}: {}", id, e);
            }
        }
        result
    }

    /// Drops the dependencies on algorithms a retried open no longer uses.
    fn release_stale_dependencies(&mut self, flags: AlgoFlags) {
        let stale: AlgoFlags = self
            .registered
            .iter()
            .filter(|id| !flags.contains(*id))
            .collect();
        if stale.is_empty() {
            return;
        }
        debug!("releasing stale dependencies {}", stale);
        let guard = self.core.gate().enter(Transition::Shutdown);
        for id in stale.iter() {
            if let Err(e) = self.core.registry().unregister_session(id, self.id) {
                error!("unregistering stale {}: {}", id, e);
            }
            self.registered.remove(id);
        }
        if let Err(e) = self.core.shutdown_unsynchronized(&guard, stale, false) {
            debug!("stale tunings not shut down: {}", e);
        }
    }

    /// Stages `id`'s packed tunings in a shared buffer and applies them.
    fn apply_tunings(&self, handle: RemoteHandle, id: AlgorithmId) -> Result<()> {
        let Some(packed) = self.core.registry().packed_tunings(id) else {
            debug!("no tunings to load for {}", id);
            return Ok(());
        };
        let allocator = self.core.allocator();
        let buf = allocator.alloc(packed.len() as u32, false)?;
        let result = allocator.write(&buf, &packed).and_then(|()| {
            check(
                "apply_tuning_params",
                self.core
                    .remote()
                    .apply_tuning_params(handle, id, buf.descriptor()),
            )
        });
        allocator.free(buf);
        result
    }

    /// Reapplies `id`'s current tuning block to this session.
    pub fn load_tunings(&self, id: AlgorithmId) -> Result<()> {
        let handle = self.require_handle()?;
        self.apply_tunings(handle, id)
    }

    /// Boots tunings for `flags` on this session's service session, through
    /// the lifecycle gate and without the boot lock.
    pub fn boot_tunings(
        &self,
        tuning_file: Option<&Path>,
        flags: AlgoFlags,
        force_init: bool,
    ) -> Result<AlgoFlags> {
        let handle = self.require_handle()?;
        Ok(self
            .core
            .boot_serialized(handle, tuning_file, flags, force_init))
    }

    pub fn shutdown_tunings(&self, flags: AlgoFlags) -> Result<()> {
        self.core.shutdown_serialized(flags)
    }

    /// Closes the session.
    ///
    /// Every teardown step is attempted even if an earlier one fails. Closing
    /// a closed session does nothing.
    ///
    /// # Errors
    ///
    /// Returns the failing step's error, or [`Error::PartialFailure`] when
    /// more than one step failed.
    #[instrument(skip(self), fields(session = ?self.id))]
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            debug!("session already closed");
            return Ok(());
        }
        self.state = SessionState::Closing;
        let mut errors = Vec::new();

        let registered = std::mem::take(&mut self.registered);
        if !registered.is_empty() {
            let guard = self.core.gate().enter(Transition::Shutdown);
            for id in registered.iter() {
                if let Err(e) = self.core.registry().unregister_session(id, self.id) {
                    errors.push(e);
                }
            }
            if let Err(e) = self.core.shutdown_unsynchronized(&guard, registered, false) {
                debug!("tunings not shut down: {}", e);
            }
        }

        let remote = self.core.remote();
        let allocator = self.core.allocator();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.scratch.retrieve(remote, handle) {
                errors.push(e);
            }
            self.scratch.free(allocator, remote);
            if let Err(e) = check("retrieve_context", remote.retrieve_context(handle)) {
                errors.push(e);
            }
            let caps = Capability::list(self.flags);
            if let Err(e) = check("deinit", remote.deinit(handle, &caps)) {
                errors.push(e);
            }
            if let Err(e) = check("close", remote.close(handle)) {
                errors.push(e);
            }
        }
        self.scratch.free(allocator, remote);
        self.context.release(allocator, remote);
        self.context_size = 0;
        self.state = SessionState::Closed;

        match errors.len() {
            0 => {
                info!("session closed");
                Ok(())
            }
            1 => Err(errors.remove(0)),
            _ => Err(Error::PartialFailure(errors)),
        }
    }

    /// Applies new port geometry to an open session.
    ///
    /// The context buffer is reallocated only when the new requirement
    /// exceeds the current allocation.
    #[instrument(skip(self), fields(session = ?self.id))]
    pub fn reconfigure(&mut self, input: PortParams, output: PortParams) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(Error::InvalidState(format!(
                "reconfigure in state {:?}",
                self.state
            )));
        }
        input.validate()?;
        output.validate()?;
        let handle = self.require_handle()?;

        self.state = SessionState::Reconfiguring;
        let result = self.reconfigure_context(handle, input, output);
        self.state = SessionState::Open;
        result
    }

    fn reconfigure_context(
        &mut self,
        handle: RemoteHandle,
        input: PortParams,
        output: PortParams,
    ) -> Result<()> {
        let remote = self.core.remote();
        let allocator = self.core.allocator();

        let context_size = check(
            "get_context_size",
            remote.get_context_size(handle, self.flags, input.frame_size()),
        )?;
        let required = self.context.aligned_size(context_size)?;
        if required > self.context.allocated_size() {
            debug!(
                "context grows {} -> {}",
                self.context.allocated_size(),
                required
            );
            check("retrieve_context", remote.retrieve_context(handle))?;
            let context = self
                .context
                .ensure_capacity(allocator, remote, context_size)?;
            check("send_context", remote.send_context(handle, context.descriptor))?;
        } else {
            self.context
                .ensure_capacity(allocator, remote, context_size)?;
        }
        self.input = input;
        self.output = output;
        self.context_size = context_size;

        let props = FrameProps::new(input, output);
        check(
            "prepare_context",
            remote.prepare_context(handle, &props, self.flags, context_size, 0),
        )
    }

    pub fn register_buffer(&self, buf: &mut PixelBuffer) -> Result<()> {
        registration::register_pixel_buffer(self.core.remote(), buf)
    }

    pub fn unregister_buffer(&self, buf: &mut PixelBuffer) {
        registration::unregister_pixel_buffer(self.core.remote(), buf);
    }

    pub fn set_clock(&self, corner: ClockCorner) -> Result<()> {
        let handle = self.require_handle()?;
        check("set_clock", self.core.remote().set_clock(handle, corner))
    }

    fn require_handle(&self) -> Result<RemoteHandle> {
        self.handle
            .ok_or_else(|| Error::InvalidState("no service session".to_owned()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Err(e) = self.close() {
                warn!("close on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy() {
        let mut calls = 0;
        let result = retry_bounded(5, || {
            calls += 1;
            if calls < 3 {
                Err(CallError::Retryable(RemoteStatus::INTERRUPTED))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));

        let mut calls = 0;
        let result: Result<(), RemoteStatus> = retry_bounded(5, || {
            calls += 1;
            Err(CallError::Fatal(RemoteStatus::FAILED))
        });
        assert_eq!(result, Err(RemoteStatus::FAILED));
        assert_eq!(calls, 1);

        let mut calls = 0;
        let result: Result<(), RemoteStatus> = retry_bounded(4, || {
            calls += 1;
            Err(CallError::Retryable(RemoteStatus::INTERRUPTED))
        });
        assert_eq!(result, Err(RemoteStatus::INTERRUPTED));
        assert_eq!(calls, 4);
    }
}
