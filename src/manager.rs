// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The process-wide offload core: shared tuning state, the lifecycle gate,
//! and the process Boot/Shutdown entry points.

use crate::{
    algo::{AlgoFlags, AlgorithmId},
    alloc::Allocator,
    error::{Error, Result},
    gate::{GateGuard, LifecycleGate, Transition},
    remote::{check, Capability, DebugConfig, RemoteHandle, RemoteService},
    tuning::TuningRegistry,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, error, info, instrument, warn};

/// Offload core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// URI of the offload service on the remote processor.
    pub service_uri: String,
    /// Appended to `service_uri` for secure sessions.
    pub secure_uri_suffix: String,
    /// Alignment, in bytes, of context buffer sizes.
    pub context_alignment: u32,
    /// Attempts made at secure session migration before giving up.
    pub max_migrate_attempts: u32,
    /// Lets a session boot an algorithm's tunings on demand when the process
    /// did not boot it.
    pub runtime_boot: bool,
    pub supported_algos: AlgoFlags,
    /// Tuning file used when sessions boot tunings on demand.
    pub tuning_file: Option<PathBuf>,
    /// Protected heap that secure sessions migrate to.
    pub secure_heap_id: u32,
    pub debug: DebugConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            service_uri: "offload://cdsp".to_owned(),
            secure_uri_suffix: "&_session=1".to_owned(),
            context_alignment: 128,
            max_migrate_attempts: 1000,
            runtime_boot: true,
            supported_algos: AlgoFlags::from(AlgorithmId::MVP)
                | AlgorithmId::NR
                | AlgorithmId::IE,
            tuning_file: None,
            secure_heap_id: 10,
            debug: DebugConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn uri(&self, secure: bool) -> String {
        if secure {
            format!("{}{}", self.service_uri, self.secure_uri_suffix)
        } else {
            self.service_uri.clone()
        }
    }
}

/// Shared state of every offload session in the process.
///
/// # Example
///
/// ```
/// use edgefirst_offload::{
///     algo::{AlgoFlags, AlgorithmId},
///     manager::{CoreConfig, OffloadCore},
///     sim::{SimAllocator, SimRemote},
/// };
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = Arc::new(SimRemote::with_default_tunings());
/// let core = OffloadCore::new(remote, Arc::new(SimAllocator::new()), CoreConfig::default());
/// let booted = core.boot(None, AlgoFlags::from(AlgorithmId::NR))?;
/// assert!(booted.contains(AlgorithmId::NR));
/// core.shutdown(booted)?;
/// # Ok(())
/// # }
/// ```
pub struct OffloadCore {
    remote: Arc<dyn RemoteService>,
    allocator: Arc<dyn Allocator>,
    gate: LifecycleGate,
    registry: TuningRegistry,
    config: CoreConfig,
}

impl OffloadCore {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        allocator: Arc<dyn Allocator>,
        config: CoreConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            remote,
            allocator,
            gate: LifecycleGate::new(),
            registry: TuningRegistry::new(),
            config,
        })
    }

    pub fn remote(&self) -> &dyn RemoteService {
        self.remote.as_ref()
    }

    pub fn allocator(&self) -> &dyn Allocator {
        self.allocator.as_ref()
    }

    pub fn registry(&self) -> &TuningRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &LifecycleGate {
        &self.gate
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Pre-warms tuning state for `flags` independently of any session.
    ///
    /// Opens a short-lived service session, boots and force-initializes each
    /// algorithm with the boot lock held so per-session shutdowns cannot tear
    /// it down, then closes the service session. A failing algorithm does not
    /// stop the others.
    ///
    /// Returns the algorithms that ended up booted.
    ///
    /// # Errors
    ///
    /// Returns an error only if the service session cannot be opened.
    #[instrument(skip(self))]
    pub fn boot(&self, tuning_file: Option<&Path>, flags: AlgoFlags) -> Result<AlgoFlags> {
        if flags.is_empty() {
            debug!("no algorithms to boot");
            return Ok(AlgoFlags::NONE);
        }
        let guard = self.gate.enter(Transition::Boot);
        let handle = self.open_service(false, flags)?;
        let booted = self.boot_unsynchronized(&guard, handle, tuning_file, flags, true, true);
        self.close_service(handle, flags);
        info!("process boot complete: {}", booted);
        Ok(booted)
    }

    /// Releases tuning state booted by [`OffloadCore::boot`], overriding the
    /// boot lock. Algorithms that still have sessions stay booted.
    ///
    /// # Errors
    ///
    /// Returns the last per-algorithm failure, if any.
    #[instrument(skip(self))]
    pub fn shutdown(&self, flags: AlgoFlags) -> Result<()> {
        if flags.is_empty() {
            debug!("no algorithms to shut down");
            return Ok(());
        }
        let guard = self.gate.enter(Transition::Shutdown);
        self.shutdown_unsynchronized(&guard, flags, true)
    }

    /// Boots `flags` through the gate without the boot lock.
    #[instrument(skip(self, handle))]
    pub fn boot_serialized(
        &self,
        handle: RemoteHandle,
        tuning_file: Option<&Path>,
        flags: AlgoFlags,
        force_init: bool,
    ) -> AlgoFlags {
        if flags.is_empty() {
            return AlgoFlags::NONE;
        }
        let guard = self.gate.enter(Transition::Boot);
        self.boot_unsynchronized(&guard, handle, tuning_file, flags, false, force_init)
    }

    /// Boots each algorithm of `flags` on `handle`. The caller proves it
    /// already holds the gate.
    pub fn boot_unsynchronized(
        &self,
        _gate: &GateGuard<'_>,
        handle: RemoteHandle,
        tuning_file: Option<&Path>,
        flags: AlgoFlags,
        boot_lock: bool,
        force_init: bool,
    ) -> AlgoFlags {
        let mut booted = AlgoFlags::NONE;
        for id in flags.iter() {
            if !self.config.supported_algos.contains(id) {
                warn!("{} not supported, not booting", id);
                continue;
            }
            if let Err(e) = self
                .registry
                .register_algo_boot(self.remote(), handle, id, boot_lock)
            {
                error!("error booting tunings for {}: {}", id, e);
                continue;
            }
            if let Err(e) = self
                .registry
                .init_algo_parsed_block(id, tuning_file, force_init)
            {
                error!("error initializing tunings for {}: {}", id, e);
            }
            booted.insert(id);
        }
        booted
    }

    /// Shuts down `flags` through the gate without the boot lock.
    #[instrument(skip(self))]
    pub fn shutdown_serialized(&self, flags: AlgoFlags) -> Result<()> {
        if flags.is_empty() {
            return Ok(());
        }
        let guard = self.gate.enter(Transition::Shutdown);
        self.shutdown_unsynchronized(&guard, flags, false)
    }

    /// Terminates, shuts down and releases each algorithm of `flags`. The
    /// caller proves it already holds the gate.
    pub fn shutdown_unsynchronized(
        &self,
        _gate: &GateGuard<'_>,
        flags: AlgoFlags,
        boot_lock: bool,
    ) -> Result<()> {
        let mut last = None;
        for id in flags.iter() {
            if self.registry.record_state(id).is_none() {
                error!("no tuning record for {}, can't shut down", id);
                last = Some(Error::InvalidState(format!("{} has no tuning record", id)));
                continue;
            }
            self.registry.term_algo_parsed_block(id, boot_lock);
            if let Err(e) = self.registry.shutdown_algo(id, boot_lock) {
                debug!("can't shut down tunings for {}: {}", id, e);
                last = Some(e);
                continue;
            }
            self.registry.release_record(id);
        }
        last.map_or(Ok(()), Err)
    }

    /// Opens a service session and initializes it for `flags`.
    pub(crate) fn open_service(&self, secure: bool, flags: AlgoFlags) -> Result<RemoteHandle> {
        let uri = self.config.uri(secure);
        let handle = check("open", self.remote.open(&uri))?;
        debug!("service open: uri={} handle={:#x}", uri, handle.0);

        if let Err(status) = self.remote.set_debug_config(handle, &self.config.debug) {
            error!("unable to set debug config: {}", status);
        }

        let caps = Capability::list(flags);
        if let Err(e) = check("init", self.remote.init(handle, &caps)) {
            if let Err(status) = self.remote.close(handle) {
                error!("close after failed init: {}", status);
            }
            return Err(e);
        }

        for cap in &caps {
            match self.remote.build_version(handle, cap.algo) {
                Ok(Some(version)) => info!("{} firmware version: {}", cap.algo, version),
                Ok(None) => info!("protected mode, no firmware version for {}", cap.algo),
                Err(status) => error!("unable to get {} firmware version: {}", cap.algo, status),
            }
        }
        Ok(handle)
    }

    pub(crate) fn close_service(&self, handle: RemoteHandle, flags: AlgoFlags) {
        if let Err(status) = self.remote.deinit(handle, &Capability::list(flags)) {
            error!("deinit failed: {}", status);
        }
        if let Err(status) = self.remote.close(handle) {
            error!("close failed: {}", status);
        }
    }
}
