// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use super::{block::TuningBlock, def::TuningDef};
use crate::{
    algo::{AlgorithmId, MAX_ALGOS},
    error::{Error, Result},
    remote::{RemoteHandle, RemoteService},
};
use parking_lot::Mutex;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, error, info, warn};

/// Session slots per algorithm record.
pub const MAX_TUNING_SESSIONS: usize = 16;

/// Largest tuning definition count accepted from the processor.
pub const MAX_TUNING_DEFS: u32 = 256;

/// Identifies a session in a record's dependent set. Never owns the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionRef(u64);

impl SessionRef {
    /// Allocates a process-unique reference.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionRef(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct TuningRecord {
    booted: bool,
    boot_locked: bool,
    defs: Option<Arc<[TuningDef]>>,
    block: Option<Arc<TuningBlock>>,
    sessions: [Option<SessionRef>; MAX_TUNING_SESSIONS],
}

impl TuningRecord {
    fn session_count(&self) -> usize {
        self.sessions.iter().flatten().count()
    }
}

/// Snapshot of one registry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordState {
    pub booted: bool,
    pub boot_locked: bool,
    pub defs: usize,
    pub block: bool,
    pub sessions: usize,
}

/// Process-wide per-algorithm tuning state.
///
/// Each slot holds a record once boot has been requested for that algorithm.
/// Whether a record exists and whether it is booted are tracked separately:
/// a shut down record stays in its slot until [`TuningRegistry::release_record`]
/// observes it unbooted with no dependent sessions.
///
/// Every operation holds the registry lock for its whole duration, including
/// the remote queries made on first boot.
#[derive(Debug)]
pub struct TuningRegistry {
    records: Mutex<[Option<TuningRecord>; MAX_ALGOS]>,
}

impl Default for TuningRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TuningRegistry {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(std::array::from_fn(|_| None)),
        }
    }

    /// Boots `id`'s tuning definitions, creating its record if needed.
    ///
    /// Already booted records are left untouched. Otherwise the definitions
    /// are queried from the processor and translated; the record is only
    /// marked booted, with `boot_lock`, if every definition translates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteService`] if a query fails and
    /// [`Error::InvalidArgument`] if the processor reports too many
    /// definitions or one of an unknown kind.
    pub fn register_algo_boot(
        &self,
        remote: &dyn RemoteService,
        handle: RemoteHandle,
        id: AlgorithmId,
        boot_lock: bool,
    ) -> Result<()> {
        let mut records = self.records.lock();
        let record = records[id.index()].get_or_insert_with(TuningRecord::default);
        if record.booted {
            debug!("{} already booted", id);
            return Ok(());
        }

        let count = remote.get_tuning_param_count(handle, id).map_err(|status| {
            error!("get_tuning_param_count for {} failed: {}", id, status);
            Error::remote("get_tuning_param_count", status)
        })?;
        if count > MAX_TUNING_DEFS {
            error!("{} reports {} tunings, above max {}", id, count, MAX_TUNING_DEFS);
            return Err(Error::InvalidArgument(format!(
                "{} tuning definitions exceed max {}",
                count, MAX_TUNING_DEFS
            )));
        }

        let raw = if count == 0 {
            info!("no tunings supported for {}", id);
            Vec::new()
        } else {
            remote
                .get_tuning_params(handle, id, count)
                .map_err(|status| {
                    error!("get_tuning_params for {} failed: {}", id, status);
                    Error::remote("get_tuning_params", status)
                })?
        };
        let defs = raw
            .iter()
            .map(TuningDef::from_raw)
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| error!("{}: {}", id, e))?;

        info!("{} booted with {} tunings, boot_lock={}", id, defs.len(), boot_lock);
        record.defs = Some(defs.into());
        record.booted = true;
        record.boot_locked = boot_lock;
        Ok(())
    }

    /// Builds the parsed tuning block for a booted record from `source`, or
    /// an empty block when no file is given. An existing block is kept unless
    /// `force_reinit` is set.
    pub fn init_algo_parsed_block(
        &self,
        id: AlgorithmId,
        source: Option<&Path>,
        force_reinit: bool,
    ) -> Result<()> {
        let mut records = self.records.lock();
        let record = match records[id.index()].as_mut() {
            Some(record) if record.booted => record,
            _ => return Err(Error::InvalidState(format!("{} tunings not booted", id))),
        };
        if record.block.is_some() {
            if !force_reinit {
                debug!("{} tuning block already initialized", id);
                return Ok(());
            }
            debug!("reinitializing {} tuning block", id);
            record.block = None;
        }

        let defs = record.defs.clone().unwrap_or_else(|| Arc::from(Vec::new()));
        let block = match source {
            Some(path) => TuningBlock::load(path, id, &defs)?,
            None => TuningBlock::empty(id),
        };
        record.block = Some(Arc::new(block));
        Ok(())
    }

    /// Drops the parsed tuning block unless sessions still depend on it or the
    /// record is boot-locked and `boot_lock` is not given.
    pub fn term_algo_parsed_block(&self, id: AlgorithmId, boot_lock: bool) {
        let mut records = self.records.lock();
        let Some(record) = records[id.index()].as_mut() else {
            return;
        };
        if record.block.is_none() {
            debug!("{} tuning block already terminated", id);
        } else if record.session_count() > 0 {
            debug!("{} has {} sessions, keeping tuning block", id, record.session_count());
        } else if record.boot_locked && !boot_lock {
            debug!("{} boot-locked, keeping tuning block", id);
        } else {
            record.block = None;
        }
    }

    /// Adds `session` to `id`'s dependents.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the record is missing or not booted.
    /// - [`Error::AlreadyInProgress`] if `session` is already registered.
    /// - [`Error::ResourceBusy`] if every session slot is taken.
    pub fn register_session(&self, id: AlgorithmId, session: SessionRef) -> Result<()> {
        let mut records = self.records.lock();
        let record = match records[id.index()].as_mut() {
            Some(record) if record.booted => record,
            _ => {
                return Err(Error::InvalidState(format!(
                    "can't register session on unbooted {}",
                    id
                )))
            }
        };
        if record.sessions.contains(&Some(session)) {
            error!("{:?} already registered on {}", session, id);
            return Err(Error::AlreadyInProgress(format!(
                "{:?} already registered on {}",
                session, id
            )));
        }
        let Some(slot) = record.sessions.iter_mut().find(|slot| slot.is_none()) else {
            error!("{} has max sessions ({})", id, MAX_TUNING_SESSIONS);
            return Err(Error::ResourceBusy(format!(
                "{} session table full ({})",
                id, MAX_TUNING_SESSIONS
            )));
        };
        *slot = Some(session);
        debug!("registered {:?} on {}, count={}", session, id, record.session_count());
        Ok(())
    }

    pub fn unregister_session(&self, id: AlgorithmId, session: SessionRef) -> Result<()> {
        let mut records = self.records.lock();
        let slot = records[id.index()]
            .as_mut()
            .and_then(|record| record.sessions.iter_mut().find(|s| **s == Some(session)));
        match slot {
            Some(slot) => {
                *slot = None;
                debug!("unregistered {:?} from {}", session, id);
                Ok(())
            }
            None => {
                error!("{:?} not registered on {}", session, id);
                Err(Error::InvalidState(format!(
                    "{:?} not registered on {}",
                    session, id
                )))
            }
        }
    }

    /// Frees `id`'s definitions and marks it unbooted.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the record is missing or not booted.
    /// - [`Error::ResourceBusy`] if the record is boot-locked and `boot_lock`
    ///   is not given, or sessions still depend on it.
    pub fn shutdown_algo(&self, id: AlgorithmId, boot_lock: bool) -> Result<()> {
        let mut records = self.records.lock();
        let Some(record) = records[id.index()].as_mut() else {
            return Err(Error::InvalidState(format!("{} has no tuning record", id)));
        };
        if !record.booted {
            return Err(Error::InvalidState(format!("{} not booted", id)));
        }
        if record.boot_locked && !boot_lock {
            debug!("{} boot-locked, skipping shutdown", id);
            return Err(Error::ResourceBusy(format!("{} is boot-locked", id)));
        }
        let sessions = record.session_count();
        if sessions > 0 {
            debug!("{} has {} sessions, skipping shutdown", id, sessions);
            return Err(Error::ResourceBusy(format!(
                "{} has {} dependent sessions",
                id, sessions
            )));
        }
        record.defs = None;
        record.booted = false;
        record.boot_locked = false;
        info!("{} tunings shut down", id);
        Ok(())
    }

    /// Frees `id`'s record if it is unbooted and has no dependents. Returns
    /// whether the slot is now empty.
    pub fn release_record(&self, id: AlgorithmId) -> bool {
        let mut records = self.records.lock();
        match &records[id.index()] {
            None => true,
            Some(record) if !record.booted && record.session_count() == 0 => {
                records[id.index()] = None;
                true
            }
            Some(_) => {
                warn!("{} record still in use, not released", id);
                false
            }
        }
    }

    /// Words to apply to a session, if `id` has a non-empty tuning block.
    pub fn packed_tunings(&self, id: AlgorithmId) -> Option<Vec<u8>> {
        let records = self.records.lock();
        records[id.index()]
            .as_ref()
            .and_then(|record| record.block.as_ref())
            .filter(|block| !block.is_empty())
            .map(|block| block.pack_bytes())
    }

    pub fn definitions(&self, id: AlgorithmId) -> Option<Arc<[TuningDef]>> {
        let records = self.records.lock();
        records[id.index()].as_ref().and_then(|r| r.defs.clone())
    }

    pub fn record_state(&self, id: AlgorithmId) -> Option<RecordState> {
        let records = self.records.lock();
        records[id.index()].as_ref().map(|record| RecordState {
            booted: record.booted,
            boot_locked: record.boot_locked,
            defs: record.defs.as_ref().map_or(0, |defs| defs.len()),
            block: record.block.is_some(),
            sessions: record.session_count(),
        })
    }
}
