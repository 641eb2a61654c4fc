// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for the offload core manager.

use crate::remote::RemoteStatus;
use thiserror::Error;

/// Result type alias using the offload [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the offload core manager.
#[derive(Error, Debug)]
pub enum Error {
    /// Out-of-range or otherwise malformed input. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The shared-memory allocator is exhausted.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The remote processor returned a failure for `call`.
    #[error("remote call {call} failed with status {status}")]
    RemoteService {
        call: &'static str,
        status: RemoteStatus,
    },

    /// Shutdown refused while dependents remain or the record is boot-locked.
    /// The caller may retry later.
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    /// The same registration was requested twice.
    #[error("already in progress: {0}")]
    AlreadyInProgress(String),

    /// Operation issued in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// More than one step of a best-effort teardown failed.
    #[error("{} teardown steps failed, first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    PartialFailure(Vec<Error>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tuning file: {0}")]
    TuningFile(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn remote(call: &'static str, status: RemoteStatus) -> Self {
        Error::RemoteService { call, status }
    }

    /// True for the non-fatal "try again later" outcome of a shutdown.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::ResourceBusy(_))
    }
}
