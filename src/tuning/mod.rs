// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-algorithm tuning parameters shared by every session of the process.

pub mod block;
pub mod def;
pub mod registry;

pub use block::TuningBlock;
pub use def::{TuningDef, TuningKind, TuningValue};
pub use registry::{RecordState, SessionRef, TuningRegistry, MAX_TUNING_DEFS, MAX_TUNING_SESSIONS};
