// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{Error, Result},
    remote::{RawTuningDef, RawTuningKind},
};
use serde_json::Value;
use std::fmt;

/// Converts a signed 16.16 fixed point word to a float.
pub fn fixed16p16_to_f32(raw: u32) -> f32 {
    raw as i32 as f32 / 65536.0
}

pub fn f32_to_fixed16p16(value: f32) -> u32 {
    (value * 65536.0).round() as i32 as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningKind {
    Float,
    U32,
    S32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TuningValue {
    Float(f32),
    U32(u32),
    S32(i32),
}

impl TuningValue {
    pub fn kind(&self) -> TuningKind {
        match self {
            TuningValue::Float(_) => TuningKind::Float,
            TuningValue::U32(_) => TuningKind::U32,
            TuningValue::S32(_) => TuningKind::S32,
        }
    }

    /// Encoding used in parameter blocks sent to the processor.
    pub fn to_wire(self) -> u32 {
        match self {
            TuningValue::Float(v) => f32_to_fixed16p16(v),
            TuningValue::U32(v) => v,
            TuningValue::S32(v) => v as u32,
        }
    }
}

impl fmt::Display for TuningValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TuningValue::Float(v) => write!(f, "{}", v),
            TuningValue::U32(v) => write!(f, "{}", v),
            TuningValue::S32(v) => write!(f, "{}", v),
        }
    }
}

/// Definition of one tunable parameter. Immutable once built from the
/// processor's report.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningDef {
    pub name: String,
    pub id: u32,
    /// Number of values the parameter takes.
    pub count: u32,
    pub kind: TuningKind,
    pub min: TuningValue,
    pub max: TuningValue,
}

impl TuningDef {
    /// Translates a processor-reported definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a value kind this manager does
    /// not understand.
    pub fn from_raw(raw: &RawTuningDef) -> Result<Self> {
        let (kind, min, max) = match raw.kind {
            RawTuningKind::Fixed16p16 => (
                TuningKind::Float,
                TuningValue::Float(fixed16p16_to_f32(raw.min)),
                TuningValue::Float(fixed16p16_to_f32(raw.max)),
            ),
            RawTuningKind::U32 => (
                TuningKind::U32,
                TuningValue::U32(raw.min),
                TuningValue::U32(raw.max),
            ),
            RawTuningKind::S32 => (
                TuningKind::S32,
                TuningValue::S32(raw.min as i32),
                TuningValue::S32(raw.max as i32),
            ),
            RawTuningKind::Unknown(kind) => {
                return Err(Error::InvalidArgument(format!(
                    "tuning {} (id {}) has unknown kind {}",
                    raw.name, raw.id, kind
                )))
            }
        };
        Ok(Self {
            name: raw.name.clone(),
            id: raw.id,
            count: raw.count,
            kind,
            min,
            max,
        })
    }

    /// True if `value` has this definition's kind and lies within bounds.
    pub fn accepts(&self, value: &TuningValue) -> bool {
        match (value, &self.min, &self.max) {
            (TuningValue::Float(v), TuningValue::Float(lo), TuningValue::Float(hi)) => {
                lo <= v && v <= hi
            }
            (TuningValue::U32(v), TuningValue::U32(lo), TuningValue::U32(hi)) => {
                lo <= v && v <= hi
            }
            (TuningValue::S32(v), TuningValue::S32(lo), TuningValue::S32(hi)) => {
                lo <= v && v <= hi
            }
            _ => false,
        }
    }

    /// Reads a tuning file value as this definition's kind.
    pub fn value_from_json(&self, value: &Value) -> Option<TuningValue> {
        match self.kind {
            TuningKind::Float => value.as_f64().map(|v| TuningValue::Float(v as f32)),
            TuningKind::U32 => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(TuningValue::U32),
            TuningKind::S32 => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(TuningValue::S32),
        }
    }
}
