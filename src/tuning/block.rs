// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use super::def::{TuningDef, TuningValue};
use crate::{
    algo::AlgorithmId,
    error::{Error, Result},
};
use serde_json::Value;
use std::{fs, path::Path};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct TuningEntry {
    pub id: u32,
    pub name: String,
    pub values: Vec<TuningValue>,
}

/// Validated tuning values for one algorithm, ready to apply to sessions.
///
/// A tuning file is a JSON object keyed by algorithm name, each section
/// mapping tuning names to arrays of values:
///
/// ```json
/// { "nr": { "strength": [1.5], "mode": [2] } }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TuningBlock {
    pub algo: AlgorithmId,
    pub entries: Vec<TuningEntry>,
}

impl TuningBlock {
    pub fn empty(algo: AlgorithmId) -> Self {
        Self {
            algo,
            entries: Vec::new(),
        }
    }

    /// Reads the tuning file at `path` and keeps the entries of `algo`'s
    /// section that match `defs`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or is
    /// not a JSON object.
    pub fn load(path: &Path, algo: AlgorithmId, defs: &[TuningDef]) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let root: Value = serde_json::from_str(&text)?;
        Self::from_json(&root, algo, defs)
    }

    pub fn from_json(root: &Value, algo: AlgorithmId, defs: &[TuningDef]) -> Result<Self> {
        let root = root
            .as_object()
            .ok_or_else(|| Error::InvalidArgument("tuning file is not an object".to_owned()))?;
        let section = match root.get(&algo.name()) {
            Some(Value::Object(section)) => section,
            Some(_) => {
                warn!("tuning section {} is not an object, ignoring", algo);
                return Ok(Self::empty(algo));
            }
            None => {
                debug!("no tuning section for {}", algo);
                return Ok(Self::empty(algo));
            }
        };

        let mut entries = Vec::new();
        for (name, values) in section {
            let Some(def) = defs.iter().find(|def| &def.name == name) else {
                warn!("{}: unknown tuning {}", algo, name);
                continue;
            };
            match parse_values(def, values) {
                Some(values) => entries.push(TuningEntry {
                    id: def.id,
                    name: def.name.clone(),
                    values,
                }),
                None => warn!("{}: invalid values for tuning {}: {}", algo, name, values),
            }
        }
        entries.sort_by_key(|entry| entry.id);
        debug!("{}: {} valid tunings", algo, entries.len());
        Ok(Self { algo, entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Packs the block as `[count, {id, len, values...}...]` words.
    pub fn pack(&self) -> Vec<u32> {
        let mut words = vec![self.entries.len() as u32];
        for entry in &self.entries {
            words.push(entry.id);
            words.push(entry.values.len() as u32);
            words.extend(entry.values.iter().map(|v| v.to_wire()));
        }
        words
    }

    pub fn pack_bytes(&self) -> Vec<u8> {
        self.pack().iter().flat_map(|w| w.to_ne_bytes()).collect()
    }
}

fn parse_values(def: &TuningDef, values: &Value) -> Option<Vec<TuningValue>> {
    let values = values.as_array()?;
    if values.len() != def.count as usize {
        return None;
    }
    values
        .iter()
        .map(|v| def.value_from_json(v).filter(|v| def.accepts(v)))
        .collect()
}
