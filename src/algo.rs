// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Offload algorithm identifiers and algorithm bitmasks.

use crate::error::{Error, Result};
use std::{fmt, ops::BitOr};

/// Number of slots in the per-algorithm tables.
pub const MAX_ALGOS: usize = 8;

/// Identifies one offload algorithm. Always `< MAX_ALGOS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlgorithmId(u8);

impl AlgorithmId {
    /// Motion vector processing.
    pub const MVP: AlgorithmId = AlgorithmId(0);
    /// Noise reduction.
    pub const NR: AlgorithmId = AlgorithmId(1);
    /// Image enhancement.
    pub const IE: AlgorithmId = AlgorithmId(2);
    /// Frame rate conversion.
    pub const FRC: AlgorithmId = AlgorithmId(3);

    pub fn new(id: u32) -> Result<Self> {
        if (id as usize) < MAX_ALGOS {
            Ok(AlgorithmId(id as u8))
        } else {
            Err(Error::InvalidArgument(format!(
                "algorithm id {} out of range (max {})",
                id,
                MAX_ALGOS - 1
            )))
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0 as u32
    }

    /// Section name used for this algorithm in tuning files.
    pub fn name(self) -> String {
        match self {
            AlgorithmId::MVP => "mvp".to_owned(),
            AlgorithmId::NR => "nr".to_owned(),
            AlgorithmId::IE => "ie".to_owned(),
            AlgorithmId::FRC => "frc".to_owned(),
            AlgorithmId(n) => format!("algo{}", n),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().find(|id| id.name() == name)
    }

    pub fn all() -> impl Iterator<Item = AlgorithmId> {
        (0..MAX_ALGOS as u8).map(AlgorithmId)
    }
}

impl TryFrom<u32> for AlgorithmId {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        AlgorithmId::new(value)
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Set of algorithms, one bit per [`AlgorithmId`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AlgoFlags(u32);

impl AlgoFlags {
    pub const NONE: AlgoFlags = AlgoFlags(0);

    /// Every algorithm slot.
    pub const ALL: AlgoFlags = AlgoFlags((1 << MAX_ALGOS) - 1);

    /// Builds a set from a raw bitmask, rejecting bits with no algorithm slot.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !Self::ALL.0 != 0 {
            return Err(Error::InvalidArgument(format!(
                "algorithm mask {:#x} has bits beyond slot {}",
                bits,
                MAX_ALGOS - 1
            )));
        }
        Ok(AlgoFlags(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, id: AlgorithmId) -> bool {
        self.0 & (1 << id.0) != 0
    }

    pub fn insert(&mut self, id: AlgorithmId) {
        self.0 |= 1 << id.0;
    }

    pub fn remove(&mut self, id: AlgorithmId) {
        self.0 &= !(1 << id.0);
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Algorithms in the set, lowest id first.
    pub fn iter(self) -> impl Iterator<Item = AlgorithmId> {
        AlgorithmId::all().filter(move |id| self.contains(*id))
    }
}

impl From<AlgorithmId> for AlgoFlags {
    fn from(id: AlgorithmId) -> Self {
        AlgoFlags(1 << id.0)
    }
}

impl FromIterator<AlgorithmId> for AlgoFlags {
    fn from_iter<I: IntoIterator<Item = AlgorithmId>>(iter: I) -> Self {
        let mut flags = AlgoFlags::NONE;
        for id in iter {
            flags.insert(id);
        }
        flags
    }
}

impl BitOr for AlgoFlags {
    type Output = AlgoFlags;

    fn bitor(self, rhs: AlgoFlags) -> AlgoFlags {
        AlgoFlags(self.0 | rhs.0)
    }
}

impl BitOr<AlgorithmId> for AlgoFlags {
    type Output = AlgoFlags;

    fn bitor(self, rhs: AlgorithmId) -> AlgoFlags {
        self | AlgoFlags::from(rhs)
    }
}

impl fmt::Display for AlgoFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names: Vec<String> = self.iter().map(AlgorithmId::name).collect();
        write!(f, "[{}]", names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_range() {
        assert!(AlgorithmId::new(MAX_ALGOS as u32 - 1).is_ok());
        assert!(matches!(
            AlgorithmId::new(MAX_ALGOS as u32),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(AlgorithmId::from_name("ie"), Some(AlgorithmId::IE));
        assert_eq!(AlgorithmId::from_name("algo6").map(AlgorithmId::raw), Some(6));
    }

    #[test]
    fn flags() {
        let flags = AlgoFlags::from(AlgorithmId::NR) | AlgorithmId::FRC;
        assert_eq!(flags.bits(), 0b1010);
        assert_eq!(flags.len(), 2);
        assert_eq!(
            flags.iter().collect::<Vec<_>>(),
            vec![AlgorithmId::NR, AlgorithmId::FRC]
        );
        assert_eq!(flags.to_string(), "[nr,frc]");
        assert!(AlgoFlags::from_bits(1 << MAX_ALGOS).is_err());
    }
}
