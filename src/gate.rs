// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Process-wide serialization of boot and shutdown.
//!
//! At most one boot or shutdown runs at any instant. Callers that enter the
//! gate hold a [`GateGuard`]; code that runs inside an already gated boot or
//! shutdown takes `&GateGuard` as proof instead of entering again, which
//! would deadlock.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlobalState {
    #[default]
    Ready,
    Booting,
    ShuttingDown,
}

/// A gated transition away from [`GlobalState::Ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Boot,
    Shutdown,
}

impl From<Transition> for GlobalState {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Boot => GlobalState::Booting,
            Transition::Shutdown => GlobalState::ShuttingDown,
        }
    }
}

impl fmt::Display for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            GlobalState::Ready => "ready",
            GlobalState::Booting => "booting",
            GlobalState::ShuttingDown => "shutting down",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Default)]
pub struct LifecycleGate {
    state: Mutex<GlobalState>,
    ready: Condvar,
}

impl LifecycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the gate is ready, then claims it for `transition`.
    /// The gate is released when the returned guard drops.
    pub fn enter(&self, transition: Transition) -> GateGuard<'_> {
        self.enter_state(transition);
        GateGuard {
            gate: self,
            transition,
        }
    }

    /// Blocks until the gate is ready, then moves it to `transition`'s state.
    /// Every call must be paired with [`LifecycleGate::leave_state`].
    pub fn enter_state(&self, transition: Transition) {
        let mut state = self.state.lock();
        while *state != GlobalState::Ready {
            trace!("waiting for gate: {} (want {:?})", *state, transition);
            self.ready.wait(&mut state);
        }
        *state = transition.into();
    }

    pub fn leave_state(&self) {
        let mut state = self.state.lock();
        *state = GlobalState::Ready;
        self.ready.notify_all();
    }

    pub fn state(&self) -> GlobalState {
        *self.state.lock()
    }
}

/// Proof that the caller holds the lifecycle gate.
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct GateGuard<'a> {
    gate: &'a LifecycleGate,
    transition: Transition,
}

impl GateGuard<'_> {
    pub fn transition(&self) -> Transition {
        self.transition
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.leave_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases() {
        let gate = LifecycleGate::new();
        {
            let guard = gate.enter(Transition::Boot);
            assert_eq!(guard.transition(), Transition::Boot);
            assert_eq!(gate.state(), GlobalState::Booting);
        }
        assert_eq!(gate.state(), GlobalState::Ready);
        let _guard = gate.enter(Transition::Shutdown);
        assert_eq!(gate.state(), GlobalState::ShuttingDown);
    }
}
