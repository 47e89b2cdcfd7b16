//! Channel lifecycle state machine
//!
//! `Idle -> Running -> Stopping -> Idle`. The state lives in an atomic so the
//! render thread can check it without locking; transitions are made from the
//! control side only and are validated.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{ResonatorError, Result};

/// Lifecycle states of a feedback channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Slot is in the pool; render outputs silence
    #[default]
    Idle,
    /// Render path and async cycle are both live
    Running,
    /// Async cycle is being cancelled; render output is muted
    Stopping,
}

impl ChannelState {
    fn as_u8(self) -> u8 {
        match self {
            ChannelState::Idle => 0,
            ChannelState::Running => 1,
            ChannelState::Stopping => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ChannelState::Running,
            2 => ChannelState::Stopping,
            _ => ChannelState::Idle,
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        matches!(
            (self, next),
            (ChannelState::Idle, ChannelState::Running)
                | (ChannelState::Running, ChannelState::Stopping)
                | (ChannelState::Stopping, ChannelState::Idle)
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Idle => write!(f, "Idle"),
            ChannelState::Running => write!(f, "Running"),
            ChannelState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Atomically readable holder for a [`ChannelState`]
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    #[inline]
    pub fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.get() == ChannelState::Running
    }

    /// Move to `next`, failing if the current state does not allow it
    pub fn transition(&self, next: ChannelState) -> Result<ChannelState> {
        let current = self.get();
        if !current.can_transition_to(next) {
            return Err(ResonatorError::InvalidState {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.0
            .compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| current)
            .map_err(|actual| ResonatorError::InvalidState {
                from: ChannelState::from_u8(actual).to_string(),
                to: next.to_string(),
            })
    }
}
