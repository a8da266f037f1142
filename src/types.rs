//! Basic type definitions for the chat hub
//!
//! Provides newtype wrappers and shared constants:
//! - `HandlerId`: monotonically assigned connection identifier
//! - `HandlerState`: lifecycle of a connection handler

use std::sync::atomic::{AtomicU8, Ordering};

/// Well-known TCP port shared by listener and connector
pub const DEFAULT_PORT: u16 = 54000;

/// Largest payload accepted in a single frame (64 MiB)
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Pending-connection queue length for the listening socket
pub const LISTEN_BACKLOG: u32 = 10;

/// Unique handler identifier (newtype pattern)
///
/// Assigned in increasing order by the room and never reused while the
/// room is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a connection handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandlerState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl HandlerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Handler state shared between the handler and its loops
#[derive(Debug)]
pub struct AtomicHandlerState(AtomicU8);

impl AtomicHandlerState {
    pub fn new(state: HandlerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> HandlerState {
        HandlerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: HandlerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `current` to `next`; returns false if the state was different
    pub fn transition(&self, current: HandlerState, next: HandlerState) -> bool {
        self.0
            .compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
