use crate::targets::Pointing;
use heapless::Deque;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_COMMAND_QUEUE_SIZE: usize = 32;

/// Directives understood by the spacecraft subsystem models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    SlewToTarget { pointing: Pointing },
    EndObservation { obsid: u32 },
    StartBatteryCharge,
    EndBatteryCharge,
    EnterSafeMode,
}

impl CommandType {
    pub fn name(&self) -> &'static str {
        match self {
            CommandType::SlewToTarget { .. } => "SLEW_TO_TARGET",
            CommandType::EndObservation { .. } => "END_OBSERVATION",
            CommandType::StartBatteryCharge => "START_BATTERY_CHARGE",
            CommandType::EndBatteryCharge => "END_BATTERY_CHARGE",
            CommandType::EnterSafeMode => "ENTER_SAFE_MODE",
        }
    }

    pub fn obsid(&self) -> Option<u32> {
        match self {
            CommandType::SlewToTarget { pointing } => Some(pointing.obsid),
            CommandType::EndObservation { obsid } => Some(*obsid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: u32,
    pub command_type: CommandType,
    pub issued_at: f64,
}

impl core::fmt::Display for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.command_type {
            CommandType::SlewToTarget { pointing } => write!(
                f,
                "#{} {} obsid={} ra={:.3} dec={:.3} roll={:.1}",
                self.id,
                self.command_type.name(),
                pointing.obsid,
                pointing.ra,
                pointing.dec,
                pointing.roll
            ),
            CommandType::EndObservation { obsid } => {
                write!(f, "#{} {} obsid={}", self.id, self.command_type.name(), obsid)
            }
            _ => write!(f, "#{} {}", self.id, self.command_type.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("command queue full")]
pub struct CommandQueueFull;

/// Rejection of a command by a subsystem model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{command} rejected: {reason}")]
pub struct DispatchError {
    pub command: &'static str,
    pub reason: &'static str,
}

/// FIFO of pending commands. Dispatch order always equals enqueue order.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: Deque<Command, MAX_COMMAND_QUEUE_SIZE>,
    total_enqueued: u32,
    total_cleared: u32,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, command: Command) -> Result<(), CommandQueueFull> {
        self.pending.push_back(command).map_err(|_| CommandQueueFull)?;
        self.total_enqueued = self.total_enqueued.saturating_add(1);
        Ok(())
    }

    /// Remove and return every pending command, oldest first.
    pub fn drain(&mut self) -> alloc::vec::Vec<Command> {
        let mut drained = alloc::vec::Vec::with_capacity(self.pending.len());
        while let Some(command) = self.pending.pop_front() {
            drained.push(command);
        }
        drained
    }

    /// Discard every pending command.
    pub fn clear(&mut self) {
        self.total_cleared = self.total_cleared.saturating_add(self.pending.len() as u32);
        self.pending.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn total_enqueued(&self) -> u32 {
        self.total_enqueued
    }

    pub fn total_cleared(&self) -> u32 {
        self.total_cleared
    }
}
