//! Per-command cooldown tracking.
//!
//! Each command has an independent sliding-window bucket limiting how many
//! invocations are accepted per period. The fault pipeline resets a command's
//! bucket whenever dispatch fails, so a failed attempt never consumes
//! cooldown.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Cooldown rejection.
#[derive(Debug, Clone, Error)]
pub enum CooldownError {
    /// The command's cooldown has not elapsed; retry later.
    #[error("on cool down; retry after {retry_after_secs}s")]
    NotElapsed {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },
}

/// Cooldown parameters for a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownSpec {
    /// Invocations allowed within the window.
    pub uses: u32,
    /// Window length in seconds.
    pub per_secs: u64,
}

impl Default for CooldownSpec {
    fn default() -> Self {
        Self {
            uses: 2,
            per_secs: 5,
        }
    }
}

/// Sliding-window cooldown bucket for one command.
#[derive(Debug, Clone)]
pub struct CooldownBucket {
    spec: CooldownSpec,
    /// Timestamps of accepted invocations, oldest first.
    window: VecDeque<Instant>,
}

impl CooldownBucket {
    /// Create a bucket with the given parameters.
    #[must_use]
    pub fn new(spec: CooldownSpec) -> Self {
        Self {
            spec,
            window: VecDeque::new(),
        }
    }

    /// Try to accept an invocation, recording it on success.
    pub fn try_acquire(&mut self) -> Result<(), CooldownError> {
        let now = Instant::now();
        let period = Duration::from_secs(self.spec.per_secs);

        while let Some(&first) = self.window.front() {
            if now.duration_since(first) > period {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.len() >= self.spec.uses as usize
            && let Some(&oldest) = self.window.front()
        {
            let age = now.duration_since(oldest);
            let remaining = period.saturating_sub(age);
            let retry_after_secs = remaining.as_secs().saturating_add(1);
            return Err(CooldownError::NotElapsed { retry_after_secs });
        }

        self.window.push_back(now);
        Ok(())
    }

    /// Clear all recorded invocations.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Invocations remaining in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.spec.uses.saturating_sub(self.window.len() as u32)
    }
}

/// Cooldown buckets keyed by command name.
///
/// Commands without a registered bucket are never throttled.
#[derive(Debug, Default)]
pub struct CommandCooldowns {
    buckets: HashMap<String, CooldownBucket>,
}

impl CommandCooldowns {
    /// Register a bucket for `command`, replacing any existing one.
    pub fn register(&mut self, command: &str, spec: CooldownSpec) {
        self.buckets
            .insert(command.to_owned(), CooldownBucket::new(spec));
    }

    /// Try to accept an invocation of `command`.
    pub fn try_acquire(&mut self, command: &str) -> Result<(), CooldownError> {
        if let Some(bucket) = self.buckets.get_mut(command) {
            bucket.try_acquire()
        } else {
            Ok(())
        }
    }

    /// Reset the bucket for `command`, if any.
    pub fn reset(&mut self, command: &str) {
        if let Some(bucket) = self.buckets.get_mut(command) {
            bucket.reset();
        }
    }

    /// Remaining invocations for `command` in the current window.
    #[must_use]
    pub fn remaining(&self, command: &str) -> Option<u32> {
        self.buckets.get(command).map(CooldownBucket::remaining)
    }
}
