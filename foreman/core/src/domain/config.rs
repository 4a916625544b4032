// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Engine Configuration
//!
//! Deserializable knobs for one manager instance. Every field defaults, so a
//! zero-config colony gets sane behavior.

use crate::domain::requestable::RequestableKind;
use serde::{Deserialize, Serialize};

/// Top-level configuration for a [`RequestManager`](crate::application::RequestManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard bound on recursive child assignment. The token graph is not
    /// statically proven acyclic, so the walk refuses to go deeper than this.
    pub max_assign_depth: usize,
    /// Buffered capacity of the event-bus broadcast channel.
    pub event_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_assign_depth: 32,
            event_capacity: 1024,
            retry: RetryConfig::default(),
        }
    }
}

/// Knobs for the built-in retrying resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Re-attempts before a parked request is surfaced as failed.
    pub max_attempts: u32,
    /// Scheduler ticks between re-attempt sweeps.
    pub cadence_ticks: u64,
    /// Requestable kind the retrying resolver registers under. Requests that
    /// should fall back to retry must carry this kind in their chain.
    pub kind: RequestableKind,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cadence_ticks: 20,
            kind: RequestableKind::from_static("retryable"),
        }
    }
}
