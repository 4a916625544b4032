// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Requester Port
//!
//! The party that originates requests and receives completion/cancellation
//! notifications. Requesters live outside the engine (workers, buildings,
//! player mailboxes); records store only the [`RequesterId`], and the manager
//! keeps the live reference in a registry keyed by it.
//!
//! Callbacks deliberately do not receive the manager: a requester reacts to a
//! finished notification, it does not re-enter the engine mid-transition.

use crate::domain::requestable::Delivery;
use crate::domain::resolver::Location;
use crate::domain::token::Token;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterId(pub Uuid);

impl RequesterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequesterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequesterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a resolver provider (a building, a mailbox), which
/// contributes zero or more resolvers and is registered/deregistered as a
/// unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub Uuid);

impl ProviderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProviderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collaborator interface the engine consumes.
pub trait Requester {
    fn id(&self) -> RequesterId;

    /// Stable position used by suitability metrics.
    fn location(&self) -> Location;

    /// The request reached `Completed`; `deliveries` is everything that was
    /// accumulated for it, substitute results included.
    fn on_request_complete(&self, request: Token, deliveries: &[Delivery]);

    /// The request terminated without a result (cancelled or failed). The
    /// requester decides whether to re-issue it.
    fn on_request_cancelled(&self, request: Token);
}
