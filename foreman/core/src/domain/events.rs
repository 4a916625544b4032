// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::request::RequestState;
use crate::domain::requestable::RequestableKind;
use crate::domain::requester::RequesterId;
use crate::domain::token::Token;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain events published on the engine's event bus.
///
/// One event per observable lifecycle step; observers (UI, sync layers,
/// debug tooling) subscribe and drain at their own pace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RequestCreated {
        request: Token,
        requester: RequesterId,
        kind: RequestableKind,
        at: DateTime<Utc>,
    },
    RequestAssigned {
        request: Token,
        resolver: Token,
        at: DateTime<Utc>,
    },
    RequestStateChanged {
        request: Token,
        from: RequestState,
        to: RequestState,
        at: DateTime<Utc>,
    },
    RequestPurged {
        request: Token,
        at: DateTime<Utc>,
    },
    ResolverRegistered {
        resolver: Token,
        kind: RequestableKind,
        priority: i32,
        at: DateTime<Utc>,
    },
    ResolverRemoved {
        resolver: Token,
        at: DateTime<Utc>,
    },
}
