// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Request Domain Model
//!
//! A [`RequestRecord`] is the task record the whole engine revolves around:
//! payload, state, requester attribution, parent/child links (as tokens) and
//! accumulated partial results.
//!
//! # Invariants
//!
//! - A request with open children may not be resolved or reassigned.
//! - `parent` and the parent's `children` set are mutated together; a link is
//!   never half-present.
//! - Tokens referenced by `parent`/`children` resolve to a registered request
//!   or to nothing already cleaned up; a dangling token is a bug, not a
//!   representable state.
//!
//! All state mutation flows through the manager's single transition entry
//! point, which consults [`RequestState::can_move_to`] before touching the
//! record.

use crate::domain::requestable::{Delivery, Requestable};
use crate::domain::requester::RequesterId;
use crate::domain::token::Token;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

// ============================================================================
// State Machine
// ============================================================================

/// Lifecycle states of a request.
///
/// Normal path: `Created → Assigning → InProgress → Resolved →
/// FollowupInProgress → Completed → Received`. `Reported` is the parked
/// re-entry point for unassigned and reassigned requests; `Overruled`,
/// `Failed` and `Cancelled` are the side branches converging on cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Created,
    Assigning,
    Reported,
    InProgress,
    Resolved,
    FollowupInProgress,
    Completed,
    Overruled,
    Cancelled,
    Failed,
    Received,
}

impl RequestState {
    /// Legal-transition table. Every transition in the engine is checked here
    /// and nowhere else.
    pub fn can_move_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Created, Assigning)
                | (Created, Cancelled)
                | (Created, Overruled)
                | (Assigning, Reported)
                | (Assigning, InProgress)
                | (Assigning, Cancelled)
                | (Assigning, Overruled)
                | (Reported, Assigning)
                | (Reported, Cancelled)
                | (Reported, Overruled)
                | (Reported, Failed)
                | (InProgress, Resolved)
                | (InProgress, Reported)
                | (InProgress, Cancelled)
                | (InProgress, Overruled)
                | (InProgress, Failed)
                | (Resolved, FollowupInProgress)
                | (Resolved, Completed)
                | (Resolved, Cancelled)
                | (Resolved, Overruled)
                | (FollowupInProgress, Completed)
                | (FollowupInProgress, Reported)
                | (FollowupInProgress, Cancelled)
                | (FollowupInProgress, Overruled)
                | (Overruled, Completed)
                | (Overruled, Cancelled)
                | (Completed, Received)
                | (Completed, Cancelled)
        )
    }

    /// Terminal states are purged from the identity store once processed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Cancelled | RequestState::Failed | RequestState::Received
        )
    }

    /// Open states still count toward a requester's outstanding work.
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// States from which the assignment algorithm may be (re-)entered.
    pub fn is_assignable(self) -> bool {
        matches!(self, RequestState::Created | RequestState::Reported)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestState::Created => "created",
            RequestState::Assigning => "assigning",
            RequestState::Reported => "reported",
            RequestState::InProgress => "in_progress",
            RequestState::Resolved => "resolved",
            RequestState::FollowupInProgress => "followup_in_progress",
            RequestState::Completed => "completed",
            RequestState::Overruled => "overruled",
            RequestState::Cancelled => "cancelled",
            RequestState::Failed => "failed",
            RequestState::Received => "received",
        };
        write!(f, "{name}")
    }
}

/// Candidate-selection policy for the assignment walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssigningStrategy {
    /// Coarse ordering by resolver priority, specificity as the tie-break,
    /// suitability only refining within one resolver family.
    #[default]
    PriorityBased,
    /// Suitability metric first, priority as the tie-break. Picks whichever
    /// provider can plausibly act soonest regardless of the coarse ordering.
    FastestFirst,
}

// ============================================================================
// Errors
// ============================================================================

/// Contract violations around request lifecycle. These indicate the caller
/// broke a precondition; they are surfaced immediately and never tolerated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("illegal request state transition {from} -> {to} for {token}")]
    IllegalTransition {
        token: Token,
        from: RequestState,
        to: RequestState,
    },
    #[error("request {0} still has open children")]
    OpenChildren(Token),
    #[error("request {0} is not assigned to any resolver")]
    NotAssigned(Token),
}

// ============================================================================
// Record
// ============================================================================

/// The task record: everything the engine knows about one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    token: Token,
    requester: RequesterId,
    payload: Requestable,
    state: RequestState,
    parent: Option<Token>,
    children: BTreeSet<Token>,
    deliveries: Vec<Delivery>,
    strategy: AssigningStrategy,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl RequestRecord {
    pub fn new(
        token: Token,
        requester: RequesterId,
        payload: Requestable,
        strategy: AssigningStrategy,
    ) -> Self {
        Self {
            token,
            requester,
            payload,
            state: RequestState::Created,
            parent: None,
            children: BTreeSet::new(),
            deliveries: Vec::new(),
            strategy,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn requester(&self) -> RequesterId {
        self.requester
    }

    pub fn payload(&self) -> &Requestable {
        &self.payload
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn parent(&self) -> Option<Token> {
        self.parent
    }

    pub fn children(&self) -> &BTreeSet<Token> {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    pub fn strategy(&self) -> AssigningStrategy {
        self.strategy
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub(crate) fn set_state(&mut self, state: RequestState) {
        self.state = state;
        if matches!(
            state,
            RequestState::Completed
                | RequestState::Cancelled
                | RequestState::Failed
                | RequestState::Received
        ) && self.closed_at.is_none()
        {
            self.closed_at = Some(Utc::now());
        }
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Token>) {
        self.parent = parent;
    }

    pub(crate) fn add_child(&mut self, child: Token) {
        self.children.insert(child);
    }

    pub(crate) fn remove_child(&mut self, child: Token) -> bool {
        self.children.remove(&child)
    }

    pub(crate) fn push_delivery(&mut self, delivery: Delivery) {
        self.deliveries.push(delivery);
    }

    pub(crate) fn extend_deliveries(&mut self, deliveries: impl IntoIterator<Item = Delivery>) {
        self.deliveries.extend(deliveries);
    }

    pub(crate) fn clear_deliveries(&mut self) {
        self.deliveries.clear();
    }

    pub(crate) fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.deliveries)
    }
}
