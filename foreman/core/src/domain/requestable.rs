// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Requestable — The Abstract Description of a Need
//!
//! A [`Requestable`] is the payload of a request: a chain of kinds (most
//! specific first) used for resolver matching, a deliverability flag, and an
//! opaque JSON body the engine never interprets. What an "item stack" or a
//! "delivery" concretely means belongs to the embedding domain.

use crate::domain::token::Token;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One node of the broad-to-narrow requestable type hierarchy.
///
/// Resolvers declare themselves for exactly one kind; a requestable exposes
/// every kind it satisfies, ordered most specific first. Kind names are
/// free-form, non-empty strings owned by the embedding domain
/// (e.g. `"stone_stack"`, `"stack"`, `"deliverable"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestableKind(String);

impl RequestableKind {
    /// Create a new kind with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, RequestableError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RequestableError::EmptyKind);
        }
        Ok(Self(name))
    }

    /// Infallible constructor for compile-time kind names.
    pub fn from_static(name: &'static str) -> Self {
        debug_assert!(!name.is_empty(), "kind names must be non-empty");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestableError {
    #[error("requestable kind names cannot be empty")]
    EmptyKind,
    #[error("a requestable must declare at least one kind")]
    NoKinds,
}

/// Value object describing what a requester needs.
///
/// # Invariants
///
/// - `kinds` is never empty and is ordered most specific first.
/// - `body` is opaque to the engine; only resolvers and requesters read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requestable {
    kinds: Vec<RequestableKind>,
    deliverable: bool,
    body: serde_json::Value,
}

impl Requestable {
    /// Create a new requestable with validation.
    pub fn new(
        kinds: Vec<RequestableKind>,
        deliverable: bool,
        body: serde_json::Value,
    ) -> Result<Self, RequestableError> {
        if kinds.is_empty() {
            return Err(RequestableError::NoKinds);
        }
        Ok(Self {
            kinds,
            deliverable,
            body,
        })
    }

    /// Declared kinds, most specific first.
    pub fn kinds(&self) -> &[RequestableKind] {
        &self.kinds
    }

    /// Whether a concrete result can be physically handed over.
    pub fn deliverable(&self) -> bool {
        self.deliverable
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Position of `kind` in the declared chain; lower is more specific.
    pub fn specificity_of(&self, kind: &RequestableKind) -> Option<usize> {
        self.kinds.iter().position(|k| k == kind)
    }
}

/// A partial result contributed to a request by a resolver or a completed
/// child. Accumulated on the request record and handed to the requester at
/// completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Resolver or child request that produced this result, when known.
    pub source: Option<Token>,
    /// Domain payload; opaque to the engine.
    pub body: serde_json::Value,
}
