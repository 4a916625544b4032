// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resolver Domain Model
//!
//! Value objects describing a provider: its priority, the requestable kind it
//! declares itself for, its position, and its family tag. The behavior half
//! of a resolver (the actual fulfillment logic) lives in the application
//! layer and is attached to the identity record by token.

use crate::domain::requestable::RequestableKind;
use serde::{Deserialize, Serialize};

/// Position in the colony's addressing scheme. The engine only ever measures
/// distances with it; what a coordinate means is the domain's business.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Location {
    pub const ORIGIN: Location = Location { x: 0, y: 0, z: 0 };

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Manhattan distance; the default suitability metric.
    pub fn distance_to(&self, other: &Location) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y) + self.z.abs_diff(other.z)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Tag identifying one resolver implementation family.
///
/// The assignment walk only keeps refining its pick while consecutive
/// candidates share a family; the tag comparison is what used to be a
/// runtime class check.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResolverFamily(String);

impl ResolverFamily {
    pub fn from_static(name: &'static str) -> Self {
        debug_assert!(!name.is_empty(), "family tags must be non-empty");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResolverFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata snapshot of a resolver, captured at registration time.
///
/// Higher `priority` wins the coarse ordering. `kind` is the single
/// requestable kind this resolver registers under in the candidate index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverMeta {
    pub priority: i32,
    pub kind: RequestableKind,
    pub location: Location,
    pub family: ResolverFamily,
}

/// Identity-store record for a resolver. Pure data: the behavior is attached
/// separately by token and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverEntry {
    pub meta: ResolverMeta,
    /// Set while the resolver is being torn down; mid-removal resolvers are
    /// excluded from every candidate shortlist.
    pub removing: bool,
}

impl ResolverEntry {
    pub fn new(meta: ResolverMeta) -> Self {
        Self {
            meta,
            removing: false,
        }
    }
}
