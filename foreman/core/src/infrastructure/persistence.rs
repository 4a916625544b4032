// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Snapshot Persistence & Wire Sync
//!
//! A [`Snapshot`] is the serialized image of the four data stores plus a
//! version tag. The same structure serves both durable persistence (serde)
//! and binary replication to observers (bincode), so the two paths can never
//! drift apart.
//!
//! Resolver entries persist metadata only. Behaviors are live code and
//! re-attach when their providers re-register after a restore.
//!
//! There is no partial-corruption recovery: a snapshot either validates as a
//! whole or is rejected as a whole, and rejection forces the manager into its
//! reset-and-rebuild path.

use crate::domain::colony::ColonyId;
use crate::domain::request::RequestRecord;
use crate::domain::requestable::RequestableKind;
use crate::domain::resolver::ResolverEntry;
use crate::domain::token::Token;
use crate::infrastructure::arena::{Arena, ArenaError};
use crate::infrastructure::stores::DataStores;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Bumped whenever the persisted layout changes shape.
pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unsupported snapshot version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("snapshot references unknown token {0}")]
    DanglingToken(Token),
    #[error("snapshot assigns request {0} to more than one resolver")]
    DuplicateAssignment(Token),
    #[error("snapshot parent/child links are not symmetric at {0}")]
    BrokenLink(Token),
    #[error("wire encode failed: {0}")]
    Encode(String),
    #[error("wire decode failed: {0}")]
    Decode(String),
}

/// Versioned image of one manager's stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub colony: ColonyId,
    pub taken_at: DateTime<Utc>,
    requests: Vec<(Token, RequestRecord)>,
    resolvers: Vec<(Token, ResolverEntry)>,
    assignments: Vec<(Token, Vec<Token>)>,
    kind_index: Vec<(RequestableKind, Vec<Token>)>,
}

impl Snapshot {
    pub fn capture(colony: ColonyId, stores: &DataStores) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            colony,
            taken_at: Utc::now(),
            requests: stores
                .requests
                .iter()
                .map(|(token, record)| (token, record.clone()))
                .collect(),
            resolvers: stores
                .resolvers
                .iter()
                .map(|(token, entry)| (token, entry.clone()))
                .collect(),
            assignments: stores
                .assignments_by_resolver
                .iter()
                .map(|(resolver, assigned)| (*resolver, assigned.iter().copied().collect()))
                .collect(),
            kind_index: stores
                .kind_index
                .iter()
                .map(|(kind, candidates)| (kind.clone(), candidates.clone()))
                .collect(),
        }
    }

    /// Validate the snapshot as a whole and rebuild the stores from it.
    pub fn apply(self) -> Result<DataStores, PersistenceError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                found: self.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        let requests: Arena<RequestRecord> = Arena::restore(self.requests)?;
        let resolvers: Arena<ResolverEntry> = Arena::restore(self.resolvers)?;

        let mut assignments_by_resolver: BTreeMap<Token, BTreeSet<Token>> = BTreeMap::new();
        let mut assignments_by_request: BTreeMap<Token, Token> = BTreeMap::new();
        for (resolver, assigned) in self.assignments {
            if !resolvers.contains(resolver) {
                return Err(PersistenceError::DanglingToken(resolver));
            }
            for request in assigned {
                if !requests.contains(request) {
                    return Err(PersistenceError::DanglingToken(request));
                }
                if assignments_by_request.insert(request, resolver).is_some() {
                    return Err(PersistenceError::DuplicateAssignment(request));
                }
                assignments_by_resolver
                    .entry(resolver)
                    .or_default()
                    .insert(request);
            }
        }

        let mut kind_index: BTreeMap<RequestableKind, Vec<Token>> = BTreeMap::new();
        for (kind, candidates) in self.kind_index {
            for candidate in &candidates {
                if !resolvers.contains(*candidate) {
                    return Err(PersistenceError::DanglingToken(*candidate));
                }
            }
            kind_index.insert(kind, candidates);
        }

        // Parent/child links must come back as a symmetric forest.
        for (token, record) in requests.iter() {
            if let Some(parent) = record.parent() {
                let parent_record = requests
                    .get(parent)
                    .ok_or(PersistenceError::DanglingToken(parent))?;
                if !parent_record.children().contains(&token) {
                    return Err(PersistenceError::BrokenLink(token));
                }
            }
            for child in record.children() {
                let child_record = requests
                    .get(*child)
                    .ok_or(PersistenceError::DanglingToken(*child))?;
                if child_record.parent() != Some(token) {
                    return Err(PersistenceError::BrokenLink(*child));
                }
            }
        }

        Ok(DataStores {
            requests,
            resolvers,
            assignments_by_resolver,
            assignments_by_request,
            kind_index,
        })
    }

    /// Binary wire encoding, byte-symmetric with [`Snapshot::from_bytes`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        bincode::serialize(self).map_err(|e| PersistenceError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        bincode::deserialize(bytes).map_err(|e| PersistenceError::Decode(e.to_string()))
    }
}
