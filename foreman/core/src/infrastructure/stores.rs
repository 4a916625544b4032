// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Data Stores
//!
//! The four logical maps of the engine, all keyed by token:
//!
//! 1. request identities (arena),
//! 2. resolver identities (arena),
//! 3. resolver↔request assignment, bidirectional (one resolver to many
//!    requests, each request under at most one resolver),
//! 4. requestable-kind → candidate-resolver index.
//!
//! Every mutating primitive here leaves the token graph consistent before
//! returning: parent/child links are set and severed together, and the two
//! assignment directions never disagree. Lifecycle policy (who may call what
//! and when) lives in the application layer.

use crate::domain::request::RequestRecord;
use crate::domain::requestable::RequestableKind;
use crate::domain::resolver::ResolverEntry;
use crate::domain::token::Token;
use crate::infrastructure::arena::Arena;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Bookkeeping violations. Each of these means a caller handed in a token the
/// stores do not know, or tried to record a relationship that would break an
/// invariant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown request token {0}")]
    UnknownRequest(Token),
    #[error("unknown resolver token {0}")]
    UnknownResolver(Token),
    #[error("request {request} is already assigned to resolver {resolver}")]
    AlreadyAssigned { request: Token, resolver: Token },
    #[error("resolver {0} still has assigned requests")]
    ResolverBusy(Token),
    #[error("no parent/child link between {parent} and {child}")]
    MissingLink { parent: Token, child: Token },
}

#[derive(Debug, Default)]
pub struct DataStores {
    pub(crate) requests: Arena<RequestRecord>,
    pub(crate) resolvers: Arena<ResolverEntry>,
    pub(crate) assignments_by_resolver: BTreeMap<Token, BTreeSet<Token>>,
    pub(crate) assignments_by_request: BTreeMap<Token, Token>,
    pub(crate) kind_index: BTreeMap<RequestableKind, Vec<Token>>,
}

impl DataStores {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Request identities
    // ========================================================================

    pub fn insert_request_with(&mut self, build: impl FnOnce(Token) -> RequestRecord) -> Token {
        self.requests.insert_with(build)
    }

    pub fn request(&self, token: Token) -> Result<&RequestRecord, StoreError> {
        self.requests
            .get(token)
            .ok_or(StoreError::UnknownRequest(token))
    }

    pub fn request_mut(&mut self, token: Token) -> Result<&mut RequestRecord, StoreError> {
        self.requests
            .get_mut(token)
            .ok_or(StoreError::UnknownRequest(token))
    }

    pub fn has_request(&self, token: Token) -> bool {
        self.requests.contains(token)
    }

    pub fn request_tokens(&self) -> Vec<Token> {
        self.requests.tokens()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Drop a request's identity record. The request must already be released
    /// from its resolver; assignment records never outlive the identity.
    pub fn remove_request(&mut self, token: Token) -> Result<RequestRecord, StoreError> {
        if let Some(resolver) = self.assignments_by_request.get(&token) {
            return Err(StoreError::AlreadyAssigned {
                request: token,
                resolver: *resolver,
            });
        }
        self.requests
            .remove(token)
            .ok_or(StoreError::UnknownRequest(token))
    }

    // ========================================================================
    // Parent/child links
    // ========================================================================

    /// Record `child` as a dependency of `parent`. Both sides of the link are
    /// written together.
    pub fn link_child(&mut self, parent: Token, child: Token) -> Result<(), StoreError> {
        if !self.requests.contains(parent) {
            return Err(StoreError::UnknownRequest(parent));
        }
        self.requests
            .get_mut(child)
            .ok_or(StoreError::UnknownRequest(child))?
            .set_parent(Some(parent));
        if let Some(record) = self.requests.get_mut(parent) {
            record.add_child(child);
        }
        Ok(())
    }

    /// Sever the link between `parent` and `child`. Tolerates either side
    /// already being purged; errors only if the link itself never existed.
    pub fn unlink_child(&mut self, parent: Token, child: Token) -> Result<(), StoreError> {
        let mut found = false;
        if let Some(record) = self.requests.get_mut(parent) {
            found |= record.remove_child(child);
        }
        if let Some(record) = self.requests.get_mut(child) {
            if record.parent() == Some(parent) {
                record.set_parent(None);
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(StoreError::MissingLink { parent, child })
        }
    }

    // ========================================================================
    // Resolver identities + kind index
    // ========================================================================

    pub fn register_resolver(&mut self, entry: ResolverEntry) -> Token {
        let kind = entry.meta.kind.clone();
        let token = self.resolvers.insert(entry);
        self.kind_index.entry(kind).or_default().push(token);
        token
    }

    pub fn resolver(&self, token: Token) -> Result<&ResolverEntry, StoreError> {
        self.resolvers
            .get(token)
            .ok_or(StoreError::UnknownResolver(token))
    }

    pub fn resolver_mut(&mut self, token: Token) -> Result<&mut ResolverEntry, StoreError> {
        self.resolvers
            .get_mut(token)
            .ok_or(StoreError::UnknownResolver(token))
    }

    pub fn has_resolver(&self, token: Token) -> bool {
        self.resolvers.contains(token)
    }

    pub fn resolver_tokens(&self) -> Vec<Token> {
        self.resolvers.tokens()
    }

    pub fn resolver_count(&self) -> usize {
        self.resolvers.len()
    }

    /// Drop a resolver's identity record and its kind-index entry. All of its
    /// assignments must have been released first.
    pub fn remove_resolver(&mut self, token: Token) -> Result<ResolverEntry, StoreError> {
        if self
            .assignments_by_resolver
            .get(&token)
            .is_some_and(|assigned| !assigned.is_empty())
        {
            return Err(StoreError::ResolverBusy(token));
        }
        let entry = self
            .resolvers
            .remove(token)
            .ok_or(StoreError::UnknownResolver(token))?;
        self.assignments_by_resolver.remove(&token);
        if let Some(candidates) = self.kind_index.get_mut(&entry.meta.kind) {
            candidates.retain(|candidate| *candidate != token);
            if candidates.is_empty() {
                self.kind_index.remove(&entry.meta.kind);
            }
        }
        Ok(entry)
    }

    /// Resolver tokens registered for `kind`, in registration order.
    pub fn candidates_for_kind(&self, kind: &RequestableKind) -> &[Token] {
        self.kind_index
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Record `request` as committed to `resolver`. Exclusivity is enforced:
    /// a request can be assigned to at most one resolver at a time.
    pub fn assign(&mut self, resolver: Token, request: Token) -> Result<(), StoreError> {
        if !self.requests.contains(request) {
            return Err(StoreError::UnknownRequest(request));
        }
        if !self.resolvers.contains(resolver) {
            return Err(StoreError::UnknownResolver(resolver));
        }
        if let Some(current) = self.assignments_by_request.get(&request) {
            return Err(StoreError::AlreadyAssigned {
                request,
                resolver: *current,
            });
        }
        self.assignments_by_request.insert(request, resolver);
        self.assignments_by_resolver
            .entry(resolver)
            .or_default()
            .insert(request);
        Ok(())
    }

    /// Remove the assignment record for `request`, returning the resolver it
    /// was committed to, if any.
    pub fn release(&mut self, request: Token) -> Option<Token> {
        let resolver = self.assignments_by_request.remove(&request)?;
        if let Some(assigned) = self.assignments_by_resolver.get_mut(&resolver) {
            assigned.remove(&request);
            if assigned.is_empty() {
                self.assignments_by_resolver.remove(&resolver);
            }
        }
        Some(resolver)
    }

    pub fn resolver_for(&self, request: Token) -> Option<Token> {
        self.assignments_by_request.get(&request).copied()
    }

    pub fn assignments_for(&self, resolver: Token) -> Vec<Token> {
        self.assignments_by_resolver
            .get(&resolver)
            .map(|assigned| assigned.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn assigned_request_count(&self) -> usize {
        self.assignments_by_request.len()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
        self.resolvers.clear();
        self.assignments_by_resolver.clear();
        self.assignments_by_request.clear();
        self.kind_index.clear();
    }
}
