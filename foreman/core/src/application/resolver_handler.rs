// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resolver Handler — Registry & Sweeps
//!
//! Registration and teardown of resolvers and their providers, maintenance
//! of the kind index, and the periodic colony-update sweep that re-attempts
//! assignment for parked requests.
//!
//! Teardown ordering matters: a resolver is flagged as removing first (so
//! no sweep can hand it new work), then every request assigned to it is
//! force-cancelled through the direct cancellation path, and only then does
//! its identity record leave the stores.

use crate::application::manager::{EngineError, RequestManager};
use crate::application::request_handler;
use crate::application::resolver::{ResolverBehavior, ResolverProvider};
use crate::domain::events::EngineEvent;
use crate::domain::request::RequestRecord;
use crate::domain::requester::ProviderId;
use crate::domain::resolver::ResolverEntry;
use crate::domain::token::Token;
use chrono::Utc;
use std::collections::BTreeSet;
use std::rc::Rc;
use tracing::{debug, info};

pub(crate) fn register_resolver(
    mgr: &mut RequestManager,
    behavior: Rc<dyn ResolverBehavior>,
) -> Result<Token, EngineError> {
    let meta = behavior.meta();
    let token = mgr
        .stores
        .register_resolver(ResolverEntry::new(meta.clone()));
    mgr.behaviors.insert(token, behavior);

    info!(
        resolver = %token,
        kind = %meta.kind,
        priority = meta.priority,
        family = %meta.family,
        "Resolver registered"
    );
    mgr.events.publish(EngineEvent::ResolverRegistered {
        resolver: token,
        kind: meta.kind,
        priority: meta.priority,
        at: Utc::now(),
    });
    Ok(token)
}

/// Deregister a resolver. Every request still assigned to it is
/// force-cancelled first so no assignment record can outlive the resolver.
pub(crate) fn remove_resolver(
    mgr: &mut RequestManager,
    resolver: Token,
) -> Result<(), EngineError> {
    mgr.stores.resolver_mut(resolver)?.removing = true;
    info!(resolver = %resolver, "Removing resolver");

    for request in mgr.stores.assignments_for(resolver) {
        // Cancellation of one request can re-plan and release others; only
        // touch what is still live and still ours.
        if mgr.stores.has_request(request) && mgr.stores.resolver_for(request) == Some(resolver) {
            request_handler::cancel_request(mgr, request)?;
        }
    }

    mgr.stores.remove_resolver(resolver)?;
    mgr.behaviors.remove(&resolver);
    mgr.events.publish(EngineEvent::ResolverRemoved {
        resolver,
        at: Utc::now(),
    });
    Ok(())
}

/// Register a provider's resolvers as a unit.
pub(crate) fn register_provider(
    mgr: &mut RequestManager,
    provider: &dyn ResolverProvider,
) -> Result<Vec<Token>, EngineError> {
    let id = provider.id();
    if mgr.providers.contains_key(&id) {
        return Err(EngineError::ProviderAlreadyRegistered(id));
    }
    let mut tokens = Vec::new();
    for behavior in provider.resolvers() {
        tokens.push(register_resolver(mgr, behavior)?);
    }
    debug!(provider = %id, resolvers = tokens.len(), "Provider registered");
    mgr.providers.insert(id, tokens.clone());
    Ok(tokens)
}

/// Deregister a provider and all of its resolvers.
pub(crate) fn deregister_provider(
    mgr: &mut RequestManager,
    provider: ProviderId,
) -> Result<(), EngineError> {
    let tokens = mgr
        .providers
        .remove(&provider)
        .ok_or(EngineError::UnknownProvider(provider))?;
    for token in tokens {
        if mgr.stores.has_resolver(token) {
            remove_resolver(mgr, token)?;
        }
    }
    debug!(provider = %provider, "Provider deregistered");
    Ok(())
}

/// Re-attach a live behavior to a restored resolver entry. The behavior must
/// declare the kind the persisted entry was indexed under.
pub(crate) fn reattach_resolver(
    mgr: &mut RequestManager,
    resolver: Token,
    behavior: Rc<dyn ResolverBehavior>,
) -> Result<(), EngineError> {
    let entry = mgr.stores.resolver(resolver)?;
    let declared = behavior.meta();
    if declared.kind != entry.meta.kind {
        return Err(EngineError::ReattachKindMismatch {
            token: resolver,
            declared: declared.kind,
            expected: entry.meta.kind.clone(),
        });
    }
    mgr.behaviors.insert(resolver, behavior);
    debug!(resolver = %resolver, "Behavior re-attached");
    Ok(())
}

/// Bulk re-evaluation: re-attempt assignment for every assignable request
/// matching the caller-supplied predicate. Returns how many found a
/// resolver.
pub(crate) fn on_colony_update(
    mgr: &mut RequestManager,
    predicate: &dyn Fn(&RequestRecord) -> bool,
) -> Result<usize, EngineError> {
    let parked: Vec<Token> = mgr
        .stores
        .request_tokens()
        .into_iter()
        .filter(|token| {
            mgr.stores
                .request(*token)
                .map(|record| record.state().is_assignable() && predicate(record))
                .unwrap_or(false)
        })
        .collect();

    let blacklist = BTreeSet::new();
    let mut assigned = 0;
    for token in parked {
        if !mgr.stores.has_request(token) {
            continue;
        }
        if !mgr.stores.request(token)?.state().is_assignable() {
            continue;
        }
        if let request_handler::AssignOutcome::Assigned { .. } =
            request_handler::assign_request(mgr, token, &blacklist)?
        {
            assigned += 1;
        }
    }
    if assigned > 0 {
        debug!(assigned, "Colony update sweep assigned parked requests");
    }
    Ok(assigned)
}
