// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Request Handler — Assignment & Lifecycle Logic
//!
//! The engine's core logic: candidate shortlisting and the assignment walk,
//! recursive child assignment, reassignment, resolution with follow-ups,
//! completion propagation up the parent chain, and the cancellation family.
//!
//! Cancellation is always processed children-before-parent, so a failure
//! deep in the tree can never leave a dangling assignment above it. All
//! recursion over the token graph carries a depth bound and a visited set:
//! the graph is maintained as a forest, but the walk refuses to trust that
//! unconditionally.

use crate::application::manager::{EngineError, RequestManager};
use crate::application::resolver::ResolverBehavior;
use crate::domain::events::EngineEvent;
use crate::domain::request::{AssigningStrategy, RequestError, RequestRecord, RequestState};
use crate::domain::requestable::{Delivery, Requestable};
use crate::domain::requester::{Requester, RequesterId};
use crate::domain::resolver::ResolverFamily;
use crate::domain::token::Token;
use crate::infrastructure::stores::StoreError;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Result of an assignment walk. `Unassigned` is not an error: the request
/// parks in `Reported` and is retried on a later sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned { resolver: Token },
    Unassigned,
}

struct Candidate {
    resolver: Token,
    behavior: Rc<dyn ResolverBehavior>,
    priority: i32,
    /// Index of the resolver's declared kind within the request's kind
    /// chain; lower means more specific.
    kind_idx: usize,
    family: ResolverFamily,
}

struct Attempt {
    resolver: Token,
    behavior: Rc<dyn ResolverBehavior>,
    family: ResolverFamily,
    children: Vec<Token>,
    suitability: u32,
}

// ============================================================================
// Creation
// ============================================================================

pub(crate) fn create_request(
    mgr: &mut RequestManager,
    requester: Rc<dyn Requester>,
    payload: Requestable,
    strategy: AssigningStrategy,
) -> Result<Token, EngineError> {
    let requester_id = requester.id();
    mgr.requesters.insert(requester_id, requester);

    let kind = payload.kinds()[0].clone();
    let token = mgr
        .stores
        .insert_request_with(|t| RequestRecord::new(t, requester_id, payload, strategy));

    info!(request = %token, requester = %requester_id, %kind, "Request created");
    mgr.events.publish(EngineEvent::RequestCreated {
        request: token,
        requester: requester_id,
        kind,
        at: Utc::now(),
    });
    Ok(token)
}

// ============================================================================
// Assignment
// ============================================================================

pub(crate) fn assign_request(
    mgr: &mut RequestManager,
    request: Token,
    blacklist: &BTreeSet<Token>,
) -> Result<AssignOutcome, EngineError> {
    let mut visited = BTreeSet::new();
    assign_inner(mgr, request, blacklist, 0, &mut visited)
}

fn assign_inner(
    mgr: &mut RequestManager,
    request: Token,
    blacklist: &BTreeSet<Token>,
    depth: usize,
    visited: &mut BTreeSet<Token>,
) -> Result<AssignOutcome, EngineError> {
    let bound = mgr.config().max_assign_depth;
    if depth >= bound {
        return Err(EngineError::DepthExceeded(bound));
    }
    if !visited.insert(request) {
        return Err(EngineError::DependencyCycle(request));
    }

    mgr.update_request_state(request, RequestState::Assigning)?;

    let candidates = shortlist(mgr, request, blacklist)?;
    let strategy = mgr.stores.request(request)?.strategy();
    let attempt = match strategy {
        AssigningStrategy::PriorityBased => walk_priority_based(mgr, request, candidates)?,
        AssigningStrategy::FastestFirst => walk_fastest_first(mgr, request, candidates),
    };

    let Some(attempt) = attempt else {
        debug!(request = %request, "No resolver accepted the request");
        mgr.update_request_state(request, RequestState::Reported)?;
        return Ok(AssignOutcome::Unassigned);
    };

    commit_attempt(mgr, request, attempt, blacklist, depth, visited)
}

/// Shortlist resolvers registered for any kind in the request's chain,
/// broad-to-narrow, excluding blacklisted, mid-removal and detached entries.
/// Each resolver appears once, under its most specific matching kind.
fn shortlist(
    mgr: &RequestManager,
    request: Token,
    blacklist: &BTreeSet<Token>,
) -> Result<Vec<Candidate>, EngineError> {
    let record = mgr.stores.request(request)?;
    let kinds: Vec<_> = record.payload().kinds().to_vec();

    let mut seen: BTreeMap<Token, usize> = BTreeMap::new();
    let mut candidates = Vec::new();
    for (kind_idx, kind) in kinds.iter().enumerate() {
        for resolver in mgr.stores.candidates_for_kind(kind) {
            if blacklist.contains(resolver) {
                continue;
            }
            if seen.contains_key(resolver) {
                continue;
            }
            let entry = mgr.stores.resolver(*resolver)?;
            if entry.removing {
                continue;
            }
            let Some(behavior) = mgr.behavior(*resolver) else {
                // Detached after a restore; unusable until re-attached.
                continue;
            };
            seen.insert(*resolver, kind_idx);
            candidates.push(Candidate {
                resolver: *resolver,
                behavior,
                priority: entry.meta.priority,
                kind_idx,
                family: entry.meta.family.clone(),
            });
        }
    }
    Ok(candidates)
}

/// Coarse ordering by descending priority, more specific declared kind as
/// the tie-break, token order last so sweeps stay reproducible. The walk
/// then keeps refining within the winning resolver family by suitability.
fn walk_priority_based(
    mgr: &mut RequestManager,
    request: Token,
    mut candidates: Vec<Candidate>,
) -> Result<Option<Attempt>, EngineError> {
    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.kind_idx.cmp(&b.kind_idx))
            .then(a.resolver.cmp(&b.resolver))
    });

    let mut best: Option<Attempt> = None;
    for candidate in candidates {
        // Refinement bounds of the current best, copied out so the slot can
        // be replaced below.
        let current = best
            .as_ref()
            .map(|attempt| (attempt.family.clone(), attempt.suitability));

        match current {
            None => {
                if !candidate.behavior.can_resolve(mgr, request) {
                    continue;
                }
                if let Some(children) = candidate.behavior.attempt_resolve(mgr, request) {
                    let suitability = candidate.behavior.suitability(mgr, request);
                    best = Some(Attempt {
                        resolver: candidate.resolver,
                        behavior: candidate.behavior,
                        family: candidate.family,
                        children,
                        suitability,
                    });
                }
            }
            Some((best_family, best_suitability)) => {
                // Only keep comparing while the implementation family matches
                // the current best; the first family change ends the search.
                if candidate.family != best_family {
                    break;
                }
                let suitability = candidate.behavior.suitability(mgr, request);
                if suitability >= best_suitability {
                    continue;
                }
                if !candidate.behavior.can_resolve(mgr, request) {
                    continue;
                }
                if let Some(children) = candidate.behavior.attempt_resolve(mgr, request) {
                    // The superseded attempt's spawned requests must not leak.
                    if let Some(stale) = best.take() {
                        discard_tentative_children(mgr, &stale.children)?;
                    }
                    best = Some(Attempt {
                        resolver: candidate.resolver,
                        behavior: candidate.behavior,
                        family: candidate.family,
                        children,
                        suitability,
                    });
                }
            }
        }
    }
    Ok(best)
}

/// Suitability metric first, priority as the tie-break: the first successful
/// attempt in that order wins outright.
fn walk_fastest_first(
    mgr: &mut RequestManager,
    request: Token,
    candidates: Vec<Candidate>,
) -> Option<Attempt> {
    let mut measured: Vec<(u32, Candidate)> = candidates
        .into_iter()
        .map(|candidate| (candidate.behavior.suitability(mgr, request), candidate))
        .collect();
    measured.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(b.1.priority.cmp(&a.1.priority))
            .then(a.1.kind_idx.cmp(&b.1.kind_idx))
            .then(a.1.resolver.cmp(&b.1.resolver))
    });

    for (suitability, candidate) in measured {
        if !candidate.behavior.can_resolve(mgr, request) {
            continue;
        }
        if let Some(children) = candidate.behavior.attempt_resolve(mgr, request) {
            return Some(Attempt {
                resolver: candidate.resolver,
                behavior: candidate.behavior,
                family: candidate.family,
                children,
                suitability,
            });
        }
    }
    None
}

fn discard_tentative_children(
    mgr: &mut RequestManager,
    children: &[Token],
) -> Result<(), EngineError> {
    for child in children {
        cancel_subtree(mgr, *child)?;
    }
    Ok(())
}

fn commit_attempt(
    mgr: &mut RequestManager,
    request: Token,
    attempt: Attempt,
    blacklist: &BTreeSet<Token>,
    depth: usize,
    visited: &mut BTreeSet<Token>,
) -> Result<AssignOutcome, EngineError> {
    let resolver = attempt.resolver;
    mgr.stores.assign(resolver, request)?;
    info!(request = %request, resolver = %resolver, "Request assigned");
    mgr.events.publish(EngineEvent::RequestAssigned {
        request,
        resolver,
        at: Utc::now(),
    });
    attempt.behavior.on_request_assigned(mgr, request);

    for child in &attempt.children {
        mgr.stores.link_child(request, *child)?;
    }
    for child in &attempt.children {
        if !mgr.stores.has_request(*child) {
            continue;
        }
        if mgr.stores.request(*child)?.state().is_assignable() {
            assign_inner(mgr, *child, blacklist, depth + 1, visited)?;
        }
    }

    mgr.update_request_state(request, RequestState::InProgress)?;
    if !mgr.stores.request(request)?.has_children() {
        resolve_request(mgr, request)?;
    }
    Ok(AssignOutcome::Assigned { resolver })
}

// ============================================================================
// Reassignment
// ============================================================================

pub(crate) fn reassign_request(
    mgr: &mut RequestManager,
    request: Token,
    mut blacklist: BTreeSet<Token>,
) -> Result<AssignOutcome, EngineError> {
    let record = mgr.stores.request(request)?;
    if record.has_children() {
        return Err(RequestError::OpenChildren(request).into());
    }

    info!(request = %request, "Reassigning request");
    if let Some(old) = mgr.stores.resolver_for(request) {
        // Two-phase handover so the resolver can roll back its reservations.
        if let Some(behavior) = mgr.behavior(old) {
            behavior.on_assigned_request_being_cancelled(mgr, request);
        }
        mgr.stores.release(request);
        if let Some(behavior) = mgr.behavior(old) {
            behavior.on_assigned_request_cancelled(mgr, request);
        }
        blacklist.insert(old);
    }

    if mgr.stores.request(request)?.state() != RequestState::Reported {
        mgr.update_request_state(request, RequestState::Reported)?;
    }
    assign_request(mgr, request, &blacklist)
}

// ============================================================================
// Resolution & completion
// ============================================================================

/// Hand an assigned, childless request to its resolver for finalization.
pub(crate) fn resolve_request(mgr: &mut RequestManager, request: Token) -> Result<(), EngineError> {
    let record = mgr.stores.request(request)?;
    if record.has_children() {
        return Err(RequestError::OpenChildren(request).into());
    }
    let resolver = mgr
        .stores
        .resolver_for(request)
        .ok_or(RequestError::NotAssigned(request))?;
    let behavior = mgr.behavior_required(resolver)?;
    debug!(request = %request, resolver = %resolver, "Resolving request");
    behavior.resolve(mgr, request)
}

/// The resolver finished its primary work. Follow-up requests, if any, are
/// linked as children and assigned; the request sits in
/// `FollowupInProgress` until they all clear.
pub(crate) fn on_request_resolved(
    mgr: &mut RequestManager,
    request: Token,
) -> Result<(), EngineError> {
    let resolver = mgr
        .stores
        .resolver_for(request)
        .ok_or(RequestError::NotAssigned(request))?;
    let behavior = mgr.behavior_required(resolver)?;

    let followups = behavior.followups_for_completion(mgr, request);
    if followups.is_empty() {
        mgr.update_request_state(request, RequestState::Completed)?;
        return Ok(());
    }

    info!(request = %request, count = followups.len(), "Resolution spawned follow-up requests");
    for followup in &followups {
        mgr.stores.link_child(request, *followup)?;
    }
    mgr.update_request_state(request, RequestState::FollowupInProgress)?;

    let blacklist = BTreeSet::new();
    for followup in followups {
        if !mgr.stores.has_request(followup) {
            continue;
        }
        if mgr.stores.request(followup)?.state().is_assignable() {
            assign_request(mgr, followup, &blacklist)?;
        }
    }

    // Follow-ups may have completed synchronously during assignment.
    if mgr.stores.has_request(request) {
        let record = mgr.stores.request(request)?;
        if record.state() == RequestState::FollowupInProgress && !record.has_children() {
            mgr.update_request_state(request, RequestState::Completed)?;
        }
    }
    Ok(())
}

/// Completion: notify the requester, then propagate up the parent chain. A
/// completed child is rolled into its parent and purged; a completed root
/// waits for its requester to collect.
pub(crate) fn on_request_completed(
    mgr: &mut RequestManager,
    request: Token,
) -> Result<(), EngineError> {
    let record = mgr.stores.request(request)?;
    let requester_id = record.requester();
    let parent = record.parent();
    let deliveries = record.deliveries().to_vec();

    info!(request = %request, "Request completed");
    if let Some(resolver) = mgr.stores.release(request) {
        debug!(request = %request, resolver = %resolver, "Assignment closed on completion");
    }

    match mgr.requesters.get(&requester_id).cloned() {
        Some(requester) => requester.on_request_complete(request, &deliveries),
        None => {
            warn!(request = %request, requester = %requester_id, "Completed request has no live requester")
        }
    }

    let Some(parent) = parent else {
        return Ok(());
    };

    mgr.stores.unlink_child(parent, request)?;
    let rolled = mgr.stores.request_mut(request)?.take_deliveries();
    mgr.stores.request_mut(parent)?.extend_deliveries(rolled);
    purge_request(mgr, request)?;

    let parent_record = mgr.stores.request(parent)?;
    if !parent_record.has_children() {
        match parent_record.state() {
            RequestState::InProgress => resolve_request(mgr, parent)?,
            RequestState::FollowupInProgress => {
                mgr.update_request_state(parent, RequestState::Completed)?
            }
            // Mid-assignment or mid-resolution: the in-flight walk finishes
            // the promotion itself.
            _ => {}
        }
    }
    Ok(())
}

pub(crate) fn on_request_received(
    mgr: &mut RequestManager,
    request: Token,
) -> Result<(), EngineError> {
    debug!(request = %request, "Request received by requester");
    purge_request(mgr, request)
}

// ============================================================================
// Cancellation family
// ============================================================================

/// Direct cancellation: the whole dependency tree under the request is
/// cancelled depth-first, then the request itself. If the request was a
/// child, its parent is re-planned afterwards.
pub(crate) fn cancel_request(mgr: &mut RequestManager, request: Token) -> Result<(), EngineError> {
    if !mgr.stores.has_request(request) {
        return Err(StoreError::UnknownRequest(request).into());
    }
    info!(request = %request, "Cancelling request");

    cancel_children(mgr, request)?;

    if let Some(resolver) = mgr.stores.resolver_for(request) {
        if let Some(behavior) = mgr.behavior(resolver) {
            behavior.on_assigned_request_being_cancelled(mgr, request);
        }
    }
    mgr.update_request_state(request, RequestState::Cancelled)
}

/// Cancel a detached subtree root and everything under it. The caller has
/// already severed the link above `request` (or there never was one), so no
/// parent re-planning fires from in here.
pub(crate) fn cancel_subtree(mgr: &mut RequestManager, request: Token) -> Result<(), EngineError> {
    if !mgr.stores.has_request(request) {
        return Ok(());
    }
    cancel_children(mgr, request)?;

    if let Some(resolver) = mgr.stores.resolver_for(request) {
        if let Some(behavior) = mgr.behavior(resolver) {
            behavior.on_assigned_request_being_cancelled(mgr, request);
        }
    }
    mgr.update_request_state(request, RequestState::Cancelled)
}

/// Sever and cancel every child of `request`, children-before-self order.
fn cancel_children(mgr: &mut RequestManager, request: Token) -> Result<(), EngineError> {
    let children: Vec<Token> = mgr
        .stores
        .request(request)?
        .children()
        .iter()
        .copied()
        .collect();
    for child in children {
        if mgr.stores.has_request(child) {
            mgr.stores.unlink_child(request, child)?;
            cancel_subtree(mgr, child)?;
        }
    }
    Ok(())
}

/// Shared terminal processing for `Cancelled` and `Failed`: close out the
/// assignment, notify the requester, purge the record, and re-plan the
/// parent if the request was a child still wanted by one.
pub(crate) fn on_request_terminated(
    mgr: &mut RequestManager,
    request: Token,
) -> Result<(), EngineError> {
    let record = mgr.stores.request(request)?;
    let requester_id = record.requester();
    let parent = record.parent();

    if let Some(resolver) = mgr.stores.release(request) {
        if let Some(behavior) = mgr.behavior(resolver) {
            behavior.on_assigned_request_cancelled(mgr, request);
        }
    }
    if let Some(parent) = parent {
        mgr.stores.unlink_child(parent, request)?;
    }

    if let Some(requester) = mgr.requesters.get(&requester_id).cloned() {
        requester.on_request_cancelled(request);
    }
    purge_request(mgr, request)?;

    if let Some(parent) = parent {
        if mgr.stores.has_request(parent) {
            on_child_request_cancelled(mgr, parent)?;
        }
    }
    Ok(())
}

/// A child was cancelled out from under a parent that still wants its
/// result. The parent's plan is now invalid: partial results are discarded,
/// the remaining children cancelled, and the parent assigned from scratch.
pub(crate) fn on_child_request_cancelled(
    mgr: &mut RequestManager,
    parent: Token,
) -> Result<(), EngineError> {
    warn!(request = %parent, "Child request cancelled; re-planning parent");
    mgr.stores.request_mut(parent)?.clear_deliveries();
    cancel_children(mgr, parent)?;
    reassign_request(mgr, parent, BTreeSet::new())?;
    Ok(())
}

/// Forcibly supersede a request with a substitute result. Never-assigned
/// requests are silently dropped; assigned ones are driven through
/// `Completed` so the normal completion notification fires, with the
/// resolver told on both sides of the handover.
pub(crate) fn overrule_request(
    mgr: &mut RequestManager,
    request: Token,
    substitute: Option<Delivery>,
) -> Result<(), EngineError> {
    let record = mgr.stores.request(request)?;
    let state = record.state();
    let parent = record.parent();

    if mgr.stores.resolver_for(request).is_none()
        && matches!(
            state,
            RequestState::Created | RequestState::Assigning | RequestState::Reported
        )
    {
        debug!(request = %request, "Overruled before assignment; dropping");
        if let Some(parent) = parent {
            mgr.stores.unlink_child(parent, request)?;
        }
        return purge_request(mgr, request);
    }

    info!(request = %request, "Overruling request");
    cancel_children(mgr, request)?;

    if let Some(resolver) = mgr.stores.resolver_for(request) {
        if let Some(behavior) = mgr.behavior(resolver) {
            behavior.on_assigned_request_being_cancelled(mgr, request);
        }
    }
    if let Some(delivery) = substitute {
        mgr.stores.request_mut(request)?.push_delivery(delivery);
    }
    mgr.update_request_state(request, RequestState::Overruled)
}

/// Transition handler for `Overruled`: close the assignment, drive the
/// request through normal completion, then finalize the cancellation with
/// the resolver.
pub(crate) fn on_request_overruled(
    mgr: &mut RequestManager,
    request: Token,
) -> Result<(), EngineError> {
    let resolver = mgr.stores.release(request);
    mgr.update_request_state(request, RequestState::Completed)?;
    if let Some(resolver) = resolver {
        if let Some(behavior) = mgr.behavior(resolver) {
            behavior.on_assigned_request_cancelled(mgr, request);
        }
    }
    Ok(())
}

/// Cancel every open request attributed to a departing requester. Roots are
/// cancelled first so their subtrees go down with them; owned children of
/// foreign parents are cancelled directly, re-planning those parents.
pub(crate) fn remove_requester(
    mgr: &mut RequestManager,
    requester: RequesterId,
) -> Result<usize, EngineError> {
    if !mgr.requesters.contains_key(&requester) {
        return Err(EngineError::UnknownRequester(requester));
    }
    let owned: Vec<Token> = mgr
        .stores
        .request_tokens()
        .into_iter()
        .filter(|token| {
            mgr.stores
                .request(*token)
                .map(|record| record.requester() == requester)
                .unwrap_or(false)
        })
        .collect();

    let roots: Vec<Token> = owned
        .iter()
        .copied()
        .filter(|token| {
            let parent_owned = mgr
                .stores
                .request(*token)
                .ok()
                .and_then(|record| record.parent())
                .and_then(|parent| mgr.stores.request(parent).ok())
                .map(|parent| parent.requester() == requester)
                .unwrap_or(false);
            !parent_owned
        })
        .collect();

    let mut cancelled = 0;
    for token in roots {
        if mgr.stores.has_request(token) {
            cancel_request(mgr, token)?;
            cancelled += 1;
        }
    }
    // Anything left was a descendant of a cancelled root and is gone now.
    mgr.requesters.remove(&requester);
    info!(requester = %requester, cancelled, "Requester removed");
    Ok(cancelled)
}

/// Surface a request as failed past its retry budget. Same terminal path as
/// cancellation; the requester decides whether to re-issue.
pub(crate) fn fail_request(mgr: &mut RequestManager, request: Token) -> Result<(), EngineError> {
    if !mgr.stores.has_request(request) {
        return Ok(());
    }
    cancel_children(mgr, request)?;
    if let Some(resolver) = mgr.stores.resolver_for(request) {
        if let Some(behavior) = mgr.behavior(resolver) {
            behavior.on_assigned_request_being_cancelled(mgr, request);
        }
    }
    mgr.update_request_state(request, RequestState::Failed)
}

// ============================================================================
// Cleanup
// ============================================================================

/// Remove a request's identity record. Idempotent: a token that is already
/// gone is a no-op.
pub(crate) fn purge_request(mgr: &mut RequestManager, request: Token) -> Result<(), EngineError> {
    if !mgr.stores.has_request(request) {
        return Ok(());
    }
    mgr.stores.remove_request(request)?;
    debug!(request = %request, "Request purged");
    mgr.events.publish(EngineEvent::RequestPurged {
        request,
        at: Utc::now(),
    });
    Ok(())
}
