// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Request Manager (Application Service)
//!
//! The per-colony facade over the whole engine. It owns the four data
//! stores, the requester registry, the behavior registry and the event bus,
//! and it is the single authority that performs request state transitions:
//! every transition goes through [`RequestManager::update_request_state`],
//! which validates legality against the state machine and fans out exactly
//! one transition handler.
//!
//! One instance per colony, owned by the colony aggregate and passed by
//! reference to every operation. No process-wide state.
//!
//! # Engine Loop
//!
//! ```text
//! requester -> create_request ──> assign_request
//!                                   shortlist by kind, sort, walk, commit
//!                                   children linked + recursively assigned
//! resolver  -> update_request_state(Resolved)
//!                                   follow-ups linked + assigned
//! children drain ──> parent resolves / completes ──> requester notified
//! requester -> mark_request_received ──> record purged
//! ```

use crate::application::request_handler::{self, AssignOutcome};
use crate::application::resolver::{ResolverBehavior, ResolverProvider};
use crate::application::resolver_handler;
use crate::application::retry::RetryingResolver;
use crate::domain::colony::ColonyId;
use crate::domain::config::EngineConfig;
use crate::domain::events::EngineEvent;
use crate::domain::request::{
    AssigningStrategy, RequestError, RequestRecord, RequestState,
};
use crate::domain::requestable::{Delivery, Requestable, RequestableKind};
use crate::domain::requester::{ProviderId, Requester, RequesterId};
use crate::domain::resolver::{Location, ResolverEntry, ResolverMeta};
use crate::domain::token::Token;
use crate::infrastructure::event_bus::{EventBus, EventReceiver};
use crate::infrastructure::persistence::{PersistenceError, Snapshot};
use crate::infrastructure::stores::{DataStores, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Errors
// ============================================================================

/// Engine-level error surface. Contract violations are surfaced immediately
/// at the call site; domain resolution failure is not an error (requests
/// simply stay unassigned and are retried).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("requester {0} is not registered")]
    UnknownRequester(RequesterId),
    #[error("provider {0} is already registered")]
    ProviderAlreadyRegistered(ProviderId),
    #[error("provider {0} is not registered")]
    UnknownProvider(ProviderId),
    #[error("resolver {0} has no attached behavior")]
    DetachedResolver(Token),
    #[error("behavior for resolver {token} declares kind {declared} but the entry expects {expected}")]
    ReattachKindMismatch {
        token: Token,
        declared: RequestableKind,
        expected: RequestableKind,
    },
    #[error("assignment recursion exceeded the depth bound of {0}")]
    DepthExceeded(usize),
    #[error("request dependency cycle detected at {0}")]
    DependencyCycle(Token),
    #[error("request {0} still has live links or an assignment")]
    RequestStillLinked(Token),
}

/// Derived counters for dashboards and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestManagerStats {
    /// Requests still moving through the lifecycle.
    pub open_requests: usize,
    /// Requests currently committed to a resolver.
    pub assigned_requests: usize,
    /// Completed requests waiting for their requester to collect.
    pub awaiting_pickup: usize,
    pub resolvers: usize,
}

// ============================================================================
// Application Service: RequestManager
// ============================================================================

/// The per-colony request/resolver scheduling engine.
pub struct RequestManager {
    colony: ColonyId,
    config: EngineConfig,
    pub(crate) stores: DataStores,
    pub(crate) requesters: HashMap<RequesterId, Rc<dyn Requester>>,
    pub(crate) behaviors: HashMap<Token, Rc<dyn ResolverBehavior>>,
    pub(crate) providers: HashMap<ProviderId, Vec<Token>>,
    pub(crate) events: EventBus,
    retry: Rc<RetryingResolver>,
    retry_token: Token,
    needs_update: bool,
}

impl RequestManager {
    pub fn new(colony: ColonyId, config: EngineConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let mut stores = DataStores::new();
        let mut behaviors: HashMap<Token, Rc<dyn ResolverBehavior>> = HashMap::new();

        let retry = Rc::new(RetryingResolver::new(config.retry.clone()));
        let retry_meta = retry.meta();
        let retry_token = stores.register_resolver(ResolverEntry::new(retry_meta.clone()));
        behaviors.insert(retry_token, retry.clone());
        events.publish(EngineEvent::ResolverRegistered {
            resolver: retry_token,
            kind: retry_meta.kind,
            priority: retry_meta.priority,
            at: Utc::now(),
        });

        info!(%colony, "Request manager created");
        Self {
            colony,
            config,
            stores,
            requesters: HashMap::new(),
            behaviors,
            providers: HashMap::new(),
            events,
            retry,
            retry_token,
            needs_update: false,
        }
    }

    pub fn for_colony(colony: ColonyId) -> Self {
        Self::new(colony, EngineConfig::default())
    }

    // ========================================================================
    // Request lifecycle
    // ========================================================================

    /// Create a request without assigning it. The requester is registered
    /// under its id as a side effect.
    pub fn create_request(
        &mut self,
        requester: Rc<dyn Requester>,
        payload: Requestable,
        strategy: AssigningStrategy,
    ) -> Result<Token, EngineError> {
        request_handler::create_request(self, requester, payload, strategy)
    }

    /// Create a request and immediately run the assignment algorithm. An
    /// unassigned outcome is not an error: the request parks in `Reported`
    /// for the next colony-update sweep.
    pub fn create_and_assign_request(
        &mut self,
        requester: Rc<dyn Requester>,
        payload: Requestable,
        strategy: AssigningStrategy,
    ) -> Result<Token, EngineError> {
        let token = request_handler::create_request(self, requester, payload, strategy)?;
        request_handler::assign_request(self, token, &BTreeSet::new())?;
        Ok(token)
    }

    pub fn assign_request(&mut self, request: Token) -> Result<AssignOutcome, EngineError> {
        request_handler::assign_request(self, request, &BTreeSet::new())
    }

    /// Assignment with a resolver blacklist, used to avoid reselecting a
    /// resolver that just failed or is being removed.
    pub fn assign_request_excluding(
        &mut self,
        request: Token,
        blacklist: &BTreeSet<Token>,
    ) -> Result<AssignOutcome, EngineError> {
        request_handler::assign_request(self, request, blacklist)
    }

    /// Undo the current resolver's commitment and retry against a different
    /// candidate set. Only legal while the request has no children; the old
    /// resolver is excluded implicitly.
    pub fn reassign_request(
        &mut self,
        request: Token,
        blacklist: BTreeSet<Token>,
    ) -> Result<AssignOutcome, EngineError> {
        request_handler::reassign_request(self, request, blacklist)
    }

    /// Finalize an assigned, childless request by handing it to its resolver.
    pub fn resolve_request(&mut self, request: Token) -> Result<(), EngineError> {
        request_handler::resolve_request(self, request)
    }

    /// The single transition entry point. Validates legality, mutates the
    /// stored state, publishes the transition, and dispatches exactly one
    /// transition handler.
    pub fn update_request_state(
        &mut self,
        request: Token,
        to: RequestState,
    ) -> Result<(), EngineError> {
        let record = self.stores.request(request)?;
        let from = record.state();
        if !from.can_move_to(to) {
            return Err(RequestError::IllegalTransition {
                token: request,
                from,
                to,
            }
            .into());
        }
        if to == RequestState::Resolved && record.has_children() {
            return Err(RequestError::OpenChildren(request).into());
        }

        self.stores.request_mut(request)?.set_state(to);
        debug!(request = %request, %from, %to, "Request state changed");
        self.events.publish(EngineEvent::RequestStateChanged {
            request,
            from,
            to,
            at: Utc::now(),
        });

        match to {
            RequestState::Resolved => request_handler::on_request_resolved(self, request)?,
            RequestState::Completed => request_handler::on_request_completed(self, request)?,
            RequestState::Overruled => request_handler::on_request_overruled(self, request)?,
            RequestState::Cancelled | RequestState::Failed => {
                request_handler::on_request_terminated(self, request)?
            }
            RequestState::Received => request_handler::on_request_received(self, request)?,
            _ => {}
        }
        Ok(())
    }

    /// Contribute a partial result to a request.
    pub fn record_delivery(
        &mut self,
        request: Token,
        delivery: Delivery,
    ) -> Result<(), EngineError> {
        self.stores.request_mut(request)?.push_delivery(delivery);
        Ok(())
    }

    /// Requester acknowledgment that a completed payload was collected; the
    /// record is purged afterwards.
    pub fn mark_request_received(&mut self, request: Token) -> Result<(), EngineError> {
        self.update_request_state(request, RequestState::Received)
    }

    /// Drop a fully detached record. A no-op if the token is already gone;
    /// an error if the record still has links or an assignment.
    pub fn clean_request(&mut self, request: Token) -> Result<(), EngineError> {
        if !self.stores.has_request(request) {
            return Ok(());
        }
        let record = self.stores.request(request)?;
        if record.parent().is_some()
            || record.has_children()
            || self.stores.resolver_for(request).is_some()
        {
            return Err(EngineError::RequestStillLinked(request));
        }
        request_handler::purge_request(self, request)
    }

    /// Forcibly supply a substitute result for a request, bypassing its
    /// assigned resolver. A request that was never assigned is silently
    /// dropped instead.
    pub fn overrule_request(
        &mut self,
        request: Token,
        substitute: Option<Delivery>,
    ) -> Result<(), EngineError> {
        request_handler::overrule_request(self, request, substitute)
    }

    /// Cancel a request and, depth-first, the entire dependency tree under
    /// it.
    pub fn cancel_request(&mut self, request: Token) -> Result<(), EngineError> {
        request_handler::cancel_request(self, request)
    }

    /// Cancel every open request attributed to `requester` and drop it from
    /// the registry. Returns how many requests were cancelled.
    pub fn remove_requester(&mut self, requester: RequesterId) -> Result<usize, EngineError> {
        request_handler::remove_requester(self, requester)
    }

    // ========================================================================
    // Resolver registry
    // ========================================================================

    pub fn register_resolver(
        &mut self,
        behavior: Rc<dyn ResolverBehavior>,
    ) -> Result<Token, EngineError> {
        resolver_handler::register_resolver(self, behavior)
    }

    /// Deregister a resolver. Every request currently assigned to it is
    /// force-cancelled first, so no assignment record can outlive it.
    pub fn remove_resolver(&mut self, resolver: Token) -> Result<(), EngineError> {
        resolver_handler::remove_resolver(self, resolver)
    }

    pub fn register_provider(
        &mut self,
        provider: &dyn ResolverProvider,
    ) -> Result<Vec<Token>, EngineError> {
        resolver_handler::register_provider(self, provider)
    }

    pub fn deregister_provider(&mut self, provider: ProviderId) -> Result<(), EngineError> {
        resolver_handler::deregister_provider(self, provider)
    }

    /// Re-attach a live behavior to a restored resolver entry.
    pub fn reattach_resolver(
        &mut self,
        resolver: Token,
        behavior: Rc<dyn ResolverBehavior>,
    ) -> Result<(), EngineError> {
        resolver_handler::reattach_resolver(self, resolver, behavior)
    }

    // ========================================================================
    // Sweeps
    // ========================================================================

    /// Re-attempt assignment for every assignable request matching the
    /// predicate. Returns how many found a resolver this sweep.
    pub fn on_colony_update(
        &mut self,
        predicate: impl Fn(&RequestRecord) -> bool,
    ) -> Result<usize, EngineError> {
        resolver_handler::on_colony_update(self, &predicate)
    }

    /// Drive the built-in retrying resolver one scheduler tick forward.
    pub fn tick(&mut self) -> Result<(), EngineError> {
        let retry = self.retry.clone();
        let own = self.retry_token;
        retry.tick(self, own)
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub fn colony(&self) -> ColonyId {
        self.colony
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn request_for_token(&self, request: Token) -> Option<&RequestRecord> {
        self.stores.request(request).ok()
    }

    pub fn resolver_for_token(&self, resolver: Token) -> Option<&ResolverMeta> {
        self.stores.resolver(resolver).ok().map(|entry| &entry.meta)
    }

    pub fn resolver_for_request(&self, request: Token) -> Option<Token> {
        self.stores.resolver_for(request)
    }

    pub fn requests_for_resolver(&self, resolver: Token) -> Vec<Token> {
        self.stores.assignments_for(resolver)
    }

    pub fn request_tokens(&self) -> Vec<Token> {
        self.stores.request_tokens()
    }

    pub fn resolver_tokens(&self) -> Vec<Token> {
        self.stores.resolver_tokens()
    }

    /// Token of the built-in retrying resolver.
    pub fn retry_resolver(&self) -> Token {
        self.retry_token
    }

    pub fn requester_ref(&self, request: Token) -> Option<Rc<dyn Requester>> {
        let record = self.stores.request(request).ok()?;
        self.requesters.get(&record.requester()).cloned()
    }

    pub fn requester_location_for(&self, request: Token) -> Option<Location> {
        self.requester_ref(request)
            .map(|requester| requester.location())
    }

    pub fn open_request_count(&self) -> usize {
        self.stores
            .request_tokens()
            .iter()
            .filter(|token| {
                self.stores
                    .request(**token)
                    .map(|r| r.state().is_open())
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn stats(&self) -> RequestManagerStats {
        let mut open_requests = 0;
        let mut awaiting_pickup = 0;
        for token in self.stores.request_tokens() {
            if let Ok(record) = self.stores.request(token) {
                match record.state() {
                    RequestState::Completed => awaiting_pickup += 1,
                    state if state.is_open() => open_requests += 1,
                    _ => {}
                }
            }
        }
        RequestManagerStats {
            open_requests,
            assigned_requests: self.stores.assigned_request_count(),
            awaiting_pickup,
            resolvers: self.stores.resolver_count(),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    // ========================================================================
    // Persistence & wire sync
    // ========================================================================

    /// Whether the last restore was rejected and the colony must rebuild
    /// (re-register providers, re-issue requests) instead of recovering.
    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self.colony, &self.stores)
    }

    /// Replace all engine state from a snapshot. Behaviors are detached
    /// afterwards; providers re-attach theirs via
    /// [`RequestManager::reattach_resolver`]. A rejected snapshot resets the
    /// manager and flags it as needing a rebuild.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), EngineError> {
        let colony = snapshot.colony;
        match snapshot.apply() {
            Ok(stores) => {
                self.stores = stores;
                self.colony = colony;
                self.behaviors.clear();
                self.providers.clear();
                self.reattach_retry();
                self.needs_update = false;
                info!(colony = %self.colony, "Engine state restored from snapshot");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Snapshot rejected; resetting engine state");
                self.reset();
                self.needs_update = true;
                Err(e.into())
            }
        }
    }

    /// Binary wire encoding of the current state, byte-symmetric with
    /// [`RequestManager::deserialize_from_slice`].
    pub fn serialize_to_vec(&self) -> Result<Vec<u8>, EngineError> {
        Ok(self.snapshot().to_bytes()?)
    }

    pub fn deserialize_from_slice(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        match Snapshot::from_bytes(bytes) {
            Ok(snapshot) => self.restore(snapshot),
            Err(e) => {
                warn!(error = %e, "Wire payload rejected; resetting engine state");
                self.reset();
                self.needs_update = true;
                Err(e.into())
            }
        }
    }

    /// Wipe all engine state and start over with a fresh built-in retry
    /// resolver. The reset-and-rebuild path; there is no partial recovery.
    pub fn reset(&mut self) {
        self.stores.clear();
        self.requesters.clear();
        self.behaviors.clear();
        self.providers.clear();
        self.register_retry();
        self.needs_update = false;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn register_retry(&mut self) {
        let meta = self.retry.meta();
        let token = self
            .stores
            .register_resolver(ResolverEntry::new(meta.clone()));
        self.behaviors.insert(token, self.retry.clone());
        self.retry_token = token;
        self.events.publish(EngineEvent::ResolverRegistered {
            resolver: token,
            kind: meta.kind,
            priority: meta.priority,
            at: Utc::now(),
        });
    }

    /// After a restore the retry resolver's entry may already be in the
    /// stores; re-attach our live behavior to it rather than registering a
    /// second one.
    fn reattach_retry(&mut self) {
        let family = self.retry.meta().family;
        let existing = self
            .stores
            .resolver_tokens()
            .into_iter()
            .find(|token| {
                self.stores
                    .resolver(*token)
                    .map(|entry| entry.meta.family == family)
                    .unwrap_or(false)
            });
        match existing {
            Some(token) => {
                self.behaviors.insert(token, self.retry.clone());
                self.retry_token = token;
            }
            None => self.register_retry(),
        }
    }

    pub(crate) fn behavior(&self, resolver: Token) -> Option<Rc<dyn ResolverBehavior>> {
        self.behaviors.get(&resolver).cloned()
    }

    pub(crate) fn behavior_required(
        &self,
        resolver: Token,
    ) -> Result<Rc<dyn ResolverBehavior>, EngineError> {
        self.behavior(resolver)
            .ok_or(EngineError::DetachedResolver(resolver))
    }
}
