// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resolver Behavior Contract
//!
//! The service trait every provider variant implements: warehouses, crafting
//! chains, player mailboxes, the built-in retrying resolver. Behaviors are
//! registered behind `Rc<dyn ResolverBehavior>` and dispatched by token
//! lookup; the engine never holds a mutable reference into one while calling
//! another.
//!
//! The engine is single-threaded and cooperative: every method runs to
//! completion on the colony tick thread, and cancellation hooks only fire
//! before assignment or after a behavior has returned control.

use crate::application::manager::{EngineError, RequestManager};
use crate::domain::requester::ProviderId;
use crate::domain::resolver::ResolverMeta;
use crate::domain::token::Token;
use std::rc::Rc;

/// Something capable of attempting to fulfill a class of requestables.
pub trait ResolverBehavior {
    /// Metadata snapshot: priority, declared kind, location, family tag.
    /// Captured once at registration; keep it stable for a registered
    /// resolver's lifetime.
    fn meta(&self) -> ResolverMeta;

    /// Cheap pre-check before the real attempt.
    fn can_resolve(&self, manager: &RequestManager, request: Token) -> bool;

    /// Do the real work. `Some(children)` signals success, with the tokens of
    /// any child requests created along the way (possibly empty). `None`
    /// signals this resolver cannot actually do it despite passing the
    /// pre-check.
    fn attempt_resolve(&self, manager: &mut RequestManager, request: Token) -> Option<Vec<Token>>;

    /// Finalize a request this resolver is assigned to, once it has no open
    /// children. The behavior drives the request to `Resolved` through the
    /// manager when its work is actually done; that may be immediately, or
    /// ticks later.
    fn resolve(&self, manager: &mut RequestManager, request: Token) -> Result<(), EngineError>;

    /// Secondary requests generated only once the primary resolution
    /// succeeded (a return trip, a restock). Returned tokens are linked as
    /// children of `request` and assigned before it may complete.
    fn followups_for_completion(
        &self,
        _manager: &mut RequestManager,
        _request: Token,
    ) -> Vec<Token> {
        Vec::new()
    }

    /// The request was committed to this resolver.
    fn on_request_assigned(&self, _manager: &mut RequestManager, _request: Token) {}

    /// First phase of losing a request: roll back reservations that must not
    /// outlive the commitment.
    fn on_assigned_request_being_cancelled(&self, _manager: &mut RequestManager, _request: Token) {}

    /// Second phase: the loss is final and the assignment record is gone.
    fn on_assigned_request_cancelled(&self, _manager: &mut RequestManager, _request: Token) {}

    /// Fine-grained ranking among resolvers of the same priority class;
    /// lower is better. Defaults to the distance between this resolver and
    /// the requester.
    fn suitability(&self, manager: &RequestManager, request: Token) -> u32 {
        manager
            .requester_location_for(request)
            .map(|location| self.meta().location.distance_to(&location))
            .unwrap_or(u32::MAX)
    }
}

/// A unit of resolver registration: a building or other provider exposing
/// zero or more resolvers, registered and deregistered together.
pub trait ResolverProvider {
    fn id(&self) -> ProviderId;
    fn resolvers(&self) -> Vec<Rc<dyn ResolverBehavior>>;
}
