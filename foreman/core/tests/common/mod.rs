// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared test doubles: a recording requester, a configurable resolver and
//! payload/graph helpers.

#![allow(dead_code)]

use foreman_core::{
    AssigningStrategy, ColonyId, Delivery, EngineConfig, EngineError, Location, RequestManager,
    RequestState, Requestable, RequestableKind, Requester, RequesterId, ResolverBehavior,
    ResolverFamily, ResolverMeta, Token,
};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

pub fn manager() -> RequestManager {
    RequestManager::for_colony(ColonyId::new())
}

pub fn manager_with(config: EngineConfig) -> RequestManager {
    RequestManager::new(ColonyId::new(), config)
}

// ============================================================================
// Payloads
// ============================================================================

pub fn payload(kinds: &[&'static str], body: serde_json::Value) -> Requestable {
    Requestable::new(
        kinds.iter().map(|k| RequestableKind::from_static(k)).collect(),
        true,
        body,
    )
    .expect("test payload")
}

pub fn stack_payload(count: u32) -> Requestable {
    payload(
        &["stone_stack", "stack", "deliverable"],
        json!({"item": "stone", "count": count}),
    )
}

pub fn mid_payload() -> Requestable {
    payload(&["mid"], json!({"step": "intermediate"}))
}

pub fn leaf_payload() -> Requestable {
    payload(&["leaf"], json!({"step": "leaf"}))
}

pub fn retryable_payload() -> Requestable {
    payload(&["tool", "retryable"], json!({"tool": "pickaxe"}))
}

// ============================================================================
// Mock requester
// ============================================================================

pub struct TestRequester {
    id: RequesterId,
    location: Location,
    pub completed: RefCell<Vec<(Token, Vec<Delivery>)>>,
    pub cancelled: RefCell<Vec<Token>>,
}

impl TestRequester {
    pub fn new() -> Rc<Self> {
        Self::at(Location::ORIGIN)
    }

    pub fn at(location: Location) -> Rc<Self> {
        Rc::new(Self {
            id: RequesterId::new(),
            location,
            completed: RefCell::new(Vec::new()),
            cancelled: RefCell::new(Vec::new()),
        })
    }

    pub fn completed_tokens(&self) -> Vec<Token> {
        self.completed.borrow().iter().map(|(t, _)| *t).collect()
    }

    pub fn deliveries_for(&self, request: Token) -> Option<Vec<Delivery>> {
        self.completed
            .borrow()
            .iter()
            .find(|(t, _)| *t == request)
            .map(|(_, d)| d.clone())
    }

    pub fn cancelled_tokens(&self) -> Vec<Token> {
        self.cancelled.borrow().clone()
    }
}

impl Requester for TestRequester {
    fn id(&self) -> RequesterId {
        self.id
    }

    fn location(&self) -> Location {
        self.location
    }

    fn on_request_complete(&self, request: Token, deliveries: &[Delivery]) {
        self.completed
            .borrow_mut()
            .push((request, deliveries.to_vec()));
    }

    fn on_request_cancelled(&self, request: Token) {
        self.cancelled.borrow_mut().push(request);
    }
}

// ============================================================================
// Mock resolver
// ============================================================================

/// Configurable resolver double. By default it accepts everything for its
/// kind and resolves immediately; builder methods turn off either half.
pub struct TestResolver {
    priority: i32,
    kind: RequestableKind,
    family: ResolverFamily,
    location: Location,
    accepts: Cell<bool>,
    declines_attempts: Cell<bool>,
    auto_resolve: bool,
    suitability_override: Cell<Option<u32>>,
    child_payloads: RefCell<Vec<Requestable>>,
    followup_payloads: RefCell<Vec<Requestable>>,
    pub attempts: Cell<u32>,
    pub resolved: RefCell<Vec<Token>>,
    pub assigned: RefCell<Vec<Token>>,
    pub being_cancelled: RefCell<Vec<Token>>,
    pub cancelled: RefCell<Vec<Token>>,
}

impl TestResolver {
    pub fn for_kind(kind: &'static str) -> Self {
        Self {
            priority: 0,
            kind: RequestableKind::from_static(kind),
            family: ResolverFamily::from_static("test"),
            location: Location::ORIGIN,
            accepts: Cell::new(true),
            declines_attempts: Cell::new(false),
            auto_resolve: true,
            suitability_override: Cell::new(None),
            child_payloads: RefCell::new(Vec::new()),
            followup_payloads: RefCell::new(Vec::new()),
            attempts: Cell::new(0),
            resolved: RefCell::new(Vec::new()),
            assigned: RefCell::new(Vec::new()),
            being_cancelled: RefCell::new(Vec::new()),
            cancelled: RefCell::new(Vec::new()),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_family(mut self, family: &'static str) -> Self {
        self.family = ResolverFamily::from_static(family);
        self
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn with_suitability(self, suitability: u32) -> Self {
        self.suitability_override.set(Some(suitability));
        self
    }

    /// Each attempt spawns these child requests (drained all at once).
    pub fn with_child(self, payload: Requestable) -> Self {
        self.child_payloads.borrow_mut().push(payload);
        self
    }

    /// Resolution generates these follow-up requests (drained all at once).
    pub fn with_followup(self, payload: Requestable) -> Self {
        self.followup_payloads.borrow_mut().push(payload);
        self
    }

    /// `resolve` parks instead of driving to `Resolved`; the test drives the
    /// transition itself.
    pub fn manual(mut self) -> Self {
        self.auto_resolve = false;
        self
    }

    /// Fails the cheap pre-check.
    pub fn refusing(self) -> Self {
        self.accepts.set(false);
        self
    }

    /// Passes the pre-check but every attempt comes back empty-handed.
    pub fn declining(self) -> Self {
        self.declines_attempts.set(true);
        self
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.get()
    }
}

impl ResolverBehavior for TestResolver {
    fn meta(&self) -> ResolverMeta {
        ResolverMeta {
            priority: self.priority,
            kind: self.kind.clone(),
            location: self.location,
            family: self.family.clone(),
        }
    }

    fn can_resolve(&self, _manager: &RequestManager, _request: Token) -> bool {
        self.accepts.get()
    }

    fn attempt_resolve(&self, manager: &mut RequestManager, request: Token) -> Option<Vec<Token>> {
        self.attempts.set(self.attempts.get() + 1);
        if self.declines_attempts.get() {
            return None;
        }
        let requester = manager.requester_ref(request)?;
        let payloads: Vec<Requestable> = self.child_payloads.borrow_mut().drain(..).collect();
        let mut children = Vec::new();
        for payload in payloads {
            let child = manager
                .create_request(requester.clone(), payload, AssigningStrategy::PriorityBased)
                .expect("child request");
            children.push(child);
        }
        Some(children)
    }

    fn resolve(&self, manager: &mut RequestManager, request: Token) -> Result<(), EngineError> {
        self.resolved.borrow_mut().push(request);
        if self.auto_resolve {
            manager.record_delivery(
                request,
                Delivery {
                    source: None,
                    body: json!({"by": self.family.as_str()}),
                },
            )?;
            manager.update_request_state(request, RequestState::Resolved)?;
        }
        Ok(())
    }

    fn followups_for_completion(&self, manager: &mut RequestManager, request: Token) -> Vec<Token> {
        let payloads: Vec<Requestable> = self.followup_payloads.borrow_mut().drain(..).collect();
        let Some(requester) = manager.requester_ref(request) else {
            return Vec::new();
        };
        payloads
            .into_iter()
            .map(|payload| {
                manager
                    .create_request(requester.clone(), payload, AssigningStrategy::PriorityBased)
                    .expect("followup request")
            })
            .collect()
    }

    fn on_request_assigned(&self, _manager: &mut RequestManager, request: Token) {
        self.assigned.borrow_mut().push(request);
    }

    fn on_assigned_request_being_cancelled(&self, _manager: &mut RequestManager, request: Token) {
        self.being_cancelled.borrow_mut().push(request);
    }

    fn on_assigned_request_cancelled(&self, _manager: &mut RequestManager, request: Token) {
        self.cancelled.borrow_mut().push(request);
    }

    fn suitability(&self, manager: &RequestManager, request: Token) -> u32 {
        match self.suitability_override.get() {
            Some(value) => value,
            None => manager
                .requester_location_for(request)
                .map(|location| self.location.distance_to(&location))
                .unwrap_or(u32::MAX),
        }
    }
}

// ============================================================================
// Invariant helpers
// ============================================================================

/// Parent/child symmetry plus acyclicity over the whole live token graph.
pub fn assert_token_graph_consistent(manager: &RequestManager) {
    for token in manager.request_tokens() {
        let record = manager.request_for_token(token).expect("live token");
        if let Some(parent) = record.parent() {
            let parent_record = manager
                .request_for_token(parent)
                .expect("dangling parent token");
            assert!(
                parent_record.children().contains(&token),
                "parent {parent} does not list child {token}"
            );
        }
        for child in record.children() {
            let child_record = manager
                .request_for_token(*child)
                .expect("dangling child token");
            assert_eq!(
                child_record.parent(),
                Some(token),
                "child {child} does not point back at {token}"
            );
        }

        let mut seen = BTreeSet::new();
        seen.insert(token);
        let mut cursor = record.parent();
        while let Some(ancestor) = cursor {
            assert!(seen.insert(ancestor), "cycle in request graph at {ancestor}");
            cursor = manager
                .request_for_token(ancestor)
                .expect("live ancestor")
                .parent();
        }
    }
}
