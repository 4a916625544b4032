// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the assignment algorithm: candidate shortlisting,
//! priority and specificity ordering, the same-family suitability walk, the
//! fastest-first strategy, and blacklisting.

mod common;

use common::*;
use foreman_core::{AssignOutcome, AssigningStrategy, Location, RequestState};
use std::collections::BTreeSet;
use std::rc::Rc;

#[test]
fn test_unassignable_request_parks_in_reported() {
    // No resolver registered for "stack" at all.
    let mut manager = manager();
    let requester = TestRequester::new();

    let request = manager
        .create_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();
    let outcome = manager.assign_request(request).unwrap();

    assert_eq!(outcome, AssignOutcome::Unassigned);
    assert_eq!(
        manager.request_for_token(request).unwrap().state(),
        RequestState::Reported
    );
    assert!(requester.completed_tokens().is_empty());
}

#[test]
fn test_higher_priority_resolver_wins_regardless_of_registration_order() {
    let mut manager = manager();
    let requester = TestRequester::new();

    let low = Rc::new(
        TestResolver::for_kind("stack")
            .with_priority(5)
            .with_family("slow_crafting"),
    );
    let high = Rc::new(
        TestResolver::for_kind("stack")
            .with_priority(10)
            .with_family("warehouse"),
    );
    manager.register_resolver(low.clone()).unwrap();
    let high_token = manager.register_resolver(high.clone()).unwrap();

    let request = manager
        .create_and_assign_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();

    assert_eq!(high.attempt_count(), 1);
    assert_eq!(low.attempt_count(), 0);
    assert_eq!(high.assigned.borrow().as_slice(), &[request]);
    // Completed synchronously by the auto-resolving double.
    assert_eq!(requester.completed_tokens(), vec![request]);
    assert!(manager.requests_for_resolver(high_token).is_empty());
}

#[test]
fn test_more_specific_kind_breaks_priority_ties() {
    let mut manager = manager();
    let requester = TestRequester::new();

    // Same priority; one declared for the broadest kind in the chain, one
    // for the most specific. Registration order favors the broad one.
    let broad = Rc::new(TestResolver::for_kind("deliverable").with_family("broad"));
    let specific = Rc::new(TestResolver::for_kind("stone_stack").with_family("specific"));
    manager.register_resolver(broad.clone()).unwrap();
    manager.register_resolver(specific.clone()).unwrap();

    manager
        .create_and_assign_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();

    assert_eq!(specific.attempt_count(), 1);
    assert_eq!(broad.attempt_count(), 0);
}

#[test]
fn test_same_family_walk_keeps_best_suitability() {
    let mut manager = manager();
    let requester = TestRequester::new();

    let far = Rc::new(
        TestResolver::for_kind("stack")
            .with_family("warehouse")
            .with_suitability(9),
    );
    let near = Rc::new(
        TestResolver::for_kind("stack")
            .with_family("warehouse")
            .with_suitability(5),
    );
    let worse = Rc::new(
        TestResolver::for_kind("stack")
            .with_family("warehouse")
            .with_suitability(7),
    );
    manager.register_resolver(far.clone()).unwrap();
    let near_token = manager.register_resolver(near.clone()).unwrap();
    manager.register_resolver(worse.clone()).unwrap();

    let requester_rc = requester.clone();
    let request = manager
        .create_request(
            requester_rc,
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();
    let outcome = manager.assign_request(request).unwrap();

    // First eligible attempt, then the strictly-better sibling supersedes
    // it; the third is not strictly better than the new best.
    assert_eq!(
        outcome,
        AssignOutcome::Assigned {
            resolver: near_token
        }
    );
    assert_eq!(far.attempt_count(), 1);
    assert_eq!(near.attempt_count(), 1);
    assert_eq!(worse.attempt_count(), 0);
}

#[test]
fn test_walk_stops_at_the_first_family_change() {
    let mut manager = manager();
    let requester = TestRequester::new();

    let warehouse = Rc::new(
        TestResolver::for_kind("stack")
            .with_family("warehouse")
            .with_suitability(9),
    );
    // Better metric, different family: never consulted once a warehouse won.
    let courier = Rc::new(
        TestResolver::for_kind("stack")
            .with_family("courier")
            .with_suitability(1),
    );
    let warehouse_token = manager.register_resolver(warehouse.clone()).unwrap();
    manager.register_resolver(courier.clone()).unwrap();

    let request = manager
        .create_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();
    let outcome = manager.assign_request(request).unwrap();

    assert_eq!(
        outcome,
        AssignOutcome::Assigned {
            resolver: warehouse_token
        }
    );
    assert_eq!(courier.attempt_count(), 0);
}

#[test]
fn test_failed_precheck_falls_through_to_the_next_family() {
    let mut manager = manager();
    let requester = TestRequester::new();

    let refusing = Rc::new(
        TestResolver::for_kind("stack")
            .with_priority(10)
            .with_family("warehouse")
            .refusing(),
    );
    let fallback = Rc::new(
        TestResolver::for_kind("stack")
            .with_priority(1)
            .with_family("crafting"),
    );
    manager.register_resolver(refusing.clone()).unwrap();
    let fallback_token = manager.register_resolver(fallback.clone()).unwrap();

    let request = manager
        .create_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();
    let outcome = manager.assign_request(request).unwrap();

    assert_eq!(
        outcome,
        AssignOutcome::Assigned {
            resolver: fallback_token
        }
    );
    assert_eq!(refusing.attempt_count(), 0);
    assert_eq!(fallback.attempt_count(), 1);
}

#[test]
fn test_empty_handed_attempt_falls_through_too() {
    let mut manager = manager();
    let requester = TestRequester::new();

    // Passes the pre-check, then comes back empty: its backing inventory is
    // not what the pre-check promised.
    let declining = Rc::new(
        TestResolver::for_kind("stack")
            .with_priority(10)
            .with_family("warehouse")
            .declining(),
    );
    let fallback = Rc::new(
        TestResolver::for_kind("stack")
            .with_priority(1)
            .with_family("crafting"),
    );
    manager.register_resolver(declining.clone()).unwrap();
    let fallback_token = manager.register_resolver(fallback.clone()).unwrap();

    let request = manager
        .create_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();
    let outcome = manager.assign_request(request).unwrap();

    assert_eq!(declining.attempt_count(), 1);
    assert_eq!(
        outcome,
        AssignOutcome::Assigned {
            resolver: fallback_token
        }
    );
}

#[test]
fn test_blacklisted_resolver_is_never_consulted() {
    let mut manager = manager();
    let requester = TestRequester::new();

    let only = Rc::new(TestResolver::for_kind("stack"));
    let token = manager.register_resolver(only.clone()).unwrap();

    let request = manager
        .create_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();

    let mut blacklist = BTreeSet::new();
    blacklist.insert(token);
    let outcome = manager
        .assign_request_excluding(request, &blacklist)
        .unwrap();

    assert_eq!(outcome, AssignOutcome::Unassigned);
    assert_eq!(only.attempt_count(), 0);
}

#[test]
fn test_fastest_first_prefers_the_nearer_resolver() {
    let mut manager = manager();
    let requester = TestRequester::at(Location::new(0, 64, 0));

    // Priority says warehouse; distance says courier.
    let far_but_important = Rc::new(
        TestResolver::for_kind("stack")
            .with_priority(10)
            .with_family("warehouse")
            .at(Location::new(50, 64, 0)),
    );
    let near = Rc::new(
        TestResolver::for_kind("stack")
            .with_priority(1)
            .with_family("courier")
            .at(Location::new(2, 64, 0)),
    );
    manager.register_resolver(far_but_important.clone()).unwrap();
    let near_token = manager.register_resolver(near.clone()).unwrap();

    let request = manager
        .create_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::FastestFirst,
        )
        .unwrap();
    let outcome = manager.assign_request(request).unwrap();

    assert_eq!(
        outcome,
        AssignOutcome::Assigned {
            resolver: near_token
        }
    );
    assert_eq!(far_but_important.attempt_count(), 0);
}

#[test]
fn test_runaway_child_recursion_hits_the_depth_bound() {
    use foreman_core::{
        Delivery, EngineConfig, EngineError, RequestManager, RequestableKind, Requestable,
        ResolverBehavior, ResolverMeta, ResolverFamily, Token,
    };
    use serde_json::json;

    // Pathological provider: every attempt spawns another request of the
    // same kind, so assignment would recurse forever without the bound.
    struct BottomlessCrafter;

    impl ResolverBehavior for BottomlessCrafter {
        fn meta(&self) -> ResolverMeta {
            ResolverMeta {
                priority: 0,
                kind: RequestableKind::from_static("stack"),
                location: Location::ORIGIN,
                family: ResolverFamily::from_static("bottomless"),
            }
        }

        fn can_resolve(&self, _manager: &RequestManager, _request: Token) -> bool {
            true
        }

        fn attempt_resolve(
            &self,
            manager: &mut RequestManager,
            request: Token,
        ) -> Option<Vec<Token>> {
            let requester = manager.requester_ref(request)?;
            let payload = Requestable::new(
                vec![RequestableKind::from_static("stack")],
                true,
                json!({"nested": true}),
            )
            .ok()?;
            let child = manager
                .create_request(requester, payload, AssigningStrategy::PriorityBased)
                .ok()?;
            Some(vec![child])
        }

        fn resolve(
            &self,
            manager: &mut RequestManager,
            request: Token,
        ) -> Result<(), foreman_core::EngineError> {
            manager.record_delivery(
                request,
                Delivery {
                    source: None,
                    body: json!({}),
                },
            )?;
            manager.update_request_state(request, RequestState::Resolved)
        }
    }

    let mut manager = manager_with(EngineConfig {
        max_assign_depth: 8,
        ..EngineConfig::default()
    });
    let requester = TestRequester::new();
    manager.register_resolver(Rc::new(BottomlessCrafter)).unwrap();

    let request = manager.create_request(
        requester.clone(),
        stack_payload(5),
        AssigningStrategy::PriorityBased,
    );
    let result = manager.assign_request(request.unwrap());

    assert!(matches!(result, Err(EngineError::DepthExceeded(8))));
}

#[test]
fn test_assigning_an_in_progress_request_is_a_contract_violation() {
    let mut manager = manager();
    let requester = TestRequester::new();

    let parked = Rc::new(TestResolver::for_kind("stack").manual());
    manager.register_resolver(parked).unwrap();

    let request = manager
        .create_and_assign_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();
    assert_eq!(
        manager.request_for_token(request).unwrap().state(),
        RequestState::InProgress
    );

    assert!(manager.assign_request(request).is_err());
}
