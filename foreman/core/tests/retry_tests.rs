// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the built-in retrying resolver: parking, cadence,
//! hand-over to late-arriving resolvers, and budget exhaustion.

mod common;

use common::*;
use foreman_core::{AssigningStrategy, EngineConfig, RequestState, RetryConfig};
use std::rc::Rc;

fn eager_retry_config(max_attempts: u32) -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            max_attempts,
            cadence_ticks: 1,
            ..RetryConfig::default()
        },
        ..EngineConfig::default()
    }
}

#[test]
fn test_unresolvable_retryable_request_parks_on_the_retry_resolver() {
    let mut manager = manager_with(eager_retry_config(3));
    let requester = TestRequester::new();

    let request = manager
        .create_and_assign_request(
            requester.clone(),
            retryable_payload(),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();

    assert_eq!(
        manager.resolver_for_request(request),
        Some(manager.retry_resolver())
    );
    assert_eq!(
        manager.request_for_token(request).unwrap().state(),
        RequestState::InProgress
    );
}

#[test]
fn test_retry_hands_over_once_a_real_resolver_appears() {
    let mut manager = manager_with(eager_retry_config(5));
    let requester = TestRequester::new();

    let request = manager
        .create_and_assign_request(
            requester.clone(),
            retryable_payload(),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();
    assert_eq!(
        manager.resolver_for_request(request),
        Some(manager.retry_resolver())
    );

    // One fruitless sweep keeps it parked.
    manager.tick().unwrap();
    assert_eq!(
        manager.resolver_for_request(request),
        Some(manager.retry_resolver())
    );

    // A toolsmith comes online; the next sweep hands the request over and
    // it completes.
    let toolsmith = Rc::new(TestResolver::for_kind("tool").with_family("toolsmith"));
    manager.register_resolver(toolsmith.clone()).unwrap();
    manager.tick().unwrap();

    assert_eq!(toolsmith.attempt_count(), 1);
    assert_eq!(
        manager.request_for_token(request).unwrap().state(),
        RequestState::Completed
    );
    assert_eq!(requester.completed_tokens(), vec![request]);
}

#[test]
fn test_retry_budget_exhaustion_surfaces_failed() {
    let mut manager = manager_with(eager_retry_config(2));
    let requester = TestRequester::new();

    let request = manager
        .create_and_assign_request(
            requester.clone(),
            retryable_payload(),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();

    // Two budgeted re-attempts, then the give-up sweep.
    manager.tick().unwrap();
    manager.tick().unwrap();
    assert!(manager.request_for_token(request).is_some());

    manager.tick().unwrap();

    assert!(manager.request_for_token(request).is_none());
    assert_eq!(requester.cancelled_tokens(), vec![request]);
    assert!(requester.completed_tokens().is_empty());
    assert_eq!(manager.stats().assigned_requests, 0);
}

#[test]
fn test_cadence_spaces_out_the_sweeps() {
    let mut manager = manager_with(EngineConfig {
        retry: RetryConfig {
            max_attempts: 1,
            cadence_ticks: 10,
            ..RetryConfig::default()
        },
        ..EngineConfig::default()
    });
    let requester = TestRequester::new();

    let request = manager
        .create_and_assign_request(
            requester.clone(),
            retryable_payload(),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();

    // Nine off-cadence ticks change nothing.
    for _ in 0..9 {
        manager.tick().unwrap();
    }
    assert!(manager.request_for_token(request).is_some());
    assert!(requester.cancelled_tokens().is_empty());

    // Tick 10 burns the single budgeted attempt; tick 20 gives up.
    manager.tick().unwrap();
    assert!(manager.request_for_token(request).is_some());
    for _ in 0..10 {
        manager.tick().unwrap();
    }
    assert!(manager.request_for_token(request).is_none());
    assert_eq!(requester.cancelled_tokens(), vec![request]);
}

#[test]
fn test_non_retryable_requests_never_touch_the_retry_resolver() {
    let mut manager = manager_with(eager_retry_config(1));
    let requester = TestRequester::new();

    // "stack" chain does not include the retryable kind.
    let request = manager
        .create_and_assign_request(
            requester.clone(),
            stack_payload(5),
            AssigningStrategy::PriorityBased,
        )
        .unwrap();

    assert_eq!(
        manager.request_for_token(request).unwrap().state(),
        RequestState::Reported
    );
    assert_eq!(manager.resolver_for_request(request), None);

    // Ticks do not touch requests that never parked.
    manager.tick().unwrap();
    assert_eq!(
        manager.request_for_token(request).unwrap().state(),
        RequestState::Reported
    );
}
