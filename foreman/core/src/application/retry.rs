// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Retrying Resolver
//!
//! The built-in fallback for requests nothing else will take. It registers
//! at the lowest possible priority under a configurable kind, accepts
//! anything, and parks it: `resolve` deliberately does nothing, so parked
//! requests sit in progress until a re-attempt sweep hands them to a
//! resolver that can actually act.
//!
//! Each scheduler tick advances a cadence counter; on cadence the resolver
//! re-attempts every parked request with itself blacklisted. Past the
//! configured budget a request is surfaced as failed instead.

use crate::application::manager::{EngineError, RequestManager};
use crate::application::request_handler::{self, AssignOutcome};
use crate::application::resolver::ResolverBehavior;
use crate::domain::config::RetryConfig;
use crate::domain::resolver::{Location, ResolverFamily, ResolverMeta};
use crate::domain::token::Token;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Family tag of the built-in retrying resolver; used to find its persisted
/// entry again after a restore.
pub const RETRY_FAMILY: &str = "retrying";

pub struct RetryingResolver {
    config: RetryConfig,
    /// Parked request -> re-attempts spent so far.
    attempts: RefCell<BTreeMap<Token, u32>>,
    ticks: Cell<u64>,
}

impl RetryingResolver {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: RefCell::new(BTreeMap::new()),
            ticks: Cell::new(0),
        }
    }

    /// Requests currently parked for retry.
    pub fn parked(&self) -> Vec<Token> {
        self.attempts.borrow().keys().copied().collect()
    }

    /// Advance one scheduler tick; on cadence, sweep the parked requests.
    pub(crate) fn tick(&self, mgr: &mut RequestManager, own: Token) -> Result<(), EngineError> {
        let now = self.ticks.get() + 1;
        self.ticks.set(now);
        if now % self.config.cadence_ticks.max(1) != 0 {
            return Ok(());
        }

        let tracked: Vec<(Token, u32)> = self
            .attempts
            .borrow()
            .iter()
            .map(|(token, spent)| (*token, *spent))
            .collect();

        for (request, spent) in tracked {
            // Prune anything no longer ours: completed, cancelled, or taken
            // over by a real resolver since the last sweep.
            if !mgr.stores.has_request(request) || mgr.stores.resolver_for(request) != Some(own) {
                self.attempts.borrow_mut().remove(&request);
                continue;
            }

            if spent >= self.config.max_attempts {
                warn!(request = %request, attempts = spent, "Retry budget exhausted; failing request");
                self.attempts.borrow_mut().remove(&request);
                request_handler::fail_request(mgr, request)?;
                continue;
            }

            self.attempts.borrow_mut().insert(request, spent + 1);
            debug!(request = %request, attempt = spent + 1, "Re-attempting parked request");

            let mut blacklist = BTreeSet::new();
            blacklist.insert(own);
            match request_handler::reassign_request(mgr, request, blacklist)? {
                AssignOutcome::Assigned { resolver } if resolver != own => {
                    self.attempts.borrow_mut().remove(&request);
                }
                AssignOutcome::Assigned { .. } => {}
                AssignOutcome::Unassigned => {
                    // Park it with us again so the budget keeps counting.
                    if mgr.stores.has_request(request)
                        && mgr.stores.request(request)?.state().is_assignable()
                    {
                        request_handler::assign_request(mgr, request, &BTreeSet::new())?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl ResolverBehavior for RetryingResolver {
    fn meta(&self) -> ResolverMeta {
        ResolverMeta {
            priority: i32::MIN,
            kind: self.config.kind.clone(),
            location: Location::ORIGIN,
            family: ResolverFamily::from_static(RETRY_FAMILY),
        }
    }

    fn can_resolve(&self, _manager: &RequestManager, _request: Token) -> bool {
        true
    }

    fn attempt_resolve(&self, _manager: &mut RequestManager, request: Token) -> Option<Vec<Token>> {
        // Accept with no children; the budget entry survives re-parking.
        self.attempts.borrow_mut().entry(request).or_insert(0);
        Some(Vec::new())
    }

    fn resolve(&self, _manager: &mut RequestManager, request: Token) -> Result<(), EngineError> {
        debug!(request = %request, "Request parked for retry");
        Ok(())
    }

    fn on_assigned_request_cancelled(&self, manager: &mut RequestManager, request: Token) {
        if !manager.stores.has_request(request) {
            self.attempts.borrow_mut().remove(&request);
        }
    }

    fn suitability(&self, _manager: &RequestManager, _request: Token) -> u32 {
        u32::MAX
    }
}
