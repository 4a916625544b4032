// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `aegis-foreman-core` — Per-Colony Request/Resolver Scheduling Engine
//!
//! Lets many independent producers (requesters: workers, buildings) declare
//! abstract needs (requestables) and have them matched, in priority order,
//! against a dynamic population of providers (resolvers: warehouses,
//! crafters, mailboxes, the built-in retry fallback) that can satisfy the
//! need, possibly by spawning further sub-requests.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Token`, `Requestable`, `RequestRecord` state machine, resolver metadata, ports |
//! | [`application`] | Application | `RequestManager` facade, assignment/lifecycle logic, `ResolverBehavior` contract, retrying resolver |
//! | [`infrastructure`] | Infrastructure | generation-checked arenas, the four data stores, event bus, snapshot persistence |
//!
//! ## Key Concepts
//!
//! - **Token**: opaque, colony-unique identifier; the only way anything
//!   refers to a request or resolver, across calls and across persistence.
//! - **Assignment**: the recorded commitment of one resolver to one request;
//!   one resolver to many requests, each request under at most one resolver.
//! - **Dependency tree**: resolvers may spawn child requests; a parent
//!   cannot finish until every child has cleared, and cancellation unwinds
//!   the tree children-before-parent.
//!
//! ## Execution Model
//!
//! Single-threaded, cooperative: everything runs to completion on the colony
//! tick thread. The only time-based behavior is the retrying resolver's
//! cadence and the periodic colony-update sweep.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{
    AssignOutcome, EngineError, RequestManager, RequestManagerStats, ResolverBehavior,
    ResolverProvider, RetryingResolver,
};
pub use domain::colony::ColonyId;
pub use domain::config::{EngineConfig, RetryConfig};
pub use domain::request::{AssigningStrategy, RequestError, RequestRecord, RequestState};
pub use domain::requestable::{Delivery, Requestable, RequestableError, RequestableKind};
pub use domain::requester::{ProviderId, Requester, RequesterId};
pub use domain::resolver::{Location, ResolverFamily, ResolverMeta};
pub use domain::token::Token;
pub use infrastructure::persistence::Snapshot;
