// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: the request manager facade, the assignment and
//! registry logic behind it, the resolver behavior contract and the built-in
//! retrying resolver.

pub mod manager;
pub mod request_handler;
pub mod resolver;
pub mod resolver_handler;
pub mod retry;

pub use manager::{EngineError, RequestManager, RequestManagerStats};
pub use request_handler::AssignOutcome;
pub use resolver::{ResolverBehavior, ResolverProvider};
pub use retry::{RetryingResolver, RETRY_FAMILY};
