// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure layer: storage, events and persistence plumbing.

pub mod arena;
pub mod event_bus;
pub mod persistence;
pub mod stores;
