// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Token — Generation-Checked Engine Identity
//!
//! A [`Token`] is the only way any component refers to a request or a
//! resolver. Parent/child links, assignment records and persisted snapshots
//! all carry tokens, never references, so the object graph survives
//! serialization round-trips without cyclic ownership.
//!
//! Tokens are minted exclusively by the identity arenas
//! (`infrastructure::arena`). The generation half guards slot reuse: a token
//! minted before its slot was freed fails lookup instead of aliasing whatever
//! occupies the slot now.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

/// Opaque, colony-unique identifier standing in for a request or a resolver.
///
/// Request tokens and resolver tokens live in separate namespaces (one arena
/// each); a token is only meaningful against the store kind that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token {
    index: u32,
    generation: NonZeroU32,
}

impl Token {
    pub(crate) fn new(index: u32, generation: NonZeroU32) -> Self {
        Self { index, generation }
    }

    /// Arena slot this token points at.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation this token was minted for.
    pub fn generation(&self) -> u32 {
        self.generation.get()
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}
