// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of the colony owning one manager instance. One manager per
/// colony; the colony aggregate owns it and hands out references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColonyId(pub Uuid);

impl ColonyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ColonyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ColonyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
