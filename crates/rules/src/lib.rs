// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! # capa-rules
//!
//! The rule layer of the capability engine: parsing declarative YAML rules
//! into statement trees, validating feature/scope compatibility, desugaring
//! nested-scope statements into derived rules, resolving inter-rule
//! dependencies (by name and by namespace), and compiling everything into a
//! scope-partitioned, topologically ordered [`RuleSet`] that the scoped
//! match driver consumes.
//!
//! A rule document looks like:
//!
//! ```yaml
//! rule:
//!   meta:
//!     name: create file
//!     namespace: host-interaction/file-system
//!     scope: function
//!   features:
//!     - or:
//!       - api: CreateFileA
//!       - api: CreateFileW
//! ```
//!
//! Rules may reference other rules (or whole namespaces) with `match:`;
//! the [`RuleSet`] orders each scope's rules so that dependencies are
//! evaluated first, and [`match_scope`] injects `match(...)` features as
//! rules fire, which is what makes those references work.

pub mod corpus;
mod emit;
pub mod error;
mod loader;
pub mod matcher;
pub mod rule;
pub mod ruleset;

pub use corpus::load_rules;
pub use error::{InvalidRule, InvalidRuleSet};
pub use matcher::{match_scope, MatchResults};
pub use rule::{Meta, Rule, HIDDEN_META_KEYS, META_KEYS};
pub use ruleset::{index_rules_by_namespace, NamespaceIndex, RuleSet};
