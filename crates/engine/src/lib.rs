// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! # capa-engine
//!
//! Core evaluation engine for capability rules: the typed feature model,
//! the statement logic tree, and the pure evaluator that decides whether a
//! statement matches a set of extracted features.
//!
//! This crate knows nothing about YAML, rule files, or scopes beyond the
//! feature vocabulary each scope admits. Rule loading, dependency
//! resolution, and the scoped match pipeline live in `capa-rules` and
//! `capa-scan`.

pub mod eval;
pub mod fastmap;
pub mod features;
pub mod statement;

pub use eval::{evaluate, Evaluated};
pub use fastmap::{FastMap, FastSet};
pub use features::{
    Address, Arch, Characteristic, Feature, FeatureKind, FeatureSet, LocationSet, RegexFeature,
    Scope, MAX_BYTES_FEATURE_SIZE,
};
pub use statement::Statement;
