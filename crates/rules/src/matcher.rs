// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! Matching an ordered scoped rule list against a feature set.
//!
//! Rules are consumed in topological order. Each match is recorded and
//! immediately promoted: `match(<rule name>)` and `match(<namespace>)` for
//! every ancestor namespace are injected into the same feature set, so
//! later rules in the list can chain on earlier matches, by name or at
//! namespace granularity.

use std::sync::Arc;

use capa_engine::{evaluate, Address, Evaluated, FastMap, Feature, FeatureSet};

use crate::rule::Rule;

/// Mapping from rule name to the locations and evaluation trees at which
/// it matched. A rule exists in exactly one scope, so results from
/// different scope passes merge without overlap.
pub type MatchResults<'r> = FastMap<String, Vec<(Address, Evaluated<'r>)>>;

/// Evaluate `rules` (one scope's topologically ordered list) against
/// `features`, keying matches at `location`.
pub fn match_scope<'r>(
    rules: &'r [Arc<Rule>],
    features: &mut FeatureSet,
    location: Address,
) -> MatchResults<'r> {
    let mut results = MatchResults::default();
    for rule in rules {
        let evaluation = evaluate(&rule.statement, features);
        if !evaluation.matched {
            continue;
        }

        results
            .entry(rule.name.clone())
            .or_default()
            .push((location, evaluation));

        features
            .entry(Feature::matched_rule(rule.name.as_str()))
            .or_default()
            .insert(location);
        let mut namespace = rule.meta.namespace();
        while let Some(ns) = namespace {
            features
                .entry(Feature::matched_rule(ns))
                .or_default()
                .insert(location);
            namespace = ns.rsplit_once('/').map(|(prefix, _)| prefix);
        }
    }
    results
}
