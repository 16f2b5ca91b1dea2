// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! Statement evaluation against a feature set.
//!
//! Evaluation is pure: it never mutates the feature set, and a matching
//! rule does not become visible to the statement under evaluation. Match
//! promotion happens between rules and between scope passes, in the scope
//! matcher.
//!
//! The result is an [`Evaluated`] tree mirroring the statement tree, so
//! renderers can show which nodes matched where. Locations are
//! informational: the union of addresses contributing to a match, and
//! always empty for `Not`.

use crate::features::{FeatureKind, FeatureSet, LocationSet};
use crate::statement::Statement;

/// One node of the evaluation tree.
#[derive(Debug, Clone)]
pub struct Evaluated<'s> {
    pub statement: &'s Statement,
    pub matched: bool,
    pub locations: LocationSet,
    pub children: Vec<Evaluated<'s>>,
}

/// Evaluate `statement` against `features`.
pub fn evaluate<'s>(statement: &'s Statement, features: &FeatureSet) -> Evaluated<'s> {
    match statement {
        Statement::And { children, .. } => {
            let children: Vec<_> = children.iter().map(|c| evaluate(c, features)).collect();
            let matched = children.iter().all(|c| c.matched);
            let locations = union_matched(&children);
            Evaluated {
                statement,
                matched,
                locations,
                children,
            }
        }
        Statement::Or { children, .. } => {
            let children: Vec<_> = children.iter().map(|c| evaluate(c, features)).collect();
            let matched = children.iter().any(|c| c.matched);
            let locations = union_matched(&children);
            Evaluated {
                statement,
                matched,
                locations,
                children,
            }
        }
        Statement::Not { child, .. } => {
            let child = evaluate(child, features);
            let matched = !child.matched;
            Evaluated {
                statement,
                matched,
                locations: LocationSet::new(),
                children: vec![child],
            }
        }
        Statement::Some {
            count, children, ..
        } => {
            let children: Vec<_> = children.iter().map(|c| evaluate(c, features)).collect();
            let matched = children.iter().filter(|c| c.matched).count() >= *count;
            let locations = union_matched(&children);
            Evaluated {
                statement,
                matched,
                locations,
                children,
            }
        }
        Statement::Range {
            feature, min, max, ..
        } => {
            let locations = features.get(feature).cloned().unwrap_or_default();
            let count = locations.len();
            let matched =
                min.is_none_or(|min| min <= count) && max.is_none_or(|max| count <= max);
            Evaluated {
                statement,
                matched,
                locations,
                children: Vec::new(),
            }
        }
        Statement::Subscope { .. } => {
            // rewritten into a `match` reference before matching; reaching
            // one here is a pipeline bug
            debug_assert!(false, "subscope statement evaluated directly");
            Evaluated {
                statement,
                matched: false,
                locations: LocationSet::new(),
                children: Vec::new(),
            }
        }
        Statement::Feature(feature) => {
            let (matched, locations) = match &feature.kind {
                FeatureKind::Regex(re) => scan_strings(features, |s| re.is_match(s)),
                FeatureKind::Substring(needle) => scan_strings(features, |s| s.contains(needle)),
                _ => match features.get(feature) {
                    Some(locations) => (true, locations.clone()),
                    None => (false, LocationSet::new()),
                },
            };
            Evaluated {
                statement,
                matched,
                locations,
                children: Vec::new(),
            }
        }
    }
}

fn union_matched(children: &[Evaluated<'_>]) -> LocationSet {
    let mut locations = LocationSet::new();
    for child in children.iter().filter(|c| c.matched) {
        locations.extend(child.locations.iter().copied());
    }
    locations
}

/// Regex and substring features match against every string feature in the
/// set; locations are the union over all matching strings.
fn scan_strings(features: &FeatureSet, pred: impl Fn(&str) -> bool) -> (bool, LocationSet) {
    let mut matched = false;
    let mut locations = LocationSet::new();
    for (candidate, candidate_locations) in features {
        if let FeatureKind::String(s) = &candidate.kind {
            if pred(s) {
                matched = true;
                locations.extend(candidate_locations.iter().copied());
            }
        }
    }
    (matched, locations)
}
