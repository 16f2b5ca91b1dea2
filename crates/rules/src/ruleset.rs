// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! Rule set assembly: uniqueness and dependency validation, subscope
//! extraction, and per-scope topological ordering.
//!
//! A rule set is initialized with a collection of rules, which it verifies
//! and sorts into scopes. Each scoped list is ordered so that dependencies
//! show up before dependents: as rules match, their matches become
//! features, and subsequent rules in the same list can match on them.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use capa_engine::{FastMap, FastSet, Scope};
use petgraph::algo::toposort;
use petgraph::prelude::DiGraphMap;

use crate::error::{InvalidRule, InvalidRuleSet};
use crate::rule::Rule;

/// Mapping from namespace to the names of the rules within it (including
/// sub-namespaces).
pub type NamespaceIndex = FastMap<String, Vec<String>>;

/// Index rules under their namespace and every namespace prefix.
///
/// Given `c2/shell :: create reverse shell` and `c2/file-transfer ::
/// download and write a file`, the index maps `c2/shell` and
/// `c2/file-transfer` to their own rules and `c2` to both.
pub fn index_rules_by_namespace<'r>(
    rules: impl IntoIterator<Item = &'r Rule>,
) -> NamespaceIndex {
    let mut namespaces = NamespaceIndex::default();
    for rule in rules {
        let Some(namespace) = rule.meta.namespace() else {
            continue;
        };
        let mut namespace = namespace;
        loop {
            namespaces
                .entry(namespace.to_string())
                .or_default()
                .push(rule.name.clone());
            match namespace.rsplit_once('/') {
                Some((prefix, _)) => namespace = prefix,
                None => break,
            }
        }
    }
    namespaces
}

/// A compiled, scope-partitioned, topologically ordered rule collection.
///
/// Immutable after construction; safe to share across matching jobs.
#[derive(Debug)]
pub struct RuleSet {
    by_name: FastMap<String, Arc<Rule>>,
    by_namespace: FastMap<String, Vec<Arc<Rule>>>,
    /// All rules in load order (subscope-derived rules appended).
    ordered: Vec<Arc<Rule>>,
    pub file_rules: Vec<Arc<Rule>>,
    pub function_rules: Vec<Arc<Rule>>,
    pub basic_block_rules: Vec<Arc<Rule>>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self, InvalidRuleSet> {
        Self::with_id_source(rules, &mut || {
            uuid::Uuid::new_v4().simple().to_string()
        })
    }

    /// Build a rule set with an injected identifier source for
    /// subscope-derived rule names; tests use deterministic sources.
    pub fn with_id_source(
        rules: Vec<Rule>,
        ids: &mut dyn FnMut() -> String,
    ) -> Result<Self, InvalidRuleSet> {
        ensure_rules_are_unique(&rules)?;

        let rules = extract_all_subscope_rules(rules, ids);
        if rules.is_empty() {
            return Err(InvalidRuleSet::Empty);
        }

        let namespaces = index_rules_by_namespace(&rules);
        let dependencies: Vec<BTreeSet<String>> =
            rules.iter().map(|r| r.dependencies(&namespaces)).collect();
        ensure_rule_dependencies_are_met(&rules, &dependencies)?;

        let order = topologically_order_rules(&rules, &dependencies)?;
        let wanted = wanted_rules(&rules, &dependencies);

        let mut by_name = FastMap::default();
        let mut ordered = Vec::with_capacity(rules.len());
        for rule in rules {
            let rule = Arc::new(rule);
            by_name.insert(rule.name.clone(), Arc::clone(&rule));
            ordered.push(rule);
        }

        let scoped = |scope: Scope| -> Vec<Arc<Rule>> {
            order
                .iter()
                .filter(|name| wanted.contains(*name))
                .filter_map(|name| by_name.get(name))
                .filter(|rule| rule.scope == scope)
                .map(Arc::clone)
                .collect()
        };
        let file_rules = scoped(Scope::File);
        let function_rules = scoped(Scope::Function);
        let basic_block_rules = scoped(Scope::BasicBlock);

        let by_namespace = namespaces
            .into_iter()
            .map(|(namespace, names)| {
                let members = names
                    .iter()
                    .filter_map(|name| by_name.get(name))
                    .map(Arc::clone)
                    .collect();
                (namespace, members)
            })
            .collect();

        Ok(RuleSet {
            by_name,
            by_namespace,
            ordered,
            file_rules,
            function_rules,
            basic_block_rules,
        })
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Rule>> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All rules, in load order.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.ordered.iter()
    }

    pub fn rules_in_namespace(&self, namespace: &str) -> &[Arc<Rule>] {
        self.by_namespace
            .get(namespace)
            .map_or(&[], Vec::as_slice)
    }

    /// Select every rule with `tag` as a substring of any string-valued
    /// meta field, expanded by transitive dependencies, and build a new
    /// rule set from them.
    pub fn filter_by_tag(&self, tag: &str) -> Result<RuleSet, InvalidRuleSet> {
        let namespaces =
            index_rules_by_namespace(self.ordered.iter().map(Arc::as_ref));
        let mut selected: FastSet<String> = FastSet::default();
        for rule in &self.ordered {
            let tagged = rule
                .meta
                .iter()
                .any(|(_, value)| value.as_str().is_some_and(|v| v.contains(tag)));
            if !tagged {
                continue;
            }
            log::debug!("using rule \"{}\" and dependencies, found tag in meta", rule.name);
            let mut stack = vec![rule.name.clone()];
            while let Some(name) = stack.pop() {
                if !selected.insert(name.clone()) {
                    continue;
                }
                if let Some(rule) = self.by_name.get(&name) {
                    stack.extend(rule.dependencies(&namespaces));
                }
            }
        }
        let subset: Vec<Rule> = self
            .ordered
            .iter()
            .filter(|rule| selected.contains(&rule.name))
            .map(|rule| (**rule).clone())
            .collect();
        RuleSet::new(subset)
    }
}

fn ensure_rules_are_unique(rules: &[Rule]) -> Result<(), InvalidRule> {
    let mut seen = FastSet::default();
    for rule in rules {
        if !seen.insert(rule.name.as_str()) {
            return Err(InvalidRule::DuplicateRuleName(rule.name.clone()));
        }
    }
    Ok(())
}

/// Extract subscope statements into derived rules; newly derived rules go
/// through the queue themselves, so nesting resolves fully.
fn extract_all_subscope_rules(
    rules: Vec<Rule>,
    ids: &mut dyn FnMut() -> String,
) -> Vec<Rule> {
    let mut queue: VecDeque<Rule> = rules.into();
    let mut done = Vec::new();
    while let Some(mut rule) = queue.pop_front() {
        queue.extend(rule.extract_subscope_rules(ids));
        done.push(rule);
    }
    done
}

fn ensure_rule_dependencies_are_met(
    rules: &[Rule],
    dependencies: &[BTreeSet<String>],
) -> Result<(), InvalidRule> {
    let known: FastSet<&str> = rules.iter().map(|r| r.name.as_str()).collect();
    for (rule, deps) in rules.iter().zip(dependencies) {
        for dep in deps {
            if !known.contains(dep.as_str()) {
                return Err(InvalidRule::MissingDependency {
                    rule: rule.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Order rules such that dependencies show up before dependents, rejecting
/// cycles (including self-reference).
fn topologically_order_rules(
    rules: &[Rule],
    dependencies: &[BTreeSet<String>],
) -> Result<Vec<String>, InvalidRuleSet> {
    let mut graph = DiGraphMap::<&str, ()>::new();
    for rule in rules {
        graph.add_node(rule.name.as_str());
    }
    for (rule, deps) in rules.iter().zip(dependencies) {
        for dep in deps {
            if dep == &rule.name {
                return Err(InvalidRuleSet::CyclicDependency(rule.name.clone()));
            }
            graph.add_edge(dep.as_str(), rule.name.as_str(), ());
        }
    }
    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(InvalidRuleSet::CyclicDependency(
            cycle.node_id().to_string(),
        )),
    }
}

/// The rules that belong in the scoped lists: every non-subscope rule plus
/// its transitive dependencies. This pulls in dependencies across scopes
/// (a file rule may depend on function-scope rules whose matches must be
/// produced first) and keeps library rules at their scope even when nobody
/// references them.
fn wanted_rules(rules: &[Rule], dependencies: &[BTreeSet<String>]) -> FastSet<String> {
    let deps_by_name: FastMap<&str, &BTreeSet<String>> = rules
        .iter()
        .zip(dependencies)
        .map(|(rule, deps)| (rule.name.as_str(), deps))
        .collect();

    let mut wanted: FastSet<String> = FastSet::default();
    for rule in rules.iter().filter(|r| !r.meta.is_subscope_rule()) {
        let mut stack = vec![rule.name.as_str()];
        while let Some(name) = stack.pop() {
            if !wanted.insert(name.to_string()) {
                continue;
            }
            if let Some(deps) = deps_by_name.get(name) {
                stack.extend(deps.iter().map(String::as_str));
            }
        }
    }
    wanted
}
