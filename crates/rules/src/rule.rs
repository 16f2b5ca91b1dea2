// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! A rule: a named statement with metadata and retained source text.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use capa_engine::{evaluate, Evaluated, Feature, FeatureKind, FeatureSet, Scope, Statement};
use serde_yaml::{Mapping, Value};

use crate::emit;
use crate::error::InvalidRule;
use crate::loader::{build_statement, rule_mapping};
use crate::ruleset::NamespaceIndex;

/// The standard metadata fields, in the preferred order. When a rule is
/// re-emitted, any custom keys come after these, alphabetically.
pub const META_KEYS: &[&str] = &[
    "name",
    "namespace",
    "rule-category",
    "maec/analysis-conclusion",
    "maec/analysis-conclusion-ov",
    "maec/malware-category",
    "maec/malware-category-ov",
    "author",
    "description",
    "lib",
    "scope",
    "att&ck",
    "mbc",
    "references",
    "examples",
];

/// Meta fields that are internal bookkeeping, added during rule loading.
/// They help manipulate and index rules but are stripped from re-emitted
/// documents.
pub const HIDDEN_META_KEYS: &[&str] = &["capa/nursery", "capa/path"];

/// Rule metadata: an insertion-ordered mapping with typed accessors for the
/// fields the engine cares about.
#[derive(Debug, Clone, Default)]
pub struct Meta(Mapping);

impl Meta {
    pub fn new(mapping: Mapping) -> Self {
        Self(mapping)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get_str("namespace")
    }

    /// Library rules are dependencies for other rules, not reportable
    /// capabilities of their own.
    pub fn is_lib(&self) -> bool {
        self.get_bool("lib")
    }

    pub fn is_subscope_rule(&self) -> bool {
        self.get_bool("capa/subscope-rule")
    }

    pub fn is_nursery(&self) -> bool {
        self.get_bool("capa/nursery")
    }

    /// For subscope-derived rules, the name of the rule they were extracted
    /// from.
    pub fn parent(&self) -> Option<&str> {
        self.get_str("capa/parent")
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(Value::from(key), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.0.iter()
    }

    pub fn mapping(&self) -> &Mapping {
        &self.0
    }
}

/// A capability rule: a named statement plus metadata, with the raw source
/// document retained for faithful re-emission.
///
/// Rules are immutable once constructed, except that subscope extraction
/// (during rule set assembly) rewrites `Subscope` nodes into `match`
/// references.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub scope: Scope,
    pub statement: Statement,
    pub meta: Meta,
    definition: String,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule(scope={}, name={})", self.scope, self.name)
    }
}

impl Rule {
    /// Parse a rule from its YAML source.
    pub fn from_yaml(source: &str) -> Result<Self, InvalidRule> {
        let doc: Value = serde_yaml::from_str(source)?;
        let rule = rule_mapping(&doc)?;

        let meta = rule
            .get("meta")
            .and_then(Value::as_mapping)
            .ok_or(InvalidRule::MissingMeta)?;
        let name = meta
            .get("name")
            .and_then(Value::as_str)
            .ok_or(InvalidRule::MissingName)?
            .to_string();

        // if scope is not specified, default to function scope: the mode
        // rule authors start with
        let scope = match meta.get("scope") {
            None => Scope::Function,
            Some(value) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| InvalidRule::UnsupportedScope(format!("{value:?}")))?;
                s.parse::<Scope>().map_err(InvalidRule::UnsupportedScope)?
            }
        };

        for key in ["att&ck", "mbc"] {
            if let Some(value) = meta.get(key) {
                if !value.is_sequence() {
                    return Err(InvalidRule::MetaNotList(if key == "att&ck" {
                        "ATT&CK"
                    } else {
                        "MBC"
                    }));
                }
            }
        }

        let features = rule
            .get("features")
            .and_then(Value::as_sequence)
            .ok_or(InvalidRule::MissingFeatures)?;
        // the rule must start with a single logic node; anything else is
        // too implicit (AND vs OR?)
        if features.len() != 1 {
            return Err(InvalidRule::MultipleTopLevelStatements);
        }

        let statement = build_statement(&features[0], scope)?;
        if matches!(statement, Statement::Subscope { .. }) {
            return Err(InvalidRule::TopLevelSubscope);
        }

        Ok(Rule {
            name,
            scope,
            statement,
            meta: Meta::new(meta.clone()),
            definition: source.to_string(),
        })
    }

    /// Parse a rule from a file; errors carry the path.
    pub fn from_yaml_file(path: &Path) -> Result<Self, InvalidRule> {
        let source = fs::read_to_string(path)
            .map_err(|e| InvalidRule::from(e).with_path(path))?;
        Self::from_yaml(&source).map_err(|e| e.with_path(path))
    }

    /// The raw source document this rule was parsed from; empty for
    /// subscope-derived rules.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Re-emit this rule with canonical meta formatting; see [`crate::emit`].
    pub fn to_yaml(&self) -> Result<String, InvalidRule> {
        emit::to_yaml(self)
    }

    pub fn evaluate(&self, features: &FeatureSet) -> Evaluated<'_> {
        evaluate(&self.statement, features)
    }

    /// The names of rules this rule directly relies upon.
    ///
    /// A `match` reference is first tested against the namespace index: a
    /// reference naming a known namespace expands to every rule in it, and
    /// namespaces take precedence over same-named rules. Transitive
    /// dependencies are the caller's business.
    pub fn dependencies(&self, namespaces: &NamespaceIndex) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        let mut stack = vec![&self.statement];
        while let Some(statement) = stack.pop() {
            let reference = match statement {
                Statement::Feature(feature) => Some(feature),
                // count(match(...)) is a dependency too
                Statement::Range { feature, .. } => Some(feature),
                _ => None,
            };
            if let Some(Feature {
                kind: FeatureKind::MatchedRule(name),
                ..
            }) = reference
            {
                match namespaces.get(name) {
                    Some(members) => deps.extend(members.iter().cloned()),
                    None => {
                        deps.insert(name.clone());
                    }
                }
            }
            stack.extend(statement.children());
        }
        deps
    }

    /// Replace every `Subscope` node in this rule's statement with a
    /// `match` reference to a newly derived rule, returning the derived
    /// rules. Derived rules may themselves contain subscopes; the caller
    /// processes them through its work queue.
    ///
    /// Note: this mutates the current rule.
    pub(crate) fn extract_subscope_rules(
        &mut self,
        ids: &mut dyn FnMut() -> String,
    ) -> Vec<Rule> {
        let mut derived = Vec::new();
        let parent = self.name.clone();
        extract_subscopes_rec(&parent, &mut self.statement, ids, &mut derived);
        derived
    }

    fn derived(name: String, scope: Scope, statement: Statement, parent: &str) -> Rule {
        let mut meta = Mapping::new();
        meta.insert(Value::from("name"), Value::from(name.clone()));
        meta.insert(Value::from("scope"), Value::from(scope.to_string()));
        // derived rules are never meant to be inspected separately; they
        // are dependencies for the parent rule, so mark them as such
        meta.insert(Value::from("lib"), Value::from(true));
        meta.insert(Value::from("capa/subscope-rule"), Value::from(true));
        meta.insert(Value::from("capa/parent"), Value::from(parent));
        Rule {
            name,
            scope,
            statement,
            meta: Meta::new(meta),
            definition: String::new(),
        }
    }
}

fn extract_subscopes_rec(
    parent: &str,
    statement: &mut Statement,
    ids: &mut dyn FnMut() -> String,
    derived: &mut Vec<Rule>,
) {
    for child in statement.children_mut() {
        if matches!(child, Statement::Subscope { .. }) {
            // the derived rule's name is a generated, hopefully unique
            // value; ideally it is never rendered to a user
            let name = format!("{parent}/{}", ids());
            let placeholder = Statement::Feature(Feature::matched_rule(name.clone()));
            if let Statement::Subscope { scope, child } = std::mem::replace(child, placeholder)
            {
                derived.push(Rule::derived(name, scope, *child, parent));
            }
        }
    }
    // recurse into the remaining tree; the subscope subtrees moved out
    // above now belong to the derived rules
    for child in statement.children_mut() {
        extract_subscopes_rec(parent, child, ids, derived);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::index_rules_by_namespace;

    const MINIMAL: &str = "\
rule:
  meta:
    name: test rule
  features:
    - and:
      - number: 1
      - number: 2
";

    #[test]
    fn scope_defaults_to_function() {
        let rule = Rule::from_yaml(MINIMAL).expect("valid rule");
        assert_eq!(rule.scope, Scope::Function);
        assert_eq!(rule.name, "test rule");
    }

    #[test]
    fn missing_name_is_rejected() {
        let err = Rule::from_yaml(
            "rule:\n  meta:\n    scope: function\n  features:\n    - number: 1\n",
        )
        .expect_err("no name");
        assert!(matches!(err, InvalidRule::MissingName));
    }

    #[test]
    fn unsupported_scope_is_rejected() {
        let err = Rule::from_yaml(
            "rule:\n  meta:\n    name: t\n    scope: instruction\n  features:\n    - number: 1\n",
        )
        .expect_err("bad scope");
        assert!(matches!(err, InvalidRule::UnsupportedScope(_)));
    }

    #[test]
    fn multiple_top_level_statements_rejected() {
        let err = Rule::from_yaml(
            "rule:\n  meta:\n    name: t\n  features:\n    - number: 1\n    - number: 2\n",
        )
        .expect_err("two top level statements");
        assert!(matches!(err, InvalidRule::MultipleTopLevelStatements));
    }

    #[test]
    fn top_level_subscope_rejected() {
        let err = Rule::from_yaml(
            "rule:\n  meta:\n    name: t\n    scope: file\n  features:\n    - function:\n      - api: CreateFileA\n",
        )
        .expect_err("top level subscope");
        assert!(matches!(err, InvalidRule::TopLevelSubscope));
    }

    #[test]
    fn attack_must_be_list() {
        let err = Rule::from_yaml(
            "rule:\n  meta:\n    name: t\n    att&ck: Defense Evasion\n  features:\n    - number: 1\n",
        )
        .expect_err("scalar att&ck");
        assert!(matches!(err, InvalidRule::MetaNotList("ATT&CK")));
    }

    #[test]
    fn direct_dependencies() {
        let rule = Rule::from_yaml(
            "rule:\n  meta:\n    name: t\n  features:\n    - and:\n      - match: create file\n      - api: WriteFile\n",
        )
        .expect("valid rule");
        let deps = rule.dependencies(&NamespaceIndex::default());
        assert_eq!(deps, BTreeSet::from(["create file".to_string()]));
    }

    #[test]
    fn namespace_dependencies_expand() {
        let a = Rule::from_yaml(
            "rule:\n  meta:\n    name: shell one\n    namespace: c2/shell\n  features:\n    - api: system\n",
        )
        .expect("valid rule");
        let b = Rule::from_yaml(
            "rule:\n  meta:\n    name: transfer one\n    namespace: c2/file-transfer\n  features:\n    - api: recv\n",
        )
        .expect("valid rule");
        let referrer = Rule::from_yaml(
            "rule:\n  meta:\n    name: uses c2\n  features:\n    - match: c2\n",
        )
        .expect("valid rule");

        let namespaces = index_rules_by_namespace(&[a, b, referrer.clone()]);
        let deps = referrer.dependencies(&namespaces);
        assert_eq!(
            deps,
            BTreeSet::from(["shell one".to_string(), "transfer one".to_string()])
        );
    }

    #[test]
    fn count_match_is_a_dependency() {
        let rule = Rule::from_yaml(
            "rule:\n  meta:\n    name: t\n    scope: file\n  features:\n    - count(match(create file)): 2 or more\n",
        )
        .expect("valid rule");
        let deps = rule.dependencies(&NamespaceIndex::default());
        assert_eq!(deps, BTreeSet::from(["create file".to_string()]));
    }

    #[test]
    fn subscope_extraction_rewrites_parent() {
        let mut rule = Rule::from_yaml(
            "rule:\n  meta:\n    name: host interaction\n    scope: file\n  features:\n    - and:\n      - string: config\n      - function:\n        - and:\n          - api: CreateFileA\n          - basic block:\n            - and:\n              - mnemonic: xor\n",
        )
        .expect("valid rule");

        let mut counter = 0;
        let mut ids = move || {
            counter += 1;
            format!("{counter:032x}")
        };

        let derived = rule.extract_subscope_rules(&mut ids);
        assert_eq!(derived.len(), 1);
        let function_rule = &derived[0];
        assert_eq!(function_rule.scope, Scope::Function);
        assert!(function_rule.meta.is_subscope_rule());
        assert!(function_rule.meta.is_lib());
        assert_eq!(function_rule.meta.parent(), Some("host interaction"));
        assert!(function_rule.name.starts_with("host interaction/"));

        // the parent no longer contains a subscope; it references the
        // derived rule instead
        let mut stack = vec![&rule.statement];
        let mut found_reference = false;
        while let Some(statement) = stack.pop() {
            assert!(!matches!(statement, Statement::Subscope { .. }));
            if let Statement::Feature(f) = statement {
                if f.kind == FeatureKind::MatchedRule(function_rule.name.clone()) {
                    found_reference = true;
                }
            }
            stack.extend(statement.children());
        }
        assert!(found_reference);

        // the nested basic block subscope still lives inside the derived
        // rule, to be extracted on the next queue round
        let mut saw_nested = false;
        let mut stack = vec![&function_rule.statement];
        while let Some(statement) = stack.pop() {
            if matches!(
                statement,
                Statement::Subscope {
                    scope: Scope::BasicBlock,
                    ..
                }
            ) {
                saw_nested = true;
            }
            stack.extend(statement.children());
        }
        assert!(saw_nested);
    }
}
