// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use capa_engine::Scope;
use thiserror::Error;

/// A malformed rule: bad document shape, unknown keys, values of the wrong
/// type, features invalid for their scope, and so on. Rule loading is
/// all-or-nothing per file; during directory loads the error carries the
/// offending path.
#[derive(Debug, Error)]
pub enum InvalidRule {
    #[error("rule document must have a top level `rule` key")]
    MissingRule,
    #[error("rule must have a `meta` mapping")]
    MissingMeta,
    #[error("rule must have a name")]
    MissingName,
    #[error("rule must have a `features` list")]
    MissingFeatures,
    #[error("{0} is not a supported scope")]
    UnsupportedScope(String),
    #[error("{0} mapping must be a list")]
    MetaNotList(&'static str),
    #[error("rule must begin with a single top level statement")]
    MultipleTopLevelStatements,
    #[error("top level statement may not be a subscope")]
    TopLevelSubscope,
    #[error("too many statements")]
    TooManyStatements,
    #[error("unexpected statement: {0}")]
    UnexpectedStatement(String),
    #[error("not statement must have exactly one child statement")]
    NotWithoutSingleChild,
    #[error("subscope must have exactly one child statement")]
    SubscopeWithoutSingleChild,
    #[error("{subscope} subscope supported only for {required} scope")]
    InvalidSubscope { subscope: Scope, required: Scope },
    #[error("statements can only have one description")]
    MultipleStatementDescriptions,
    #[error("unexpected value: \"{0}\", only one description allowed (inline description with ` = `)")]
    DuplicateDescription(String),
    #[error("unexpected value: \"{0}\", description cannot be empty")]
    EmptyDescription(String),
    #[error("expected string value for {0}")]
    NonStringValue(String),
    #[error("unexpected value: \"{0}\", must begin with numerical value")]
    InvalidNumber(String),
    #[error("unexpected arch: {0}")]
    InvalidArch(String),
    #[error("unexpected characteristic: {0}")]
    InvalidCharacteristic(String),
    #[error("unexpected bytes value: must be a valid hex sequence: \"{0}\"")]
    InvalidBytes(String),
    #[error("unexpected bytes value: byte sequences must be no larger than {0} bytes")]
    BytesTooLong(usize),
    #[error("ambiguous string value {0}, must be defined as explicit string")]
    AmbiguousString(String),
    #[error("invalid regex: {pattern}: {message}")]
    InvalidRegex { pattern: String, message: String },
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("range min less than zero")]
    RangeMinNegative,
    #[error("range max less than zero")]
    RangeMaxNegative,
    #[error("range max less than min")]
    RangeMaxLessThanMin,
    #[error("unexpected range: {0}")]
    UnexpectedRange(String),
    #[error("feature {feature} not supported for scope {scope}")]
    FeatureNotSupportedForScope { feature: String, scope: Scope },
    #[error("duplicate rule name: {0}")]
    DuplicateRuleName(String),
    #[error("rule \"{rule}\" depends on missing rule \"{dependency}\"")]
    MissingDependency { rule: String, dependency: String },
    #[error("rule \"{0}\" has no retained source to re-emit")]
    NoDefinition(String),
    #[error("failed to parse rule document")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to read rule file")]
    Io(#[from] std::io::Error),
    #[error("invalid rule: {}: {source}", path.display())]
    WithPath {
        path: PathBuf,
        #[source]
        source: Box<InvalidRule>,
    },
}

impl InvalidRule {
    /// Attach the file system path a rule was loaded from.
    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        InvalidRule::WithPath {
            path: path.into(),
            source: Box::new(self),
        }
    }
}

/// A rule set that cannot be assembled: nothing to match, or a dependency
/// cycle among the rules.
#[derive(Debug, Error)]
pub enum InvalidRuleSet {
    #[error("invalid rule set: no rules selected")]
    Empty,
    #[error("invalid rule set: cyclic dependency involving rule \"{0}\"")]
    CyclicDependency(String),
    #[error(transparent)]
    InvalidRule(#[from] InvalidRule),
}
