// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! The feature model.
//!
//! A [`Feature`] is a value observed in a program: an API call, a string, a
//! byte sequence, an instruction mnemonic, and so on. Features are value
//! types: identity is the kind and payload, while the optional description
//! is presentation metadata and takes no part in equality or hashing.
//!
//! A [`FeatureSet`] indexes features by value and records the addresses at
//! which each was observed. An empty address set means the feature is
//! present but its location is unknown (common for file-scope features).

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::fastmap::FastMap;

/// A virtual address within the analyzed program.
pub type Address = u64;

/// The addresses at which a feature was observed, ordered so that reported
/// match locations are deterministic.
pub type LocationSet = BTreeSet<Address>;

/// Mapping from feature to the set of addresses at which it was observed.
pub type FeatureSet = FastMap<Feature, LocationSet>;

/// Byte sequence features are capped at this many bytes.
pub const MAX_BYTES_FEATURE_SIZE: usize = 100;

/// The granularity at which a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    File,
    Function,
    BasicBlock,
}

impl Scope {
    /// Whether `feature` belongs to the vocabulary of this scope.
    ///
    /// Basic-block features are also valid at function scope; file scope
    /// admits only file-level observations and matched rules.
    pub fn supports(&self, feature: &Feature) -> bool {
        use FeatureKind as F;
        match self {
            Scope::File => matches!(
                &feature.kind,
                F::MatchedRule(_)
                    | F::Export(_)
                    | F::Import(_)
                    | F::Section(_)
                    | F::FunctionName(_)
                    | F::String(_)
                    | F::Substring(_)
                    | F::Regex(_)
                    | F::Characteristic(Characteristic::EmbeddedPe)
            ),
            Scope::Function => match &feature.kind {
                F::BasicBlock => true,
                F::Characteristic(c) => matches!(
                    c,
                    Characteristic::CallsFrom
                        | Characteristic::CallsTo
                        | Characteristic::Loop
                        | Characteristic::RecursiveCall
                ) || Scope::BasicBlock.supports(feature),
                _ => Scope::BasicBlock.supports(feature),
            },
            Scope::BasicBlock => matches!(
                &feature.kind,
                F::MatchedRule(_)
                    | F::Api(_)
                    | F::Number { .. }
                    | F::String(_)
                    | F::Substring(_)
                    | F::Regex(_)
                    | F::Bytes(_)
                    | F::Offset { .. }
                    | F::Mnemonic(_)
                    | F::Characteristic(
                        Characteristic::Nzxor
                            | Characteristic::PebAccess
                            | Characteristic::FsAccess
                            | Characteristic::GsAccess
                            | Characteristic::CrossSectionFlow
                            | Characteristic::TightLoop
                            | Characteristic::StackString
                            | Characteristic::IndirectCall,
                    )
            ),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::File => write!(f, "file"),
            Scope::Function => write!(f, "function"),
            Scope::BasicBlock => write!(f, "basic block"),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Scope::File),
            "function" => Ok(Scope::Function),
            "basic block" => Ok(Scope::BasicBlock),
            other => Err(other.to_string()),
        }
    }
}

/// Architecture qualifier for number and offset features, written as a key
/// suffix like `number/32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Global,
    Bits32,
    Bits64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Global => write!(f, "global"),
            Arch::Bits32 => write!(f, "32"),
            Arch::Bits64 => write!(f, "64"),
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Arch::Global),
            "32" => Ok(Arch::Bits32),
            "64" => Ok(Arch::Bits64),
            other => Err(other.to_string()),
        }
    }
}

/// A named boolean property of a program location, not tied to a specific
/// token. The set is closed; rules referencing an unknown characteristic
/// are invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    EmbeddedPe,
    Loop,
    RecursiveCall,
    CallsFrom,
    CallsTo,
    Nzxor,
    PebAccess,
    FsAccess,
    GsAccess,
    CrossSectionFlow,
    TightLoop,
    StackString,
    IndirectCall,
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Characteristic::EmbeddedPe => "embedded pe",
            Characteristic::Loop => "loop",
            Characteristic::RecursiveCall => "recursive call",
            Characteristic::CallsFrom => "calls from",
            Characteristic::CallsTo => "calls to",
            Characteristic::Nzxor => "nzxor",
            Characteristic::PebAccess => "peb access",
            Characteristic::FsAccess => "fs access",
            Characteristic::GsAccess => "gs access",
            Characteristic::CrossSectionFlow => "cross section flow",
            Characteristic::TightLoop => "tight loop",
            Characteristic::StackString => "stack string",
            Characteristic::IndirectCall => "indirect call",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Characteristic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embedded pe" => Ok(Characteristic::EmbeddedPe),
            "loop" => Ok(Characteristic::Loop),
            "recursive call" => Ok(Characteristic::RecursiveCall),
            "calls from" => Ok(Characteristic::CallsFrom),
            "calls to" => Ok(Characteristic::CallsTo),
            "nzxor" => Ok(Characteristic::Nzxor),
            "peb access" => Ok(Characteristic::PebAccess),
            "fs access" => Ok(Characteristic::FsAccess),
            "gs access" => Ok(Characteristic::GsAccess),
            "cross section flow" => Ok(Characteristic::CrossSectionFlow),
            "tight loop" => Ok(Characteristic::TightLoop),
            "stack string" => Ok(Characteristic::StackString),
            "indirect call" => Ok(Characteristic::IndirectCall),
            other => Err(other.to_string()),
        }
    }
}

/// A regex string feature: identity is the pattern source as written in the
/// rule (`/pattern/` or `/pattern/i`); the compiled matcher rides along.
#[derive(Debug, Clone)]
pub struct RegexFeature {
    pattern: String,
    re: regex::Regex,
}

impl RegexFeature {
    /// Compile a `/pattern/` or `/pattern/i` string feature.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let inner = pattern
            .strip_prefix('/')
            .and_then(|p| p.strip_suffix("/i").map(|p| format!("(?i){p}")).or_else(|| {
                p.strip_suffix('/').map(str::to_string)
            }))
            .unwrap_or_else(|| pattern.to_string());
        let re = regex::Regex::new(&inner)?;
        Ok(Self {
            pattern: pattern.to_string(),
            re,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.re.is_match(haystack)
    }
}

impl PartialEq for RegexFeature {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for RegexFeature {}

impl Hash for RegexFeature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

/// The payload of a feature; see the module docs for the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Api(String),
    String(String),
    Substring(String),
    Regex(RegexFeature),
    Bytes(Vec<u8>),
    Number { value: i64, arch: Option<Arch> },
    Offset { value: i64, arch: Option<Arch> },
    Mnemonic(String),
    /// Unit marker emitted once per basic block; counted via
    /// `count(basic blocks)`.
    BasicBlock,
    Characteristic(Characteristic),
    Export(String),
    Import(String),
    Section(String),
    FunctionName(String),
    /// Synthetic feature injected after a rule matches; the payload is a
    /// rule name or namespace.
    MatchedRule(String),
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Api(v) => write!(f, "api({v})"),
            FeatureKind::String(v) => write!(f, "string({v})"),
            FeatureKind::Substring(v) => write!(f, "substring({v})"),
            FeatureKind::Regex(v) => write!(f, "string({})", v.pattern()),
            FeatureKind::Bytes(v) => {
                write!(f, "bytes(")?;
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                write!(f, ")")
            }
            FeatureKind::Number { value, arch: None } => write!(f, "number({value:#x})"),
            FeatureKind::Number {
                value,
                arch: Some(arch),
            } => write!(f, "number/{arch}({value:#x})"),
            FeatureKind::Offset { value, arch: None } => write!(f, "offset({value:#x})"),
            FeatureKind::Offset {
                value,
                arch: Some(arch),
            } => write!(f, "offset/{arch}({value:#x})"),
            FeatureKind::Mnemonic(v) => write!(f, "mnemonic({v})"),
            FeatureKind::BasicBlock => write!(f, "basic blocks"),
            FeatureKind::Characteristic(v) => write!(f, "characteristic({v})"),
            FeatureKind::Export(v) => write!(f, "export({v})"),
            FeatureKind::Import(v) => write!(f, "import({v})"),
            FeatureKind::Section(v) => write!(f, "section({v})"),
            FeatureKind::FunctionName(v) => write!(f, "function-name({v})"),
            FeatureKind::MatchedRule(v) => write!(f, "match({v})"),
        }
    }
}

/// A feature plus its optional human description. Equality and hashing are
/// over the kind only.
#[derive(Debug, Clone, Eq)]
pub struct Feature {
    pub kind: FeatureKind,
    pub description: Option<String>,
}

impl Feature {
    pub fn new(kind: FeatureKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    pub fn with_description(kind: FeatureKind, description: Option<String>) -> Self {
        Self { kind, description }
    }

    pub fn api(name: impl Into<String>) -> Self {
        Self::new(FeatureKind::Api(name.into()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(FeatureKind::String(value.into()))
    }

    pub fn mnemonic(value: impl Into<String>) -> Self {
        Self::new(FeatureKind::Mnemonic(value.into()))
    }

    pub fn number(value: i64) -> Self {
        Self::new(FeatureKind::Number { value, arch: None })
    }

    pub fn offset(value: i64) -> Self {
        Self::new(FeatureKind::Offset { value, arch: None })
    }

    pub fn characteristic(c: Characteristic) -> Self {
        Self::new(FeatureKind::Characteristic(c))
    }

    pub fn matched_rule(name: impl Into<String>) -> Self {
        Self::new(FeatureKind::MatchedRule(name.into()))
    }
}

impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Hash for Feature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}
