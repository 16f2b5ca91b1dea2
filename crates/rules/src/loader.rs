// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! Building statement trees from rule documents.
//!
//! The rule grammar has computed keys (`7 or more`, `count(mnemonic(xor))`)
//! that serde derive cannot express, so this module walks the parsed YAML
//! value tree by hand. Keys are recognized case-sensitively and exactly.
//!
//! Inline descriptions use the ` = ` separator, like `number: 42 = FLAG`.
//! `string` is the one feature that takes its scalar verbatim — a string
//! may legitimately contain ` = ` — so a non-string scalar under `string`
//! is rejected as ambiguous rather than coerced.

use capa_engine::{
    Arch, Characteristic, Feature, FeatureKind, RegexFeature, Scope, Statement,
    MAX_BYTES_FEATURE_SIZE,
};
use serde_yaml::{Mapping, Value};

use crate::error::InvalidRule;

/// Separator between a feature value and its inline description.
const DESCRIPTION_SEPARATOR: &str = " = ";

/// Build the statement tree for one node of the `features` subtree.
pub(crate) fn build_statement(node: &Value, scope: Scope) -> Result<Statement, InvalidRule> {
    let map = node
        .as_mapping()
        .ok_or_else(|| InvalidRule::UnexpectedStatement(scalar_repr(node)))?;
    if map.len() > 2 {
        return Err(InvalidRule::TooManyStatements);
    }
    let (key, value) = map
        .iter()
        .next()
        .ok_or_else(|| InvalidRule::UnexpectedStatement(String::from("{}")))?;
    let key = key
        .as_str()
        .ok_or_else(|| InvalidRule::UnexpectedStatement(scalar_repr(key)))?;

    match key {
        "and" => {
            let (children, description) = build_children(value, scope)?;
            Ok(Statement::And {
                children,
                description,
            })
        }
        "or" => {
            let (children, description) = build_children(value, scope)?;
            Ok(Statement::Or {
                children,
                description,
            })
        }
        "not" => {
            let (mut children, description) = build_children(value, scope)?;
            if children.len() != 1 {
                return Err(InvalidRule::NotWithoutSingleChild);
            }
            Ok(Statement::Not {
                child: Box::new(children.remove(0)),
                description,
            })
        }
        "optional" => {
            // alias for `0 or more`, useful for documenting behaviors that
            // are commonly but not necessarily present
            let (children, description) = build_children(value, scope)?;
            Ok(Statement::Some {
                count: 0,
                children,
                description,
            })
        }
        "function" => build_subscope(value, scope, Scope::File, Scope::Function),
        "basic block" => build_subscope(value, scope, Scope::Function, Scope::BasicBlock),
        "string" if !value.is_string() => Err(InvalidRule::AmbiguousString(scalar_repr(value))),
        _ => {
            if let Some(count) = key.strip_suffix(" or more") {
                if let Ok(count) = count.trim().parse::<usize>() {
                    let (children, description) = build_children(value, scope)?;
                    return Ok(Statement::Some {
                        count,
                        children,
                        description,
                    });
                }
            }
            if let Some(term) = key
                .strip_prefix("count(")
                .and_then(|k| k.strip_suffix(')'))
            {
                return build_count(term, value, scope);
            }
            let feature = parse_feature(key, value, map.get("description"), scope)?;
            Ok(Statement::Feature(feature))
        }
    }
}

fn build_subscope(
    value: &Value,
    scope: Scope,
    required: Scope,
    subscope: Scope,
) -> Result<Statement, InvalidRule> {
    if scope != required {
        return Err(InvalidRule::InvalidSubscope { subscope, required });
    }
    // children are validated against the nested scope's vocabulary
    let (mut children, _description) = build_children(value, subscope)?;
    if children.len() != 1 {
        return Err(InvalidRule::SubscopeWithoutSingleChild);
    }
    Ok(Statement::Subscope {
        scope: subscope,
        child: Box::new(children.remove(0)),
    })
}

/// Build the children of a logic node, extracting the optional statement
/// description entry (`- description: text`) from the list first.
fn build_children(
    value: &Value,
    scope: Scope,
) -> Result<(Vec<Statement>, Option<String>), InvalidRule> {
    let items = value
        .as_sequence()
        .ok_or_else(|| InvalidRule::UnexpectedStatement(scalar_repr(value)))?;
    let mut items: Vec<&Value> = items.iter().collect();
    let description = pop_statement_description(&mut items)?;
    let children = items
        .into_iter()
        .map(|item| build_statement(item, scope))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((children, description))
}

/// A statement description is a one-entry mapping `{description: text}`
/// among the children; a statement can have at most one.
fn pop_statement_description(
    items: &mut Vec<&Value>,
) -> Result<Option<String>, InvalidRule> {
    let mut description = None;
    let mut index = None;
    for (i, item) in items.iter().enumerate() {
        let Some(map) = item.as_mapping() else {
            continue;
        };
        if map.len() != 1 {
            continue;
        }
        let Some(value) = map.get("description") else {
            continue;
        };
        if description.is_some() {
            return Err(InvalidRule::MultipleStatementDescriptions);
        }
        let text = value
            .as_str()
            .ok_or_else(|| InvalidRule::NonStringValue(String::from("description")))?;
        description = Some(text.to_string());
        index = Some(i);
    }
    if let Some(i) = index {
        items.remove(i);
    }
    Ok(description)
}

/// `count(term)` or `count(term(arg))`, with a range expression as value.
fn build_count(term: &str, value: &Value, scope: Scope) -> Result<Statement, InvalidRule> {
    let (term, arg) = match term.split_once('(') {
        Some((term, rest)) => {
            let arg = rest
                .strip_suffix(')')
                .ok_or_else(|| InvalidRule::UnexpectedStatement(format!("count({term}")))?;
            (term, Some(arg))
        }
        None => (term, None),
    };

    let feature = match arg {
        // the arg arrives as a bare string, so numeric values embedded
        // within it cannot rely on the yaml parser: count(number(0x11223344))
        Some(arg) => parse_feature_from_str(term, arg)?,
        None if term == "basic blocks" => Feature::new(FeatureKind::BasicBlock),
        None => {
            return Err(InvalidRule::UnexpectedStatement(format!("count({term})")));
        }
    };
    ensure_feature_valid_for_scope(scope, &feature)?;

    let (min, max) = parse_count_value(value)?;
    Ok(Statement::Range {
        feature,
        min,
        max,
        description: None,
    })
}

fn parse_count_value(
    value: &Value,
) -> Result<(Option<usize>, Option<usize>), InvalidRule> {
    if let Some(count) = value.as_u64() {
        let count = count as usize;
        return Ok((Some(count), Some(count)));
    }
    if value.as_i64().is_some() {
        // negative count
        return Err(InvalidRule::UnexpectedRange(scalar_repr(value)));
    }
    let count = value
        .as_str()
        .ok_or_else(|| InvalidRule::UnexpectedRange(scalar_repr(value)))?;
    if let Some(min) = count.strip_suffix(" or more") {
        let min = parse_bound(min, InvalidRule::RangeMinNegative)?
            .ok_or_else(|| InvalidRule::UnexpectedRange(count.to_string()))?;
        Ok((Some(min), None))
    } else if let Some(max) = count.strip_suffix(" or fewer") {
        let max = parse_bound(max, InvalidRule::RangeMaxNegative)?
            .ok_or_else(|| InvalidRule::UnexpectedRange(count.to_string()))?;
        Ok((None, Some(max)))
    } else if count.starts_with('(') {
        parse_range(count)
    } else {
        Err(InvalidRule::UnexpectedRange(count.to_string()))
    }
}

/// Parse `"(min, max)"` where either side may be empty for an open bound.
fn parse_range(s: &str) -> Result<(Option<usize>, Option<usize>), InvalidRule> {
    let inner = s
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| InvalidRule::InvalidRange(s.to_string()))?;
    let (min_spec, max_spec) = inner.split_once(',').unwrap_or((inner, ""));

    let min = parse_bound(min_spec, InvalidRule::RangeMinNegative)?;
    let max = parse_bound(max_spec, InvalidRule::RangeMaxNegative)?;

    if let (Some(min), Some(max)) = (min, max) {
        if max < min {
            return Err(InvalidRule::RangeMaxLessThanMin);
        }
    }
    Ok((min, max))
}

/// An empty bound means unbounded; a negative one yields `negative`.
fn parse_bound(spec: &str, negative: InvalidRule) -> Result<Option<usize>, InvalidRule> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(None);
    }
    let value = parse_int(spec)?;
    if value < 0 {
        return Err(negative);
    }
    Ok(Some(value as usize))
}

/// Decimal by default; `0x` prefix for hex; optional leading `-`. Hex
/// parses through `u64` and reinterprets two's-complement so full-width
/// immediates like `0xFFFFFFFFFFFFFFFF` are representable.
pub(crate) fn parse_int(s: &str) -> Result<i64, InvalidRule> {
    let trimmed = s.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        digits.parse::<u64>()
    }
    .map_err(|_| InvalidRule::InvalidNumber(s.to_string()))?;
    let value = magnitude as i64;
    Ok(if negative { value.wrapping_neg() } else { value })
}

/// Decode a hex byte sequence, spaces ignored.
pub(crate) fn parse_bytes(s: &str) -> Result<Vec<u8>, InvalidRule> {
    let compact = s.replace(' ', "");
    if !compact.is_ascii() || compact.len() % 2 != 0 {
        return Err(InvalidRule::InvalidBytes(s.to_string()));
    }
    let bytes = (0..compact.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&compact[i..i + 2], 16)
                .map_err(|_| InvalidRule::InvalidBytes(s.to_string()))
        })
        .collect::<Result<Vec<u8>, _>>()?;
    if bytes.len() > MAX_BYTES_FEATURE_SIZE {
        return Err(InvalidRule::BytesTooLong(MAX_BYTES_FEATURE_SIZE));
    }
    Ok(bytes)
}

/// Split the ` = description` suffix off a scalar, honoring a sibling
/// `description` key; supplying both is an error, as is an empty inline
/// description.
fn split_inline_description(
    raw: &str,
    sibling: Option<&Value>,
) -> Result<(String, Option<String>), InvalidRule> {
    let sibling = match sibling {
        Some(value) => Some(
            value
                .as_str()
                .ok_or_else(|| InvalidRule::NonStringValue(String::from("description")))?
                .to_string(),
        ),
        None => None,
    };
    if let Some((value, description)) = raw.split_once(DESCRIPTION_SEPARATOR) {
        if sibling.is_some() {
            return Err(InvalidRule::DuplicateDescription(raw.to_string()));
        }
        if description.is_empty() {
            return Err(InvalidRule::EmptyDescription(raw.to_string()));
        }
        Ok((value.to_string(), Some(description.to_string())))
    } else {
        Ok((raw.to_string(), sibling))
    }
}

/// Build a feature leaf from a `features` entry: `key: value` with an
/// optional sibling `description`.
fn parse_feature(
    key: &str,
    value: &Value,
    sibling_description: Option<&Value>,
    scope: Scope,
) -> Result<Feature, InvalidRule> {
    let feature = match key {
        // string features cannot have inline descriptions, so the entire
        // scalar is the string, like: `string: foo = bar` -> "foo = bar"
        "string" => {
            let raw = value
                .as_str()
                .ok_or_else(|| InvalidRule::AmbiguousString(scalar_repr(value)))?;
            string_feature(raw, sibling_str(sibling_description)?)?
        }
        "number" | "offset" => {
            numeric_feature(key, None, value, sibling_description)?
        }
        _ if key.starts_with("number/") || key.starts_with("offset/") => {
            let (term, arch) = key.split_at(key.find('/').unwrap_or_default());
            let arch = arch[1..]
                .parse::<Arch>()
                .map_err(InvalidRule::InvalidArch)?;
            numeric_feature(term, Some(arch), value, sibling_description)?
        }
        "basic blocks" => {
            // the marker has no payload; it only makes sense under count()
            return Err(InvalidRule::UnexpectedStatement(key.to_string()));
        }
        _ => {
            let raw = value
                .as_str()
                .ok_or_else(|| InvalidRule::NonStringValue(key.to_string()))?;
            parse_feature_from_str_with_sibling(key, raw, sibling_description)?
        }
    };
    ensure_feature_valid_for_scope(scope, &feature)?;
    Ok(feature)
}

fn sibling_str(sibling: Option<&Value>) -> Result<Option<String>, InvalidRule> {
    match sibling {
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| InvalidRule::NonStringValue(String::from("description"))),
        None => Ok(None),
    }
}

fn numeric_feature(
    term: &str,
    arch: Option<Arch>,
    value: &Value,
    sibling_description: Option<&Value>,
) -> Result<Feature, InvalidRule> {
    let (value, description) = if let Some(raw) = value.as_str() {
        let (value, description) = split_inline_description(raw, sibling_description)?;
        (parse_int(&value)?, description)
    } else if let Some(int) = value.as_i64() {
        (int, sibling_str(sibling_description)?)
    } else if let Some(int) = value.as_u64() {
        (int as i64, sibling_str(sibling_description)?)
    } else {
        return Err(InvalidRule::InvalidNumber(scalar_repr(value)));
    };
    let kind = match term {
        "number" => FeatureKind::Number { value, arch },
        _ => FeatureKind::Offset { value, arch },
    };
    Ok(Feature::with_description(kind, description))
}

/// `string: /pattern/` and `/pattern/i` are regex features; anything else
/// is a literal string.
fn string_feature(raw: &str, description: Option<String>) -> Result<Feature, InvalidRule> {
    let kind = if raw.starts_with('/') && (raw.ends_with('/') || raw.ends_with("/i")) {
        let re = RegexFeature::new(raw).map_err(|e| InvalidRule::InvalidRegex {
            pattern: raw.to_string(),
            message: e.to_string(),
        })?;
        FeatureKind::Regex(re)
    } else {
        FeatureKind::String(raw.to_string())
    };
    Ok(Feature::with_description(kind, description))
}

fn parse_feature_from_str_with_sibling(
    term: &str,
    raw: &str,
    sibling_description: Option<&Value>,
) -> Result<Feature, InvalidRule> {
    match term {
        "string" => string_feature(raw, sibling_str(sibling_description)?),
        _ => {
            let (value, description) = split_inline_description(raw, sibling_description)?;
            feature_from_parts(term, &value, description)
        }
    }
}

/// Build a feature from a textual term and value, as they appear inside
/// `count(term(value))`.
pub(crate) fn parse_feature_from_str(term: &str, raw: &str) -> Result<Feature, InvalidRule> {
    parse_feature_from_str_with_sibling(term, raw, None)
}

fn feature_from_parts(
    term: &str,
    value: &str,
    description: Option<String>,
) -> Result<Feature, InvalidRule> {
    let kind = match term {
        "api" => FeatureKind::Api(value.to_string()),
        "substring" => FeatureKind::Substring(value.to_string()),
        "bytes" => FeatureKind::Bytes(parse_bytes(value)?),
        "number" => FeatureKind::Number {
            value: parse_int(value)?,
            arch: None,
        },
        "offset" => FeatureKind::Offset {
            value: parse_int(value)?,
            arch: None,
        },
        "mnemonic" => FeatureKind::Mnemonic(value.to_string()),
        "characteristic" => FeatureKind::Characteristic(
            value
                .parse::<Characteristic>()
                .map_err(InvalidRule::InvalidCharacteristic)?,
        ),
        "export" => FeatureKind::Export(value.to_string()),
        "import" => FeatureKind::Import(value.to_string()),
        "section" => FeatureKind::Section(value.to_string()),
        "function-name" => FeatureKind::FunctionName(value.to_string()),
        "match" => FeatureKind::MatchedRule(value.to_string()),
        _ if term.starts_with("number/") || term.starts_with("offset/") => {
            let (base, arch) = term.split_at(term.find('/').unwrap_or_default());
            let arch = arch[1..]
                .parse::<Arch>()
                .map_err(InvalidRule::InvalidArch)?;
            match base {
                "number" => FeatureKind::Number {
                    value: parse_int(value)?,
                    arch: Some(arch),
                },
                _ => FeatureKind::Offset {
                    value: parse_int(value)?,
                    arch: Some(arch),
                },
            }
        }
        other => return Err(InvalidRule::UnexpectedStatement(other.to_string())),
    };
    Ok(Feature::with_description(kind, description))
}

pub(crate) fn ensure_feature_valid_for_scope(
    scope: Scope,
    feature: &Feature,
) -> Result<(), InvalidRule> {
    if scope.supports(feature) {
        Ok(())
    } else {
        Err(InvalidRule::FeatureNotSupportedForScope {
            feature: feature.to_string(),
            scope,
        })
    }
}

fn scalar_repr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Convenience used by `Rule::from_yaml`: validate and fetch the mapping
/// under `rule`.
pub(crate) fn rule_mapping(doc: &Value) -> Result<&Mapping, InvalidRule> {
    doc.get("rule")
        .and_then(Value::as_mapping)
        .ok_or(InvalidRule::MissingRule)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(yaml: &str, scope: Scope) -> Result<Statement, InvalidRule> {
        let node: Value = serde_yaml::from_str(yaml).expect("valid yaml");
        build_statement(&node, scope)
    }

    #[test]
    fn n_or_more_is_some() {
        let statement = build(
            "2 or more:\n  - mnemonic: mov\n  - mnemonic: xor\n  - mnemonic: shl\n",
            Scope::Function,
        )
        .expect("valid statement");
        assert!(matches!(statement, Statement::Some { count: 2, .. }));
    }

    #[test]
    fn optional_is_some_zero() {
        let statement = build("optional:\n  - api: WriteFile\n", Scope::Function)
            .expect("valid statement");
        assert!(matches!(statement, Statement::Some { count: 0, .. }));
    }

    #[test]
    fn statement_description_is_extracted() {
        let statement = build(
            "or:\n  - description: statement description\n  - number: 1\n",
            Scope::Function,
        )
        .expect("valid statement");
        let Statement::Or {
            children,
            description,
        } = statement
        else {
            panic!("expected or")
        };
        assert_eq!(description.as_deref(), Some("statement description"));
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn only_one_statement_description() {
        let err = build(
            "or:\n  - description: one\n  - description: two\n  - number: 1\n",
            Scope::Function,
        )
        .expect_err("duplicate descriptions");
        assert!(matches!(err, InvalidRule::MultipleStatementDescriptions));
    }

    #[test]
    fn inline_description_on_feature() {
        let statement =
            build("number: 0x10 = SOME_CONSTANT\n", Scope::Function).expect("valid statement");
        let Statement::Feature(feature) = statement else {
            panic!("expected feature")
        };
        assert_eq!(
            feature.kind,
            FeatureKind::Number {
                value: 0x10,
                arch: None
            }
        );
        assert_eq!(feature.description.as_deref(), Some("SOME_CONSTANT"));
    }

    #[test]
    fn inline_and_sibling_descriptions_conflict() {
        let err = build(
            "number: 10 = CONST_FOO\ndescription: CONST_FOO\n",
            Scope::Function,
        )
        .expect_err("two descriptions");
        assert!(matches!(err, InvalidRule::DuplicateDescription(_)));
    }

    #[test]
    fn empty_inline_description_rejected() {
        let node: Value = serde_yaml::from_str("number: '10 = '").expect("valid yaml");
        let err = build_statement(&node, Scope::Function).expect_err("empty description");
        assert!(matches!(err, InvalidRule::EmptyDescription(_)));
    }

    #[test]
    fn string_takes_scalar_verbatim() {
        let statement = build("string: foo = bar\n", Scope::Function).expect("valid statement");
        let Statement::Feature(feature) = statement else {
            panic!("expected feature")
        };
        assert_eq!(feature.kind, FeatureKind::String("foo = bar".to_string()));
    }

    #[test]
    fn non_string_string_value_is_ambiguous() {
        let err = build("string: 123\n", Scope::Function).expect_err("ambiguous");
        assert!(matches!(err, InvalidRule::AmbiguousString(_)));
    }

    #[test]
    fn regex_string_form() {
        let statement = build("string: /VirtualAlloc/i\n", Scope::Function).expect("valid");
        let Statement::Feature(feature) = statement else {
            panic!("expected feature")
        };
        assert!(matches!(feature.kind, FeatureKind::Regex(_)));
    }

    #[test]
    fn substring_feature() {
        let statement = build("substring: passwd\n", Scope::File).expect("valid");
        let Statement::Feature(feature) = statement else {
            panic!("expected feature")
        };
        assert_eq!(feature.kind, FeatureKind::Substring("passwd".to_string()));
    }

    #[test]
    fn negative_offset() {
        let statement = build("offset: -0x30\n", Scope::Function).expect("valid statement");
        let Statement::Feature(feature) = statement else {
            panic!("expected feature")
        };
        assert_eq!(
            feature.kind,
            FeatureKind::Offset {
                value: -0x30,
                arch: None
            }
        );
    }

    #[test]
    fn arch_qualified_numbers() {
        let statement = build("number/64: 0x100\n", Scope::Function).expect("valid statement");
        let Statement::Feature(feature) = statement else {
            panic!("expected feature")
        };
        assert_eq!(
            feature.kind,
            FeatureKind::Number {
                value: 0x100,
                arch: Some(Arch::Bits64)
            }
        );

        let err = build("number/16: 1\n", Scope::Function).expect_err("bad arch");
        assert!(matches!(err, InvalidRule::InvalidArch(_)));
    }

    #[test]
    fn full_width_hex_number() {
        let statement =
            build("number: 0xFFFFFFFFFFFFFFFF\n", Scope::Function).expect("valid statement");
        let Statement::Feature(feature) = statement else {
            panic!("expected feature")
        };
        assert_eq!(
            feature.kind,
            FeatureKind::Number {
                value: -1,
                arch: None
            }
        );
    }

    #[test]
    fn bytes_boundaries() {
        let hundred = "aa".repeat(MAX_BYTES_FEATURE_SIZE);
        assert_eq!(
            parse_bytes(&hundred).expect("exactly 100 bytes").len(),
            MAX_BYTES_FEATURE_SIZE
        );

        let too_long = "aa".repeat(MAX_BYTES_FEATURE_SIZE + 1);
        assert!(matches!(
            parse_bytes(&too_long),
            Err(InvalidRule::BytesTooLong(_))
        ));

        assert!(matches!(
            parse_bytes("zz"),
            Err(InvalidRule::InvalidBytes(_))
        ));

        let spaced = parse_bytes("01 02 03 04").expect("spaces ignored");
        assert_eq!(spaced, vec![1, 2, 3, 4]);
    }

    #[test]
    fn count_forms() {
        let exact = build("count(mnemonic(xor)): 3\n", Scope::Function).expect("valid");
        assert!(matches!(
            exact,
            Statement::Range {
                min: Some(3),
                max: Some(3),
                ..
            }
        ));

        let or_more = build("count(mnemonic(xor)): 3 or more\n", Scope::Function).expect("valid");
        assert!(matches!(
            or_more,
            Statement::Range {
                min: Some(3),
                max: None,
                ..
            }
        ));

        let or_fewer =
            build("count(mnemonic(xor)): 3 or fewer\n", Scope::Function).expect("valid");
        assert!(matches!(
            or_fewer,
            Statement::Range {
                min: None,
                max: Some(3),
                ..
            }
        ));

        let between = build("count(mnemonic(xor)): (2, 5)\n", Scope::Function).expect("valid");
        assert!(matches!(
            between,
            Statement::Range {
                min: Some(2),
                max: Some(5),
                ..
            }
        ));

        let no_lower = build("count(mnemonic(xor)): (, 5)\n", Scope::Function).expect("valid");
        assert!(matches!(
            no_lower,
            Statement::Range {
                min: None,
                max: Some(5),
                ..
            }
        ));

        let no_upper = build("count(mnemonic(xor)): (2, )\n", Scope::Function).expect("valid");
        assert!(matches!(
            no_upper,
            Statement::Range {
                min: Some(2),
                max: None,
                ..
            }
        ));
    }

    #[test]
    fn count_of_string_builds_string_feature() {
        let statement = build("count(string(foo)): 2\n", Scope::Function).expect("valid");
        let Statement::Range { feature, .. } = statement else {
            panic!("expected range")
        };
        assert_eq!(feature.kind, FeatureKind::String("foo".to_string()));
    }

    #[test]
    fn count_with_embedded_description() {
        let statement =
            build("count(number(0x100 = STATUS_OK)): 2 or more\n", Scope::Function)
                .expect("valid");
        let Statement::Range { feature, .. } = statement else {
            panic!("expected range")
        };
        assert_eq!(feature.description.as_deref(), Some("STATUS_OK"));
    }

    #[test]
    fn count_of_basic_blocks() {
        let statement = build("count(basic blocks): 3 or more\n", Scope::Function).expect("valid");
        let Statement::Range { feature, .. } = statement else {
            panic!("expected range")
        };
        assert_eq!(feature.kind, FeatureKind::BasicBlock);
    }

    #[test]
    fn malformed_ranges() {
        assert!(matches!(
            build("count(mnemonic(xor)): whenever\n", Scope::Function),
            Err(InvalidRule::UnexpectedRange(_))
        ));
        assert!(matches!(
            build("count(mnemonic(xor)): (5, 2)\n", Scope::Function),
            Err(InvalidRule::RangeMaxLessThanMin)
        ));
        assert!(matches!(
            build("count(mnemonic(xor)): (-1, 2)\n", Scope::Function),
            Err(InvalidRule::RangeMinNegative)
        ));
    }

    #[test]
    fn unknown_feature_key() {
        let err = build("instruction: mov\n", Scope::Function).expect_err("unknown key");
        assert!(matches!(err, InvalidRule::UnexpectedStatement(_)));
    }

    #[test]
    fn unknown_characteristic() {
        let err = build("characteristic: teleportation\n", Scope::Function)
            .expect_err("unknown characteristic");
        assert!(matches!(err, InvalidRule::InvalidCharacteristic(_)));
    }

    #[test]
    fn feature_scope_mismatch() {
        let err = build("mnemonic: mov\n", Scope::File).expect_err("mnemonic at file scope");
        assert!(matches!(
            err,
            InvalidRule::FeatureNotSupportedForScope { .. }
        ));
    }

    #[test]
    fn characteristic_scope_mismatch() {
        let err = build("characteristic: loop\n", Scope::BasicBlock)
            .expect_err("loop is a function characteristic");
        assert!(matches!(
            err,
            InvalidRule::FeatureNotSupportedForScope { .. }
        ));
    }

    #[test]
    fn too_many_statement_keys() {
        let err = build(
            "number: 1\ndescription: one\nextra: two\n",
            Scope::Function,
        )
        .expect_err("three keys");
        assert!(matches!(err, InvalidRule::TooManyStatements));
    }

    #[test]
    fn subscope_nesting_is_validated() {
        assert!(build("function:\n  - and:\n    - api: CreateFileA\n", Scope::File).is_ok());
        assert!(matches!(
            build("function:\n  - api: CreateFileA\n", Scope::Function),
            Err(InvalidRule::InvalidSubscope { .. })
        ));
        assert!(matches!(
            build("basic block:\n  - api: CreateFileA\n", Scope::File),
            Err(InvalidRule::InvalidSubscope { .. })
        ));
        assert!(matches!(
            build(
                "function:\n  - api: CreateFileA\n  - api: CloseHandle\n",
                Scope::File
            ),
            Err(InvalidRule::SubscopeWithoutSingleChild)
        ));
    }

    #[test]
    fn subscope_children_use_nested_vocabulary() {
        // mnemonic is not a file-scope feature, but inside a function
        // subscope of a file rule it is fine
        assert!(build("function:\n  - mnemonic: xor\n", Scope::File).is_ok());
    }

    #[test]
    fn not_requires_single_child() {
        assert!(matches!(
            build(
                "not:\n  - api: CreateFileA\n  - api: CloseHandle\n",
                Scope::Function
            ),
            Err(InvalidRule::NotWithoutSingleChild)
        ));
    }
}
