// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! Canonical re-emission of rule source.
//!
//! No YAML emitter in the ecosystem round-trips comments, so re-emission
//! patches the retained source text instead of re-serializing the whole
//! document: the `meta:` block is regenerated from the rule's metadata in
//! the preferred key order, and everything else — the `features:` subtree
//! with its comments, statement ordering, inline descriptions, and
//! negative hex literals — is emitted verbatim.
//!
//! Updates to a rule are therefore synced for meta fields but not for rule
//! logic; programmatic generation of rules is not supported.

use serde_yaml::{Mapping, Value};

use crate::error::InvalidRule;
use crate::rule::{Rule, HIDDEN_META_KEYS, META_KEYS};

pub(crate) fn to_yaml(rule: &Rule) -> Result<String, InvalidRule> {
    if rule.definition().is_empty() {
        return Err(InvalidRule::NoDefinition(rule.name.clone()));
    }

    // normalize CRLF to LF
    let doc = rule.definition().replace("\r\n", "\n");
    let lines: Vec<&str> = doc.lines().collect();

    let meta_start = lines
        .iter()
        .position(|line| line.trim() == "meta:")
        .ok_or(InvalidRule::MissingMeta)?;
    let meta_indent = indent_of(lines[meta_start]);

    // the block runs until the next non-empty line at the same indent or
    // less (in practice, `features:`)
    let mut meta_end = lines.len();
    for (offset, line) in lines.iter().enumerate().skip(meta_start + 1) {
        if !line.trim().is_empty() && indent_of(line) <= meta_indent {
            meta_end = offset;
            break;
        }
    }

    // the name and scope of the rule instance override anything in meta
    let mut meta = rule.meta.mapping().clone();
    meta.insert(Value::from("name"), Value::from(rule.name.as_str()));
    meta.insert(Value::from("scope"), Value::from(rule.scope.to_string()));

    let entry_indent = " ".repeat(meta_indent + 2);
    let mut out = String::new();
    for line in &lines[..=meta_start] {
        out.push_str(line);
        out.push('\n');
    }
    for key in ordered_keys(&meta) {
        if let Some(value) = meta.get(key.as_str()) {
            render_entry(&mut out, &entry_indent, &key, value)?;
        }
    }
    for line in &lines[meta_end..] {
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

/// Preferred keys first, in their canonical order; any custom keys after,
/// alphabetically. Hidden internal keys are stripped from the output (they
/// stay on the in-memory rule).
fn ordered_keys(meta: &Mapping) -> Vec<String> {
    let mut keys = Vec::new();
    for key in META_KEYS {
        if meta.contains_key(*key) {
            keys.push((*key).to_string());
        }
    }
    let mut rest: Vec<String> = meta
        .keys()
        .filter_map(Value::as_str)
        .filter(|k| !META_KEYS.contains(k) && !HIDDEN_META_KEYS.contains(k))
        .map(str::to_string)
        .collect();
    rest.sort_unstable();
    keys.extend(rest);
    keys
}

fn render_entry(
    out: &mut String,
    indent: &str,
    key: &str,
    value: &Value,
) -> Result<(), InvalidRule> {
    let rendered = serde_yaml::to_string(value)?;
    let rendered = rendered.trim_end_matches('\n');
    if rendered.contains('\n') || (value.is_sequence() && !rendered.starts_with("[]")) {
        // block values (lists, multi-line scalars) sit indented below the key
        out.push_str(indent);
        out.push_str(key);
        out.push_str(":\n");
        for line in rendered.lines() {
            out.push_str(indent);
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    } else {
        out.push_str(indent);
        out.push_str(key);
        out.push_str(": ");
        out.push_str(rendered);
        out.push('\n');
    }
    Ok(())
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use capa_engine::Scope;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "\
rule:
  meta:
    examples:
      - 9324d1a8ae37a36ae560c37448c9705a
    author: analyst@example.com
    zcustom: custom value
    name: create file
    scope: function
    att&ck:
      - Defense Evasion::Obfuscated Files or Information [T1027]
  features:
    - or:
      # comments in the features subtree survive re-emission
      - api: CreateFileA
      - api: CreateFileW
      - offset: -0x30
";

    #[test]
    fn meta_is_reordered_and_features_preserved() {
        let rule = Rule::from_yaml(SOURCE).expect("valid rule");
        let emitted = rule.to_yaml().expect("emits");

        let name_pos = emitted.find("name: create file").expect("name");
        let author_pos = emitted.find("author:").expect("author");
        let attack_pos = emitted.find("att&ck:").expect("att&ck");
        let examples_pos = emitted.find("examples:").expect("examples");
        let custom_pos = emitted.find("zcustom:").expect("custom key");
        assert!(name_pos < author_pos);
        assert!(author_pos < attack_pos);
        assert!(attack_pos < examples_pos);
        // custom keys come after the preferred ones
        assert!(examples_pos < custom_pos);

        // the features subtree is untouched, comments included
        assert!(emitted.contains("# comments in the features subtree survive re-emission"));
        assert!(emitted.contains("- offset: -0x30"));
    }

    #[test]
    fn emission_is_idempotent() {
        let rule = Rule::from_yaml(SOURCE).expect("valid rule");
        let once = rule.to_yaml().expect("emits");
        let reparsed = Rule::from_yaml(&once).expect("emitted rule reparses");
        let twice = reparsed.to_yaml().expect("emits again");
        assert_eq!(once, twice);
    }

    #[test]
    fn parse_emit_parse_is_structurally_identical() {
        let rule = Rule::from_yaml(SOURCE).expect("valid rule");
        let reparsed = Rule::from_yaml(&rule.to_yaml().expect("emits")).expect("reparses");
        assert_eq!(rule.name, reparsed.name);
        assert_eq!(rule.scope, reparsed.scope);
        assert_eq!(rule.statement, reparsed.statement);
        for (key, value) in rule.meta.iter() {
            assert_eq!(Some(value), reparsed.meta.get(key.as_str().unwrap_or("")));
        }
    }

    #[test]
    fn hidden_keys_are_stripped_from_output_but_kept_on_the_rule() {
        let mut rule = Rule::from_yaml(SOURCE).expect("valid rule");
        rule.meta.set("capa/path", "rules/create-file.yml");
        rule.meta.set("capa/nursery", true);

        let emitted = rule.to_yaml().expect("emits");
        assert!(!emitted.contains("capa/path"));
        assert!(!emitted.contains("capa/nursery"));
        assert!(rule.meta.is_nursery());
        assert_eq!(
            rule.meta.get_str("capa/path"),
            Some("rules/create-file.yml")
        );
    }

    #[test]
    fn scope_is_always_explicit_after_emission() {
        let source = "\
rule:
  meta:
    name: defaulted scope
  features:
    - number: 1
";
        let rule = Rule::from_yaml(source).expect("valid rule");
        assert_eq!(rule.scope, Scope::Function);
        let emitted = rule.to_yaml().expect("emits");
        assert!(emitted.contains("scope: function"));
    }

    #[test]
    fn crlf_normalized() {
        let source = SOURCE.replace('\n', "\r\n");
        let rule = Rule::from_yaml(&source).expect("valid rule");
        let emitted = rule.to_yaml().expect("emits");
        assert!(!emitted.contains('\r'));
    }

    #[test]
    fn derived_rules_cannot_be_emitted() {
        let mut rule = Rule::from_yaml(
            "rule:\n  meta:\n    name: parent\n    scope: file\n  features:\n    - and:\n      - function:\n        - api: CreateFileA\n",
        )
        .expect("valid rule");
        let mut n = 0;
        let derived = rule.extract_subscope_rules(&mut || {
            n += 1;
            format!("{n:x}")
        });
        let err = derived[0].to_yaml().expect_err("no source to re-emit");
        assert!(matches!(err, InvalidRule::NoDefinition(_)));
    }
}
