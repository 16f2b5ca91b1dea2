// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! Loading a rule corpus from the file system.
//!
//! A corpus is a directory tree of `.yml` rule files, typically a git
//! checkout. Rules under a `nursery` subtree are not yet fully polished
//! (for example, they lack references to public examples of a technique)
//! but their matches are still wanted; they load normally and are tagged
//! `capa/nursery`. The `.github` subtree holds CI configuration — some of
//! it `.yml` — and is skipped entirely.

use std::path::Path;

use ignore::WalkBuilder;

use crate::error::InvalidRule;
use crate::rule::Rule;

/// Load one rule file, or every rule under a directory.
///
/// Loading is all-or-nothing per file: the first invalid rule aborts the
/// load with an error carrying its path.
pub fn load_rules(path: &Path) -> Result<Vec<Rule>, InvalidRule> {
    if !path.exists() {
        let e = std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "rule path does not exist or cannot be accessed",
        );
        return Err(InvalidRule::from(e).with_path(path));
    }
    if path.is_file() {
        return Ok(vec![load_rule_file(path)?]);
    }

    let mut paths = Vec::new();
    let walker = WalkBuilder::new(path)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("skipping unreadable path: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let entry_path = entry.path();
        if entry_path
            .components()
            .any(|c| c.as_os_str() == ".github")
        {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(".yml") {
            // expect to see .git* files, readme.md, and the like; other
            // things may be rules, but are mis-named
            if !(name.starts_with(".git") || name.ends_with(".md") || name.ends_with(".txt")) {
                log::warn!("skipping non-.yml file: {name}");
            }
            continue;
        }
        paths.push(entry_path.to_path_buf());
    }

    let mut rules = Vec::with_capacity(paths.len());
    for path in paths {
        rules.push(load_rule_file(&path)?);
    }
    Ok(rules)
}

fn load_rule_file(path: &Path) -> Result<Rule, InvalidRule> {
    let mut rule = Rule::from_yaml_file(path)?;
    rule.meta.set("capa/path", path.to_string_lossy().as_ref());
    if is_nursery_rule_path(path) {
        rule.meta.set("capa/nursery", true);
    }
    log::debug!("loaded rule: '{}' with scope: {}", rule.name, rule.scope);
    Ok(rule)
}

fn is_nursery_rule_path(path: &Path) -> bool {
    path.to_string_lossy().contains("nursery")
}
