// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! The statement IR: a logic tree over feature literals.
//!
//! Rules compile to a single [`Statement`]; evaluation is one recursive
//! dispatch over the variants (see [`crate::eval`]). `Subscope` nodes only
//! exist between rule parsing and subscope extraction — by match time every
//! one of them has been rewritten into a `match` reference to a derived
//! rule.

use crate::features::{Feature, Scope};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// All children must match.
    And {
        children: Vec<Statement>,
        description: Option<String>,
    },
    /// At least one child must match.
    Or {
        children: Vec<Statement>,
        description: Option<String>,
    },
    /// The child must not match.
    Not {
        child: Box<Statement>,
        description: Option<String>,
    },
    /// At least `count` children must match; `count = 0` is the `optional`
    /// form and matches unconditionally.
    Some {
        count: usize,
        children: Vec<Statement>,
        description: Option<String>,
    },
    /// The number of distinct addresses of `feature` lies within
    /// `[min, max]`; either bound may be open.
    Range {
        feature: Feature,
        min: Option<usize>,
        max: Option<usize>,
        description: Option<String>,
    },
    /// Evaluate `child` at a nested scope. Desugared into a derived rule
    /// before matching.
    Subscope { scope: Scope, child: Box<Statement> },
    /// A terminal feature literal.
    Feature(Feature),
}

impl Statement {
    pub fn description(&self) -> Option<&str> {
        match self {
            Statement::And { description, .. }
            | Statement::Or { description, .. }
            | Statement::Not { description, .. }
            | Statement::Some { description, .. }
            | Statement::Range { description, .. } => description.as_deref(),
            Statement::Subscope { .. } | Statement::Feature(_) => None,
        }
    }

    /// Child statements, in rule order. `Range` and `Feature` are leaves;
    /// the feature inside a `Range` is not a statement.
    pub fn children(&self) -> Vec<&Statement> {
        match self {
            Statement::And { children, .. }
            | Statement::Or { children, .. }
            | Statement::Some { children, .. } => children.iter().collect(),
            Statement::Not { child, .. } | Statement::Subscope { child, .. } => {
                vec![child.as_ref()]
            }
            Statement::Range { .. } | Statement::Feature(_) => Vec::new(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Statement> {
        match self {
            Statement::And { children, .. }
            | Statement::Or { children, .. }
            | Statement::Some { children, .. } => children.iter_mut().collect(),
            Statement::Not { child, .. } | Statement::Subscope { child, .. } => {
                vec![child.as_mut()]
            }
            Statement::Range { .. } | Statement::Feature(_) => Vec::new(),
        }
    }
}
