/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Key expressions: validated, `/`-separated resource names.
//!
//! A chunk is either a literal, `*` (exactly one chunk) or `**` (any number of chunks,
//! including none). Wildcards are fine for matching but a publication always targets a
//! concrete key expression, see [`KeyExpr::ensure_concrete`].

use crate::error::SessionError;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

const SEPARATOR: char = '/';
const SINGLE_WILD: &str = "*";
const DOUBLE_WILD: &str = "**";
const FORBIDDEN_CHARS: [char; 3] = ['#', '?', '$'];

/// A validated key expression. Cloning is cheap.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyExpr(Arc<str>);

impl KeyExpr {
    /// Validates `expr` and builds a key expression from it.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidKeyExpr`] when the expression is empty, has an empty
    /// chunk, starts or ends with `/`, contains `#`, `?` or `$`, or uses `*` inside a chunk.
    pub fn parse(expr: &str) -> Result<Self, SessionError> {
        validate(expr)?;
        Ok(Self(Arc::from(expr)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn chunks(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    pub fn is_wild(&self) -> bool {
        self.chunks().any(is_wild_chunk)
    }

    /// Fails with `InvalidKeyExpr` if the expression contains a wildcard chunk.
    pub fn ensure_concrete(&self) -> Result<(), SessionError> {
        if self.is_wild() {
            return Err(SessionError::invalid_key_expr(
                self.as_str(),
                "wildcards are not allowed in a publication key expression",
            ));
        }
        Ok(())
    }

    /// Returns the canonical form of this expression.
    ///
    /// In every run of adjacent wildcard chunks, `**/**` collapses into `**` and single
    /// wildcards move in front of the double one (`**/*` becomes `*/**`). Two expressions
    /// matching the same set of keys through these rewrites canonicalize identically.
    pub fn canonicalize(&self) -> KeyExpr {
        let mut out: Vec<&str> = Vec::new();
        let mut singles = 0usize;
        let mut double = false;

        let flush = |out: &mut Vec<&str>, singles: &mut usize, double: &mut bool| {
            out.extend(std::iter::repeat(SINGLE_WILD).take(*singles));
            if *double {
                out.push(DOUBLE_WILD);
            }
            *singles = 0;
            *double = false;
        };

        for chunk in self.chunks() {
            match chunk {
                SINGLE_WILD => singles += 1,
                DOUBLE_WILD => double = true,
                literal => {
                    flush(&mut out, &mut singles, &mut double);
                    out.push(literal);
                }
            }
        }
        flush(&mut out, &mut singles, &mut double);

        let canonical = out.join("/");
        if canonical.as_str() == self.as_str() {
            return self.clone();
        }
        KeyExpr(Arc::from(canonical))
    }

    /// `true` if every key matched by `other` is also matched by `self`.
    pub fn includes(&self, other: &KeyExpr) -> bool {
        let this: Vec<&str> = self.chunks().collect();
        let that: Vec<&str> = other.chunks().collect();
        chunks_include(&this, &that)
    }

    /// `true` if at least one key is matched by both expressions.
    pub fn intersects(&self, other: &KeyExpr) -> bool {
        let this: Vec<&str> = self.chunks().collect();
        let that: Vec<&str> = other.chunks().collect();
        chunks_intersect(&this, &that)
    }

    /// Appends `suffix` as extra chunks.
    pub fn join(&self, suffix: &str) -> Result<KeyExpr, SessionError> {
        KeyExpr::parse(&format!("{}{SEPARATOR}{suffix}", self.as_str()))
    }
}

fn is_wild_chunk(chunk: &str) -> bool {
    chunk == SINGLE_WILD || chunk == DOUBLE_WILD
}

fn validate(expr: &str) -> Result<(), SessionError> {
    if expr.is_empty() {
        return Err(SessionError::invalid_key_expr(expr, "empty key expression"));
    }
    if expr.starts_with(SEPARATOR) || expr.ends_with(SEPARATOR) {
        return Err(SessionError::invalid_key_expr(
            expr,
            "leading or trailing '/'",
        ));
    }
    if let Some(c) = expr
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_whitespace() || c.is_control())
    {
        let reason = if FORBIDDEN_CHARS.contains(&c) {
            "forbidden character ('#', '?' or '$')"
        } else {
            "whitespace or control character"
        };
        return Err(SessionError::invalid_key_expr(expr, reason));
    }
    for chunk in expr.split(SEPARATOR) {
        if chunk.is_empty() {
            return Err(SessionError::invalid_key_expr(expr, "empty chunk"));
        }
        if chunk.contains('*') && !is_wild_chunk(chunk) {
            return Err(SessionError::invalid_key_expr(
                expr,
                "'*' must be a whole chunk",
            ));
        }
    }
    Ok(())
}

fn chunks_include(this: &[&str], that: &[&str]) -> bool {
    ChunkMatcher::new(this, that).include(0, 0)
}

fn chunks_intersect(this: &[&str], that: &[&str]) -> bool {
    ChunkMatcher::new(this, that).intersect(0, 0)
}

/// Wildcard matching over chunk positions, memoised per `(this, that)` offset pair so
/// `**` backtracking stays within `this.len() * that.len()` steps.
struct ChunkMatcher<'a> {
    this: &'a [&'a str],
    that: &'a [&'a str],
    memo: Vec<Option<bool>>,
}

impl<'a> ChunkMatcher<'a> {
    fn new(this: &'a [&'a str], that: &'a [&'a str]) -> Self {
        Self {
            this,
            that,
            memo: vec![None; (this.len() + 1) * (that.len() + 1)],
        }
    }

    fn slot(&self, i: usize, j: usize) -> usize {
        i * (self.that.len() + 1) + j
    }

    fn include(&mut self, i: usize, j: usize) -> bool {
        let slot = self.slot(i, j);
        if let Some(known) = self.memo[slot] {
            return known;
        }
        let result = match (self.this.get(i).copied(), self.that.get(j).copied()) {
            (None, None) => true,
            (Some(DOUBLE_WILD), _) => {
                self.include(i + 1, j) || (j < self.that.len() && self.include(i, j + 1))
            }
            (None, Some(_)) | (Some(_), None) => false,
            (Some(SINGLE_WILD), Some(b)) => b != DOUBLE_WILD && self.include(i + 1, j + 1),
            (Some(a), Some(b)) => a == b && self.include(i + 1, j + 1),
        };
        self.memo[slot] = Some(result);
        result
    }

    fn intersect(&mut self, i: usize, j: usize) -> bool {
        let slot = self.slot(i, j);
        if let Some(known) = self.memo[slot] {
            return known;
        }
        let result = match (self.this.get(i).copied(), self.that.get(j).copied()) {
            (None, None) => true,
            (Some(DOUBLE_WILD), _) => {
                self.intersect(i + 1, j) || (j < self.that.len() && self.intersect(i, j + 1))
            }
            (_, Some(DOUBLE_WILD)) => {
                self.intersect(i, j + 1) || (i < self.this.len() && self.intersect(i + 1, j))
            }
            (None, Some(_)) | (Some(_), None) => false,
            (Some(a), Some(b)) => {
                (a == SINGLE_WILD || b == SINGLE_WILD || a == b) && self.intersect(i + 1, j + 1)
            }
        };
        self.memo[slot] = Some(result);
        result
    }
}

impl Display for KeyExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyExpr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for KeyExpr {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyExpr::parse(s)
    }
}

impl TryFrom<&str> for KeyExpr {
    type Error = SessionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        KeyExpr::parse(value)
    }
}

impl TryFrom<String> for KeyExpr {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(KeyExpr(Arc::from(value)))
    }
}

impl TryFrom<&String> for KeyExpr {
    type Error = SessionError;

    fn try_from(value: &String) -> Result<Self, Self::Error> {
        KeyExpr::parse(value)
    }
}

impl From<KeyExpr> for String {
    fn from(key_expr: KeyExpr) -> Self {
        key_expr.0.to_string()
    }
}
