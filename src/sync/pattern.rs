//! Scope rules compiled from wildcard path expressions.
//!
//! An expression holds at most one `*`. The literal text before it is the
//! prefix, the text after it the postfix; a path is in scope when it starts
//! with the prefix and ends with the postfix.

use crate::error::{SyncError, SyncResult};

/// URI scheme of remote locations.
pub const REMOTE_SCHEME: &str = "s3://";

/// A wildcard expression split around its `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardExpr {
    pub prefix: String,
    pub postfix: String,
}

impl WildcardExpr {
    /// Split `expr` on its wildcard. Two or more wildcards are rejected.
    pub fn parse(expr: &str) -> SyncResult<Self> {
        let parts: Vec<&str> = expr.split('*').collect();
        match parts.as_slice() {
            [whole] => Ok(Self {
                prefix: whole.to_string(),
                postfix: String::new(),
            }),
            [prefix, postfix] => Ok(Self {
                prefix: prefix.to_string(),
                postfix: postfix.to_string(),
            }),
            _ => Err(SyncError::Configuration(format!(
                "'{}' contains {} wildcards, at most one '*' is supported",
                expr,
                parts.len() - 1
            ))),
        }
    }

    pub fn has_wildcard(&self) -> bool {
        !self.postfix.is_empty()
    }

    /// Rule matching the postfix only; the prefix is the enumeration root.
    pub fn postfix_rule(&self) -> ScopeRule {
        ScopeRule::postfix(&self.postfix)
    }
}

/// A single anchored prefix/postfix matcher.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScopeRule {
    prefix: String,
    postfix: String,
}

impl ScopeRule {
    pub fn new(prefix: &str, postfix: &str) -> Self {
        Self {
            prefix: normalize(prefix),
            postfix: normalize(postfix),
        }
    }

    pub fn prefix(prefix: &str) -> Self {
        Self::new(prefix, "")
    }

    pub fn postfix(postfix: &str) -> Self {
        Self::new("", postfix)
    }

    /// Compile a user expression directly into a rule.
    pub fn compile(expr: &str) -> SyncResult<Self> {
        let expr = WildcardExpr::parse(expr)?;
        Ok(Self::new(&expr.prefix, &expr.postfix))
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = normalize(path);
        // Prefix and postfix may not overlap in the candidate
        path.len() >= self.prefix.len() + self.postfix.len()
            && path.starts_with(&self.prefix)
            && path.ends_with(&self.postfix)
    }
}

/// Rules combined with AND semantics. Empty means everything is in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeRules {
    rules: Vec<ScopeRule>,
}

impl ScopeRules {
    pub fn new(rules: Vec<ScopeRule>) -> Self {
        Self { rules }
    }

    /// Accept every path.
    pub fn all() -> Self {
        Self::default()
    }

    /// A copy of these rules with one more rule appended.
    pub fn with(&self, rule: ScopeRule) -> Self {
        let mut rules = self.rules.clone();
        rules.push(rule);
        Self { rules }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.rules.iter().all(|rule| rule.matches(path))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A parsed `s3://bucket/prefix` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub bucket: String,
    pub key_prefix: String,
}

impl RemoteTarget {
    /// Parse a remote URI without wildcards.
    pub fn parse(uri: &str) -> SyncResult<Self> {
        let rest = uri.strip_prefix(REMOTE_SCHEME).ok_or_else(|| {
            SyncError::Configuration(format!("'{}' is not an {} path", uri, REMOTE_SCHEME))
        })?;
        let (bucket, key_prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(SyncError::Configuration(format!(
                "'{}' does not name a bucket",
                uri
            )));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key_prefix: key_prefix.to_string(),
        })
    }
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with(REMOTE_SCHEME)
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}
