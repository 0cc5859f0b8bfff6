//! Region keyword matching, exclusion, and display-name normalization.

use crate::error::TranscodeError;
use crate::node::Node;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// One literal substitution applied by [`rename`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRule {
    pub from: String,
    pub to: String,
}

impl RenameRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// True iff `name` contains (case-insensitively) at least one include
/// keyword and none of the exclude keywords.
pub fn is_included<S: AsRef<str>>(name: &str, include: &[S], exclude: &[S]) -> bool {
    let lower = name.to_lowercase();
    let hit = |kw: &S| lower.contains(&kw.as_ref().to_lowercase());
    include.iter().any(hit) && !exclude.iter().any(hit)
}

/// Apply `rules` in order, drop every non-ASCII code point, collapse
/// whitespace runs to one space, trim.
pub fn rename(name: &str, rules: &[RenameRule]) -> String {
    let mut out = name.to_string();
    for r in rules.iter().filter(|r| !r.from.is_empty()) {
        out = out.replace(&r.from, &r.to);
    }
    let ascii: String = out.chars().filter(char::is_ascii).collect();
    ascii.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Include/exclude keywords plus the rename table, as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classifier {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub rename: Vec<RenameRule>,
}

impl Classifier {
    /// An empty include list means "every region"; excludes still apply.
    pub fn accepts(&self, name: &str) -> bool {
        if self.include.is_empty() {
            let lower = name.to_lowercase();
            return !self.exclude.iter().any(|kw| lower.contains(&kw.to_lowercase()));
        }
        is_included(name, &self.include, &self.exclude)
    }

    pub fn rename(&self, name: &str) -> String {
        rename(name, &self.rename)
    }

    /// Filter on the original names, then rename the survivors.
    ///
    /// When nothing survives but the input was non-empty, every node is kept
    /// (still renamed) so a keyword change upstream never produces an empty
    /// proxy list. An empty input is [`TranscodeError::NoNodesMatched`].
    pub fn select(&self, nodes: Vec<Node>) -> Result<Vec<Node>, TranscodeError> {
        let total = nodes.len();
        if total == 0 {
            return Err(TranscodeError::NoNodesMatched { total });
        }
        let (kept, dropped): (Vec<Node>, Vec<Node>) = nodes.into_iter().partition(|n| self.accepts(&n.tag));
        let selected = if kept.is_empty() {
            warn!(total, "no node matched the include/exclude keywords; falling back to all nodes");
            dropped
        } else {
            debug!(kept = kept.len(), dropped = dropped.len(), "classified nodes");
            kept
        };
        let renamed = selected
            .into_iter()
            .map(|mut n| {
                n.tag = self.rename(&n.tag);
                n
            })
            .collect();
        Ok(unique_tags(renamed))
    }
}

/// Suffix `-2`, `-3`, ... onto repeated tags so references stay unambiguous.
pub fn unique_tags(nodes: Vec<Node>) -> Vec<Node> {
    let mut seen: HashSet<String> = HashSet::with_capacity(nodes.len());
    nodes
        .into_iter()
        .map(|mut n| {
            if !seen.insert(n.tag.clone()) {
                let base = n.tag.clone();
                let mut i = 2;
                while !seen.insert(format!("{base}-{i}")) {
                    i += 1;
                }
                n.tag = format!("{base}-{i}");
                debug!(tag = %base, renamed = %n.tag, "duplicate tag");
            }
            n
        })
        .collect()
}
