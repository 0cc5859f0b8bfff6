//! Group resolution shared by both dialects.
//!
//! Dynamic groups (a regex instead of a member list) are expanded against
//! the final node tags, then every group is pruned to references that still
//! resolve. Dropping a group can empty its parent, so pruning repeats until
//! nothing changes.

use crate::node::{Bandwidth, Node};
use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Built-in targets that are valid in any member list.
pub const SENTINELS: [&str; 6] = ["DIRECT", "REJECT", "BLOCK", "no-resolve", "PASS", "DNS"];

/// Dialect-neutral view of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub members: Vec<String>,
    /// `Some` marks a dynamic group.
    pub patterns: Option<Vec<String>>,
    /// Remaining dialect-specific fields, re-emitted untouched.
    pub body: Map<String, Value>,
}

/// Per-request knobs the mergers need. Callers always pass them explicitly.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Hysteria2 bandwidth for nodes that carry none.
    pub bandwidth: Bandwidth,
    /// uTLS fingerprint forced onto VLESS TLS.
    pub fingerprint: String,
    pub injection: Option<Injection>,
}

impl MergeOptions {
    pub fn new(bandwidth: Bandwidth) -> Self {
        Self {
            bandwidth,
            fingerprint: "firefox".to_string(),
            injection: None,
        }
    }
}

/// Custom nodes appended after resolution, plus the groups that list them.
#[derive(Debug, Clone, Default)]
pub struct Injection {
    pub nodes: Vec<Node>,
    /// Native sing-box outbounds, appended as written. Clash ignores them.
    pub outbounds: Vec<Map<String, Value>>,
    pub target_groups: Vec<String>,
}

/// Compiled group pattern.
///
/// Plain patterns use `regex`; lookaround and backreferences, common in
/// Clash `filter`s, need the backtracking engine.
#[derive(Debug)]
pub enum Matcher {
    Plain(regex::Regex),
    Fancy(fancy_regex::Regex),
}

impl Matcher {
    /// A backtracking limit hit counts as no match.
    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Plain(re) => re.is_match(text),
            Self::Fancy(re) => re.is_match(text).unwrap_or_else(|error| {
                warn!(%error, text, "group pattern gave up, treating as no match");
                false
            }),
        }
    }
}

/// Case-insensitive alternation of `patterns`.
pub fn compile(patterns: &[String]) -> Result<Matcher, fancy_regex::Error> {
    let joined = patterns
        .iter()
        .map(|p| format!("(?:{p})"))
        .collect::<Vec<_>>()
        .join("|");
    match RegexBuilder::new(&joined).case_insensitive(true).build() {
        Ok(re) => Ok(Matcher::Plain(re)),
        Err(_) => fancy_regex::Regex::new(&format!("(?i){joined}")).map(Matcher::Fancy),
    }
}

/// Expand dynamic groups and prune to a fixpoint.
///
/// `node_tags` is the pool patterns match against; `leaf_refs` are further
/// names that are valid targets but never pattern candidates (template
/// outbounds, synthetic nodes).
pub fn resolve(groups: Vec<Group>, node_tags: &[String], leaf_refs: &HashSet<String>) -> Vec<Group> {
    let expanded = groups.into_iter().filter_map(|g| expand(g, node_tags)).collect();
    prune(expanded, node_tags, leaf_refs)
}

fn expand(mut group: Group, node_tags: &[String]) -> Option<Group> {
    let Some(patterns) = group.patterns.take() else {
        return Some(group);
    };
    if patterns.is_empty() {
        debug!(group = %group.name, "dynamic group without patterns, dropping");
        return None;
    }
    let re = match compile(&patterns) {
        Ok(re) => re,
        Err(error) => {
            // 正则无效时保留静态成员
            warn!(group = %group.name, %error, "invalid group pattern, keeping static members only");
            return Some(group);
        }
    };
    let matched: Vec<&String> = node_tags.iter().filter(|t| re.is_match(t)).collect();
    if matched.is_empty() {
        debug!(group = %group.name, "pattern matched no node, dropping group");
        return None;
    }
    let mut seen: HashSet<String> = HashSet::new();
    let members = std::mem::take(&mut group.members)
        .into_iter()
        .chain(matched.into_iter().cloned())
        .filter(|m| seen.insert(m.clone()))
        .collect();
    group.members = members;
    Some(group)
}

/// Remove dangling references and empty groups until stable.
pub fn prune(mut groups: Vec<Group>, node_tags: &[String], leaf_refs: &HashSet<String>) -> Vec<Group> {
    let mut base: HashSet<&str> = node_tags.iter().map(String::as_str).collect();
    base.extend(leaf_refs.iter().map(String::as_str));
    base.extend(SENTINELS);

    loop {
        let names: HashSet<String> = groups.iter().map(|g| g.name.clone()).collect();
        let before = groups.len();
        groups.retain_mut(|g| {
            g.members
                .retain(|m| base.contains(m.as_str()) || names.contains(m));
            if g.members.is_empty() {
                debug!(group = %g.name, "group emptied by pruning, dropping");
                false
            } else {
                true
            }
        });
        if groups.len() == before {
            return groups;
        }
    }
}

/// Append `tags` to every surviving group named in `targets`.
pub fn inject_members(groups: &mut [Group], targets: &[String], tags: &[String]) {
    for g in groups.iter_mut().filter(|g| targets.contains(&g.name)) {
        for t in tags {
            if !g.members.contains(t) {
                g.members.push(t.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, members: &[&str], pattern: Option<&str>) -> Group {
        Group {
            name: name.into(),
            members: members.iter().map(|s| s.to_string()).collect(),
            patterns: pattern.map(|p| vec![p.to_string()]),
            body: Map::new(),
        }
    }

    fn tags(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn names(gs: &[Group]) -> Vec<&str> {
        gs.iter().map(|g| g.name.as_str()).collect()
    }

    #[test]
    fn chain_collapses_to_fixpoint() {
        let groups = vec![
            group("A", &["B", "DIRECT"], None),
            group("B", &["C"], None),
            group("C", &[], Some("^JP")),
        ];
        let out = resolve(groups, &tags(&["HK 1", "US 1"]), &HashSet::new());
        assert_eq!(names(&out), ["A"]);
        assert_eq!(out[0].members, ["DIRECT"]);
    }

    #[test]
    fn dynamic_members_follow_static_ones() {
        let groups = vec![group("HK", &["DIRECT", "hk 2"], Some("hk|香港"))];
        let out = resolve(groups, &tags(&["HK 1", "hk 2", "US"]), &HashSet::new());
        assert_eq!(out[0].members, ["DIRECT", "hk 2", "HK 1"]);
        assert!(out[0].patterns.is_none());
    }

    #[test]
    fn invalid_pattern_keeps_static_members() {
        let groups = vec![
            group("bad", &["DIRECT", "x"], Some("(unclosed")),
            group("empty", &[], Some("[z-a]")),
        ];
        let out = resolve(groups, &tags(&["x", "y"]), &HashSet::new());
        assert_eq!(names(&out), ["bad"]);
        assert_eq!(out[0].members, ["DIRECT", "x"]);
        assert!(out[0].patterns.is_none());
    }

    #[test]
    fn lookaround_patterns_compile() {
        assert!(matches!(compile(&["hk|jp".into()]).unwrap(), Matcher::Plain(_)));
        let re = compile(&["^(?!.*expire).*$".into()]).unwrap();
        assert!(matches!(re, Matcher::Fancy(_)));
        assert!(re.is_match("HK 01"));
        assert!(!re.is_match("EXPIRE 2030-01-01"));

        let groups = vec![group("Auto", &["DIRECT"], Some("^(?!.*expire).*$"))];
        let out = resolve(groups, &tags(&["HK 01", "expire soon"]), &HashSet::new());
        assert_eq!(out[0].members, ["DIRECT", "HK 01"]);
    }

    #[test]
    fn leaf_refs_and_sentinels_survive() {
        let leaf: HashSet<String> = ["dns-out".to_string()].into();
        let groups = vec![group("G", &["dns-out", "REJECT", "gone", "no-resolve"], None)];
        let out = prune(groups, &[], &leaf);
        assert_eq!(out[0].members, ["dns-out", "REJECT", "no-resolve"]);
    }

    #[test]
    fn injection_targets_named_groups_only() {
        let mut gs = vec![group("Google", &["HK"], None), group("Other", &["HK"], None)];
        inject_members(&mut gs, &tags(&["Google"]), &tags(&["mine", "HK"]));
        assert_eq!(gs[0].members, ["HK", "mine"]);
        assert_eq!(gs[1].members, ["HK"]);
    }
}
