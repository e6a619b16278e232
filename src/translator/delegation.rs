use kube::ResourceExt;
use tracing::warn;

use crate::common::{
    api::{HTTPRoute, HTTPRouteRule, ParentReference, PathMatchType},
    NormalizedMatch, PathMatch, ResourceKey, RouteRefKey, ValueMatch, DEFAULT_PATH, INHERIT_PARENT_MATCHER_ANNOTATION,
};

const TRUTHY: [&str; 5] = ["true", "True", "TRUE", "yes", "1"];
const FALSY: [&str; 5] = ["false", "False", "FALSE", "no", "0"];

/// How a delegated route's matches relate to the match of the rule delegating to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelegationMode {
    /// Child matches must be at least as specific as the parent match.
    Match,
    /// Child matches are prefixed with and extended by the parent match.
    Inherit,
}

impl DelegationMode {
    pub fn from_route(route: &HTTPRoute) -> Self {
        match route.annotations().get(INHERIT_PARENT_MATCHER_ANNOTATION) {
            Some(value) if TRUTHY.contains(&value.as_str()) => DelegationMode::Inherit,
            Some(value) if FALSY.contains(&value.as_str()) => DelegationMode::Match,
            Some(value) => {
                warn!("Route {}: unrecognized {INHERIT_PARENT_MATCHER_ANNOTATION} value {value}, treating it as false", route.name_any());
                DelegationMode::Match
            },
            None => DelegationMode::Match,
        }
    }
}

/// A child rule with the matches that survive delegation, keyed by their original index.
#[derive(Clone, Debug)]
pub struct DelegatedRule<'a> {
    pub rule_index: usize,
    pub rule: &'a HTTPRouteRule,
    pub matches: Vec<(usize, NormalizedMatch)>,
}

pub fn join_paths(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    match (parent.is_empty(), child.is_empty()) {
        (true, true) => DEFAULT_PATH.to_owned(),
        (true, false) => format!("/{child}"),
        (false, true) => parent.to_owned(),
        (false, false) => format!("{parent}/{child}"),
    }
}

fn contains_all(required: &[ValueMatch], available: &[ValueMatch]) -> bool {
    required.iter().all(|r| available.contains(r))
}

fn union(parent: &[ValueMatch], child: &[ValueMatch]) -> Vec<ValueMatch> {
    let mut merged = parent.to_vec();
    merged.extend(child.iter().filter(|c| !parent.iter().any(|p| p.name == c.name)).cloned());
    merged
}

/// Whether `child` selects a subset of the requests selected by `parent`.
pub fn is_delegated_match(parent: &NormalizedMatch, child: &NormalizedMatch) -> bool {
    parent.path.match_type == PathMatchType::PathPrefix
        && child.path.value.starts_with(&parent.path.value)
        && contains_all(&parent.headers, &child.headers)
        && contains_all(&parent.query_params, &child.query_params)
        && parent.method.map_or(true, |method| child.method == Some(method))
}

pub fn inherit_match(parent: &NormalizedMatch, child: &NormalizedMatch) -> NormalizedMatch {
    NormalizedMatch {
        path: PathMatch { match_type: child.path.match_type, value: join_paths(&parent.path.value, &child.path.value) },
        method: parent.method.or(child.method),
        ..Default::default()
    }
    .with_headers(union(&parent.headers, &child.headers))
    .with_query_params(union(&parent.query_params, &child.query_params))
}

/// The parent reference declared by `child` that names `parent`.
pub fn declared_parent_ref<'a>(child: &'a HTTPRoute, child_namespace: &str, parent: &ResourceKey) -> Option<&'a ParentReference> {
    child.spec.parent_refs.iter().flatten().find(|r| RouteRefKey::from((*r, child_namespace)).resource_key == *parent)
}

pub fn declares_parent_refs(child: &HTTPRoute) -> bool {
    child.spec.parent_refs.as_ref().is_some_and(|refs| !refs.is_empty())
}

/// Rules of `child` as seen through a parent rule matching `parent`. A rule declaring
/// no matches serves the parent match as is; rules left without matches are dropped.
pub fn delegated_rules<'a>(child: &'a HTTPRoute, mode: DelegationMode, parent: &NormalizedMatch) -> Vec<DelegatedRule<'a>> {
    child
        .spec
        .rules
        .iter()
        .flatten()
        .enumerate()
        .filter_map(|(rule_index, rule)| {
            let declared: Vec<NormalizedMatch> = rule.matches.iter().flatten().map(NormalizedMatch::from).collect();
            let matches: Vec<(usize, NormalizedMatch)> = match mode {
                _ if declared.is_empty() => vec![(0, parent.clone())],
                DelegationMode::Match => declared.into_iter().enumerate().filter(|(_, m)| is_delegated_match(parent, m)).collect(),
                DelegationMode::Inherit => declared.iter().map(|m| inherit_match(parent, m)).enumerate().collect(),
            };
            if matches.is_empty() {
                None
            } else {
                Some(DelegatedRule { rule_index, rule, matches })
            }
        })
        .collect()
}
