use std::fmt::Display;

use serde::Serialize;

use super::api::{HTTPHeaderMatch, HTTPMethod, HTTPQueryParamMatch, HTTPRouteMatch, PathMatchType, StringMatchType};

pub const DEFAULT_PATH: &str = "/";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PathMatch {
    pub match_type: PathMatchType,
    pub value: String,
}

impl Default for PathMatch {
    fn default() -> Self {
        Self { match_type: PathMatchType::PathPrefix, value: DEFAULT_PATH.to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueMatch {
    pub name: String,
    pub match_type: StringMatchType,
    pub value: String,
}

impl From<&HTTPHeaderMatch> for ValueMatch {
    fn from(value: &HTTPHeaderMatch) -> Self {
        Self { name: value.name.to_lowercase(), match_type: value.type_.unwrap_or(StringMatchType::Exact), value: value.value.clone() }
    }
}

impl From<&HTTPQueryParamMatch> for ValueMatch {
    fn from(value: &HTTPQueryParamMatch) -> Self {
        Self { name: value.name.clone(), match_type: value.type_.unwrap_or(StringMatchType::Exact), value: value.value.clone() }
    }
}

/// A request matcher with every optional field filled in and every list sorted, so two
/// matchers are equal exactly when they select the same requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NormalizedMatch {
    pub path: PathMatch,
    pub headers: Vec<ValueMatch>,
    pub query_params: Vec<ValueMatch>,
    pub method: Option<HTTPMethod>,
}

impl From<&HTTPRouteMatch> for NormalizedMatch {
    fn from(value: &HTTPRouteMatch) -> Self {
        let path = value
            .path
            .as_ref()
            .map(|p| PathMatch {
                match_type: p.type_.unwrap_or(PathMatchType::PathPrefix),
                value: p.value.clone().unwrap_or(DEFAULT_PATH.to_owned()),
            })
            .unwrap_or_default();
        let mut headers: Vec<ValueMatch> = value.headers.iter().flatten().map(ValueMatch::from).collect();
        headers.sort();
        headers.dedup();
        let mut query_params: Vec<ValueMatch> = value.query_params.iter().flatten().map(ValueMatch::from).collect();
        query_params.sort();
        query_params.dedup();
        Self { path, headers, query_params, method: value.method }
    }
}

impl NormalizedMatch {
    pub fn with_headers(mut self, headers: Vec<ValueMatch>) -> Self {
        self.headers = headers;
        self.headers.sort();
        self.headers.dedup();
        self
    }

    pub fn with_query_params(mut self, query_params: Vec<ValueMatch>) -> Self {
        self.query_params = query_params;
        self.query_params.sort();
        self.query_params.dedup();
        self
    }
}

impl Display for NormalizedMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}", self.path.match_type, self.path.value)?;
        if let Some(method) = self.method {
            write!(f, " {method:?}")?;
        }
        for h in &self.headers {
            write!(f, " header[{}]={}", h.name, h.value)?;
        }
        for q in &self.query_params {
            write!(f, " query[{}]={}", q.name, q.value)?;
        }
        Ok(())
    }
}
