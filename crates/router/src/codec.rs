use std::{collections::BTreeMap, fmt};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

pub const FRAGMENT_MARKER: char = '#';

const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationState {
    /// Empty for the default view.
    pub view: String,
    pub params: Params,
}

impl NavigationState {
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for NavigationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self))
    }
}

/// Never fails. A pair without `=` maps its key to the empty string.
pub fn decode(fragment: &str) -> NavigationState {
    let route = fragment.strip_prefix(FRAGMENT_MARKER).unwrap_or(fragment);
    let (view, query) = match route.split_once('?') {
        Some((view, query)) => (view, Some(query)),
        None => (route, None),
    };

    let mut params = Params::new();
    if let Some(query) = query {
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = percent_decode_str(raw_value).decode_utf8_lossy();
            params.insert(key.to_string(), value.into_owned());
        }
    }

    NavigationState {
        view: view.to_string(),
        params,
    }
}

pub fn encode(state: &NavigationState) -> String {
    let mut fragment = String::with_capacity(1 + state.view.len());
    fragment.push(FRAGMENT_MARKER);
    fragment.push_str(&state.view);
    for (index, (key, value)) in state.params.iter().enumerate() {
        fragment.push(if index == 0 { '?' } else { '&' });
        fragment.push_str(key);
        fragment.push('=');
        fragment.extend(utf8_percent_encode(value, COMPONENT));
    }
    fragment
}

#[cfg(test)]
#[path = "tests/codec_tests.rs"]
mod tests;
