//! Campaign (UTM) and ad click-id extraction from the query string.

use std::collections::BTreeMap;

pub const KNOWN_UTM_CODES: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

pub const KNOWN_CLICK_IDS: &[&str] = &["gclid", "fbclid", "dclid"];

/// Any parameter named `utm_*` counts, not only the well-known five.
pub fn is_utm_code(name: &str) -> bool {
    name.len() > 4
        && name
            .get(..4)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("utm_"))
}

pub fn is_click_id(name: &str) -> bool {
    KNOWN_CLICK_IDS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

/// UTM parameters keyed by their lowercased name.
pub fn utm_params(query: &[(String, String)]) -> BTreeMap<String, String> {
    query
        .iter()
        .filter(|(name, _)| is_utm_code(name))
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect()
}

/// Click identifiers keyed by their lowercased name.
pub fn click_ids(query: &[(String, String)]) -> BTreeMap<String, String> {
    query
        .iter()
        .filter(|(name, _)| is_click_id(name))
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect()
}
