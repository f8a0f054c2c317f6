use std::collections::HashSet;

pub const SEPARATOR: char = '|';

/// Merges two identifier sets of the same object into one deduplicated set.
pub fn merge_ids(first: &str, second: &str) -> String {
    if second.is_empty() {
        return first.trim_matches(SEPARATOR).to_string();
    }
    if first.is_empty() {
        return second.trim_matches(SEPARATOR).to_string();
    }
    let mut seen = HashSet::new();
    let union: Vec<&str> = first
        .split(SEPARATOR)
        .chain(second.split(SEPARATOR))
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .collect();
    union.join("|")
}

pub fn id_set(ids: &str) -> HashSet<&str> {
    ids.split(SEPARATOR).filter(|id| !id.is_empty()).collect()
}
