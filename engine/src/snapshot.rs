//! Snapshot reconstruction - folding a fact stream into live state.
//!
//! Reconstruction is a pure fold so it can be tested exhaustively without a
//! store: feed it any multiset of facts, in any order, and it produces the
//! same answer. The winner for a record identity is the fact with the
//! maximum timestamp; equal timestamps are broken by the lexicographically
//! larger id, the same rule the physical `timestamp#id` sort key applies.

use crate::fact::Fact;
use std::collections::BTreeMap;

/// Whether `candidate` is a newer version than `current` of the same record.
pub fn supersedes(candidate: &Fact, current: &Fact) -> bool {
    match candidate.timestamp.cmp(&current.timestamp) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => candidate.id > current.id,
        std::cmp::Ordering::Less => false,
    }
}

/// Fold facts down to the winning version per record identity
/// (`namespace#fieldName#id`), then drop identities whose winner is a
/// tombstone. Input order is irrelevant.
pub fn reduce<I>(facts: I) -> BTreeMap<String, Fact>
where
    I: IntoIterator<Item = Fact>,
{
    let mut latest: BTreeMap<String, Fact> = BTreeMap::new();
    for fact in facts {
        let key = fact.record_key();
        match latest.get(&key) {
            Some(current) if !supersedes(&fact, current) => {}
            _ => {
                latest.insert(key, fact);
            }
        }
    }
    latest.retain(|_, fact| fact.is_live());
    latest
}

/// Collapse a reduced snapshot further, to one live fact per
/// `namespace#fieldName`. Distinct record ids competing for the same field
/// are resolved with the same timestamp-then-id rule.
pub fn latest_by_field<I>(facts: I) -> BTreeMap<String, Fact>
where
    I: IntoIterator<Item = Fact>,
{
    let mut latest: BTreeMap<String, Fact> = BTreeMap::new();
    for fact in reduce(facts).into_values() {
        let key = format!("{}#{}", fact.namespace, fact.field_name);
        match latest.get(&key) {
            Some(current) if !supersedes(&fact, current) => {}
            _ => {
                latest.insert(key, fact);
            }
        }
    }
    latest
}
