//! Address book entries

use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::domain::value_objects::{ActorId, AddressId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Address {
    pub id: AddressId,
    pub actor_id: ActorId,
    pub name: String,
    pub mobile: String,
    pub detail: String,
    pub is_default: bool,
    pub updated_at: DateTime<Utc>,
}

impl Address {
    pub fn new(actor_id: ActorId, name: impl Into<String>, mobile: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            id: AddressId::new(), actor_id, name: name.into(), mobile: mobile.into(), detail: detail.into(),
            is_default: false, updated_at: Utc::now(),
        }
    }
}

/// Flips `is_default` so that only `chosen` remains default and returns the rows that changed,
/// cleared rows first so a one-default-per-actor unique index never sees two defaults.
/// `None` when `chosen` is not among `addresses`.
pub fn promote_default(addresses: &mut [Address], chosen: AddressId, now: DateTime<Utc>) -> Option<Vec<Address>> {
    if !addresses.iter().any(|a| a.id == chosen) { return None; }
    let mut changed = Vec::new();
    for address in addresses.iter_mut() {
        let want = address.id == chosen;
        if address.is_default != want {
            address.is_default = want;
            address.updated_at = now;
            changed.push(address.clone());
        }
    }
    changed.sort_by_key(|a| a.is_default);
    Some(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_default() {
        let actor = ActorId::new();
        let mut book = vec![Address::new(actor, "A", "1", "x"), Address::new(actor, "B", "2", "y"), Address::new(actor, "C", "3", "z")];
        book[0].is_default = true;
        let chosen = book[2].id;
        let changed = promote_default(&mut book, chosen, Utc::now()).unwrap();
        assert_eq!(changed.len(), 2);
        assert!(!changed[0].is_default && changed[1].is_default);
        assert_eq!(book.iter().filter(|a| a.is_default).count(), 1);
        assert!(book[2].is_default);
        // already default: nothing to write
        assert!(promote_default(&mut book, chosen, Utc::now()).unwrap().is_empty());
        assert!(promote_default(&mut book, AddressId::new(), Utc::now()).is_none());
    }
}
