//! Storefront domain: resources, claims, groups, addresses and their events
pub mod value_objects;
pub mod aggregates;
pub mod events;
