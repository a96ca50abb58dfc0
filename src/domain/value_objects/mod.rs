//! Value Objects for the storefront

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self { Self(Uuid::now_v7()) }
            pub const fn from_uuid(uuid: Uuid) -> Self { Self(uuid) }
            pub const fn into_uuid(self) -> Uuid { self.0 }
        }

        impl Default for $name { fn default() -> Self { Self::new() } }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.0, f) }
        }

        impl FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> { Uuid::parse_str(s.trim()).map(Self) }
        }

        impl From<Uuid> for $name { fn from(uuid: Uuid) -> Self { Self(uuid) } }
        impl From<$name> for Uuid { fn from(id: $name) -> Self { id.0 } }
    };
}

typed_id!(
    /// A claimable resource (coupon rush or group-buy SKU)
    ResourceId
);
typed_id!(
    /// The user performing a request
    ActorId
);
typed_id!(ClaimId);
typed_id!(
    /// A group-buy instance ("spell")
    GroupId
);
typed_id!(
    /// Issued coupon instance or created order
    ArtifactId
);
typed_id!(AddressId);
typed_id!(
    /// Coupon template a rush hands out instances of
    TemplateId
);

/// Number of units requested in one claim. Always at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);

    pub fn new(value: u32) -> Result<Self, QuantityError> {
        if value == 0 { return Err(QuantityError::Zero); }
        Ok(Self(value))
    }
    pub fn value(&self) -> u32 { self.0 }
}

impl Default for Quantity { fn default() -> Self { Self::ONE } }

#[derive(Debug, Clone, PartialEq, Eq)] pub enum QuantityError { Zero }
impl std::error::Error for QuantityError {}
impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Quantity must be positive") }
}

/// Price in the smallest currency unit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    pub const fn new(value: i64) -> Self { Self(value) }
    pub const fn value(&self) -> i64 { self.0 }
    pub fn times(&self, quantity: Quantity) -> Cents { Cents(self.0.saturating_mul(i64::from(quantity.value()))) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_id_parse() {
        let id = ResourceId::new();
        let parsed: ResourceId = format!(" {id} ").parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_quantity() {
        assert_eq!(Quantity::new(0), Err(QuantityError::Zero));
        assert_eq!(Quantity::new(2).unwrap().value(), 2);
        assert_eq!(Quantity::default(), Quantity::ONE);
    }

    #[test]
    fn test_cents_times() { assert_eq!(Cents::new(1999).times(Quantity::new(3).unwrap()), Cents::new(5997)); }
}
