//! Aggregates module
pub mod resource;
pub mod claim;
pub mod group;
pub mod address;

pub use resource::{ClaimableResource, ResourceError, ResourceKind, ResourceStatus};
pub use claim::{ArtifactKind, ArtifactRef, Claim};
pub use group::{Group, GroupError, GroupIntent, GroupStatus};
pub use address::{promote_default, Address};
