//! In-process ledger for local development and tests.
//!
//! Each row has its own async lock, held by the owning [`MemoryTx`] until it commits or
//! is dropped. Writes are staged inside the transaction and applied in one step on
//! commit, after the same uniqueness and capacity checks the Postgres schema enforces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{ActorResolver, Ledger, LedgerTx, StoreError};
use crate::domain::aggregates::{Address, ArtifactKind, ArtifactRef, Claim, ClaimableResource, Group, ResourceKind};
use crate::domain::value_objects::{ActorId, AddressId, ArtifactId, GroupId, ResourceId, TemplateId};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// Steps at which a transient failure can be injected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    LockResource,
    FindClaim,
    SaveResource,
    InsertClaim,
    LockGroup,
    SaveGroup,
    IssueArtifact,
    SaveAddress,
    /// Before any staged write is applied.
    Commit,
    /// After the writes are applied; the caller still sees an error.
    CommitAcknowledgement,
}

/// Coupon instance or order recorded by the in-memory artifact collaborators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredArtifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub reference: String,
    pub resource_id: ResourceId,
    pub actor_id: ActorId,
    pub group_id: Option<GroupId>,
    /// Redeemable until then; `None` for orders
    pub valid_until: Option<DateTime<Utc>>,
}

impl StoredArtifact {
    pub fn artifact_ref(&self) -> ArtifactRef {
        ArtifactRef { kind: self.kind, id: self.id, reference: self.reference.clone() }
    }
}

/// Stock a coupon rush issues from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CouponTemplate {
    pub id: TemplateId,
    pub quantity: u32,
    pub valid_days: u32,
    pub active: bool,
}

impl CouponTemplate {
    pub fn new(quantity: u32, valid_days: u32) -> Self {
        Self { id: TemplateId::new(), quantity, valid_days, active: true }
    }

    pub fn is_issuable(&self) -> bool { self.active && self.quantity > 0 }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RowKey {
    Resource(ResourceId),
    Group(GroupId),
    AddressBook(ActorId),
    Template(TemplateId),
}

type RowLocks = HashMap<RowKey, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
struct Tables {
    resources: HashMap<ResourceId, ClaimableResource>,
    claims: Vec<Claim>,
    claim_keys: HashSet<(ResourceId, ActorId)>,
    groups: HashMap<GroupId, Group>,
    addresses: HashMap<AddressId, Address>,
    templates: HashMap<TemplateId, CouponTemplate>,
    artifacts: Vec<StoredArtifact>,
    redeemed: HashSet<ArtifactId>,
    tokens: HashMap<String, ActorId>,
}

#[derive(Debug)]
struct Shared {
    tables: Mutex<Tables>,
    /// Entries live while some transaction holds or waits for the row.
    row_locks: std::sync::Mutex<RowLocks>,
    faults: Mutex<HashMap<FailPoint, u32>>,
    lock_timeout: Duration,
}

impl Shared {
    async fn trip(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().await;
        match faults.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Transient(format!("injected failure at {point:?}")))
            }
            _ => Ok(()),
        }
    }

    fn row_locks(&self) -> MutexGuard<'_, RowLocks> {
        self.row_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops lock entries nobody else references any more.
    fn prune(&self, keys: impl IntoIterator<Item = RowKey>) {
        let mut locks = self.row_locks();
        for key in keys {
            if locks.get(&key).is_some_and(|row| Arc::strong_count(row) == 1) {
                locks.remove(&key);
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
}

impl Default for MemoryLedger {
    fn default() -> Self { Self::new() }
}

impl MemoryLedger {
    pub fn new() -> Self { Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT) }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::default(),
                row_locks: std::sync::Mutex::default(),
                faults: Mutex::default(),
                lock_timeout,
            }),
        }
    }

    /// Makes the next `times` passes through `point` fail with a transient error.
    pub async fn inject_failure(&self, point: FailPoint, times: u32) {
        self.shared.faults.lock().await.insert(point, times);
    }

    pub async fn insert_resource(&self, resource: ClaimableResource) {
        self.shared.tables.lock().await.resources.insert(resource.id, resource);
    }

    pub async fn insert_token(&self, token: impl Into<String>, actor: ActorId) {
        self.shared.tables.lock().await.tokens.insert(token.into(), actor);
    }

    pub async fn insert_address(&self, address: Address) {
        self.shared.tables.lock().await.addresses.insert(address.id, address);
    }

    pub async fn insert_template(&self, template: CouponTemplate) {
        self.shared.tables.lock().await.templates.insert(template.id, template);
    }

    /// Seeds an artifact as if an issuer had committed it.
    pub async fn insert_artifact(&self, artifact: StoredArtifact) {
        self.shared.tables.lock().await.artifacts.push(artifact);
    }

    pub async fn template(&self, id: TemplateId) -> Option<CouponTemplate> {
        self.shared.tables.lock().await.templates.get(&id).cloned()
    }

    pub async fn resource(&self, id: ResourceId) -> Option<ClaimableResource> {
        self.shared.tables.lock().await.resources.get(&id).cloned()
    }

    pub async fn claims(&self) -> Vec<Claim> {
        self.shared.tables.lock().await.claims.clone()
    }

    pub async fn groups(&self) -> Vec<Group> {
        self.shared.tables.lock().await.groups.values().cloned().collect()
    }

    pub async fn artifacts(&self) -> Vec<StoredArtifact> {
        self.shared.tables.lock().await.artifacts.clone()
    }

    pub async fn addresses(&self, actor: ActorId) -> Vec<Address> {
        let tables = self.shared.tables.lock().await;
        let mut book: Vec<Address> = tables.addresses.values().filter(|a| a.actor_id == actor).cloned().collect();
        book.sort_by_key(|a| a.id);
        book
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        self.shared.trip(FailPoint::Begin).await?;
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            resources: HashMap::new(),
            claims: Vec::new(),
            groups: HashMap::new(),
            addresses: HashMap::new(),
            templates: HashMap::new(),
            artifacts: Vec::new(),
            redeemed: HashSet::new(),
        })
    }

    async fn active_resources(&self) -> Result<Vec<ClaimableResource>, StoreError> {
        let tables = self.shared.tables.lock().await;
        let issuable = |r: &&ClaimableResource| match r.kind() {
            ResourceKind::Coupon { template_id } => tables.templates.get(template_id).is_some_and(CouponTemplate::is_issuable),
            ResourceKind::GroupBuy { .. } => true,
        };
        let mut active: Vec<ClaimableResource> = tables.resources.values().filter(|r| r.is_active()).filter(issuable).cloned().collect();
        active.sort_by_key(|r| (r.created_at, r.id));
        Ok(active)
    }

    async fn claims_by_actor(&self, actor: ActorId) -> Result<Vec<Claim>, StoreError> {
        let tables = self.shared.tables.lock().await;
        Ok(tables.claims.iter().filter(|c| c.actor_id == actor).cloned().collect())
    }

    async fn group(&self, id: GroupId) -> Result<Option<Group>, StoreError> {
        Ok(self.shared.tables.lock().await.groups.get(&id).cloned())
    }

    async fn groups(&self, ids: &[GroupId]) -> Result<Vec<Group>, StoreError> {
        let tables = self.shared.tables.lock().await;
        Ok(ids.iter().filter_map(|id| tables.groups.get(id)).cloned().collect())
    }

    async fn group_claims(&self, id: GroupId) -> Result<Vec<Claim>, StoreError> {
        let tables = self.shared.tables.lock().await;
        Ok(tables.claims.iter().filter(|c| c.group_id == Some(id)).cloned().collect())
    }
}

#[async_trait]
impl ActorResolver for MemoryLedger {
    async fn resolve(&self, token: &str) -> Result<Option<ActorId>, StoreError> {
        Ok(self.shared.tables.lock().await.tokens.get(token).copied())
    }
}

#[derive(Debug)]
pub struct MemoryTx {
    shared: Arc<Shared>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    resources: HashMap<ResourceId, ClaimableResource>,
    claims: Vec<Claim>,
    groups: HashMap<GroupId, Group>,
    addresses: HashMap<AddressId, Address>,
    templates: HashMap<TemplateId, CouponTemplate>,
    artifacts: Vec<StoredArtifact>,
    redeemed: HashSet<ArtifactId>,
}

impl MemoryTx {
    async fn lock(&mut self, key: RowKey) -> Result<(), StoreError> {
        if self.held.contains_key(&key) { return Ok(()); }
        let row = Arc::clone(self.shared.row_locks().entry(key).or_default());
        let acquired = tokio::time::timeout(self.shared.lock_timeout, row.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                self.held.insert(key, guard);
                Ok(())
            }
            Err(_) => {
                self.shared.prune([key]);
                Err(StoreError::LockTimeout)
            }
        }
    }

    fn ensure_held(&self, key: RowKey) -> Result<(), StoreError> {
        if self.held.contains_key(&key) { Ok(()) } else { Err(StoreError::Unlocked(format!("{key:?}"))) }
    }

    pub(crate) async fn stage_artifact(&mut self, artifact: StoredArtifact) -> Result<ArtifactRef, StoreError> {
        self.shared.trip(FailPoint::IssueArtifact).await?;
        let staged = artifact.artifact_ref();
        self.artifacts.push(artifact);
        Ok(staged)
    }

    /// Locks the template and takes one coupon from its stock, returning its `valid_days`.
    /// `None` when the template is missing, inactive or empty.
    pub(crate) async fn take_template_stock(&mut self, id: TemplateId) -> Result<Option<u32>, StoreError> {
        self.lock(RowKey::Template(id)).await?;
        let current = match self.templates.get(&id) {
            Some(staged) => Some(staged.clone()),
            None => self.shared.tables.lock().await.templates.get(&id).cloned(),
        };
        let Some(mut template) = current.filter(CouponTemplate::is_issuable) else { return Ok(None) };
        template.quantity -= 1;
        let valid_days = template.valid_days;
        self.templates.insert(id, template);
        Ok(Some(valid_days))
    }

    /// Marks a committed, unused and unexpired coupon instance of `actor` as used.
    /// `false` when there is none.
    pub(crate) async fn redeem_coupon(&mut self, id: ArtifactId, actor: ActorId) -> Result<bool, StoreError> {
        if self.redeemed.contains(&id) { return Ok(false); }
        let now = Utc::now();
        let tables = self.shared.tables.lock().await;
        let usable = !tables.redeemed.contains(&id)
            && tables.artifacts.iter().any(|a| {
                a.id == id && a.actor_id == actor && a.kind == ArtifactKind::CouponInstance && a.valid_until.is_some_and(|until| until > now)
            });
        drop(tables);
        if usable { self.redeemed.insert(id); }
        Ok(usable)
    }

    pub(crate) async fn find_address(&mut self, id: AddressId) -> Option<Address> {
        if let Some(staged) = self.addresses.get(&id) { return Some(staged.clone()); }
        self.shared.tables.lock().await.addresses.get(&id).cloned()
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_resource(&mut self, id: ResourceId) -> Result<Option<ClaimableResource>, StoreError> {
        self.shared.trip(FailPoint::LockResource).await?;
        self.lock(RowKey::Resource(id)).await?;
        if let Some(staged) = self.resources.get(&id) { return Ok(Some(staged.clone())); }
        Ok(self.shared.tables.lock().await.resources.get(&id).cloned())
    }

    async fn find_claim(&mut self, resource: ResourceId, actor: ActorId) -> Result<Option<Claim>, StoreError> {
        self.shared.trip(FailPoint::FindClaim).await?;
        if let Some(staged) = self.claims.iter().find(|c| c.key() == (resource, actor)) { return Ok(Some(staged.clone())); }
        let tables = self.shared.tables.lock().await;
        Ok(tables.claims.iter().find(|c| c.key() == (resource, actor)).cloned())
    }

    async fn save_resource(&mut self, resource: &ClaimableResource) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::SaveResource).await?;
        self.ensure_held(RowKey::Resource(resource.id))?;
        self.resources.insert(resource.id, resource.clone());
        Ok(())
    }

    async fn insert_claim(&mut self, claim: &Claim) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::InsertClaim).await?;
        if self.claims.iter().any(|c| c.key() == claim.key()) {
            return Err(StoreError::UniqueViolation("claims_one_per_actor".into()));
        }
        self.claims.push(claim.clone());
        Ok(())
    }

    async fn lock_group(&mut self, id: GroupId) -> Result<Option<Group>, StoreError> {
        self.shared.trip(FailPoint::LockGroup).await?;
        self.lock(RowKey::Group(id)).await?;
        if let Some(staged) = self.groups.get(&id) { return Ok(Some(staged.clone())); }
        Ok(self.shared.tables.lock().await.groups.get(&id).cloned())
    }

    async fn insert_group(&mut self, group: &Group) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::SaveGroup).await?;
        self.lock(RowKey::Group(group.id)).await?;
        self.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn save_group(&mut self, group: &Group) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::SaveGroup).await?;
        self.ensure_held(RowKey::Group(group.id))?;
        self.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn lock_addresses(&mut self, actor: ActorId) -> Result<Vec<Address>, StoreError> {
        self.lock(RowKey::AddressBook(actor)).await?;
        let tables = self.shared.tables.lock().await;
        let mut book: Vec<Address> = tables
            .addresses
            .values()
            .filter(|a| a.actor_id == actor)
            .map(|a| self.addresses.get(&a.id).unwrap_or(a).clone())
            .collect();
        book.sort_by_key(|a| a.id);
        Ok(book)
    }

    async fn save_address(&mut self, address: &Address) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::SaveAddress).await?;
        self.ensure_held(RowKey::AddressBook(address.actor_id))?;
        self.addresses.insert(address.id, address.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::Commit).await?;
        {
            let mut tables = self.shared.tables.lock().await;

            for claim in &self.claims {
                if tables.claim_keys.contains(&claim.key()) {
                    return Err(StoreError::UniqueViolation("claims_one_per_actor".into()));
                }
            }
            for resource in self.resources.values() {
                if resource.capacity.is_some_and(|c| resource.claimed_count > c) {
                    return Err(StoreError::Corrupt(format!("resource {} over capacity", resource.id)));
                }
            }

            if self.redeemed.iter().any(|id| tables.redeemed.contains(id)) {
                return Err(StoreError::Transient("coupon redeemed concurrently".into()));
            }

            tables.resources.extend(self.resources.drain());
            tables.groups.extend(self.groups.drain());
            tables.addresses.extend(self.addresses.drain());
            tables.templates.extend(self.templates.drain());
            tables.artifacts.append(&mut self.artifacts);
            tables.redeemed.extend(self.redeemed.drain());
            for claim in self.claims.drain(..) {
                tables.claim_keys.insert(claim.key());
                tables.claims.push(claim);
            }
        }
        self.shared.trip(FailPoint::CommitAcknowledgement).await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        let keys: Vec<RowKey> = self.held.keys().copied().collect();
        self.held.clear();
        self.shared.prune(keys);
    }
}
