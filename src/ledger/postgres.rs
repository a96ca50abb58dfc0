//! Postgres ledger

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{query, query_as, query_scalar, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{ActorResolver, Ledger, LedgerTx, StoreError};
use crate::domain::aggregates::{Address, ArtifactRef, Claim, ClaimableResource, Group, ResourceKind};
use crate::domain::value_objects::{ActorId, AddressId, ArtifactId, Cents, ClaimId, GroupId, ResourceId, TemplateId};

const SET_TRANSACTION_TIMEOUTS_SQL: &str =
    "SELECT set_config('lock_timeout', $1, true), set_config('idle_in_transaction_session_timeout', $2, true)";

const RESOURCE_COLUMNS: &str = "id, title, kind, template_id, group_size, group_window_secs, unit_price, capacity, claimed_count, status, created_at, updated_at";
const CLAIM_COLUMNS: &str = "id, resource_id, actor_id, artifact_kind, artifact_id, artifact_reference, group_id, created_at";
const GROUP_COLUMNS: &str = "id, resource_id, target_count, current_count, status, created_at, expires_at";
// coupon rushes list only while their template is active and holds stock
const ISSUABLE_RESOURCES_SQL: &str = "WHERE status = 'active' AND (kind <> 'coupon' OR EXISTS (\
     SELECT 1 FROM coupon_templates t WHERE t.id = claimable_resources.template_id AND t.status = 'active' AND t.quantity > 0)) \
     ORDER BY created_at, id";
const ADDRESS_COLUMNS: &str = "id, actor_id, name, mobile, detail, is_default, updated_at";

#[derive(Clone, Debug)]
pub struct PgLedger {
    pool: PgPool,
    lock_timeout: std::time::Duration,
}

impl PgLedger {
    pub fn new(pool: PgPool, lock_timeout: std::time::Duration) -> Self { Self { pool, lock_timeout } }

    pub async fn connect(url: &str, max_connections: u32, lock_timeout: std::time::Duration) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool, lock_timeout))
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

#[async_trait]
impl Ledger for PgLedger {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let mut tx = self.pool.begin().await?;
        let lock_ms = format!("{}ms", self.lock_timeout.as_millis());
        // abandoned transactions get killed well after any lock wait would have given up
        let idle_ms = format!("{}ms", self.lock_timeout.as_millis().saturating_mul(10));
        query(SET_TRANSACTION_TIMEOUTS_SQL).bind(lock_ms).bind(idle_ms).execute(&mut *tx).await?;
        Ok(PgTx { tx })
    }

    async fn active_resources(&self) -> Result<Vec<ClaimableResource>, StoreError> {
        let rows = query_as::<_, ResourceRow>(&format!("SELECT {RESOURCE_COLUMNS} FROM claimable_resources {ISSUABLE_RESOURCES_SQL}"))
            .fetch_all(&self.pool).await?;
        rows.into_iter().map(ClaimableResource::try_from).collect()
    }

    async fn claims_by_actor(&self, actor: ActorId) -> Result<Vec<Claim>, StoreError> {
        let rows = query_as::<_, ClaimRow>(&format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE actor_id = $1 ORDER BY created_at"))
            .bind(actor).fetch_all(&self.pool).await?;
        rows.into_iter().map(Claim::try_from).collect()
    }

    async fn group(&self, id: GroupId) -> Result<Option<Group>, StoreError> {
        query_as::<_, GroupRow>(&format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1"))
            .bind(id).fetch_optional(&self.pool).await?.map(Group::try_from).transpose()
    }

    async fn groups(&self, ids: &[GroupId]) -> Result<Vec<Group>, StoreError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
        let rows = query_as::<_, GroupRow>(&format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ANY($1)"))
            .bind(ids).fetch_all(&self.pool).await?;
        rows.into_iter().map(Group::try_from).collect()
    }

    async fn group_claims(&self, id: GroupId) -> Result<Vec<Claim>, StoreError> {
        let rows = query_as::<_, ClaimRow>(&format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE group_id = $1 ORDER BY created_at, id"))
            .bind(id).fetch_all(&self.pool).await?;
        rows.into_iter().map(Claim::try_from).collect()
    }
}

#[async_trait]
impl ActorResolver for PgLedger {
    async fn resolve(&self, token: &str) -> Result<Option<ActorId>, StoreError> {
        let actor: Option<Uuid> = query_scalar("SELECT actor_id FROM actor_tokens WHERE token = $1")
            .bind(token).fetch_optional(&self.pool).await?;
        Ok(actor.map(ActorId::from_uuid))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    /// The underlying connection, for collaborators that write their own rows.
    pub(crate) fn conn(&mut self) -> &mut sqlx::PgConnection { &mut *self.tx }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn lock_resource(&mut self, id: ResourceId) -> Result<Option<ClaimableResource>, StoreError> {
        query_as::<_, ResourceRow>(&format!("SELECT {RESOURCE_COLUMNS} FROM claimable_resources WHERE id = $1 FOR UPDATE"))
            .bind(id).fetch_optional(&mut *self.tx).await?.map(ClaimableResource::try_from).transpose()
    }

    async fn find_claim(&mut self, resource: ResourceId, actor: ActorId) -> Result<Option<Claim>, StoreError> {
        query_as::<_, ClaimRow>(&format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE resource_id = $1 AND actor_id = $2"))
            .bind(resource).bind(actor).fetch_optional(&mut *self.tx).await?.map(Claim::try_from).transpose()
    }

    async fn save_resource(&mut self, resource: &ClaimableResource) -> Result<(), StoreError> {
        query("UPDATE claimable_resources SET claimed_count = $2, status = $3, updated_at = NOW() WHERE id = $1")
            .bind(resource.id).bind(to_i32(resource.claimed_count, "claimed_count")?).bind(resource.status.as_str())
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn insert_claim(&mut self, claim: &Claim) -> Result<(), StoreError> {
        query(&format!("INSERT INTO claims ({CLAIM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"))
            .bind(claim.id).bind(claim.resource_id).bind(claim.actor_id).bind(claim.artifact.kind.as_str())
            .bind(claim.artifact.id).bind(&claim.artifact.reference).bind(claim.group_id).bind(claim.created_at)
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn lock_group(&mut self, id: GroupId) -> Result<Option<Group>, StoreError> {
        query_as::<_, GroupRow>(&format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1 FOR UPDATE"))
            .bind(id).fetch_optional(&mut *self.tx).await?.map(Group::try_from).transpose()
    }

    async fn insert_group(&mut self, group: &Group) -> Result<(), StoreError> {
        query("INSERT INTO groups (id, resource_id, target_count, current_count, status, created_at, expires_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())")
            .bind(group.id).bind(group.resource_id).bind(to_i32(group.target_count, "target_count")?)
            .bind(to_i32(group.current_count, "current_count")?).bind(group.status.as_str())
            .bind(group.created_at).bind(group.expires_at)
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn save_group(&mut self, group: &Group) -> Result<(), StoreError> {
        query("UPDATE groups SET current_count = $2, status = $3, updated_at = NOW() WHERE id = $1")
            .bind(group.id).bind(to_i32(group.current_count, "current_count")?).bind(group.status.as_str())
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn lock_addresses(&mut self, actor: ActorId) -> Result<Vec<Address>, StoreError> {
        let rows = query_as::<_, AddressRow>(&format!("SELECT {ADDRESS_COLUMNS} FROM addresses WHERE actor_id = $1 ORDER BY id FOR UPDATE"))
            .bind(actor).fetch_all(&mut *self.tx).await?;
        Ok(rows.into_iter().map(Address::from).collect())
    }

    async fn save_address(&mut self, address: &Address) -> Result<(), StoreError> {
        query("UPDATE addresses SET is_default = $2, updated_at = $3 WHERE id = $1 AND actor_id = $4")
            .bind(address.id).bind(address.is_default).bind(address.updated_at).bind(address.actor_id)
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::from)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(StoreError::from)
    }
}

fn to_i32(value: u32, column: &'static str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn to_u32(value: i32, column: &'static str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} is negative: {value}")))
}

#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: Uuid,
    title: String,
    kind: String,
    template_id: Option<Uuid>,
    group_size: Option<i32>,
    group_window_secs: Option<i64>,
    unit_price: Option<i64>,
    capacity: Option<i32>,
    claimed_count: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ResourceRow> for ClaimableResource {
    type Error = StoreError;

    fn try_from(row: ResourceRow) -> Result<Self, StoreError> {
        let kind = match (row.kind.as_str(), row.template_id, row.group_size, row.group_window_secs, row.unit_price) {
            ("coupon", Some(template), ..) => ResourceKind::Coupon { template_id: TemplateId::from_uuid(template) },
            ("group_buy", _, Some(size), Some(window), Some(price)) => ResourceKind::GroupBuy {
                group_size: to_u32(size, "group_size")?,
                group_window: Duration::seconds(window),
                unit_price: Cents::new(price),
            },
            (kind, ..) => return Err(StoreError::Corrupt(format!("resource {} has incomplete {kind} columns", row.id))),
        };
        Ok(Self {
            id: ResourceId::from_uuid(row.id),
            title: row.title,
            kind,
            capacity: row.capacity.map(|c| to_u32(c, "capacity")).transpose()?,
            claimed_count: to_u32(row.claimed_count, "claimed_count")?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ClaimRow {
    id: Uuid,
    resource_id: Uuid,
    actor_id: Uuid,
    artifact_kind: String,
    artifact_id: Uuid,
    artifact_reference: String,
    group_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ClaimRow> for Claim {
    type Error = StoreError;

    fn try_from(row: ClaimRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: ClaimId::from_uuid(row.id),
            resource_id: ResourceId::from_uuid(row.resource_id),
            actor_id: ActorId::from_uuid(row.actor_id),
            artifact: ArtifactRef {
                kind: row.artifact_kind.parse().map_err(StoreError::Corrupt)?,
                id: ArtifactId::from_uuid(row.artifact_id),
                reference: row.artifact_reference,
            },
            group_id: row.group_id.map(GroupId::from_uuid),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    resource_id: Uuid,
    target_count: i32,
    current_count: i32,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<GroupRow> for Group {
    type Error = StoreError;

    fn try_from(row: GroupRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: GroupId::from_uuid(row.id),
            resource_id: ResourceId::from_uuid(row.resource_id),
            target_count: to_u32(row.target_count, "target_count")?,
            current_count: to_u32(row.current_count, "current_count")?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            events: vec![],
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AddressRow {
    id: Uuid,
    actor_id: Uuid,
    name: String,
    mobile: String,
    detail: String,
    is_default: bool,
    updated_at: DateTime<Utc>,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Self {
            id: AddressId::from_uuid(row.id),
            actor_id: ActorId::from_uuid(row.actor_id),
            name: row.name,
            mobile: row.mobile,
            detail: row.detail,
            is_default: row.is_default,
            updated_at: row.updated_at,
        }
    }
}
