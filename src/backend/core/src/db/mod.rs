//! PostgreSQL store.
//!
//! Uses sqlx with runtime-checked queries. Key ownership is enforced by primary keys on
//! `identity_devices` and `identity_sessions`, account ownership by the unique
//! `identities.account_id` column and code uniqueness by `events.code`. Multi-row changes
//! run in a transaction and lock the identity or event rows they depend on. A transaction
//! that needs both locks the event row before any identity row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{ErrorCode, QuorumError, Result};
use crate::events::ranking::rank_by;
use crate::events::{
    Event, EventCode, EventId, EventStore, InsertOutcome, Question, QuestionId, ToggleOutcome, VoteChange,
};
use crate::identity::{
    AccountId, AttachOutcome, CreateOutcome, DeviceKey, Identity, IdentityId, IdentityStatus, IdentityStore,
    LinkOutcome, MergeOutcome, SessionKey,
};

/// Longest retired chain followed before giving up. Merges compress chains, so real
/// chains have length one.
const MAX_CHAIN: usize = 64;

/// Attempts for a transaction that lost a race to a concurrent merge.
const MAX_TX_ATTEMPTS: usize = 3;

/// Database connection and operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new connection pool.
    pub async fn new(config: &DatabaseConfig, url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        info!(max_connections = config.max_connections, "Database pool ready");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| QuorumError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn lost_race(operation: &'static str) -> QuorumError {
        QuorumError::new(ErrorCode::StoreError, "Concurrent update, please retry").with_context("operation", operation)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    account_id: Option<String>,
    survivor_id: Option<Uuid>,
    votes_migrated: bool,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct LockedIdentityRow {
    id: Uuid,
    account_id: Option<String>,
    survivor_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    code: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct QuestionRow {
    id: Uuid,
    text: String,
    author_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct RankRow {
    id: Uuid,
    votes: i64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Identity helpers
// ═══════════════════════════════════════════════════════════════════════════════

async fn load_identity(conn: &mut PgConnection, id: Uuid) -> Result<Option<Identity>> {
    let row = sqlx::query_as::<_, IdentityRow>(
        r#"
        SELECT id, account_id, survivor_id, votes_migrated, created_at, last_seen_at
        FROM identities WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let devices: Vec<String> = sqlx::query_scalar("SELECT device_key FROM identity_devices WHERE identity_id = $1")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
    let sessions: Vec<String> = sqlx::query_scalar("SELECT session_key FROM identity_sessions WHERE identity_id = $1")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

    let status = match row.survivor_id {
        None => IdentityStatus::Live,
        Some(survivor) => IdentityStatus::Retired {
            survivor: IdentityId(survivor),
            votes_migrated: row.votes_migrated,
        },
    };

    Ok(Some(Identity {
        id: IdentityId(row.id),
        device_keys: devices.into_iter().map(DeviceKey::from).collect(),
        session_keys: sessions.into_iter().map(SessionKey::from).collect(),
        account: row.account_id.map(AccountId::from),
        status,
        created_at: row.created_at,
        last_seen_at: row.last_seen_at,
    }))
}

async fn require_identity(conn: &mut PgConnection, id: Uuid) -> Result<Identity> {
    load_identity(conn, id)
        .await?
        .ok_or_else(|| QuorumError::identity_not_found(id))
}

/// Follow retired pointers to the live head.
async fn head(conn: &mut PgConnection, id: Uuid) -> Result<Option<Uuid>> {
    let mut current = id;
    for _ in 0..MAX_CHAIN {
        let survivor: Option<Option<Uuid>> = sqlx::query_scalar("SELECT survivor_id FROM identities WHERE id = $1")
            .bind(current)
            .fetch_optional(&mut *conn)
            .await?;
        match survivor {
            None => return Ok(None),
            Some(None) => return Ok(Some(current)),
            Some(Some(next)) => current = next,
        }
    }
    Err(QuorumError::internal(format!("retired chain from {} is too long", id)))
}

async fn live_owner(conn: &mut PgConnection, owner: Option<Uuid>) -> Result<Option<Identity>> {
    match owner {
        Some(id) => Ok(load_identity(conn, id).await?.filter(Identity::is_live)),
        None => Ok(None),
    }
}

/// Lock a live identity row. `None` when it was retired in the meantime.
async fn lock_live(conn: &mut PgConnection, id: Uuid) -> Result<Option<LockedIdentityRow>> {
    let row = sqlx::query_as::<_, LockedIdentityRow>(
        "SELECT id, account_id, survivor_id FROM identities WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.filter(|row| row.survivor_id.is_none()))
}

/// Resolve `id` to its live head and share-lock the head row until the transaction ends,
/// so no merge can retire it before the caller's write commits. Ids without an identity
/// row are returned unchanged.
///
/// Callers take the event lock first. Merges never lock events, so the order holds.
async fn share_live_head(conn: &mut PgConnection, id: Uuid) -> Result<Uuid> {
    for _ in 0..MAX_TX_ATTEMPTS {
        let Some(current) = head(conn, id).await? else {
            return Ok(id);
        };
        let survivor: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT survivor_id FROM identities WHERE id = $1 FOR SHARE")
                .bind(current)
                .fetch_optional(&mut *conn)
                .await?;
        // Retired while we waited for the lock; follow the new pointer.
        if let Some(None) = survivor {
            return Ok(current);
        }
    }
    Err(Database::lost_race("share_live_head"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Identity Store
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl IdentityStore for Database {
    async fn find_by_session(&self, session: &SessionKey) -> Result<Option<Identity>> {
        let mut conn = self.pool.acquire().await?;
        let owner: Option<Uuid> = sqlx::query_scalar("SELECT identity_id FROM identity_sessions WHERE session_key = $1")
            .bind(session.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        live_owner(&mut conn, owner).await
    }

    async fn find_by_device(&self, device: &DeviceKey) -> Result<Option<Identity>> {
        let mut conn = self.pool.acquire().await?;
        let owner: Option<Uuid> = sqlx::query_scalar("SELECT identity_id FROM identity_devices WHERE device_key = $1")
            .bind(device.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        live_owner(&mut conn, owner).await
    }

    async fn find_by_account(&self, account: &AccountId) -> Result<Option<Identity>> {
        let mut conn = self.pool.acquire().await?;
        let owner: Option<Uuid> = sqlx::query_scalar("SELECT id FROM identities WHERE account_id = $1")
            .bind(account.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        live_owner(&mut conn, owner).await
    }

    async fn get(&self, id: IdentityId) -> Result<Option<Identity>> {
        let mut conn = self.pool.acquire().await?;
        match head(&mut conn, id.0).await? {
            Some(head) => load_identity(&mut conn, head).await,
            None => Ok(None),
        }
    }

    async fn create(&self, device: &DeviceKey, session: &SessionKey) -> Result<CreateOutcome> {
        for _ in 0..MAX_TX_ATTEMPTS {
            let mut tx = self.pool.begin().await?;

            let session_owner: Option<Uuid> =
                sqlx::query_scalar("SELECT identity_id FROM identity_sessions WHERE session_key = $1")
                    .bind(session.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            if let Some(owner) = session_owner {
                let identity = require_identity(&mut tx, owner).await?;
                tx.commit().await?;
                return Ok(CreateOutcome::Existing(identity));
            }

            let device_owner: Option<Uuid> =
                sqlx::query_scalar("SELECT identity_id FROM identity_devices WHERE device_key = $1")
                    .bind(device.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;

            let (owner, created) = match device_owner {
                Some(owner) => {
                    if lock_live(&mut tx, owner).await?.is_none() {
                        continue;
                    }
                    (owner, false)
                }
                None => {
                    let id = Uuid::new_v4();
                    sqlx::query("INSERT INTO identities (id) VALUES ($1)")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    let claimed: Option<String> = sqlx::query_scalar(
                        "INSERT INTO identity_devices (device_key, identity_id) VALUES ($1, $2)
                         ON CONFLICT (device_key) DO NOTHING RETURNING device_key",
                    )
                    .bind(device.as_str())
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
                    if claimed.is_none() {
                        // Another creator took the device; retry as an attach.
                        continue;
                    }
                    (id, true)
                }
            };

            let claimed: Option<String> = sqlx::query_scalar(
                "INSERT INTO identity_sessions (session_key, identity_id) VALUES ($1, $2)
                 ON CONFLICT (session_key) DO NOTHING RETURNING session_key",
            )
            .bind(session.as_str())
            .bind(owner)
            .fetch_optional(&mut *tx)
            .await?;
            if claimed.is_none() {
                continue;
            }

            let identity = require_identity(&mut tx, owner).await?;
            tx.commit().await?;
            debug!(identity_id = %owner, created, "Identity keys claimed");

            return Ok(if created {
                CreateOutcome::Created(identity)
            } else {
                CreateOutcome::AttachedToDevice(identity)
            });
        }
        Err(Self::lost_race("create"))
    }

    async fn attach(&self, id: IdentityId, device: &DeviceKey, session: &SessionKey) -> Result<AttachOutcome> {
        for _ in 0..MAX_TX_ATTEMPTS {
            let mut tx = self.pool.begin().await?;
            let head = head(&mut tx, id.0)
                .await?
                .ok_or_else(|| QuorumError::identity_not_found(id.0))?;
            if lock_live(&mut tx, head).await?.is_none() {
                continue;
            }

            let claimed_session: Option<String> = sqlx::query_scalar(
                "INSERT INTO identity_sessions (session_key, identity_id) VALUES ($1, $2)
                 ON CONFLICT (session_key) DO NOTHING RETURNING session_key",
            )
            .bind(session.as_str())
            .bind(head)
            .fetch_optional(&mut *tx)
            .await?;

            if claimed_session.is_none() {
                let owner: Uuid = sqlx::query_scalar("SELECT identity_id FROM identity_sessions WHERE session_key = $1")
                    .bind(session.as_str())
                    .fetch_one(&mut *tx)
                    .await?;
                if owner != head {
                    let identity = require_identity(&mut tx, owner).await?;
                    tx.commit().await?;
                    return Ok(AttachOutcome::AlreadyOwned(identity));
                }
            }

            let claimed_device: Option<String> = sqlx::query_scalar(
                "INSERT INTO identity_devices (device_key, identity_id) VALUES ($1, $2)
                 ON CONFLICT (device_key) DO NOTHING RETURNING device_key",
            )
            .bind(device.as_str())
            .bind(head)
            .fetch_optional(&mut *tx)
            .await?;

            let identity = require_identity(&mut tx, head).await?;
            tx.commit().await?;
            return Ok(AttachOutcome::Attached {
                identity,
                changed: claimed_session.is_some() || claimed_device.is_some(),
            });
        }
        Err(Self::lost_race("attach"))
    }

    async fn link_account(&self, id: IdentityId, account: &AccountId) -> Result<LinkOutcome> {
        for _ in 0..MAX_TX_ATTEMPTS {
            let mut tx = self.pool.begin().await?;
            let head = head(&mut tx, id.0)
                .await?
                .ok_or_else(|| QuorumError::identity_not_found(id.0))?;
            let Some(locked) = lock_live(&mut tx, head).await? else {
                continue;
            };

            match locked.account_id {
                Some(linked) if linked == account.as_str() => {
                    let identity = require_identity(&mut tx, head).await?;
                    tx.commit().await?;
                    return Ok(LinkOutcome::AlreadyLinked(identity));
                }
                Some(linked) => return Ok(LinkOutcome::ConflictingAccount(AccountId::from(linked))),
                None => {}
            }

            let updated = sqlx::query("UPDATE identities SET account_id = $2 WHERE id = $1 AND account_id IS NULL")
                .bind(head)
                .bind(account.as_str())
                .execute(&mut *tx)
                .await;

            match updated {
                Ok(_) => {
                    let identity = require_identity(&mut tx, head).await?;
                    tx.commit().await?;
                    return Ok(LinkOutcome::Linked(identity));
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    drop(tx);
                    let owner = self
                        .find_by_account(account)
                        .await?
                        .ok_or_else(|| Self::lost_race("link_account"))?;
                    return Ok(LinkOutcome::AccountTaken(owner));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Self::lost_race("link_account"))
    }

    async fn merge(&self, survivor: IdentityId, loser: IdentityId) -> Result<MergeOutcome> {
        for _ in 0..MAX_TX_ATTEMPTS {
            let mut tx = self.pool.begin().await?;
            let survivor_id = head(&mut tx, survivor.0)
                .await?
                .ok_or_else(|| QuorumError::identity_not_found(survivor.0))?;
            let loser_id = head(&mut tx, loser.0)
                .await?
                .ok_or_else(|| QuorumError::identity_not_found(loser.0))?;

            if survivor_id == loser_id {
                let identity = require_identity(&mut tx, survivor_id).await?;
                tx.commit().await?;
                return Ok(MergeOutcome::AlreadyMerged { survivor: identity });
            }

            // Lock in id order so concurrent merges of the same pair cannot deadlock.
            let rows = sqlx::query_as::<_, LockedIdentityRow>(
                "SELECT id, account_id, survivor_id FROM identities WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            )
            .bind(vec![survivor_id, loser_id])
            .fetch_all(&mut *tx)
            .await?;
            if rows.len() != 2 || rows.iter().any(|row| row.survivor_id.is_some()) {
                continue;
            }

            let account_of = |id: Uuid| rows.iter().find(|row| row.id == id).and_then(|row| row.account_id.clone());
            let survivor_account = account_of(survivor_id);
            let loser_account = account_of(loser_id);

            if let (Some(kept), Some(lost)) = (&survivor_account, &loser_account) {
                if kept != lost {
                    return Ok(MergeOutcome::Conflict {
                        survivor_account: AccountId::from(kept.as_str()),
                        loser_account: AccountId::from(lost.as_str()),
                    });
                }
            }

            sqlx::query("UPDATE identity_devices SET identity_id = $1 WHERE identity_id = $2")
                .bind(survivor_id)
                .bind(loser_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE identity_sessions SET identity_id = $1 WHERE identity_id = $2")
                .bind(survivor_id)
                .bind(loser_id)
                .execute(&mut *tx)
                .await?;

            if let (None, Some(account)) = (&survivor_account, &loser_account) {
                sqlx::query("UPDATE identities SET account_id = NULL WHERE id = $1")
                    .bind(loser_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("UPDATE identities SET account_id = $2 WHERE id = $1")
                    .bind(survivor_id)
                    .bind(account)
                    .execute(&mut *tx)
                    .await?;
            }

            sqlx::query(
                "UPDATE identities SET survivor_id = $1, votes_migrated = FALSE, account_id = NULL WHERE id = $2",
            )
            .bind(survivor_id)
            .bind(loser_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("UPDATE identities SET survivor_id = $1 WHERE survivor_id = $2")
                .bind(survivor_id)
                .bind(loser_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE identities SET last_seen_at = NOW() WHERE id = $1")
                .bind(survivor_id)
                .execute(&mut *tx)
                .await?;

            let identity = require_identity(&mut tx, survivor_id).await?;
            tx.commit().await?;
            return Ok(MergeOutcome::Merged { survivor: identity });
        }
        Err(Self::lost_race("merge"))
    }

    async fn pending_migrations(&self, survivor: IdentityId) -> Result<Vec<IdentityId>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM identities WHERE survivor_id = $1 AND NOT votes_migrated ORDER BY id")
                .bind(survivor.0)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(IdentityId).collect())
    }

    async fn complete_migration(&self, loser: IdentityId) -> Result<()> {
        sqlx::query("UPDATE identities SET votes_migrated = TRUE WHERE id = $1 AND survivor_id IS NOT NULL")
            .bind(loser.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch(&self, id: IdentityId) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let head = head(&mut conn, id.0)
            .await?
            .ok_or_else(|| QuorumError::identity_not_found(id.0))?;
        sqlx::query("UPDATE identities SET last_seen_at = NOW() WHERE id = $1")
            .bind(head)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event helpers
// ═══════════════════════════════════════════════════════════════════════════════

async fn load_event(conn: &mut PgConnection, id: Uuid) -> Result<Option<Event>> {
    let row = sqlx::query_as::<_, EventRow>("SELECT id, title, code, created_at FROM events WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let questions = sqlx::query_as::<_, QuestionRow>(
        r#"
        SELECT id, text, author_id, created_at
        FROM questions
        WHERE event_id = $1
        ORDER BY position, created_at, id
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let votes: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT v.question_id, v.identity_id
        FROM question_votes v
        JOIN questions q ON q.id = v.question_id
        WHERE q.event_id = $1
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let participants: Vec<Uuid> = sqlx::query_scalar("SELECT identity_id FROM event_participants WHERE event_id = $1")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

    let mut voters: HashMap<Uuid, BTreeSet<IdentityId>> = HashMap::new();
    for (question, identity) in votes {
        voters.entry(question).or_default().insert(IdentityId(identity));
    }

    Ok(Some(Event {
        id: EventId(row.id),
        title: row.title,
        code: EventCode::from_trusted(row.code),
        questions: questions
            .into_iter()
            .map(|q| Question {
                id: QuestionId(q.id),
                text: q.text,
                voters: voters.remove(&q.id).unwrap_or_default(),
                author: q.author_id.map(IdentityId),
                created_at: q.created_at,
            })
            .collect(),
        participants: participants.into_iter().map(IdentityId).collect(),
        created_at: row.created_at,
    }))
}

/// Lock the event row. Serializes question appends and re-ranks per event.
async fn lock_event(conn: &mut PgConnection, id: Uuid) -> Result<bool> {
    let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM events WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(locked.is_some())
}

/// Rewrite question positions from the vote counts visible now. The caller holds the
/// event lock.
async fn rank_event(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    let mut rows = sqlx::query_as::<_, RankRow>(
        r#"
        SELECT q.id, COUNT(v.identity_id) AS votes
        FROM questions q
        LEFT JOIN question_votes v ON v.question_id = q.id
        WHERE q.event_id = $1
        GROUP BY q.id, q.position, q.created_at
        ORDER BY q.position, q.created_at, q.id
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    rank_by(&mut rows, |row| row.votes.max(0) as usize);
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let positions: Vec<i64> = (0..rows.len() as i64).collect();

    sqlx::query(
        r#"
        UPDATE questions
        SET position = ranked.position
        FROM UNNEST($1::uuid[], $2::bigint[]) AS ranked (id, position)
        WHERE questions.id = ranked.id AND questions.position <> ranked.position
        "#,
    )
    .bind(&ids)
    .bind(&positions)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Store
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl EventStore for Database {
    async fn code_exists(&self, code: &EventCode) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM events WHERE code = $1)")
            .bind(code.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn insert_event(&self, event: Event) -> Result<InsertOutcome> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO events (id, title, code, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event.id.0)
        .bind(&event.title)
        .bind(event.code.as_str())
        .bind(event.created_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match inserted {
            Some(_) => InsertOutcome::Inserted(event),
            None => InsertOutcome::CodeTaken,
        })
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>> {
        let mut conn = self.pool.acquire().await?;
        load_event(&mut conn, id.0).await
    }

    async fn find_by_code(&self, code: &EventCode) -> Result<Option<Event>> {
        let mut conn = self.pool.acquire().await?;
        let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM events WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        match id {
            Some(id) => load_event(&mut conn, id).await,
            None => Ok(None),
        }
    }

    async fn push_question(&self, event: EventId, question: Question) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !lock_event(&mut tx, event.0).await? {
            return Ok(false);
        }
        let author = match question.author {
            Some(author) => Some(share_live_head(&mut tx, author.0).await?),
            None => None,
        };

        // A new question has no votes, so appending it keeps the event ranked.
        sqlx::query(
            r#"
            INSERT INTO questions (id, event_id, text, author_id, position, created_at)
            VALUES ($1, $2, $3, $4,
                    COALESCE((SELECT MAX(position) + 1 FROM questions WHERE event_id = $2), 0),
                    $5)
            "#,
        )
        .bind(question.id.0)
        .bind(event.0)
        .bind(&question.text)
        .bind(author)
        .bind(question.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(author) = author {
            sqlx::query("INSERT INTO event_participants (event_id, identity_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(event.0)
                .bind(author)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn toggle_voter(&self, event: EventId, question: QuestionId, voter: IdentityId) -> Result<ToggleOutcome> {
        let mut tx = self.pool.begin().await?;

        // The event lock serializes every toggle on the event, including two toggles by the
        // same identity that would otherwise both miss the DELETE and both report a cast.
        if !lock_event(&mut tx, event.0).await? {
            return Ok(ToggleOutcome::EventMissing);
        }
        let owner: Option<Uuid> = sqlx::query_scalar("SELECT event_id FROM questions WHERE id = $1")
            .bind(question.0)
            .fetch_optional(&mut *tx)
            .await?;
        if owner != Some(event.0) {
            return Ok(ToggleOutcome::QuestionMissing);
        }

        let voter = share_live_head(&mut tx, voter.0).await?;

        let removed: Option<Uuid> = sqlx::query_scalar(
            "DELETE FROM question_votes WHERE question_id = $1 AND identity_id = $2 RETURNING identity_id",
        )
        .bind(question.0)
        .bind(voter)
        .fetch_optional(&mut *tx)
        .await?;

        let change = if removed.is_some() {
            VoteChange::Retracted
        } else {
            sqlx::query(
                "INSERT INTO question_votes (question_id, identity_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(question.0)
            .bind(voter)
            .execute(&mut *tx)
            .await?;
            VoteChange::Cast
        };

        sqlx::query("INSERT INTO event_participants (event_id, identity_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(event.0)
            .bind(voter)
            .execute(&mut *tx)
            .await?;
        rank_event(&mut tx, event.0).await?;

        tx.commit().await?;
        Ok(ToggleOutcome::Applied(change))
    }

    async fn add_participant(&self, event: EventId, identity: IdentityId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !lock_event(&mut tx, event.0).await? {
            return Ok(false);
        }
        let identity = share_live_head(&mut tx, identity.0).await?;

        sqlx::query("INSERT INTO event_participants (event_id, identity_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(event.0)
            .bind(identity)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn rerank(&self, event: EventId) -> Result<Option<Event>> {
        let mut tx = self.pool.begin().await?;
        if !lock_event(&mut tx, event.0).await? {
            return Ok(None);
        }
        rank_event(&mut tx, event.0).await?;
        let ranked = load_event(&mut tx, event.0).await?;
        tx.commit().await?;
        Ok(ranked)
    }

    async fn reassign_member(&self, from: IdentityId, to: IdentityId) -> Result<Vec<EventId>> {
        let mut tx = self.pool.begin().await?;

        // Lock the affected events in id order, the same lock toggles take first.
        let affected: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM events
            WHERE id IN (
                SELECT q.event_id FROM question_votes v JOIN questions q ON q.id = v.question_id
                WHERE v.identity_id = $1
                UNION
                SELECT event_id FROM event_participants WHERE identity_id = $1
            )
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(from.0)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO question_votes (question_id, identity_id)
            SELECT question_id, $2 FROM question_votes WHERE identity_id = $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(from.0)
        .bind(to.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM question_votes WHERE identity_id = $1")
            .bind(from.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO event_participants (event_id, identity_id)
            SELECT event_id, $2 FROM event_participants WHERE identity_id = $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(from.0)
        .bind(to.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM event_participants WHERE identity_id = $1")
            .bind(from.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE questions SET author_id = $2 WHERE author_id = $1")
            .bind(from.0)
            .bind(to.0)
            .execute(&mut *tx)
            .await?;

        // Re-ranked in the same transaction as the rewrite.
        for id in &affected {
            rank_event(&mut tx, *id).await?;
        }

        tx.commit().await?;
        Ok(affected.into_iter().map(EventId).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
