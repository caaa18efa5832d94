/// Postgres-backed credential store and revocation registry
///
/// Membership lives in its own `refresh_tokens` table so that add, remove
/// and rotate are row-level statements. Every membership or lockout change
/// first takes the account row lock (`SELECT ... FOR UPDATE`), which
/// serializes concurrent writers on the same account.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::account::{Account, Role};
use crate::auth::revocation::{RevocationEntry, RevocationRegistry};
use crate::auth::{LockState, LockoutPolicy, RefreshTokenRecord};
use crate::configuration::DatabaseSettings;
use crate::error::StoreError;
use crate::store::CredentialStore;

/// Connect and bring the schema up to date.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.connection_string())
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Backend(format!("migration failed: {}", e)))?;

    Ok(pool)
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    email: String,
    password_hash: String,
    role: String,
    is_active: bool,
    last_login_at: Option<DateTime<Utc>>,
    failed_login_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
    token_hash: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<MembershipRow> for RefreshTokenRecord {
    fn from(row: MembershipRow) -> Self {
        Self {
            token_hash: row.token_hash,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
        }
    }
}

impl AccountRow {
    fn into_account(self, refresh_tokens: Vec<RefreshTokenRecord>) -> Result<Account, StoreError> {
        let role: Role = self.role.parse().map_err(StoreError::Backend)?;
        Ok(Account {
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
            role,
            is_active: self.is_active,
            last_login_at: self.last_login_at,
            failed_login_attempts: self.failed_login_attempts.max(0) as u32,
            locked_until: self.locked_until,
            refresh_tokens,
            created_at: self.created_at,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, role, is_active, last_login_at, \
                               failed_login_attempts, locked_until, created_at";

pub struct PgCredentialStore {
    pool: PgPool,
    max_refresh_tokens: i64,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, max_refresh_tokens: usize) -> Self {
        Self {
            pool,
            max_refresh_tokens: max_refresh_tokens.max(1) as i64,
        }
    }

    async fn membership(&self, account_id: Uuid) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT token_hash, issued_at, expires_at
            FROM refresh_tokens
            WHERE account_id = $1
            ORDER BY issued_at
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn hydrate(&self, row: Option<AccountRow>) -> Result<Account, StoreError> {
        let row = row.ok_or(StoreError::NotFound)?;
        let tokens = self.membership(row.id).await?;
        row.into_account(tokens)
    }

    /// Lock the account row for the rest of the transaction.
    async fn lock_account(conn: &mut PgConnection, account_id: Uuid) -> Result<AccountRow, StoreError> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::NotFound)
    }

    /// Insert one membership row, then prune expired rows and evict the
    /// oldest beyond the cap.
    async fn insert_membership(
        &self,
        conn: &mut PgConnection,
        account_id: Uuid,
        record: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_hash, account_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.token_hash)
        .bind(account_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM refresh_tokens WHERE account_id = $1 AND expires_at <= $2")
            .bind(account_id)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        // The row just inserted is exempt; it may share its `issued_at`
        // second with the rows it competes with.
        sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE account_id = $1
              AND token_hash <> $3
              AND token_hash NOT IN (
                  SELECT token_hash FROM refresh_tokens
                  WHERE account_id = $1 AND token_hash <> $3
                  ORDER BY issued_at DESC, token_hash
                  LIMIT $2
              )
            "#,
        )
        .bind(account_id)
        .bind(self.max_refresh_tokens - 1)
        .bind(&record.token_hash)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, password_hash, role, is_active, last_login_at,
                                  failed_login_attempts, locked_until, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(account.id)
        .bind(account.email.to_lowercase())
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.is_active)
        .bind(account.last_login_at)
        .bind(account.failed_login_attempts as i32)
        .bind(account.locked_until)
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET email = $2, password_hash = $3, role = $4, is_active = $5,
                last_login_at = $6, failed_login_attempts = $7, locked_until = $8
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(account.email.to_lowercase())
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.is_active)
        .bind(account.last_login_at)
        .bind(account.failed_login_attempts as i32)
        .bind(account.locked_until)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_active(&self, account_id: Uuid, active: bool) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts SET is_active = $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE email = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = \
             (SELECT account_id FROM refresh_tokens WHERE token_hash = $1)",
            ACCOUNT_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn add_refresh_token(
        &self,
        account_id: Uuid,
        record: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_account(&mut tx, account_id).await?;
        self.insert_membership(&mut tx, account_id, &record, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_refresh_token(
        &self,
        account_id: Uuid,
        token_hash: &str,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE account_id = $1 AND token_hash = $2")
                .bind(account_id)
                .bind(token_hash)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn rotate_refresh_token(
        &self,
        account_id: Uuid,
        old_hash: &str,
        record: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_account(&mut tx, account_id).await?;

        let removed =
            sqlx::query("DELETE FROM refresh_tokens WHERE account_id = $1 AND token_hash = $2")
                .bind(account_id)
                .bind(old_hash)
                .execute(&mut *tx)
                .await?;

        if removed.rows_affected() != 1 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::NotFound);
        }

        self.insert_membership(&mut tx, account_id, &record, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear_refresh_tokens(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            DELETE FROM refresh_tokens
            WHERE account_id = $1
            RETURNING token_hash, issued_at, expires_at
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_login_failure(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut row = Self::lock_account(&mut tx, account_id).await?;

        let transition = policy.register_failure(
            row.failed_login_attempts.max(0) as u32,
            row.locked_until,
            now,
        );

        sqlx::query(
            "UPDATE accounts SET failed_login_attempts = $2, locked_until = $3 WHERE id = $1",
        )
        .bind(account_id)
        .bind(transition.failed_attempts as i32)
        .bind(transition.locked_until)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        row.failed_login_attempts = transition.failed_attempts as i32;
        row.locked_until = transition.locked_until;
        self.hydrate(Some(row)).await
    }

    async fn record_login_success(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LockState, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = Self::lock_account(&mut tx, account_id).await?;

        if let Some(until) = row.locked_until.filter(|until| *until > now) {
            return Ok(LockState::Locked { until });
        }

        sqlx::query(
            r#"
            UPDATE accounts
            SET failed_login_attempts = 0, locked_until = NULL, last_login_at = $2
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(LockState::Open { failed_attempts: 0 })
    }
}

pub struct PgRevocationRegistry {
    pool: PgPool,
    retention_margin: Duration,
}

impl PgRevocationRegistry {
    pub fn new(pool: PgPool, retention_margin: Duration) -> Self {
        Self {
            pool,
            retention_margin,
        }
    }

    async fn insert(conn: &mut PgConnection, entry: &RevocationEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (token_hash, account_id, token_class, reason, expires_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(&entry.token_hash)
        .bind(entry.account_id)
        .bind(entry.class.as_str())
        .bind(entry.reason.as_str())
        .bind(entry.expires_at)
        .bind(entry.revoked_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RevocationRegistry for PgRevocationRegistry {
    async fn record(&self, entry: RevocationEntry) -> Result<(), StoreError> {
        if entry.is_redundant(entry.revoked_at, self.retention_margin) {
            return Ok(());
        }
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut conn, &entry).await
    }

    async fn record_many(&self, entries: Vec<RevocationEntry>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for entry in entries
            .iter()
            .filter(|e| !e.is_redundant(e.revoked_at, self.retention_margin))
        {
            Self::insert(&mut tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn is_revoked(&self, token_hash: &str) -> Result<bool, StoreError> {
        let revoked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM revoked_tokens WHERE token_hash = $1)",
        )
        .bind(token_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(revoked)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= $1")
            .bind(now - self.retention_margin)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
