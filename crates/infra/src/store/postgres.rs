//! Postgres implementations of the permission, policy and account stores.
//!
//! Queries are runtime-checked (`sqlx::query`), so building does not need a
//! live database. Policy tuples use the conventional `policy_rules (ptype, v0,
//! v1)` layout with `ptype = 'p'`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use warden_auth::{PermissionRule, PolicyTuple, Role};
use warden_core::{AccountId, RuleId};

use super::{Account, AccountStore, PermissionRuleStore, PolicyAdapter};
use crate::InfraError;

const SCHEMA: &str = include_str!("../../migrations/0001_auth.sql");

const POLICY_TYPE: &str = "p";

/// Postgres-backed store for every persistent boundary of the pipeline.
///
/// Cheap to clone; the pool is shared.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, InfraError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), InfraError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl PermissionRuleStore for PgStore {
    #[instrument(skip(self), err)]
    async fn find_active(&self) -> Result<Vec<PermissionRule>, InfraError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, procedure, require_auth, require_hash, created_at, deleted_at
            FROM permissions
            WHERE deleted_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("permissions.find_active", e))?;

        rows.iter().map(permission_from_row).collect()
    }
}

#[async_trait]
impl PolicyAdapter for PgStore {
    #[instrument(skip(self), err)]
    async fn load_policy(&self) -> Result<Vec<PolicyTuple>, InfraError> {
        let rows = sqlx::query("SELECT v0, v1 FROM policy_rules WHERE ptype = $1 ORDER BY v0, v1")
            .bind(POLICY_TYPE)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("policy.load", e))?;

        rows.iter()
            .map(|row| {
                let role: String = get(row, "v0")?;
                let procedure: String = get(row, "v1")?;
                Ok(PolicyTuple::new(role, procedure))
            })
            .collect()
    }

    #[instrument(skip(self, tuples), fields(count = tuples.len()), err)]
    async fn add_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("policy.add", e))?;

        for tuple in tuples {
            sqlx::query(
                "INSERT INTO policy_rules (ptype, v0, v1) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(POLICY_TYPE)
            .bind(tuple.role.as_str())
            .bind(&tuple.procedure)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("policy.add", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("policy.add", e))
    }

    #[instrument(skip(self, tuples), fields(count = tuples.len()), err)]
    async fn remove_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("policy.remove", e))?;

        for tuple in tuples {
            sqlx::query("DELETE FROM policy_rules WHERE ptype = $1 AND v0 = $2 AND v1 = $3")
                .bind(POLICY_TYPE)
                .bind(tuple.role.as_str())
                .bind(&tuple.procedure)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("policy.remove", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("policy.remove", e))
    }

    #[instrument(
        skip(self, removed, added),
        fields(removed = removed.len(), added = added.len()),
        err
    )]
    async fn replace_policies(
        &self,
        removed: &[PolicyTuple],
        added: &[PolicyTuple],
    ) -> Result<(), InfraError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("policy.replace", e))?;

        for tuple in removed {
            sqlx::query("DELETE FROM policy_rules WHERE ptype = $1 AND v0 = $2 AND v1 = $3")
                .bind(POLICY_TYPE)
                .bind(tuple.role.as_str())
                .bind(&tuple.procedure)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("policy.replace", e))?;
        }

        for tuple in added {
            sqlx::query(
                "INSERT INTO policy_rules (ptype, v0, v1) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(POLICY_TYPE)
            .bind(tuple.role.as_str())
            .bind(&tuple.procedure)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("policy.replace", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("policy.replace", e))
    }
}

#[async_trait]
impl AccountStore for PgStore {
    #[instrument(skip(self), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, InfraError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, password_hash, role, created_at, deleted_at
            FROM accounts
            WHERE email = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("accounts.find_by_email", e))?;

        row.as_ref().map(account_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, InfraError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, password_hash, role, created_at, deleted_at
            FROM accounts
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("accounts.find_by_id", e))?;

        row.as_ref().map(account_from_row).transpose()
    }
}

fn permission_from_row(row: &PgRow) -> Result<PermissionRule, InfraError> {
    Ok(PermissionRule {
        id: RuleId::from_uuid(get::<Uuid>(row, "id")?),
        name: get(row, "name")?,
        procedure: get(row, "procedure")?,
        require_auth: get(row, "require_auth")?,
        require_hash: get(row, "require_hash")?,
        created_at: get(row, "created_at")?,
        deleted_at: get::<Option<DateTime<Utc>>>(row, "deleted_at")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, InfraError> {
    Ok(Account {
        id: AccountId::from_uuid(get::<Uuid>(row, "id")?),
        name: get(row, "name")?,
        email: get(row, "email")?,
        password_hash: get(row, "password_hash")?,
        role: Role::new(get::<String>(row, "role")?),
        created_at: get(row, "created_at")?,
        deleted_at: get::<Option<DateTime<Utc>>>(row, "deleted_at")?,
    })
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, InfraError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| InfraError::Serialization(format!("column {column}: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> InfraError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => InfraError::Conflict(msg),
                _ => InfraError::Store(msg),
            }
        }
        sqlx::Error::PoolTimedOut => InfraError::Store(format!("{operation}: connection pool timed out")),
        other => InfraError::Store(format!("{operation}: {other}")),
    }
}
