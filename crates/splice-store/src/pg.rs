//! PostgreSQL-backed request store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use splice_models::{Request, Status};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    apply_claim, apply_outcome, apply_release, apply_returned, JoinOutcome, RequestStore,
    StoreError, SWEEP_STATUSES,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    request_id      TEXT PRIMARY KEY,
    client_id       TEXT NOT NULL,
    client_cert     BYTEA NOT NULL DEFAULT ''::bytea,
    hostname        TEXT NOT NULL DEFAULT '',
    accept_time     TIMESTAMPTZ NOT NULL,
    claim_by        TEXT NOT NULL DEFAULT '',
    claim_time      TIMESTAMPTZ,
    status          TEXT NOT NULL,
    completion_time TIMESTAMPTZ,
    response_data   BYTEA NOT NULL DEFAULT ''::bytea,
    response_key    BYTEA NOT NULL DEFAULT ''::bytea,
    cipher_nonce    BYTEA NOT NULL DEFAULT ''::bytea,
    attempt_reuse   BOOLEAN NOT NULL DEFAULT FALSE,
    generator_id    TEXT NOT NULL DEFAULT '',
    generator_data  BYTEA NOT NULL DEFAULT ''::bytea,
    gce_instance_id BYTEA NOT NULL DEFAULT ''::bytea,
    gce_project_id  BYTEA NOT NULL DEFAULT ''::bytea,
    gce_zone        BYTEA NOT NULL DEFAULT ''::bytea,
    gce_audience    TEXT NOT NULL DEFAULT '',
    gce_identity    BYTEA NOT NULL DEFAULT ''::bytea
);
CREATE INDEX IF NOT EXISTS requests_status_idx ON requests (status);
"#;

/// A `RequestStore` over a PostgreSQL pool. Each operation runs inside its
/// own transaction; dropping the transaction on an error path rolls back.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects a pool and ensures the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ClientCreate(e.to_string()))?;
        let store = PgStore { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::TxCreate(e.to_string()))
    }

    async fn select_for_update(
        tx: &mut Transaction<'static, Postgres>,
        request_id: &str,
    ) -> Result<Request, StoreError> {
        let row = sqlx::query("SELECT * FROM requests WHERE request_id = $1 FOR UPDATE")
            .bind(request_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| StoreError::Lookup(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        request_from_row(&row)
    }

    async fn write_back(
        tx: &mut Transaction<'static, Postgres>,
        req: &Request,
    ) -> Result<(), StoreError> {
        req.check_invariants()?;
        sqlx::query(
            r#"UPDATE requests SET
                   client_id = $2, client_cert = $3, hostname = $4,
                   accept_time = $5, claim_by = $6, claim_time = $7,
                   status = $8, completion_time = $9, response_data = $10,
                   response_key = $11, cipher_nonce = $12, attempt_reuse = $13,
                   generator_id = $14, generator_data = $15
               WHERE request_id = $1"#,
        )
        .bind(&req.request_id)
        .bind(&req.client_id)
        .bind(&req.client_cert)
        .bind(&req.hostname)
        .bind(req.accept_time)
        .bind(&req.claim_by)
        .bind(req.claim_time)
        .bind(req.status.as_str())
        .bind(req.completion_time)
        .bind(&req.response_data)
        .bind(&req.response_key)
        .bind(&req.cipher_nonce)
        .bind(req.attempt_reuse)
        .bind(&req.generator_id)
        .bind(&req.generator_data)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
        tx.commit()
            .await
            .map_err(|e| StoreError::TxCommit(e.to_string()))
    }
}

fn request_from_row(row: &PgRow) -> Result<Request, StoreError> {
    let status: String = row
        .try_get("status")
        .map_err(|e| StoreError::Lookup(e.to_string()))?;
    let status: Status = status.parse().map_err(StoreError::Lookup)?;

    let get_text = |name: &str| -> Result<String, StoreError> {
        row.try_get(name).map_err(|e| StoreError::Lookup(e.to_string()))
    };
    let get_bytes = |name: &str| -> Result<Vec<u8>, StoreError> {
        row.try_get(name).map_err(|e| StoreError::Lookup(e.to_string()))
    };

    Ok(Request {
        request_id: get_text("request_id")?,
        client_id: get_text("client_id")?,
        client_cert: get_bytes("client_cert")?,
        hostname: get_text("hostname")?,
        accept_time: row
            .try_get("accept_time")
            .map_err(|e| StoreError::Lookup(e.to_string()))?,
        claim_by: get_text("claim_by")?,
        claim_time: row
            .try_get("claim_time")
            .map_err(|e| StoreError::Lookup(e.to_string()))?,
        status,
        completion_time: row
            .try_get("completion_time")
            .map_err(|e| StoreError::Lookup(e.to_string()))?,
        response_data: get_bytes("response_data")?,
        gce_metadata: splice_models::wire::GceMetadata {
            instance_id: get_bytes("gce_instance_id")?,
            project_id: get_bytes("gce_project_id")?,
            zone: get_bytes("gce_zone")?,
            audience: get_text("gce_audience")?,
            identity: get_bytes("gce_identity")?,
        },
        response_key: get_bytes("response_key")?,
        cipher_nonce: get_bytes("cipher_nonce")?,
        attempt_reuse: row
            .try_get("attempt_reuse")
            .map_err(|e| StoreError::Lookup(e.to_string()))?,
        generator_id: get_text("generator_id")?,
        generator_data: get_bytes("generator_data")?,
    })
}

#[async_trait]
impl RequestStore for PgStore {
    async fn save_new(&self, req: &Request) -> Result<(), StoreError> {
        req.check_invariants()?;
        let mut tx = self.begin().await?;
        sqlx::query(
            r#"INSERT INTO requests
                   (request_id, client_id, client_cert, hostname, accept_time,
                    claim_by, claim_time, status, completion_time,
                    response_data, response_key, cipher_nonce, attempt_reuse,
                    generator_id, generator_data,
                    gce_instance_id, gce_project_id, gce_zone, gce_audience,
                    gce_identity)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                       $13, $14, $15, $16, $17, $18, $19, $20)"#,
        )
        .bind(&req.request_id)
        .bind(&req.client_id)
        .bind(&req.client_cert)
        .bind(&req.hostname)
        .bind(req.accept_time)
        .bind(&req.claim_by)
        .bind(req.claim_time)
        .bind(req.status.as_str())
        .bind(req.completion_time)
        .bind(&req.response_data)
        .bind(&req.response_key)
        .bind(&req.cipher_nonce)
        .bind(req.attempt_reuse)
        .bind(&req.generator_id)
        .bind(&req.generator_data)
        .bind(&req.gce_metadata.instance_id)
        .bind(&req.gce_metadata.project_id)
        .bind(&req.gce_metadata.zone)
        .bind(&req.gce_metadata.audience)
        .bind(&req.gce_metadata.identity)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Write(e.to_string()))?;
        Self::commit(tx).await
    }

    async fn find(&self, request_id: &str) -> Result<Request, StoreError> {
        if request_id.is_empty() {
            return Err(StoreError::Lookup("missing requestID".to_string()));
        }
        let row = sqlx::query("SELECT * FROM requests WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Lookup(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        request_from_row(&row)
    }

    async fn find_orphans(
        &self,
        older_than: Duration,
        status: Status,
    ) -> Result<Vec<Request>, StoreError> {
        if older_than <= Duration::zero() {
            return Err(StoreError::Lookup(format!(
                "olderThan: got {older_than}, want > 0"
            )));
        }
        let rows = sqlx::query("SELECT * FROM requests WHERE status = $1")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Lookup(e.to_string()))?;

        // Age filtering happens here rather than in the query.
        let cutoff = Utc::now() - older_than;
        let mut orphans = Vec::new();
        for row in &rows {
            let req = request_from_row(row)?;
            if req.accept_time < cutoff {
                orphans.push(req);
            }
        }
        Ok(orphans)
    }

    async fn claim(
        &self,
        request_id: &str,
        instance: &str,
        now: DateTime<Utc>,
    ) -> Result<Request, StoreError> {
        let mut tx = self.begin().await?;
        let mut req = Self::select_for_update(&mut tx, request_id).await?;
        apply_claim(&mut req, instance, now)?;
        Self::write_back(&mut tx, &req).await?;
        Self::commit(tx).await?;
        Ok(req)
    }

    async fn release(&self, request_id: &str) -> Result<Request, StoreError> {
        let mut tx = self.begin().await?;
        let mut req = Self::select_for_update(&mut tx, request_id).await?;
        apply_release(&mut req)?;
        Self::write_back(&mut tx, &req).await?;
        Self::commit(tx).await?;
        Ok(req)
    }

    async fn complete(
        &self,
        request_id: &str,
        outcome: &JoinOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let mut req = Self::select_for_update(&mut tx, request_id).await?;
        apply_outcome(&mut req, outcome, now)?;
        Self::write_back(&mut tx, &req).await?;
        Self::commit(tx).await
    }

    async fn mark_returned(&self, request_id: &str) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let mut req = Self::select_for_update(&mut tx, request_id).await?;
        apply_returned(&mut req)?;
        Self::write_back(&mut tx, &req).await?;
        Self::commit(tx).await
    }

    async fn sweep_orphans(&self, older_than: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = Utc::now() - older_than;
        let mut swept = Vec::new();
        let mut tx = self.begin().await?;
        for status in SWEEP_STATUSES {
            let rows = sqlx::query("SELECT * FROM requests WHERE status = $1 FOR UPDATE")
                .bind(status.as_str())
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| StoreError::Lookup(e.to_string()))?;
            for row in &rows {
                let mut req = request_from_row(row)?;
                if req.accept_time >= cutoff {
                    continue;
                }
                req.status = Status::Failed;
                Self::write_back(&mut tx, &req).await?;
                tracing::info!(request_id = %req.request_id, "cleaned up orphaned request");
                swept.push(req.request_id);
            }
        }
        Self::commit(tx).await?;
        Ok(swept)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Lookup(e.to_string()))?;
        Ok(())
    }
}
