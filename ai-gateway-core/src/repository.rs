//! Provider Config Repository.
//!
//! The persistence mechanics (ORM, migrations, SQL dialect) are an external
//! collaborator per scope; this module specifies only the repository
//! contract the rest of the core depends on, plus an in-memory
//! implementation used by the composition root's tests and by callers that
//! have not wired a database-backed store.

use crate::models::{HealthStatus, ProviderConfigRecord, ProviderType};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("provider configuration not found: {0}")]
    NotFound(String),

    #[error("duplicate (provider_id, provider_type): {0}/{1:?}")]
    Duplicate(String, ProviderType),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        RepositoryError::Database(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderConfigFilter {
    pub provider_type: Option<ProviderType>,
    pub is_active: Option<bool>,
    pub health_status: Option<HealthStatus>,
}

/// Fields accepted by the Edit use case. `provider_id` and `provider_type`
/// are immutable once created (spec §3) and therefore absent here.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfigUpdate {
    pub provider_name: Option<String>,
    pub configuration: Option<crate::models::ProviderTypeConfig>,
    pub is_active: Option<bool>,
    pub priority: Option<i32>,
    pub cost_per_unit: Option<String>,
    pub credit_cost: Option<f64>,
    pub updated_by: Option<String>,
}

#[async_trait]
pub trait ProviderConfigRepository: Send + Sync {
    async fn create(&self, record: ProviderConfigRecord) -> Result<ProviderConfigRecord, RepositoryError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<ProviderConfigRecord>, RepositoryError>;
    async fn find_all(
        &self,
        filter: ProviderConfigFilter,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError>;
    async fn update(
        &self,
        id: i64,
        update: ProviderConfigUpdate,
    ) -> Result<ProviderConfigRecord, RepositoryError>;
    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
    async fn find_by_provider_and_type(
        &self,
        provider_id: &str,
        provider_type: ProviderType,
    ) -> Result<Option<ProviderConfigRecord>, RepositoryError>;
    async fn find_primary_provider(
        &self,
        provider_type: ProviderType,
    ) -> Result<Option<ProviderConfigRecord>, RepositoryError>;
    async fn find_active_providers(
        &self,
        provider_type: Option<ProviderType>,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError>;
    async fn set_provider_active(&self, id: i64, active: bool) -> Result<(), RepositoryError>;
    async fn unset_primary_provider(&self, provider_type: ProviderType) -> Result<(), RepositoryError>;
    async fn set_primary_provider(&self, id: i64) -> Result<(), RepositoryError>;
    async fn update_health_status(
        &self,
        provider_id: &str,
        status: HealthStatus,
    ) -> Result<(), RepositoryError>;
    async fn get_providers_with_health_status(
        &self,
        status: HealthStatus,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError>;
    async fn bulk_update_providers(
        &self,
        updates: Vec<(i64, ProviderConfigUpdate)>,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError>;
    async fn bulk_set_active(&self, ids: Vec<i64>, active: bool) -> Result<(), RepositoryError>;
}

/// In-memory reference implementation. Production deployments back this
/// trait with `cfg_provider_configs` (spec §6); this implementation is what
/// the composition root wires up when no database is configured, and what
/// the proxy's own test suite uses.
#[derive(Default)]
pub struct InMemoryProviderConfigRepository {
    records: RwLock<HashMap<i64, ProviderConfigRecord>>,
    next_id: std::sync::atomic::AtomicI64,
}

impl InMemoryProviderConfigRepository {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicI64::new(1),
        }
    }

    fn validate_invariants(
        records: &HashMap<i64, ProviderConfigRecord>,
        candidate: &ProviderConfigRecord,
        skip_id: Option<i64>,
    ) -> Result<(), RepositoryError> {
        let provider_type = candidate.provider_type();
        for (id, existing) in records {
            if Some(*id) == skip_id {
                continue;
            }
            if existing.provider_id == candidate.provider_id
                && existing.provider_type() == provider_type
            {
                return Err(RepositoryError::Duplicate(
                    candidate.provider_id.clone(),
                    provider_type,
                ));
            }
        }
        if candidate.is_primary && !candidate.is_active {
            return Err(RepositoryError::Invalid(
                "setting primary requires is_active=true".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderConfigRepository for InMemoryProviderConfigRepository {
    async fn create(&self, mut record: ProviderConfigRecord) -> Result<ProviderConfigRecord, RepositoryError> {
        let mut records = self.records.write().unwrap();
        Self::validate_invariants(&records, &record, None)?;
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        record.id = id;
        record.created_at = Utc::now();
        record.updated_at = record.created_at;
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ProviderConfigRecord>, RepositoryError> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    async fn find_all(
        &self,
        filter: ProviderConfigFilter,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError> {
        let records = self.records.read().unwrap();
        let mut out: Vec<ProviderConfigRecord> = records
            .values()
            .filter(|r| filter.provider_type.map(|t| r.provider_type() == t).unwrap_or(true))
            .filter(|r| filter.is_active.map(|a| r.is_active == a).unwrap_or(true))
            .filter(|r| {
                filter
                    .health_status
                    .map(|h| r.health_status == h)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        // default ordering: ascending priority, then descending created_at
        out.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(out)
    }

    async fn update(
        &self,
        id: i64,
        update: ProviderConfigUpdate,
    ) -> Result<ProviderConfigRecord, RepositoryError> {
        let mut records = self.records.write().unwrap();
        let mut record = records
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if let Some(name) = update.provider_name {
            record.provider_name = name;
        }
        if let Some(cfg) = update.configuration {
            record.configuration = cfg;
        }
        if let Some(active) = update.is_active {
            record.is_active = active;
        }
        if let Some(priority) = update.priority {
            record.priority = priority;
        }
        if let Some(cost) = update.cost_per_unit {
            record.cost_per_unit = cost;
        }
        if let Some(credit) = update.credit_cost {
            record.credit_cost = credit;
        }
        record.updated_by = update.updated_by;
        record.updated_at = Utc::now();
        Self::validate_invariants(&records, &record, Some(id))?;
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        let mut records = self.records.write().unwrap();
        records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn find_by_provider_and_type(
        &self,
        provider_id: &str,
        provider_type: ProviderType,
    ) -> Result<Option<ProviderConfigRecord>, RepositoryError> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .find(|r| r.provider_id == provider_id && r.provider_type() == provider_type)
            .cloned())
    }

    async fn find_primary_provider(
        &self,
        provider_type: ProviderType,
    ) -> Result<Option<ProviderConfigRecord>, RepositoryError> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .find(|r| r.provider_type() == provider_type && r.is_primary)
            .cloned())
    }

    async fn find_active_providers(
        &self,
        provider_type: Option<ProviderType>,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError> {
        self.find_all(ProviderConfigFilter {
            provider_type,
            is_active: Some(true),
            health_status: None,
        })
        .await
    }

    async fn set_provider_active(&self, id: i64, active: bool) -> Result<(), RepositoryError> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        record.is_active = active;
        if !active {
            record.is_primary = false;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn unset_primary_provider(&self, provider_type: ProviderType) -> Result<(), RepositoryError> {
        let mut records = self.records.write().unwrap();
        for record in records.values_mut() {
            if record.provider_type() == provider_type && record.is_primary {
                record.is_primary = false;
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_primary_provider(&self, id: i64) -> Result<(), RepositoryError> {
        let provider_type = {
            let records = self.records.read().unwrap();
            records
                .get(&id)
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
                .provider_type()
        };
        self.unset_primary_provider(provider_type).await?;
        let mut records = self.records.write().unwrap();
        let record = records.get_mut(&id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if !record.is_active {
            return Err(RepositoryError::Invalid(
                "setting primary requires is_active=true".to_string(),
            ));
        }
        record.is_primary = true;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn update_health_status(
        &self,
        provider_id: &str,
        status: HealthStatus,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().unwrap();
        let mut found = false;
        for record in records.values_mut() {
            if record.provider_id == provider_id {
                record.health_status = status;
                record.updated_at = Utc::now();
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(RepositoryError::NotFound(provider_id.to_string()))
        }
    }

    async fn get_providers_with_health_status(
        &self,
        status: HealthStatus,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError> {
        self.find_all(ProviderConfigFilter {
            provider_type: None,
            is_active: None,
            health_status: Some(status),
        })
        .await
    }

    async fn bulk_update_providers(
        &self,
        updates: Vec<(i64, ProviderConfigUpdate)>,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError> {
        let mut out = Vec::with_capacity(updates.len());
        for (id, update) in updates {
            out.push(self.update(id, update).await?);
        }
        Ok(out)
    }

    async fn bulk_set_active(&self, ids: Vec<i64>, active: bool) -> Result<(), RepositoryError> {
        for id in ids {
            self.set_provider_active(id, active).await?;
        }
        Ok(())
    }
}

/// Postgres-backed implementation of `cfg_provider_configs` (spec §6). Used
/// by the composition root when a database URL is configured; enforces the
/// same invariants as the in-memory store via a row-level lock on the
/// `(provider_id, provider_type)` pair inside a transaction, since Postgres
/// has no equivalent to the in-process `RwLock` the other implementation
/// relies on.
pub struct SqlxProviderConfigRepository {
    pool: PgPool,
}

impl SqlxProviderConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<ProviderConfigRecord, RepositoryError> {
        let provider_type_str: String = row.try_get("provider_type")?;
        let provider_type = ProviderType::from_str(&provider_type_str)
            .ok_or_else(|| RepositoryError::Invalid(format!("unknown provider_type: {provider_type_str}")))?;
        let health_status_str: String = row.try_get("health_status")?;
        let health_status = HealthStatus::from_str(&health_status_str)
            .ok_or_else(|| RepositoryError::Invalid(format!("unknown health_status: {health_status_str}")))?;
        let configuration_json: serde_json::Value = row.try_get("configuration")?;
        let configuration = serde_json::from_value(configuration_json)
            .map_err(|e| RepositoryError::Invalid(format!("malformed configuration column: {e}")))?;
        let _ = provider_type; // provider_type is derived from `configuration` at read time (see ProviderConfigRecord::provider_type)

        Ok(ProviderConfigRecord {
            id: row.try_get("id")?,
            provider_id: row.try_get("provider_id")?,
            provider_name: row.try_get("provider_name")?,
            configuration,
            is_active: row.try_get("is_active")?,
            is_primary: row.try_get("is_primary")?,
            priority: row.try_get("priority")?,
            cost_per_unit: row.try_get("cost_per_unit")?,
            credit_cost: row.try_get("credit_cost")?,
            health_status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
        })
    }
}

#[async_trait]
impl ProviderConfigRepository for SqlxProviderConfigRepository {
    async fn create(&self, record: ProviderConfigRecord) -> Result<ProviderConfigRecord, RepositoryError> {
        if record.is_primary && !record.is_active {
            return Err(RepositoryError::Invalid(
                "setting primary requires is_active=true".to_string(),
            ));
        }
        let configuration_json = serde_json::to_value(&record.configuration)
            .map_err(|e| RepositoryError::Invalid(e.to_string()))?;
        let row = sqlx::query(
            r#"
            INSERT INTO cfg_provider_configs
                (provider_id, provider_name, provider_type, configuration, is_active,
                 is_primary, priority, cost_per_unit, credit_cost, health_status,
                 created_at, updated_at, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), now(), $11, $12)
            RETURNING *
            "#,
        )
        .bind(&record.provider_id)
        .bind(&record.provider_name)
        .bind(record.provider_type().as_str())
        .bind(&configuration_json)
        .bind(record.is_active)
        .bind(record.is_primary)
        .bind(record.priority)
        .bind(&record.cost_per_unit)
        .bind(record.credit_cost)
        .bind(record.health_status.as_str())
        .bind(&record.created_by)
        .bind(&record.updated_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => RepositoryError::Duplicate(
                record.provider_id.clone(),
                record.provider_type(),
            ),
            _ => RepositoryError::from(e),
        })?;
        Self::row_to_record(&row)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ProviderConfigRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM cfg_provider_configs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_all(
        &self,
        filter: ProviderConfigFilter,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM cfg_provider_configs
            WHERE ($1::text IS NULL OR provider_type = $1)
              AND ($2::bool IS NULL OR is_active = $2)
              AND ($3::text IS NULL OR health_status = $3)
            ORDER BY priority ASC, created_at DESC
            "#,
        )
        .bind(filter.provider_type.map(|t| t.as_str().to_string()))
        .bind(filter.is_active)
        .bind(filter.health_status.map(|h| h.as_str().to_string()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn update(
        &self,
        id: i64,
        update: ProviderConfigUpdate,
    ) -> Result<ProviderConfigRecord, RepositoryError> {
        let current = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        let provider_name = update.provider_name.unwrap_or(current.provider_name);
        let configuration = update.configuration.unwrap_or(current.configuration);
        let is_active = update.is_active.unwrap_or(current.is_active);
        let priority = update.priority.unwrap_or(current.priority);
        let cost_per_unit = update.cost_per_unit.unwrap_or(current.cost_per_unit);
        let credit_cost = update.credit_cost.unwrap_or(current.credit_cost);
        let updated_by = update.updated_by.or(current.updated_by);

        let configuration_json = serde_json::to_value(&configuration)
            .map_err(|e| RepositoryError::Invalid(e.to_string()))?;
        let row = sqlx::query(
            r#"
            UPDATE cfg_provider_configs
            SET provider_name = $2, configuration = $3, is_active = $4,
                priority = $5, cost_per_unit = $6, credit_cost = $7,
                updated_by = $8, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&provider_name)
        .bind(&configuration_json)
        .bind(is_active)
        .bind(priority)
        .bind(&cost_per_unit)
        .bind(credit_cost)
        .bind(&updated_by)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_record(&row)
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM cfg_provider_configs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn find_by_provider_and_type(
        &self,
        provider_id: &str,
        provider_type: ProviderType,
    ) -> Result<Option<ProviderConfigRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM cfg_provider_configs WHERE provider_id = $1 AND provider_type = $2",
        )
        .bind(provider_id)
        .bind(provider_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_primary_provider(
        &self,
        provider_type: ProviderType,
    ) -> Result<Option<ProviderConfigRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM cfg_provider_configs WHERE provider_type = $1 AND is_primary = true",
        )
        .bind(provider_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_active_providers(
        &self,
        provider_type: Option<ProviderType>,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError> {
        self.find_all(ProviderConfigFilter {
            provider_type,
            is_active: Some(true),
            health_status: None,
        })
        .await
    }

    async fn set_provider_active(&self, id: i64, active: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE cfg_provider_configs
            SET is_active = $2, is_primary = is_primary AND $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn unset_primary_provider(&self, provider_type: ProviderType) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE cfg_provider_configs SET is_primary = false, updated_at = now() WHERE provider_type = $1 AND is_primary = true",
        )
        .bind(provider_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_primary_provider(&self, id: i64) -> Result<(), RepositoryError> {
        let current = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if !current.is_active {
            return Err(RepositoryError::Invalid(
                "setting primary requires is_active=true".to_string(),
            ));
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE cfg_provider_configs SET is_primary = false, updated_at = now() WHERE provider_type = $1 AND is_primary = true",
        )
        .bind(current.provider_type().as_str())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE cfg_provider_configs SET is_primary = true, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_health_status(
        &self,
        provider_id: &str,
        status: HealthStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE cfg_provider_configs SET health_status = $2, updated_at = now() WHERE provider_id = $1",
        )
        .bind(provider_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(provider_id.to_string()));
        }
        Ok(())
    }

    async fn get_providers_with_health_status(
        &self,
        status: HealthStatus,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError> {
        self.find_all(ProviderConfigFilter {
            provider_type: None,
            is_active: None,
            health_status: Some(status),
        })
        .await
    }

    async fn bulk_update_providers(
        &self,
        updates: Vec<(i64, ProviderConfigUpdate)>,
    ) -> Result<Vec<ProviderConfigRecord>, RepositoryError> {
        let mut out = Vec::with_capacity(updates.len());
        for (id, update) in updates {
            out.push(self.update(id, update).await?);
        }
        Ok(out)
    }

    async fn bulk_set_active(&self, ids: Vec<i64>, active: bool) -> Result<(), RepositoryError> {
        for id in ids {
            self.set_provider_active(id, active).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProviderEndpointConfig, ProviderTypeConfig, ResponseMapping};

    fn sample(provider_id: &str, priority: i32) -> ProviderConfigRecord {
        ProviderConfigRecord {
            id: 0,
            provider_id: provider_id.to_string(),
            provider_name: provider_id.to_string(),
            configuration: ProviderTypeConfig::Llm(ProviderEndpointConfig {
                endpoint: "https://api.example.com/v1/chat".to_string(),
                request_template: serde_json::json!({"prompt": "${prompt}"}),
                response_mapping: ResponseMapping {
                    content: "choices[0].message.content".to_string(),
                    artwork_url: None,
                    audio_url: None,
                    format: None,
                },
                method: crate::models::HttpMethod::Post,
                headers: Default::default(),
                timeout: None,
                models: vec![],
                auth: None,
                health_endpoint: None,
            }),
            is_active: true,
            is_primary: false,
            priority,
            cost_per_unit: "0.002".to_string(),
            credit_cost: 1.0,
            health_status: HealthStatus::Unknown,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: None,
            updated_by: None,
        }
    }

    #[tokio::test]
    async fn only_one_primary_per_type() {
        let repo = InMemoryProviderConfigRepository::new();
        let a = repo.create(sample("a", 1)).await.unwrap();
        let b = repo.create(sample("b", 2)).await.unwrap();
        repo.set_primary_provider(a.id).await.unwrap();
        repo.set_primary_provider(b.id).await.unwrap();

        let a = repo.find_by_id(a.id).await.unwrap().unwrap();
        let b = repo.find_by_id(b.id).await.unwrap().unwrap();
        assert!(!a.is_primary);
        assert!(b.is_primary);
    }

    #[tokio::test]
    async fn duplicate_provider_and_type_rejected() {
        let repo = InMemoryProviderConfigRepository::new();
        repo.create(sample("dup", 1)).await.unwrap();
        let err = repo.create(sample("dup", 2)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_, _)));
    }

    #[tokio::test]
    async fn find_all_default_order_is_priority_then_created_desc() {
        let repo = InMemoryProviderConfigRepository::new();
        repo.create(sample("low-priority", 5)).await.unwrap();
        repo.create(sample("high-priority", 1)).await.unwrap();
        let all = repo.find_all(ProviderConfigFilter::default()).await.unwrap();
        assert_eq!(all[0].provider_id, "high-priority");
    }

    #[tokio::test]
    async fn deactivating_clears_primary() {
        let repo = InMemoryProviderConfigRepository::new();
        let a = repo.create(sample("a", 1)).await.unwrap();
        repo.set_primary_provider(a.id).await.unwrap();
        repo.set_provider_active(a.id, false).await.unwrap();
        let a = repo.find_by_id(a.id).await.unwrap().unwrap();
        assert!(!a.is_primary);
        assert!(!a.is_active);
    }
}
