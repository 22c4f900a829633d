//! Analysis catalog: canned findings per base domain.
//!
//! The worker only asks two questions of it: does this site exist, and what
//! are its findings. The admin routes maintain it.

use async_trait::async_trait;
use chrono::Utc;
use shared_types::Finding;
use sqlx::SqlitePool;

use crate::domain::base_domain;
use crate::store::{format_timestamp, StoreError};

#[derive(Debug, thiserror::Error, Clone)]
#[error("{0}")]
pub struct CatalogError(pub String);

impl From<StoreError> for CatalogError {
    fn from(e: StoreError) -> Self {
        CatalogError(e.to_string())
    }
}

impl From<sqlx::Error> for CatalogError {
    fn from(e: sqlx::Error) -> Self {
        CatalogError(format!("Database error: {e}"))
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        CatalogError(format!("Malformed catalog entry: {e}"))
    }
}

#[async_trait]
pub trait AnalysisSource: Send + Sync {
    /// The base domain for `url` if the catalog has an entry for it.
    async fn recognize(&self, url: &str) -> Result<Option<String>, CatalogError>;

    /// Findings for a recognized base domain.
    async fn findings(&self, domain: &str) -> Result<Vec<Finding>, CatalogError>;

    /// Replace the findings stored for the domain of `url`. Returns the domain.
    async fn put(&self, url: &str, findings: &[Finding]) -> Result<String, CatalogError>;

    /// Remove the entry for the domain of `url`. Returns whether one existed.
    async fn remove(&self, url: &str) -> Result<bool, CatalogError>;
}

#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalysisSource for SqliteCatalog {
    async fn recognize(&self, url: &str) -> Result<Option<String>, CatalogError> {
        let domain = base_domain(url);
        if domain.is_empty() {
            return Ok(None);
        }
        let found: Option<String> =
            sqlx::query_scalar("SELECT domain FROM analysis_catalog WHERE domain = ?")
                .bind(&domain)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found)
    }

    async fn findings(&self, domain: &str) -> Result<Vec<Finding>, CatalogError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT findings FROM analysis_catalog WHERE domain = ?")
                .bind(domain)
                .fetch_optional(&self.pool)
                .await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn put(&self, url: &str, findings: &[Finding]) -> Result<String, CatalogError> {
        let domain = base_domain(url);
        if domain.is_empty() {
            return Err(CatalogError(format!("no domain in '{url}'")));
        }
        let findings_json = serde_json::to_string(findings)?;
        sqlx::query(
            "INSERT INTO analysis_catalog (domain, findings, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(domain) DO UPDATE SET findings = excluded.findings, updated_at = excluded.updated_at",
        )
        .bind(&domain)
        .bind(findings_json)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        tracing::info!(domain = %domain, count = findings.len(), "catalog entry stored");
        Ok(domain)
    }

    async fn remove(&self, url: &str) -> Result<bool, CatalogError> {
        let domain = base_domain(url);
        let rows = sqlx::query("DELETE FROM analysis_catalog WHERE domain = ?")
            .bind(&domain)
            .execute(&self.pool)
            .await?
            .rows_affected();
        tracing::info!(domain = %domain, removed = rows > 0, "catalog entry removed");
        Ok(rows > 0)
    }
}
