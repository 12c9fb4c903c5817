use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tracing::info;

use crate::error::{AppError, Result};
use crate::types::InternalRecord;

/// Capability the matching engine is written against. Concrete backends
/// produce the full record set once at startup; the engine indexes it in
/// memory and never goes back to the source.
#[async_trait]
pub trait InternalDataSource: Send + Sync {
    async fn load_all(&self) -> Result<Vec<InternalRecord>>;
}

/// Pick a backend from the configured path: a `sqlite:` connection string
/// selects the relational backend, anything else is read as CSV.
pub fn source_for(path: &str) -> Box<dyn InternalDataSource> {
    if path.starts_with("sqlite:") {
        Box::new(SqliteSource { url: path.to_string() })
    } else {
        Box::new(CsvSource { path: path.to_string() })
    }
}

pub struct CsvSource {
    path: String,
}

#[async_trait]
impl InternalDataSource for CsvSource {
    async fn load_all(&self) -> Result<Vec<InternalRecord>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .map_err(|e| AppError::DataSource(format!("cannot open {}: {e}", self.path)))?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            let record: InternalRecord = row?;
            records.push(record);
        }
        info!(records = records.len(), path = %self.path, "internal data loaded from CSV");
        Ok(records)
    }
}

pub struct SqliteSource {
    url: String,
}

#[async_trait]
impl InternalDataSource for SqliteSource {
    async fn load_all(&self) -> Result<Vec<InternalRecord>> {
        let pool = SqlitePool::connect(&self.url)
            .await
            .map_err(|e| AppError::DataSource(format!("cannot connect to {}: {e}", self.url)))?;
        let records: Vec<InternalRecord> = sqlx::query_as(
            r#"
            SELECT item_id, department, category, subcategory, brand,
                   production_date, sold_date, days_to_sell,
                   production_price, sold_price
            FROM internal_sales
            "#,
        )
        .fetch_all(&pool)
        .await?;
        info!(records = records.len(), "internal data loaded from database");
        Ok(records)
    }
}
