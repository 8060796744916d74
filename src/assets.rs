use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;

// Caller-facing identity of an asset. The registry maps a descriptor to the bigint
// id used everywhere internally.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AssetDescriptor {
    pub code: String,
    pub issuer: String,
}

impl AssetDescriptor {
    pub fn new(code: &str, issuer: &str) -> Self {
        Self {
            code: code.to_string(),
            issuer: issuer.to_string(),
        }
    }
}

impl fmt::Display for AssetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.issuer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Asset {
    pub id: i64,
    pub code: String,
    pub issuer: String,
}

// Canonical storage order for an asset pair. Exactly one physical representation
// exists per unordered pair: base_asset_id < counter_asset_id. The flag records
// that the caller's requested base is stored as counter, so results must present
// the mirrored market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetPairQuery {
    pub base_asset_id: i64,
    pub counter_asset_id: i64,
    pub flipped: bool,
}

pub fn canonical_asset_order(base_asset_id: i64, counter_asset_id: i64) -> AssetPairQuery {
    if base_asset_id <= counter_asset_id {
        AssetPairQuery {
            base_asset_id,
            counter_asset_id,
            flipped: false,
        }
    } else {
        AssetPairQuery {
            base_asset_id: counter_asset_id,
            counter_asset_id: base_asset_id,
            flipped: true,
        }
    }
}

pub async fn create_assets_table(pool: &PgPool) -> Result<(), sqlx::Error> {
    let sql = r#"
        CREATE TABLE IF NOT EXISTS assets (
            id BIGSERIAL PRIMARY KEY,
            code TEXT NOT NULL,
            issuer TEXT NOT NULL,
            UNIQUE (code, issuer)
        )
        "#;
    sqlx::query(sql).execute(pool).await?;
    Ok(())
}

// Resolve a descriptor to its registered id. A missing registration is surfaced as
// AssetNotFound so the caller can distinguish "no such market" from "market with no
// trades".
pub async fn select_asset_id(pool: &PgPool, asset: &AssetDescriptor) -> Result<i64, QueryError> {
    let sql = r#"
        SELECT id, code, issuer
        FROM assets
        WHERE code = $1 AND issuer = $2
        "#;
    match sqlx::query_as::<_, Asset>(sql)
        .bind(&asset.code)
        .bind(&asset.issuer)
        .fetch_one(pool)
        .await
    {
        Ok(a) => Ok(a.id),
        Err(sqlx::Error::RowNotFound) => Err(QueryError::AssetNotFound(asset.to_string())),
        Err(e) => Err(e.into()),
    }
}

// Lookup-or-create for the ingestion write path. The no-op update lets the insert
// return the existing id on conflict.
pub async fn select_or_insert_asset_id(
    pool: &PgPool,
    asset: &AssetDescriptor,
) -> Result<i64, sqlx::Error> {
    let sql = r#"
        INSERT INTO assets (code, issuer)
        VALUES ($1, $2)
        ON CONFLICT (code, issuer) DO UPDATE SET code = EXCLUDED.code
        RETURNING id, code, issuer
        "#;
    let asset = sqlx::query_as::<_, Asset>(sql)
        .bind(&asset.code)
        .bind(&asset.issuer)
        .fetch_one(pool)
        .await?;
    Ok(asset.id)
}
