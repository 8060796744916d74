use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub address: String,
}

pub async fn create_accounts_table(pool: &PgPool) -> Result<(), sqlx::Error> {
    let sql = r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id BIGSERIAL PRIMARY KEY,
            address TEXT NOT NULL UNIQUE
        )
        "#;
    sqlx::query(sql).execute(pool).await?;
    Ok(())
}

// Lookup-or-create for the ingestion write path. The no-op update lets the insert
// return the existing id on conflict.
pub async fn select_or_insert_account_id(pool: &PgPool, address: &str) -> Result<i64, sqlx::Error> {
    let sql = r#"
        INSERT INTO accounts (address)
        VALUES ($1)
        ON CONFLICT (address) DO UPDATE SET address = EXCLUDED.address
        RETURNING id, address
        "#;
    let account = sqlx::query_as::<_, Account>(sql)
        .bind(address)
        .fetch_one(pool)
        .await?;
    Ok(account.id)
}
