use crate::accounts::create_accounts_table;
use crate::assets::create_assets_table;
use crate::configuration::{get_configuration, Settings};
use crate::trades::{create_trades_pair_index, create_trades_table};
use sqlx::PgPool;

// Service handle for the historical trade store: the settings bundle and one pool
// to the trade database. Query and ingestion operations hang off this in the
// trades, aggregations and archive modules.
#[derive(Debug)]
pub struct Veta {
    pub settings: Settings,
    pub pool: PgPool,
}

impl Veta {
    pub async fn new() -> Self {
        // Load configuration settings
        let settings = get_configuration().expect("Failed to read configuration.");
        // Create db connection
        let pool = PgPool::connect_with(settings.database.with_db())
            .await
            .expect("Failed to connect to Postgres.");
        Self { settings, pool }
    }

    // Create the asset and account registries and the trade log if they do not
    // already exist
    pub async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        create_assets_table(&self.pool).await?;
        create_accounts_table(&self.pool).await?;
        create_trades_table(&self.pool).await?;
        create_trades_pair_index(&self.pool).await?;
        Ok(())
    }
}
