use crate::assets::{canonical_asset_order, select_asset_id, AssetDescriptor};
use crate::error::QueryError;
use crate::trades::select_trades_by_day;
use crate::veta::Veta;
use chrono::{DateTime, Utc};
use csv::Writer;
use flate2::{write::GzEncoder, Compression};
use std::fs::File;
use std::path::PathBuf;

impl Veta {
    // Write one day of trades for an asset pair to a compressed csv under the
    // archive path. Trades land in the caller's requested pair direction, named
    // BASE_COUNTER_YYYYMMDD.csv.gz.
    pub async fn archive_trades(
        &self,
        base_asset: &AssetDescriptor,
        counter_asset: &AssetDescriptor,
        day: DateTime<Utc>,
    ) -> Result<PathBuf, QueryError> {
        let base_asset_id = select_asset_id(&self.pool, base_asset).await?;
        let counter_asset_id = select_asset_id(&self.pool, counter_asset).await?;
        let pair = canonical_asset_order(base_asset_id, counter_asset_id);
        let trades = select_trades_by_day(&self.pool, &pair, day).await?;

        // Check directory for csv files is created
        let p = format!("{}/csv", self.settings.application.archive_path);
        std::fs::create_dir_all(&p).expect("Could not create directories.");

        // Define filename = BASE_COUNTER_YYYYMMDD.csv.gz
        let f = format!(
            "{}_{}_{}.csv.gz",
            base_asset.code,
            counter_asset.code,
            day.format("%Y%m%d")
        );
        let fp = std::path::Path::new(&p).join(f);

        // Write trades to compressed csv file
        let file = File::create(&fp).expect("Could not create file.");
        let gz = GzEncoder::new(file, Compression::default());
        let mut wtr = Writer::from_writer(gz);
        for trade in trades.iter() {
            wtr.serialize(trade).expect("Could not serialize trade.");
        }
        wtr.flush().expect("Could not flush wtr.");
        wtr.into_inner()
            .expect("Could not take gz encoder back from wtr.")
            .finish()
            .expect("Could not finish gz stream.");
        Ok(fp)
    }
}
