use veta::veta::Veta;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load configuration and connect to the trade database
    let veta = Veta::new().await;

    // Create the asset and account registries and the trade log if needed. Queries
    // and ingestion are driven through the library by the serving layer.
    veta.initialize_schema()
        .await
        .expect("Failed to initialize schema.");
    println!(
        "Trade history store ready on database {}.",
        veta.settings.database.database_name
    );
    Ok(())
}
