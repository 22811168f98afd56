use std::sync::Arc;

use table_server::common::logger::init_logger_with_file;
use table_server::{Catalog, Config, InMemoryCatalog, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    init_logger_with_file(Some(&config.log_level), config.log_dir.as_deref());

    tracing::info!("table-server starting...");

    let catalog: Arc<dyn Catalog> = match &config.catalog_file {
        Some(path) => Arc::new(InMemoryCatalog::from_json_file(path)?),
        None => Arc::new(InMemoryCatalog::new()),
    };

    let server = Server::new(config, catalog);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
