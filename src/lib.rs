pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

// Export logic types
pub use logic::{
    DeleteEngine, PatchEngine, PathResolver, QueryEngine, QueryParams, RowReader, RowWriter,
    ResourceValidator, ValidatorRegistry, WriteContext,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, RowStore, Transaction, TransactionCoordinator, TxnStatus};

use crate::api::handlers::AppState;
use std::sync::Arc;

/// Build the full application state from a schema description, seeding
/// the default rows when asked. Used by `main` and by integration tests.
pub async fn build_state(
    description: serde_json::Value,
    load_seed: bool,
) -> anyhow::Result<AppState> {
    let schema = Arc::new(model::Schema::load(description)?);
    let store = Arc::new(store::MemoryStore::new(schema.clone()));
    if load_seed {
        seed::load_seed_data(store.as_ref(), &schema).await?;
    }
    Ok(AppState::new(
        schema,
        store,
        Arc::new(logic::ValidatorRegistry::with_defaults()),
    ))
}

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with INFO level only (suppress DEBUG logs)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    // Load configuration
    let config = crate::config::AppConfig::load()?;

    let description = match &config.database.schema_path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => seed::switch_schema(),
    };
    let state = build_state(description, config.database.load_seed).await?;

    let app = crate::api::routes::create_router(state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}
