use axum::serve;
use confdb_rest::api::routes::create_router;
use confdb_rest::config::AppConfig;
use confdb_rest::seed;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new().filter_level(LevelFilter::Info).init();

    println!("confdb-rest: switch configuration REST server");

    // Load configuration
    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    let description = match &config.database.schema_path {
        Some(path) => {
            println!("Loading schema description from {}", path);
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        }
        None => seed::switch_schema(),
    };

    let state = confdb_rest::build_state(description, config.database.load_seed).await?;
    println!(
        "Schema '{}' loaded with {} tables",
        state.schema.name,
        state.schema.tables.len()
    );
    if config.database.load_seed {
        println!("Default rows loaded");
    }

    run_server(create_router(state), &config).await?;

    Ok(())
}

async fn run_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("confdb-rest server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
