use medical_agent_orchestrator::{
    agent::{OrchestratorConfig, QueryOrchestrator},
    api::start_server,
    oracle::GeminiOracle,
    retrieval::{HttpRetrievalClient, RetrievalClient, StaticRetrievalClient},
    store::chart::NullChartRenderer,
    store::{PostgresWarehouse, RelationalStore},
    web::{HttpPageFetcher, HttpSearchProvider, SearchProvider, StaticSearchProvider},
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("GEMINI_API_KEY not set in .env; oracle calls will degrade to fallbacks");
        String::new()
    });

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Medical Query Orchestrator - API Server");
    info!("Port: {}", api_port);

    let oracle = Arc::new(GeminiOracle::new(gemini_api_key));

    let retrieval: Arc<dyn RetrievalClient> = match HttpRetrievalClient::from_env() {
        Some(client) => Arc::new(client),
        None => {
            warn!("RETRIEVAL_API_BASE_URL not set; retrieval disabled, web fallback will carry the load");
            Arc::new(StaticRetrievalClient::empty())
        }
    };

    let search: Arc<dyn SearchProvider> = match HttpSearchProvider::from_env() {
        Some(provider) => Arc::new(provider),
        None => {
            warn!("SEARCH_API_BASE_URL not set; web fallback disabled");
            Arc::new(StaticSearchProvider::empty())
        }
    };

    let warehouse: Option<Arc<dyn RelationalStore>> = match PostgresWarehouse::from_env() {
        Some(store) => Some(Arc::new(store)),
        None => {
            warn!("DATABASE_URL not set; warehouse questions fall back to the knowledge branch");
            None
        }
    };

    let orchestrator = Arc::new(QueryOrchestrator::new(
        oracle,
        retrieval,
        search,
        Arc::new(HttpPageFetcher::new()),
        warehouse,
        Arc::new(NullChartRenderer),
        OrchestratorConfig::default(),
    ));

    info!("Orchestrator initialized");
    info!("Starting API server...");

    start_server(orchestrator, api_port).await?;

    Ok(())
}
