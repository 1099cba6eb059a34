use medical_agent_orchestrator::{
    agent::{OrchestratorConfig, QueryOrchestrator},
    models::{EvidenceSnippet, Resolution},
    oracle::MockOracle,
    retrieval::StaticRetrievalClient,
    store::chart::NullChartRenderer,
    web::{HttpPageFetcher, StaticSearchProvider},
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Medical Query Orchestrator starting (scripted demo)");

    // Scripted oracle replies for one full knowledge-branch run. A single
    // sub-query keeps the scripted pops in a fixed order.
    let oracle = Arc::new(MockOracle::new(vec![
        r#"{"datasource": "knowledge_domain", "reasoning": "asks about a drug"}"#,
        r#"{"queries": ["What is paracetamol used for and at what dose?"], "reasoning": "one retrievable fact cluster"}"#,
        r#"{"answer": "Paracetamol relieves mild pain and fever; adults usually take 500mg every 4-6 hours.", "source": "drugbank"}"#,
        r#"{"satisfactory": true, "score": 0.86, "should_retry": false, "reasoning": "covers usage and dosage"}"#,
        r#"{"answer": "Paracetamol relieves mild pain and fever. Adults usually take 500mg every 4-6 hours, at most 4g per day.", "confidence": 0.88}"#,
    ]));

    let retrieval = Arc::new(StaticRetrievalClient::new(vec![
        EvidenceSnippet {
            text: "Paracetamol (acetaminophen) is indicated for mild to moderate pain and fever.".to_string(),
            score: 0.82,
            source_id: "drugbank".to_string(),
        },
        EvidenceSnippet {
            text: "Recommended adult dose: 500mg every 4-6 hours, maximum 4g/day.".to_string(),
            score: 0.64,
            source_id: "who".to_string(),
        },
    ]));

    let orchestrator = QueryOrchestrator::new(
        oracle,
        retrieval,
        Arc::new(StaticSearchProvider::empty()),
        Arc::new(HttpPageFetcher::new()),
        None,
        Arc::new(NullChartRenderer),
        OrchestratorConfig::default(),
    );

    let query = "What is paracetamol used for and what is the usual adult dose?";
    info!(query, "Running orchestrator");

    let resolution = orchestrator.resolve(query, Some("demo-session")).await;

    println!("\n=== RESOLUTION RESULT ===");
    println!("Answer: {}", resolution.text());
    println!("Confidence: {:.2}", resolution.confidence());
    println!("Sources: {}", resolution.sources().join(", "));
    println!("\nTrace:");
    for (i, step) in resolution.trace().iter().enumerate() {
        println!("  {}: {}", i + 1, step);
    }

    if let Resolution::Answer(answer) = &resolution {
        assert!(!answer.text.is_empty());
    }

    Ok(())
}
