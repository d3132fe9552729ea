//! Tests against a live provider endpoint
//!
//! These need a config.toml (or OPENAI_API_KEY) with real credentials and
//! spend real tokens, so they are ignored by default.

use serde_json::json;

use civicrag::ops::Operation;
use civicrag::ops::Runner;
use civicrag::AppConfig;

async fn live_runner() -> Runner {
    let _ = civicrag::logging::init_simple_logging();
    let config = AppConfig::load().expect("config.toml with provider credentials");
    Runner::new(config).await.expect("runner construction")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test live_provider_tests -- --ignored --nocapture
async fn test_live_health_check() {
    println!("\nChecking provider connectivity...");

    let runner = live_runner().await;
    let response = runner.run(Operation::HealthCheck, json!({})).await;

    assert!(response.success, "{:?}", response.error);
    let data = response.data.expect("health payload");
    println!("Status: {}", data["status"]);
    println!("Components: {}", data["components"]);

    assert_eq!(data["components"]["openai"], json!("healthy"));
    assert_eq!(data["components"]["embeddings"], json!("healthy"));
}

#[tokio::test]
#[ignore] // Run with: cargo test --test live_provider_tests -- --ignored --nocapture
async fn test_live_answer_question() {
    let runner = live_runner().await;

    let response = runner
        .run(
            Operation::AnswerQuestion,
            json!({
                "question": "Which complaint sounds most urgent?",
                "complaint_data": [
                    {
                        "id": "live-1",
                        "type": "Gas Leak",
                        "description": "Strong gas smell in the building lobby",
                        "borough": "MANHATTAN"
                    },
                    {
                        "id": "live-2",
                        "type": "Graffiti",
                        "description": "Tagging on the schoolyard wall",
                        "borough": "QUEENS"
                    }
                ]
            }),
        )
        .await;

    assert!(response.success, "{:?}", response.error);
    let data = response.data.expect("answer payload");
    let answer = data["answer"].as_str().expect("answer text");
    println!("Answer: {answer}");

    assert!(!answer.is_empty());
    assert_eq!(data["question"], json!("Which complaint sounds most urgent?"));
}

#[tokio::test]
#[ignore] // Run with: cargo test --test live_provider_tests -- --ignored --nocapture
async fn test_live_analyze_complaint() {
    let runner = live_runner().await;

    let response = runner
        .run(
            Operation::AnalyzeComplaint,
            json!({
                "complaint_data": {
                    "id": "live-3",
                    "type": "Water Main Break",
                    "description": "Water flooding the intersection at 5th and Main",
                    "borough": "BROOKLYN"
                }
            }),
        )
        .await;

    assert!(response.success, "{:?}", response.error);
    let data = response.data.expect("analysis payload");
    let analysis = &data["analysis"];
    println!("Analysis: {analysis}");

    let risk = analysis["risk_score"].as_f64().expect("risk score");
    assert!((0.0..=1.0).contains(&risk));
    assert!(analysis["category"].as_str().is_some());
}
