//! Reads one JSON query payload from stdin and prints the JSON result.

use query_bridge::observability::init_tracing;
use query_bridge::{BridgeConfig, QueryDispatcher, QueryPayload};
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = BridgeConfig::from_env()?;
    let dispatcher = QueryDispatcher::from_config(&config)?;

    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let payload: QueryPayload = serde_json::from_str(&input)?;

    let result = dispatcher.execute_payload(payload).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
