use krawl_mode::{init_logging, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = EngineConfig::from_env()?;
    let report = krawl_mode::run(config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
