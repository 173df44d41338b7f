use clap::Parser;
use cli::CliConfig;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();

    let output = config.run().await?;
    println!("{output}");
    Ok(())
}
