mod cli;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout es el canal de datos: los logs van a stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wordcount=info,mrstream=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    cli::run().await
}
