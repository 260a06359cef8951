// airchat binary

use airchat::chat::ChatCli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "airchat=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    let cli = ChatCli::parse_args();

    if let Err(e) = cli.command.execute().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
