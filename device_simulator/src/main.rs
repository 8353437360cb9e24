use anyhow::Result;
use device_simulator::server::Simulator;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let simulator = Simulator::bind(&addr).await?;
    info!("Listening on {}.", simulator.local_addr()?);

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::select! {
        _ = simulator.run(token_clone) => {}
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("Failed to listen for ctrl_c. Error: {}", e);
            }
            token.cancel();
        },
    }

    info!("Final state: {}", simulator.state());
    Ok(())
}
