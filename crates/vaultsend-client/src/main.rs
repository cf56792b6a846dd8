//! Vaultsend upload client
//!
//! Registers (or reconnects), exchanges keys, and uploads one AES-encrypted
//! file to the transfer server, verifying delivery with a
//! `cksum`-compatible checksum. Configuration comes from transfer.info in
//! the working directory; identity is kept in me.info and priv.key next to
//! it.

use anyhow::Result;
use tracing::{error, info};
use vaultsend_client::session::{Session, SessionOutcome};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("==============================================");
    info!("   Vaultsend Client v{}", env!("CARGO_PKG_VERSION"));
    info!("==============================================");

    if let Err(error) = run().await {
        error!("{error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let dir = std::env::current_dir()?;
    match Session::run(&dir).await? {
        SessionOutcome::Delivered => info!("file delivered and confirmed"),
        SessionOutcome::Aborted => {
            // a negotiated abort is still a clean exit
            error!("transfer abandoned after repeated checksum mismatches");
        }
    }
    Ok(())
}
