//! NibeGW monitor entry point.
//!
//! Listens for the gateway, logs every register value and product
//! announcement it sees, and keeps running until Ctrl-C.
//!
//! ```text
//! nibe-gateway [config.toml]
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config            -- explicit path or platform config dir
//!  └─ UdpTransport::bind     -- listening socket
//!  └─ Gateway::start         -- receive loop (Tokio task)
//!  └─ update pump            -- logs everything delivered to the sink
//!  └─ first_product_info     -- then word-swap detection if not configured,
//!                               then the optional connectivity check
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nibe_gateway::application::{Gateway, Update, UpdateSink};
use nibe_gateway::infrastructure::network::UdpTransport;
use nibe_gateway::infrastructure::storage::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => config::load_from(&path).with_context(|| format!("loading {}", path.display()))?,
        None => config::load_config().context("loading configuration")?,
    };

    // Structured logging.  `RUST_LOG` overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .init();

    info!("NibeGW monitor starting");

    let catalog = Arc::new(config.catalog().context("building register catalog")?);
    info!(registers = catalog.len(), "register catalog ready");

    let transport = UdpTransport::bind(config.gateway.listen_address).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Update>();
    let sink: Arc<dyn UpdateSink> = Arc::new(tx);
    let gateway = Gateway::new(catalog, Arc::new(transport), sink, config.engine_settings());
    let receive_loop = gateway.start();

    // ── Update pump ───────────────────────────────────────────────────────────
    let pump = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match update {
                Update::Coil(data) => info!(%data, "register"),
                Update::ProductInfo(product) => info!(%product, "product"),
            }
        }
    });

    // ── Start-up checks ───────────────────────────────────────────────────────
    let startup = {
        let gateway = gateway.clone();
        let word_swap_configured = config.engine.word_swap.is_some();
        let verify_connectivity = config.engine.verify_connectivity;
        let timeout = config.product_info_timeout();
        tokio::spawn(async move {
            match gateway.first_product_info(timeout).await {
                Ok(product) => info!(model = %product.model, firmware = %product.firmware_version, "heat pump identified"),
                Err(e) => warn!(error = %e, "heat pump not identified"),
            }
            if !word_swap_configured {
                if let Err(e) = gateway.detect_word_swap().await {
                    warn!(error = %e, word_swap = gateway.word_swap(), "word swap detection failed, keeping default");
                }
            }
            if verify_connectivity {
                if let Err(e) = gateway.verify_connectivity().await {
                    warn!(error = %e, "connectivity check failed");
                }
            }
        })
    };

    info!("NibeGW monitor ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown signal received");

    startup.abort();
    gateway.stop();
    receive_loop.await.context("receive loop panicked")?;
    drop(gateway);
    pump.await.context("update pump panicked")?;

    info!("NibeGW monitor stopped");
    Ok(())
}
