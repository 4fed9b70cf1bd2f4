// invoice-mail-indexer/src/main.rs

use invoice_mail_indexer::{config::Config, run_server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before config so the .env load is logged.
    telemetry::init_tracing();
    let cfg = Config::from_env()?;
    run_server(cfg).await
}
