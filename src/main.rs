//! Process entry point: env loading, wiring and stdio serving

use std::sync::Arc;

use mailcal_mcp_rs::caldav::CalendarClient;
use mailcal_mcp_rs::config::ServerConfig;
use mailcal_mcp_rs::mailbox::MailboxClient;
use mailcal_mcp_rs::oauth::CredentialManager;
use mailcal_mcp_rs::server::MailCalServer;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application entry point
///
/// Initializes tracing from environment, loads config, constructs the
/// credential manager and protocol clients, and serves the MCP server over
/// stdio. This process expects to be spawned by an MCP client via `stdio`
/// transport.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAILCAL_CLIENT_ID=abc \
/// MAILCAL_CLIENT_SECRET=secret \
/// MAILCAL_REDIRECT_URI=https://localhost/callback \
/// MAILCAL_EMAIL=user@example.com \
/// cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::load_from_env()?;
    let http = reqwest::Client::builder()
        .timeout(config.mailbox.timeouts.socket)
        .connect_timeout(config.mailbox.timeouts.connect)
        .build()?;

    let credentials = Arc::new(CredentialManager::new(config.oauth, http.clone()));
    let mailbox = Arc::new(MailboxClient::new(
        config.mailbox,
        Arc::clone(&credentials),
    ));
    let calendar = Arc::new(CalendarClient::new(
        config.calendar,
        Arc::clone(&credentials),
        http,
    ));

    info!("serving MCP over stdio");
    let service = MailCalServer::new(credentials, Arc::clone(&mailbox), calendar)
        .serve(stdio())
        .await?;
    service.waiting().await?;
    mailbox.disconnect().await;
    Ok(())
}
