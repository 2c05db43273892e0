//! CLI subcommands

pub mod captcha;
pub mod device;
pub mod license;

use crate::client::ApiClient;
use crate::config::Config;
use anyhow::Result;
use parley_common::ClientSession;

/// State shared by the commands of one CLI invocation
pub struct Context {
    pub config: Config,
    pub client: ApiClient,
    pub session: ClientSession,
}

impl Context {
    pub fn new(config: Config) -> Result<Self> {
        let client = ApiClient::new(config.api_base())?;
        Ok(Self {
            config,
            client,
            session: ClientSession::new(),
        })
    }

    /// Device id for this session; computed on first use
    pub fn device_id(&self) -> &str {
        &self.session.device_fingerprint().fingerprint
    }
}

/// Persist server URL and account email
pub fn configure(server_url: Option<String>, email: Option<String>) -> Result<()> {
    let config = Config::load()?.with_overrides(server_url, email);
    config.save()?;

    println!("Server: {}", config.server_url);
    println!(
        "Email:  {}",
        config.email.as_deref().unwrap_or("(not set)")
    );
    Ok(())
}
