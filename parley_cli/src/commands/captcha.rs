//! Captcha command - check a token against the server

use super::Context;
use anyhow::{Context as _, Result};
use console::style;

pub async fn verify(ctx: &Context, token: &str) -> Result<()> {
    let result = ctx
        .client
        .verify_captcha(token)
        .await
        .context("Captcha verification failed")?;

    if result.success {
        println!("{} Captcha accepted", style("✓").green().bold());
        if let Some(hostname) = &result.hostname {
            println!("  Hostname:  {}", hostname);
        }
        if let Some(ts) = &result.challenge_ts {
            println!("  Solved at: {}", ts);
        }
        return Ok(());
    }

    let reason = result.error.as_deref().unwrap_or("rejected");
    match result.error_codes.as_deref() {
        Some(codes) if !codes.is_empty() => {
            anyhow::bail!("Captcha {}: {}", reason, codes.join(", "))
        }
        _ => anyhow::bail!("Captcha {}", reason),
    }
}
