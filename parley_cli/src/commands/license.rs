//! License commands (verify, activate, increment, status)

use super::Context;
use crate::config::{self, Config};
use anyhow::{Context as _, Result};
use console::style;
use parley_common::{
    normalize_key, ActivateRequest, AlertLevel, IncrementRequest, LicenseSnapshot, VerifyRequest,
};

/// Fetch and print the current entitlement snapshot
pub async fn verify(ctx: &Context, key: Option<String>) -> Result<()> {
    let email = ctx.config.require_email()?;
    let request = VerifyRequest {
        email: Some(email.to_string()),
        license_key: key.or_else(|| ctx.config.license_key.clone()),
        device_id: Some(ctx.device_id().to_string()),
    };

    let snapshot = ctx
        .client
        .verify(&request)
        .await
        .context("License verification failed")?;

    cache(&snapshot);
    print_snapshot(&snapshot);
    Ok(())
}

/// Redeem a license key for the configured account
pub async fn activate(ctx: &Context, key: String, captcha_token: Option<String>) -> Result<()> {
    let email = ctx.config.require_email()?;
    let request = ActivateRequest {
        email: Some(email.to_string()),
        license_key: Some(key.clone()),
        device_id: Some(ctx.device_id().to_string()),
        captcha_token,
    };

    let snapshot = ctx
        .client
        .activate(&request)
        .await
        .context("License activation failed")?;

    let remembered = Config::load().and_then(|mut saved| {
        saved.license_key = Some(normalize_key(&key));
        saved.save()
    });
    if let Err(e) = remembered {
        tracing::warn!("Failed to remember license key: {}", e);
    }

    println!("{} License activated", style("✓").green().bold());
    println!();
    cache(&snapshot);
    print_snapshot(&snapshot);
    Ok(())
}

/// Record one sent message
pub async fn increment(ctx: &Context) -> Result<()> {
    let email = ctx.config.require_email()?;
    let usage = ctx
        .client
        .increment(&IncrementRequest {
            email: Some(email.to_string()),
        })
        .await
        .context("Failed to record message")?;

    println!(
        "Messages: {}",
        format_usage(usage.message_count, usage.message_limit)
    );
    if usage.message_count >= usage.message_limit {
        println!("{}", style("Quota exhausted").red().bold());
    }
    Ok(())
}

/// Print the last snapshot received from the server
pub fn status() -> Result<()> {
    match config::load_snapshot(&config::snapshot_file())? {
        Some(snapshot) => {
            println!("{}", style("Cached license (run `parley verify` to refresh)").dim());
            println!();
            print_snapshot(&snapshot);
        }
        None => println!("No cached license. Run `parley verify` first."),
    }
    Ok(())
}

fn cache(snapshot: &LicenseSnapshot) {
    let result = config::ensure_dirs()
        .and_then(|_| config::store_snapshot(&config::snapshot_file(), snapshot));
    if let Err(e) = result {
        tracing::warn!("Failed to cache license snapshot: {}", e);
    }
}

fn print_snapshot(snapshot: &LicenseSnapshot) {
    let validity = if snapshot.valid {
        style("valid").green()
    } else {
        style("invalid").red()
    };
    println!("Plan:      {} ({})", style(&snapshot.plan).bold(), validity);
    println!(
        "Messages:  {} ({} left)",
        format_usage(snapshot.message_count, snapshot.message_limit),
        snapshot.remaining_messages()
    );
    println!("Expires:   {}", snapshot.expires_at.format("%Y-%m-%d"));
    println!(
        "Can send:  {}",
        if snapshot.can_send_message {
            style("yes").green()
        } else {
            style("no").red()
        }
    );

    for alert in &snapshot.alerts {
        let label = match alert.level {
            AlertLevel::Info => style("info").cyan(),
            AlertLevel::Warning => style("warning").yellow(),
            AlertLevel::Critical => style("critical").red().bold(),
        };
        println!("{} {}", label, alert.message);
    }

    for warning in &snapshot.warnings {
        println!("{} {}", style("!").yellow().bold(), warning.message);
    }
}

fn format_usage(count: i64, limit: i64) -> String {
    let percent = if limit > 0 {
        (count.saturating_mul(100) / limit).min(100)
    } else {
        100
    };
    format!("{} / {} ({}%)", count, limit, percent)
}
