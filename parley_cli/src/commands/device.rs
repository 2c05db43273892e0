//! Device command - show the fingerprint sent as `deviceId`

use super::Context;
use anyhow::Result;
use console::style;

pub fn show(ctx: &Context, components: bool, json: bool) -> Result<()> {
    let fingerprint = ctx.session.device_fingerprint();

    if json {
        println!("{}", serde_json::to_string_pretty(fingerprint)?);
        return Ok(());
    }

    println!("Device ID: {}", style(&fingerprint.fingerprint).bold());
    if components {
        println!();
        for (name, value) in &fingerprint.components {
            println!("  {:<10} {}", name, value);
        }
    }
    Ok(())
}
