//! Signed login frames for testing a relay by hand.

use anyhow::{Context, Result};
use serde_json::json;

use rendezvous_core::config::DEFAULT_CHALLENGE;
use rendezvous_core::identity::LocalSigner;

/// Build the `login` frame a wallet holding `private_key` would send.
pub fn login_claim(private_key: &str, challenge: Option<&str>) -> Result<serde_json::Value> {
    let signer = LocalSigner::from_hex(private_key).context("invalid private key")?;
    let challenge = challenge.unwrap_or(DEFAULT_CHALLENGE);
    let signature = signer.sign(challenge).context("signing failed")?;
    Ok(json!({
        "type": "login",
        "address": signer.address().as_str(),
        "signature": signature,
    }))
}

pub fn cmd_login_claim(private_key: &str, challenge: Option<&str>) -> Result<()> {
    println!("{}", login_claim(private_key, challenge)?);
    Ok(())
}
