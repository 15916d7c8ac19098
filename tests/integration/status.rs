//! /api endpoints of a running relay.

use crate::*;

#[tokio::test]
async fn test_status_reflects_bindings() -> Result<()> {
    let relay = Relay::start(RelayOptions::default()).await?;
    let (alice, bob) = (signer(1), signer(2));

    let status = api_get(&relay, "/status").await?;
    assert_eq!(status["connections"], 0);
    assert_eq!(status["addresses"], 0);
    assert_eq!(status["auth_mode"], "fixed");
    assert_eq!(status["policy"], "multi");

    let mut x = Client::connect(&relay).await?;
    let mut y = Client::connect(&relay).await?;
    let mut z = Client::connect(&relay).await?;
    x.login(&alice).await?;
    y.login(&bob).await?;
    z.login(&bob).await?;

    let status = api_get(&relay, "/status").await?;
    assert_eq!(status["connections"], 3);
    assert_eq!(status["addresses"], 2);
    assert_eq!(status["overlay_links"], 0);

    let peers = api_get(&relay, "/peers").await?;
    let list = peers["peers"].as_array().context("peers array")?;
    assert_eq!(list.len(), 2);
    let bob_entry = list
        .iter()
        .find(|p| p["address"] == bob.address().as_str())
        .context("bob listed")?;
    assert_eq!(bob_entry["connections"], 2);
    Ok(())
}

#[tokio::test]
async fn test_overlay_endpoint_lists_links() -> Result<()> {
    let a = Relay::start(RelayOptions {
        overlay: true,
        ..RelayOptions::default()
    })
    .await?;
    let b = Relay::start(RelayOptions {
        overlay: true,
        ..RelayOptions::default()
    })
    .await?;
    b.link_to(&a).await?;

    let overlay = api_get(&a, "/overlay").await?;
    assert_eq!(overlay["links"].as_array().map(Vec::len), Some(1));
    let status = api_get(&a, "/status").await?;
    assert_eq!(status["overlay_links"], 1);
    Ok(())
}
