//! Single-relay signaling over real WebSockets.

use crate::*;

#[tokio::test]
async fn test_login_and_call_with_mixed_case_target() -> Result<()> {
    let relay = Relay::start(RelayOptions::default()).await?;
    let (alice, bob) = (signer(1), signer(2));

    let mut x = Client::connect(&relay).await?;
    let mut y = Client::connect(&relay).await?;
    let success = x.login(&alice).await?;
    assert_eq!(success["address"], alice.address().as_str());
    y.login(&bob).await?;

    let mixed = format!("0x{}", bob.address().as_str()[2..].to_uppercase());
    x.send(json!({"type": "call", "target": mixed})).await?;

    assert_eq!(
        y.recv().await?,
        json!({"type": "incoming-call", "from": alice.address().as_str()})
    );
    assert_eq!(
        x.recv().await?,
        json!({"type": "call-ack", "target": bob.address().as_str()})
    );
    Ok(())
}

#[tokio::test]
async fn test_offer_answer_candidate_exchange() -> Result<()> {
    let relay = Relay::start(RelayOptions::default()).await?;
    let (alice, bob) = (signer(1), signer(2));
    let mut x = Client::connect(&relay).await?;
    let mut y = Client::connect(&relay).await?;
    x.login(&alice).await?;
    y.login(&bob).await?;

    x.send(json!({"type": "offer", "target": bob.address().as_str(), "sdp": "v=0 offer"}))
        .await?;
    let offer = y.recv().await?;
    assert_eq!(offer["type"], "offer");
    assert_eq!(offer["from"], alice.address().as_str());
    assert_eq!(offer["sdp"], "v=0 offer");

    y.send(json!({"type": "answer", "target": alice.address().as_str(), "sdp": "v=0 answer"}))
        .await?;
    let answer = x.recv().await?;
    assert_eq!(answer["from"], bob.address().as_str());
    assert_eq!(answer["sdp"], "v=0 answer");

    x.send(json!({
        "type": "ice-candidate",
        "target": bob.address().as_str(),
        "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0"}
    }))
    .await?;
    let candidate = y.recv().await?;
    assert_eq!(candidate["candidate"]["sdpMid"], "0");

    x.expect_silence().await?;
    Ok(())
}

#[tokio::test]
async fn test_unauthenticated_call_is_rejected() -> Result<()> {
    let relay = Relay::start(RelayOptions::default()).await?;
    let mut x = Client::connect(&relay).await?;

    x.send(json!({"type": "call", "target": "0xbbb"})).await?;
    assert_eq!(x.recv().await?, json!({"type": "error", "error": "Not logged in"}));
    assert!(relay.registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_signature_is_rejected() -> Result<()> {
    let relay = Relay::start(RelayOptions::default()).await?;
    let (alice, mallory) = (signer(1), signer(3));
    let mut x = Client::connect(&relay).await?;

    let forged = mallory.sign(DEFAULT_CHALLENGE)?;
    x.send(json!({"type": "login", "address": alice.address().as_str(), "signature": forged}))
        .await?;
    assert_eq!(x.recv().await?, json!({"type": "error", "error": "Invalid signature"}));

    x.send(json!({"type": "login", "address": alice.address().as_str()})).await?;
    assert_eq!(
        x.recv().await?,
        json!({"type": "error", "error": "Missing address or signature"})
    );
    assert!(relay.registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_malformed_frames_keep_session_alive() -> Result<()> {
    let relay = Relay::start(RelayOptions::default()).await?;
    let alice = signer(1);
    let mut x = Client::connect(&relay).await?;

    x.send_raw("{not json").await?;
    x.send(json!({"type": "teleport"})).await?;
    x.expect_silence().await?;

    x.login(&alice).await?;
    Ok(())
}

#[tokio::test]
async fn test_disconnect_unbinds_address() -> Result<()> {
    let relay = Relay::start(RelayOptions::default()).await?;
    let (alice, bob) = (signer(1), signer(2));
    let mut x = Client::connect(&relay).await?;
    let mut y = Client::connect(&relay).await?;
    x.login(&alice).await?;
    y.login(&bob).await?;

    y.close().await?;
    wait_until(|| !relay.registry.contains(bob.address())).await?;

    // No local target and no overlay: the answer is dropped without error.
    x.send(json!({"type": "answer", "target": bob.address().as_str(), "sdp": "v=0"}))
        .await?;
    x.expect_silence().await?;
    Ok(())
}

#[tokio::test]
async fn test_multi_device_receives_on_every_connection() -> Result<()> {
    let relay = Relay::start(RelayOptions::default()).await?;
    let (alice, bob) = (signer(1), signer(2));
    let mut phone = Client::connect(&relay).await?;
    let mut laptop = Client::connect(&relay).await?;
    let mut caller = Client::connect(&relay).await?;
    phone.login(&bob).await?;
    laptop.login(&bob).await?;
    caller.login(&alice).await?;

    caller
        .send(json!({"type": "call", "target": bob.address().as_str()}))
        .await?;
    assert_eq!(phone.recv().await?["type"], "incoming-call");
    assert_eq!(laptop.recv().await?["type"], "incoming-call");
    Ok(())
}

#[tokio::test]
async fn test_nonce_login_flow() -> Result<()> {
    let relay = Relay::start(RelayOptions {
        auth_mode: AuthMode::Nonce,
        ..RelayOptions::default()
    })
    .await?;
    let alice = signer(1);
    let mut x = Client::connect(&relay).await?;

    let first = x.recv().await?;
    assert_eq!(first["type"], "challenge");
    let challenge = first["challenge"].as_str().context("challenge text")?.to_string();
    assert!(challenge.starts_with(DEFAULT_CHALLENGE));

    x.login_over(&alice, &challenge).await?;
    let next = x.recv().await?;
    assert_eq!(next["type"], "challenge");
    assert_ne!(next["challenge"], challenge.as_str());
    Ok(())
}
