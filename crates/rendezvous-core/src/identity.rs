//! Identity binding — proving control of a wallet address.
//!
//! Clients log in by signing a challenge string with the wallet key behind
//! their address. The relay recovers the signer from the signature
//! (Ethereum `personal_sign`: secp256k1 over an EIP-191 prefixed keccak256
//! digest) and compares it to the claimed address.
//!
//! In the default fixed-challenge mode the challenge is public and constant,
//! so a captured signature can be replayed against the same relay. Nonce
//! mode (see `config::AuthMode`) binds each proof to one connection.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::address::PeerAddress;

/// Length of an `r || s || v` recoverable signature.
const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("signature is not valid hex")]
    NotHex,
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    BadLength(usize),
    #[error("invalid recovery id {0}")]
    BadRecoveryId(u8),
    #[error("malformed signature")]
    Malformed,
    #[error("signer could not be recovered")]
    RecoveryFailed,
    #[error("invalid private key")]
    BadPrivateKey,
}

// ── Digest ────────────────────────────────────────────────────────────────────

/// EIP-191 `personal_sign` digest of a message.
///
///   keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Derive the `0x`-prefixed account address of a public key.
fn address_of(key: &VerifyingKey) -> PeerAddress {
    let point = key.as_affine().to_encoded_point(false);
    // Skip the 0x04 SEC1 tag; the address is the low 20 bytes of the hash.
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    PeerAddress::from_normalized(format!("0x{}", hex::encode(&hash[12..])))
}

// ── Verification ──────────────────────────────────────────────────────────────

/// Recover the address that signed `message`.
pub fn recover_signer(message: &str, signature_hex: &str) -> Result<PeerAddress, IdentityError> {
    let raw = signature_hex.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(raw).map_err(|_| IdentityError::NotHex)?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(IdentityError::BadLength(bytes.len()));
    }

    let v = bytes[64];
    let v = if v >= 27 { v - 27 } else { v };
    let mut recovery_id = RecoveryId::from_byte(v).ok_or(IdentityError::BadRecoveryId(bytes[64]))?;
    let mut signature = Signature::from_slice(&bytes[..64]).map_err(|_| IdentityError::Malformed)?;

    // Wallets may emit high-s signatures; k256 only accepts the low-s form.
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let digest = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| IdentityError::RecoveryFailed)?;
    Ok(address_of(&key))
}

/// Check a login claim. Malformed signatures are a verification failure.
pub fn verify(challenge: &str, claimed: &PeerAddress, signature_hex: &str) -> bool {
    match recover_signer(challenge, signature_hex) {
        Ok(signer) => signer == *claimed,
        Err(_) => false,
    }
}

// ── Challenges ────────────────────────────────────────────────────────────────

/// Build a per-connection challenge: the base text plus a random nonce.
pub fn nonce_challenge(base: &str) -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    format!("{base}\nnonce: {}", hex::encode(nonce))
}

// ── Local signer ──────────────────────────────────────────────────────────────

/// A wallet key held locally. Produces login signatures.
pub struct LocalSigner {
    key: SigningKey,
    address: PeerAddress,
}

impl LocalSigner {
    /// Load a signer from a 32-byte private key, hex encoded (`0x` optional).
    pub fn from_hex(private_key: &str) -> Result<Self, IdentityError> {
        let raw = private_key.trim();
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(raw).map_err(|_| IdentityError::NotHex)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(private_key: &[u8]) -> Result<Self, IdentityError> {
        let key = SigningKey::from_slice(private_key).map_err(|_| IdentityError::BadPrivateKey)?;
        let address = address_of(key.verifying_key());
        Ok(Self { key, address })
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// `personal_sign` a message, returning `0x`-prefixed `r || s || v`
    /// with `v` in {27, 28}.
    pub fn sign(&self, message: &str) -> Result<String, IdentityError> {
        let digest = personal_message_hash(message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|_| IdentityError::Malformed)?;
        let mut bytes = Vec::with_capacity(SIGNATURE_LEN);
        bytes.extend_from_slice(&signature.to_bytes());
        bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}
