use secp256k1::{Message, PublicKey, Secp256k1, ecdsa::Signature};

/// Length of a compact (r ‖ s) ECDSA signature.
const COMPACT_SIGNATURE_LEN: usize = 64;

/// Verify a hex signature against a hex SEC1 public key (compressed or
/// uncompressed) and a 32-byte message digest.
///
/// 64-byte signatures are read as compact; anything else is tried as DER.
/// Decoding problems are reported as `Err`, a well-formed but wrong
/// signature as `Ok(false)`. Callers that must fail closed fold both into
/// `false`.
pub fn verify_signature_hex(
    pubkey_hex: &str,
    sig_hex: &str,
    msg32: [u8; 32],
) -> Result<bool, &'static str> {
    if pubkey_hex.is_empty() || sig_hex.is_empty() {
        return Err("missing signature or public key");
    }

    let secp = Secp256k1::verification_only();

    let sig_bytes = hex::decode(sig_hex).map_err(|_| "invalid signature hex")?;
    let sig = if sig_bytes.len() == COMPACT_SIGNATURE_LEN {
        Signature::from_compact(&sig_bytes).map_err(|_| "invalid compact signature")?
    } else {
        Signature::from_der(&sig_bytes).map_err(|_| "invalid DER signature")?
    };

    let pk_bytes = hex::decode(pubkey_hex).map_err(|_| "invalid pubkey hex")?;
    let pk = PublicKey::from_slice(&pk_bytes).map_err(|_| "invalid pubkey bytes")?;

    let msg = Message::from_digest_slice(&msg32).map_err(|_| "invalid message length")?;
    Ok(secp.verify_ecdsa(&msg, &sig, &pk).is_ok())
}

/// Compact hex signature over `msg32`. Signing belongs to wallets, so this
/// only exists to build fixtures.
#[cfg(test)]
pub fn sign_digest_hex(sk: &secp256k1::SecretKey, msg32: [u8; 32]) -> String {
    let secp = Secp256k1::new();
    let msg = Message::from_digest_slice(&msg32).expect("32-byte digest");
    hex::encode(secp.sign_ecdsa(&msg, sk).serialize_compact())
}
