use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};
use uuid::Uuid;

use crate::error::{ApiError, Result};

/// Lower-cases the address and rejects anything that is not `0x` + 40 hex chars.
pub fn normalize_address(input: &str) -> Result<String> {
    let address = input.trim().to_lowercase();
    if !is_valid_address(&address) {
        return Err(ApiError::Validation(format!(
            "not a valid wallet address: {}",
            input
        )));
    }
    Ok(address)
}

pub fn is_valid_address(address: &str) -> bool {
    let Some(hex_part) = address.strip_prefix("0x") else {
        return false;
    };
    hex_part.len() == 40 && hex_part.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

/// Recovers the signer address from a personal_sign signature (65 bytes r||s||v)
/// over `message`, using the EIP-191 prefix wallets apply before signing.
pub fn recover_signer(message: &str, signature: &str) -> Result<String> {
    let sig_bytes =
        hex::decode(signature.trim_start_matches("0x")).map_err(|_| ApiError::InvalidSignature)?;
    if sig_bytes.len() != 65 {
        return Err(ApiError::InvalidSignature);
    }

    let v = sig_bytes[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recovery_byte).ok_or(ApiError::InvalidSignature)?;
    let signature =
        Signature::from_slice(&sig_bytes[..64]).map_err(|_| ApiError::InvalidSignature)?;

    let key = VerifyingKey::recover_from_digest(eip191_digest(message), &signature, recovery_id)
        .map_err(|_| ApiError::InvalidSignature)?;

    Ok(address_of_key(&key))
}

fn eip191_digest(message: &str) -> Keccak256 {
    Keccak256::new_with_prefix(format!(
        "\x19Ethereum Signed Message:\n{}{}",
        message.len(),
        message
    ))
}

fn address_of_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    // address = last 20 bytes of keccak256(uncompressed pubkey without the 0x04 tag)
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Deterministic watch-only deposit address for a user. The derivation only
/// attributes incoming transfers; the treasury holds the spending keys.
pub fn derive_deposit_address(master_secret: &str, user_id: Uuid) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(master_secret.as_bytes());
    hasher.update(user_id.as_bytes());
    let hash = hasher.finalize();
    format!("0x{}", hex::encode(&hash[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn signed(message: &str) -> (String, String) {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let verifying_key = VerifyingKey::from(&signing_key);

        let (sig, recovery_id) = signing_key
            .sign_digest_recoverable(eip191_digest(message))
            .expect("signing should not fail");

        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);

        (address_of_key(&verifying_key), format!("0x{}", hex::encode(bytes)))
    }

    #[test]
    fn recovers_the_signing_address() {
        let message = "XNRT wallet ownership proof\nNonce: deadbeef";
        let (address, signature) = signed(message);
        assert_eq!(recover_signer(message, &signature).unwrap(), address);
    }

    #[test]
    fn tampered_message_recovers_a_different_address() {
        let (address, signature) = signed("original message");
        let recovered = recover_signer("tampered message", &signature).unwrap();
        assert_ne!(recovered, address);
    }

    #[test]
    fn malformed_signature_is_rejected() {
        assert!(matches!(
            recover_signer("msg", "0x1234"),
            Err(ApiError::InvalidSignature)
        ));
        assert!(matches!(
            recover_signer("msg", "not-hex"),
            Err(ApiError::InvalidSignature)
        ));
    }

    #[test]
    fn address_normalization() {
        assert_eq!(
            normalize_address(" 0xA1B2C3D4E5F6A7B8C9D0E1F2A3B4C5D6E7F8A9B0 ").unwrap(),
            "0xa1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0"
        );
        assert!(normalize_address("0x123").is_err());
        assert!(normalize_address("a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0").is_err());
        assert!(normalize_address("0xZZb2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0").is_err());
    }

    #[test]
    fn deposit_address_is_stable_and_well_formed() {
        let user = Uuid::new_v4();
        let a = derive_deposit_address("secret", user);
        let b = derive_deposit_address("secret", user);
        assert_eq!(a, b);
        assert!(is_valid_address(&a));
        assert_ne!(a, derive_deposit_address("other-secret", user));
        assert_ne!(a, derive_deposit_address("secret", Uuid::new_v4()));
    }
}
