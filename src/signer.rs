//! Custody account key material
//!
//! The custody secret key is an ed25519 seed supplied as hex. The account
//! address is the bech32 encoding of the public key with the destination
//! chain's human-readable prefix (`erd` on MultiversX).

use std::fmt;

use bech32::{FromBase32, ToBase32, Variant};
use ed25519_dalek::{Signer, SigningKey};

use crate::error::RelayError;
use crate::transaction::Transaction;

/// Length in bytes of a destination-chain public key
pub const PUBKEY_LEN: usize = 32;

/// Encode a 32-byte public key as a bech32 address
pub fn encode_address(hrp: &str, pubkey: &[u8; PUBKEY_LEN]) -> Result<String, RelayError> {
    bech32::encode(hrp, pubkey.to_base32(), Variant::Bech32)
        .map_err(|e| RelayError::CustodyKey(format!("failed to encode address: {}", e)))
}

/// Decode a bech32 address, checking its prefix and payload length
pub fn decode_address(expected_hrp: &str, address: &str) -> Result<[u8; PUBKEY_LEN], String> {
    let (hrp, data, variant) = bech32::decode(address).map_err(|e| e.to_string())?;
    if hrp != expected_hrp {
        return Err(format!("expected prefix {}, found {}", expected_hrp, hrp));
    }
    if variant != Variant::Bech32 {
        return Err("bech32m addresses are not accepted".to_string());
    }
    let bytes = Vec::<u8>::from_base32(&data).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected {} byte public key, found {}", PUBKEY_LEN, b.len()))
}

/// Signs destination transactions on behalf of the custody account
pub struct CustodySigner {
    key: SigningKey,
    address: String,
}

/// Custom Debug that never prints key material
impl fmt::Debug for CustodySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodySigner")
            .field("address", &self.address)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl CustodySigner {
    /// Load from a hex secret key. Accepts the 32-byte seed, or the 64-byte
    /// seed + public key form found in wallet PEM files.
    pub fn from_hex(secret_hex: &str, hrp: &str) -> Result<Self, RelayError> {
        let raw = hex::decode(secret_hex.trim().trim_start_matches("0x"))
            .map_err(|e| RelayError::CustodyKey(format!("secret key is not hex: {}", e)))?;

        if raw.len() != 32 && raw.len() != 64 {
            return Err(RelayError::CustodyKey(format!(
                "secret key must be 32 or 64 bytes, got {}",
                raw.len()
            )));
        }
        let seed = <[u8; 32]>::try_from(&raw[..32])
            .map_err(|_| RelayError::CustodyKey("malformed secret seed".to_string()))?;

        let key = SigningKey::from_bytes(&seed);
        let pubkey = key.verifying_key().to_bytes();
        if raw.len() == 64 && raw[32..] != pubkey[..] {
            return Err(RelayError::CustodyKey(
                "public key half does not match the secret seed".to_string(),
            ));
        }

        let address = encode_address(hrp, &pubkey)?;
        Ok(Self { key, address })
    }

    /// Bech32 address of the custody account
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> [u8; PUBKEY_LEN] {
        self.key.verifying_key().to_bytes()
    }

    /// Sign the transaction's canonical bytes and attach the hex signature
    pub fn sign(&self, tx: &mut Transaction) -> Result<(), RelayError> {
        let message = tx
            .signing_bytes()
            .map_err(|e| RelayError::CustodyKey(format!("failed to serialize transaction: {}", e)))?;
        let signature = self.key.sign(&message);
        tx.signature = Some(hex::encode(signature.to_bytes()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    const SEED_HEX: &str = "413f42575f7f26fad3317a778771212fdb80245850981e48b58a4f25e344e8f9";

    fn sample_tx(sender: &str) -> Transaction {
        Transaction {
            nonce: 5,
            value: "0".to_string(),
            receiver: sender.to_string(),
            sender: sender.to_string(),
            gas_price: 1_000_000_000,
            gas_limit: 500_000,
            data: Some("RVNEVFRyYW5zZmVy".to_string()),
            chain_id: "D".to_string(),
            version: 1,
            signature: None,
        }
    }

    #[test]
    fn test_address_round_trip() {
        let pubkey = [7u8; 32];
        let address = encode_address("erd", &pubkey).unwrap();
        assert!(address.starts_with("erd1"));
        assert_eq!(decode_address("erd", &address).unwrap(), pubkey);
    }

    #[test]
    fn test_decode_rejects_wrong_prefix() {
        let address = encode_address("cosmos", &[1u8; 32]).unwrap();
        assert!(decode_address("erd", &address).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_address("erd", "addrX").is_err());
        assert!(decode_address("erd", "").is_err());
    }

    #[test]
    fn test_signer_from_seed() {
        let signer = CustodySigner::from_hex(SEED_HEX, "erd").unwrap();
        assert!(signer.address().starts_with("erd1"));
        assert_eq!(
            decode_address("erd", signer.address()).unwrap(),
            signer.public_key()
        );
    }

    #[test]
    fn test_signer_accepts_pem_form() {
        let seed_only = CustodySigner::from_hex(SEED_HEX, "erd").unwrap();
        let pem_form = format!("{}{}", SEED_HEX, hex::encode(seed_only.public_key()));
        let signer = CustodySigner::from_hex(&pem_form, "erd").unwrap();
        assert_eq!(signer.address(), seed_only.address());

        let mismatched = format!("{}{}", SEED_HEX, "00".repeat(32));
        assert!(CustodySigner::from_hex(&mismatched, "erd").is_err());
    }

    #[test]
    fn test_signer_rejects_bad_keys() {
        assert!(CustodySigner::from_hex("not-hex", "erd").is_err());
        assert!(CustodySigner::from_hex("abcd", "erd").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let signer = CustodySigner::from_hex(SEED_HEX, "erd").unwrap();
        let debug = format!("{:?}", signer);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(SEED_HEX));
    }

    #[test]
    fn test_signature_verifies() {
        let signer = CustodySigner::from_hex(SEED_HEX, "erd").unwrap();
        let mut tx = sample_tx(signer.address());
        signer.sign(&mut tx).unwrap();

        let sig_bytes: [u8; 64] = hex::decode(tx.signature.as_ref().unwrap())
            .unwrap()
            .try_into()
            .unwrap();
        let signature = Signature::from_bytes(&sig_bytes);
        let verifying_key = VerifyingKey::from_bytes(&signer.public_key()).unwrap();
        assert!(verifying_key
            .verify(&tx.signing_bytes().unwrap(), &signature)
            .is_ok());
    }
}
