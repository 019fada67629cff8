use std::fmt;

use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest as _, Keccak256};

use crate::chain::RskAddress;
use crate::error::{FlyoverError, Result};
use crate::quote::QuoteHash;

/// Signature as transported: normalized to lowercase hex without a `0x` prefix but otherwise
/// unchecked, so a corrupted value is representable and is rejected at verification.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct QuoteSignature(String);

impl QuoteSignature {
    pub fn from_bytes(bytes: &[u8; 65]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> std::result::Result<[u8; 65], String> {
        let bytes = hex::decode(&self.0).map_err(|e| format!("signature is not hex: {e}"))?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("signature must be 65 bytes, got {}", b.len()))
    }
}

impl From<&str> for QuoteSignature {
    fn from(value: &str) -> Self {
        let body = value.strip_prefix("0x").unwrap_or(value);
        Self(body.to_ascii_lowercase())
    }
}

impl From<String> for QuoteSignature {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for QuoteSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for QuoteSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuoteSignature({})", self.0)
    }
}

impl Serialize for QuoteSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for QuoteSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(QuoteSignature::from)
    }
}

pub trait QuoteSigner: Send + Sync {
    fn address(&self) -> RskAddress;

    fn sign(&self, message: &[u8]) -> Result<QuoteSignature>;
}

pub fn sign_quote(signer: &dyn QuoteSigner, quote_hash: &QuoteHash) -> Result<QuoteSignature> {
    signer.sign(quote_hash.as_bytes())
}

pub fn personal_message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

pub fn recover_signer(
    message: &[u8],
    signature: &QuoteSignature,
) -> std::result::Result<RskAddress, String> {
    let bytes = signature.to_bytes()?;
    let recovery = match bytes[64] {
        v @ (27 | 28) => v - 27,
        v @ (0 | 1) => v,
        v => return Err(format!("invalid recovery byte {v}")),
    };
    let recovery_id =
        RecoveryId::from_i32(i32::from(recovery)).map_err(|e| format!("recovery id: {e}"))?;
    let signature = RecoverableSignature::from_compact(&bytes[..64], recovery_id)
        .map_err(|e| format!("decode signature: {e}"))?;

    let digest = Message::from_digest(personal_message_digest(message));
    let pubkey = Secp256k1::verification_only()
        .recover_ecdsa(&digest, &signature)
        .map_err(|e| format!("recover public key: {e}"))?;
    Ok(RskAddress::from_uncompressed_pubkey(
        &pubkey.serialize_uncompressed(),
    ))
}

pub fn verify_signature(
    message: &[u8],
    signature: &QuoteSignature,
    expected: &RskAddress,
) -> std::result::Result<(), String> {
    let recovered = recover_signer(message, signature)?;
    if &recovered != expected {
        return Err(format!("signed by {recovered}, expected {expected}"));
    }
    Ok(())
}

pub struct Secp256k1Signer {
    secp: Secp256k1<All>,
    secret: SecretKey,
    address: RskAddress,
}

impl Secp256k1Signer {
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| FlyoverError::Signer(format!("invalid secret key: {e}")))?;
        let pubkey = PublicKey::from_secret_key(&secp, &secret);
        let address = RskAddress::from_uncompressed_pubkey(&pubkey.serialize_uncompressed());
        Ok(Self {
            secp,
            secret,
            address,
        })
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let body = secret_hex.strip_prefix("0x").unwrap_or(secret_hex);
        let bytes = hex::decode(body)
            .map_err(|e| FlyoverError::Signer(format!("secret key is not hex: {e}")))?;
        Self::from_secret_bytes(&bytes)
    }
}

impl QuoteSigner for Secp256k1Signer {
    fn address(&self) -> RskAddress {
        self.address
    }

    fn sign(&self, message: &[u8]) -> Result<QuoteSignature> {
        let digest = Message::from_digest(personal_message_digest(message));
        let signature = self.secp.sign_ecdsa_recoverable(&digest, &self.secret);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&compact);
        out[64] = 27 + recovery_id.to_i32() as u8;
        Ok(QuoteSignature::from_bytes(&out))
    }
}

impl fmt::Debug for Secp256k1Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secp256k1Signer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
