/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.
//!
//! On top of these, the module defines the three derivations the fork choice depends on: the miner's
//! visage, the per-block pose, and the charm computed from both.

use rand_core::OsRng;

use super::data_types::{CryptoHash, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// Bytes of an Ed25519 public key, as stored in the ledger.
pub type PublicKeyBytes = [u8; 32];

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Generate a fresh `Keypair` from the operating system's randomness.
    pub fn generate() -> Keypair {
        let mut csprg = OsRng {};
        Keypair(SigningKey::generate(&mut csprg))
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the bytes of the `VerifyingKey` of this `Keypair`.
    pub fn public_bytes(&self) -> PublicKeyBytes {
        self.0.verifying_key().to_bytes()
    }
}

/// Check that `signature` is a valid signature of `message` by the holder of `public_key`.
pub fn verify_signature(public_key: &PublicKeyBytes, message: &[u8], signature: &SignatureBytes) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key.verify(message, &signature).is_ok()
}

/// SHA256 over the concatenation of `parts`.
pub fn hash_parts(parts: &[&[u8]]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    for part in parts {
        hasher.update(part);
    }
    CryptoHash::new(hasher.finalize().into())
}

/// The message a miner signs to produce the pose that follows `prev_pose`.
pub fn pose_message(prev_pose: &SignatureBytes) -> CryptoHash {
    hash_parts(&[b"pose", &prev_pose.bytes()])
}

/// Produce the pose of a block mined on top of a block whose pose is `prev_pose`.
pub fn make_pose(keypair: &Keypair, prev_pose: &SignatureBytes) -> SignatureBytes {
    keypair.sign(&pose_message(prev_pose).bytes())
}

/// Produce a miner's visage: a signature over its `motto`.
pub fn make_visage(keypair: &Keypair, motto: &str) -> SignatureBytes {
    keypair.sign(motto.as_bytes())
}

/// Charm of a block whose parent has pose `prev_pose`, mined by a miner with `visage`.
pub fn calculate_charm(prev_pose: &SignatureBytes, visage: &SignatureBytes) -> CryptoHash {
    hash_parts(&[&prev_pose.bytes(), &visage.bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poses_and_visages_verify_under_the_miner_key() {
        let keypair = Keypair::generate();
        let visage = make_visage(&keypair, "motto");
        assert!(verify_signature(&keypair.public_bytes(), b"motto", &visage));
        assert!(!verify_signature(&keypair.public_bytes(), b"other motto", &visage));

        let pose = make_pose(&keypair, &SignatureBytes::default());
        let message = pose_message(&SignatureBytes::default());
        assert!(verify_signature(&keypair.public_bytes(), &message.bytes(), &pose));

        let other = Keypair::generate();
        assert!(!verify_signature(&other.public_bytes(), &message.bytes(), &pose));
        assert_ne!(calculate_charm(&pose, &visage), calculate_charm(&pose, &make_visage(&other, "motto")));
    }
}
