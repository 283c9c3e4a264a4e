//! DKIM key material generation

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;

use crate::errors::DomainError;

const RSA_KEY_BITS: usize = 2048;
const SELECTOR_SUFFIX_LEN: usize = 6;
const SELECTOR_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// DKIM key pair and selector for one domain.
///
/// Keys are base64 DER bodies without PEM armor or newlines: the public
/// key goes straight into the DKIM TXT record's `p=` tag, the private
/// key is handed to the provider at registration.
#[derive(Debug, Clone)]
pub struct DkimKeyMaterial {
    pub selector: String,
    pub public_key: String,
    pub private_key: String,
}

/// Generate a fresh 2048-bit RSA key pair and a selector.
///
/// Synchronous and CPU-bound, no side effects. When this fails the
/// caller must not create a domain row.
pub fn generate_key_material(selector_prefix: &str) -> Result<DkimKeyMaterial, DomainError> {
    let mut rng = rand::thread_rng();

    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| DomainError::KeyGeneration(format!("Failed to generate RSA key: {}", e)))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_der = private_key
        .to_pkcs8_der()
        .map_err(|e| DomainError::KeyGeneration(format!("Failed to encode private key: {}", e)))?;
    let public_der = public_key
        .to_public_key_der()
        .map_err(|e| DomainError::KeyGeneration(format!("Failed to encode public key: {}", e)))?;

    let selector = generate_selector(selector_prefix);
    debug!("Generated DKIM key material with selector {}", selector);

    Ok(DkimKeyMaterial {
        selector,
        public_key: STANDARD.encode(public_der.as_bytes()),
        private_key: STANDARD.encode(private_der.as_bytes()),
    })
}

/// Selector is the prefix plus a short random lowercase alphanumeric
/// suffix, so re-adding a domain rotates to a fresh DNS name.
fn generate_selector(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SELECTOR_SUFFIX_LEN)
        .map(|_| SELECTOR_CHARSET[rng.gen_range(0..SELECTOR_CHARSET.len())] as char)
        .collect();
    format!("{}-{}", prefix, suffix)
}
