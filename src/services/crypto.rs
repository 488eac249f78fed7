use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use ring::{aead, pbkdf2, rand::{SecureRandom, SystemRandom}};
use std::num::NonZeroU32;

const APP_SECRET: &[u8] = b"pennysync-secret-v1";
const KEYCHAIN_SERVICE: &str = "pennysync";
const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// Sealing of API credentials so they never sit in plaintext in the environment file.
pub struct CryptoService;

impl CryptoService {
    /// Store `value` under `name`, preferring the OS keychain. Returns the reference to put in config.
    pub fn seal_secret(name: &str, value: &str) -> Result<String> {
        match Self::store_in_keychain(name, value) {
            Ok(reference) => Ok(reference),
            Err(err) => {
                tracing::debug!(name, error = %err, "keychain unavailable, using symmetric encryption");
                Self::encrypt_symmetric(value)
            }
        }
    }

    /// Resolve a configured value: keychain references and `enc:` payloads are opened,
    /// anything else is a plaintext secret.
    pub fn reveal_secret(value: &str) -> Result<String> {
        if value.starts_with("keychain:") {
            return Self::retrieve_from_keychain(value);
        }
        if value.starts_with("enc:") {
            return Self::decrypt_symmetric(value);
        }
        Ok(value.to_string())
    }

    fn store_in_keychain(name: &str, value: &str) -> Result<String> {
        keyring::Entry::new(KEYCHAIN_SERVICE, name)
            .map_err(|e| anyhow!("Keychain error: {}", e))?
            .set_password(value)
            .map_err(|e| anyhow!("Keychain store error: {}", e))?;
        Ok(format!("keychain:{}:{}", KEYCHAIN_SERVICE, name))
    }

    fn retrieve_from_keychain(reference: &str) -> Result<String> {
        let name = reference
            .strip_prefix("keychain:")
            .and_then(|rest| rest.strip_prefix(KEYCHAIN_SERVICE))
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| anyhow!("Invalid keychain reference"))?;
        keyring::Entry::new(KEYCHAIN_SERVICE, name)
            .map_err(|e| anyhow!("Keychain error: {}", e))?
            .get_password()
            .map_err(|e| anyhow!("Keychain fetch error: {}", e))
    }

    fn encrypt_symmetric(plaintext: &str) -> Result<String> {
        let rng = SystemRandom::new();
        let mut payload = SealedPayload {
            salt: vec![0u8; SALT_LEN],
            nonce: [0u8; NONCE_LEN],
            ciphertext: plaintext.as_bytes().to_vec(),
        };
        rng.fill(&mut payload.salt)
            .and_then(|_| rng.fill(&mut payload.nonce))
            .map_err(|_| anyhow!("Random generator unavailable"))?;

        derive_key(&payload.salt)?
            .seal_in_place_append_tag(
                aead::Nonce::assume_unique_for_key(payload.nonce),
                aead::Aad::empty(),
                &mut payload.ciphertext,
            )
            .map_err(|_| anyhow!("Encryption failed"))?;
        Ok(payload.encode())
    }

    fn decrypt_symmetric(sealed: &str) -> Result<String> {
        let mut payload = SealedPayload::decode(sealed)?;
        let opened = derive_key(&payload.salt)?
            .open_in_place(
                aead::Nonce::assume_unique_for_key(payload.nonce),
                aead::Aad::empty(),
                &mut payload.ciphertext,
            )
            .map_err(|_| anyhow!("Decryption failed"))?;
        Ok(String::from_utf8(opened.to_vec())?)
    }
}

/// `enc:<salt>:<nonce>:<ciphertext+tag>`, each part standard base64.
struct SealedPayload {
    salt: Vec<u8>,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl SealedPayload {
    fn encode(&self) -> String {
        let b64 = &general_purpose::STANDARD;
        format!(
            "enc:{}:{}:{}",
            b64.encode(&self.salt),
            b64.encode(self.nonce),
            b64.encode(&self.ciphertext)
        )
    }

    fn decode(value: &str) -> Result<Self> {
        let b64 = &general_purpose::STANDARD;
        let parts: Vec<&str> = value.split(':').collect();
        let [_, salt, nonce, ciphertext] = parts.as_slice() else {
            return Err(anyhow!("Invalid encrypted payload"));
        };
        let nonce: [u8; NONCE_LEN] = b64
            .decode(nonce)
            .map_err(|e| anyhow!("Decode nonce: {}", e))?
            .try_into()
            .map_err(|_| anyhow!("Invalid nonce length"))?;
        Ok(Self {
            salt: b64.decode(salt).map_err(|e| anyhow!("Decode salt: {}", e))?,
            nonce,
            ciphertext: b64
                .decode(ciphertext)
                .map_err(|e| anyhow!("Decode ciphertext: {}", e))?,
        })
    }
}

fn derive_key(salt: &[u8]) -> Result<aead::LessSafeKey> {
    let mut key_bytes = [0u8; 32];
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).ok_or_else(|| anyhow!("Invalid iterations"))?;
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        APP_SECRET,
        &mut key_bytes,
    );
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
        .map_err(|_| anyhow!("Invalid key material"))?;
    Ok(aead::LessSafeKey::new(unbound))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_passes_through() {
        assert_eq!(CryptoService::reveal_secret("plain-key").unwrap(), "plain-key");
    }

    #[test]
    fn symmetric_payload_opens() {
        let sealed = CryptoService::encrypt_symmetric("tempo-password").unwrap();
        assert!(sealed.starts_with("enc:"));
        assert_eq!(CryptoService::reveal_secret(&sealed).unwrap(), "tempo-password");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let sealed = CryptoService::encrypt_symmetric("tempo-password").unwrap();
        let mut parts: Vec<String> = sealed.split(':').map(str::to_string).collect();
        parts[3] = general_purpose::STANDARD.encode(b"garbage-garbage-garbage");
        assert!(CryptoService::reveal_secret(&parts.join(":")).is_err());
        assert!(CryptoService::reveal_secret("enc:only:three").is_err());
        assert!(CryptoService::reveal_secret("keychain:other:name").is_err());
    }
}
