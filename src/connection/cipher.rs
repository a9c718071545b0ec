use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use anyhow::{Context, Result};
use base64::Engine;
use rand::TryRngCore;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// AES-256-CBC with a random IV prepended to the ciphertext, the whole blob
/// base64 encoded. Published URLs carry connection descriptors in this form.
#[derive(Clone)]
pub struct ConnectionCipher {
    key: [u8; 32],
}

impl ConnectionCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut iv = [0u8; IV_LEN];
        let mut rng = rand::rngs::OsRng;
        rng.try_fill_bytes(&mut iv)
            .context("Failed to generate IV")?;

        let ciphertext = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|_| anyhow::anyhow!("Invalid key or IV length"))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut payload = Vec::with_capacity(IV_LEN + ciphertext.len());
        payload.extend_from_slice(&iv);
        payload.extend_from_slice(&ciphertext);
        Ok(base64::prelude::BASE64_STANDARD.encode(payload))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let payload = base64::prelude::BASE64_STANDARD
            .decode(encoded.trim())
            .context("Failed to decode connection info")?;
        if payload.len() < IV_LEN + BLOCK_LEN {
            return Err(anyhow::anyhow!("Connection info payload is too short"));
        }
        let (iv, ciphertext) = payload.split_at(IV_LEN);
        let plaintext = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|_| anyhow::anyhow!("Invalid key or IV length"))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| anyhow::anyhow!("Failed to decrypt connection info"))?;
        String::from_utf8(plaintext).context("Decrypted connection info is not valid UTF-8")
    }

    /// Encrypts a JSON object, normalizing an absent `database` to `""`.
    pub fn encrypt_json(&self, text: &str) -> Result<String> {
        let mut parsed: serde_json::Value =
            serde_json::from_str(text).context("Input must be a valid JSON string")?;
        if let Some(object) = parsed.as_object_mut() {
            let missing = object.get("database").map(|v| v.is_null()).unwrap_or(true);
            if missing {
                object.insert("database".to_string(), serde_json::Value::String(String::new()));
            }
        }
        let normalized = serde_json::to_string(&parsed)?;
        self.encrypt(&normalized)
    }
}
