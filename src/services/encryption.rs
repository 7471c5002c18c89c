use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::aead::{
    Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM,
};
use ring::error::Unspecified;
use ring::hmac;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Shown instead of a card number whenever the real one cannot be disclosed.
pub const MASKED_PLACEHOLDER: &str = "**** **** **** ****";

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid encrypted data format")]
    InvalidFormat,
}

impl From<Unspecified> for CodecError {
    fn from(_: Unspecified) -> Self {
        CodecError::EncryptionFailed("Cryptographic operation failed".to_string())
    }
}

struct FixedNonceSequence {
    nonce: Option<[u8; NONCE_LEN]>,
}

impl FixedNonceSequence {
    fn new(nonce: [u8; NONCE_LEN]) -> Self {
        Self { nonce: Some(nonce) }
    }
}

impl NonceSequence for FixedNonceSequence {
    // Each key binding seals or opens exactly one message.
    fn advance(&mut self) -> Result<Nonce, Unspecified> {
        let nonce = self.nonce.take().ok_or(Unspecified)?;
        Ok(Nonce::assume_unique_for_key(nonce))
    }
}

/// Reversible, deterministic codec for card numbers.
///
/// The ciphertext doubles as the lookup key for a card, so the same plaintext
/// must always encrypt to the same value under a given key. The nonce is
/// therefore synthesized from an HMAC of the plaintext (SIV style) instead of
/// being drawn at random; decryption recomputes it to authenticate the result.
///
/// Format (base64): [nonce (12 bytes)][ciphertext + auth tag]
#[derive(Clone)]
pub struct CardNumberCodec {
    key: [u8; 32],
    nonce_key: hmac::Key,
}

impl std::fmt::Debug for CardNumberCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardNumberCodec").finish_non_exhaustive()
    }
}

impl CardNumberCodec {
    pub fn new(key: [u8; 32]) -> Self {
        let nonce_key_material = ring::digest::digest(
            &ring::digest::SHA256,
            &[b"card-number-nonce:".as_slice(), key.as_slice()].concat(),
        );
        let nonce_key = hmac::Key::new(hmac::HMAC_SHA256, nonce_key_material.as_ref());

        Self { key, nonce_key }
    }

    /// Builds a codec from a configured secret string.
    pub fn from_secret(secret: &str) -> Self {
        Self::new(derive_key(secret))
    }

    fn synthetic_nonce(&self, plaintext: &[u8]) -> [u8; NONCE_LEN] {
        let tag = hmac::sign(&self.nonce_key, plaintext);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&tag.as_ref()[..NONCE_LEN]);
        nonce
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        let nonce_bytes = self.synthetic_nonce(plaintext.as_bytes());

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key)?;
        let mut sealing_key = SealingKey::new(unbound_key, FixedNonceSequence::new(nonce_bytes));

        let mut in_out = plaintext.as_bytes().to_vec();
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| CodecError::EncryptionFailed("Sealing failed".to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LEN + in_out.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&in_out);

        Ok(STANDARD.encode(result))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CodecError> {
        let raw = STANDARD
            .decode(ciphertext)
            .map_err(|_| CodecError::InvalidFormat)?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CodecError::InvalidFormat);
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&raw[..NONCE_LEN]);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key)?;
        let mut opening_key = OpeningKey::new(unbound_key, FixedNonceSequence::new(nonce_bytes));

        let mut in_out = raw[NONCE_LEN..].to_vec();
        let decrypted = opening_key
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| CodecError::DecryptionFailed("Opening failed".to_string()))?;

        if self.synthetic_nonce(decrypted) != nonce_bytes {
            return Err(CodecError::DecryptionFailed(
                "Nonce does not match plaintext".to_string(),
            ));
        }

        String::from_utf8(decrypted.to_vec())
            .map_err(|_| CodecError::DecryptionFailed("Invalid UTF-8".to_string()))
    }

    /// Display-safe form of a stored ciphertext. Never fails: anything that
    /// cannot be decrypted renders as [`MASKED_PLACEHOLDER`].
    pub fn masked(&self, ciphertext: &str) -> String {
        match self.decrypt(ciphertext) {
            Ok(plaintext) => mask_card_number(&plaintext),
            Err(e) => {
                tracing::warn!(error = %e, "Could not decrypt card number for masking");
                MASKED_PLACEHOLDER.to_string()
            }
        }
    }
}

/// `**** **** **** 1234` from the last four digits of `number`, ignoring any
/// non-digit characters.
pub fn mask_card_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() < 4 {
        return MASKED_PLACEHOLDER.to_string();
    }

    let last_four: String = digits[digits.len() - 4..].iter().collect();
    format!("**** **** **** {}", last_four)
}

/// Helper to derive a 32-byte key from a string (e.g., from environment variable).
/// Uses SHA-256 to ensure we always get exactly 32 bytes.
pub fn derive_key(key_string: &str) -> [u8; 32] {
    use ring::digest;

    let hash = digest::digest(&digest::SHA256, key_string.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(hash.as_ref());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn codec() -> CardNumberCodec {
        CardNumberCodec::from_secret("test-encryption-key-32-bytes-minimum")
    }

    #[rstest]
    #[case("4111111111111111")]
    #[case("5500000000000004")]
    #[case("0000000000000000")]
    #[case("9999999999999999")]
    fn test_encrypt_decrypt_roundtrip(#[case] number: &str) {
        let codec = codec();

        let encrypted = codec.encrypt(number).unwrap();
        let decrypted = codec.decrypt(&encrypted).unwrap();

        assert_eq!(number, decrypted);
        assert!(!encrypted.contains(number));
    }

    #[test]
    fn test_encryption_is_deterministic() {
        let codec = codec();

        let encrypted1 = codec.encrypt("4111111111111111").unwrap();
        let encrypted2 = codec.encrypt("4111111111111111").unwrap();
        let other = codec.encrypt("4111111111111112").unwrap();

        assert_eq!(encrypted1, encrypted2);
        assert_ne!(encrypted1, other);
    }

    #[test]
    fn test_codecs_with_same_secret_agree() {
        let encrypted = codec().encrypt("4111111111111111").unwrap();
        assert_eq!(codec().decrypt(&encrypted).unwrap(), "4111111111111111");
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = CardNumberCodec::from_secret("key-one")
            .encrypt("4111111111111111")
            .unwrap();
        let result = CardNumberCodec::from_secret("key-two").decrypt(&encrypted);

        assert!(matches!(result, Err(CodecError::DecryptionFailed(_))));
    }

    #[rstest]
    #[case("not base64 at all!")]
    #[case("")]
    #[case("AAAA")]
    fn test_malformed_ciphertext_is_rejected(#[case] input: &str) {
        assert!(matches!(
            codec().decrypt(input),
            Err(CodecError::InvalidFormat)
        ));
    }

    #[rstest]
    #[case("4111111111111111", "**** **** **** 1111")]
    #[case("4111-1111-1111-4242", "**** **** **** 4242")]
    #[case("12a3", MASKED_PLACEHOLDER)]
    #[case("123", MASKED_PLACEHOLDER)]
    #[case("", MASKED_PLACEHOLDER)]
    fn test_mask_card_number(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(mask_card_number(input), expected);
    }

    #[test]
    fn test_masked_falls_back_on_corrupt_ciphertext() {
        let codec = codec();
        let encrypted = codec.encrypt("4111111111111111").unwrap();

        assert_eq!(codec.masked(&encrypted), "**** **** **** 1111");
        assert_eq!(codec.masked("garbage"), MASKED_PLACEHOLDER);
        assert_eq!(
            CardNumberCodec::from_secret("rotated").masked(&encrypted),
            MASKED_PLACEHOLDER
        );
    }
}
