//! Record payload encryption
//!
//! AES in CFB mode. The key length picks the variant (16, 24 or 32 bytes for
//! AES-128/192/256). A fresh 16-byte IV is prepended to the ciphertext and the
//! whole thing is stored as URL-safe base64.

use crate::error::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;

/// IV length for every AES variant
pub const IV_LEN: usize = 16;

/// Key lengths accepted by [`encrypt`] and [`decrypt`]
pub const VALID_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

macro_rules! cfb_apply {
    ($mode:ident, $key:expr, $iv:expr, $buf:expr, $op:ident) => {
        match $key.len() {
            16 => cfb_mode::$mode::<Aes128>::new_from_slices($key, $iv).map(|c| c.$op($buf)),
            24 => cfb_mode::$mode::<Aes192>::new_from_slices($key, $iv).map(|c| c.$op($buf)),
            32 => cfb_mode::$mode::<Aes256>::new_from_slices($key, $iv).map(|c| c.$op($buf)),
            n => return Err(Error::Crypto(format!("invalid key length {n}"))),
        }
        .map_err(|e| Error::Crypto(e.to_string()))
    };
}

/// Check that `key` can be used as an AES key
pub fn validate_key(key: &[u8]) -> Result<()> {
    if VALID_KEY_LENGTHS.contains(&key.len()) {
        Ok(())
    } else {
        Err(Error::Crypto(format!(
            "invalid key length {}, expected 16, 24 or 32 bytes",
            key.len()
        )))
    }
}

/// Encrypt `plaintext`, returning base64 of `IV || ciphertext`
pub fn encrypt(key: &[u8], plaintext: &str) -> Result<String> {
    let mut out = vec![0u8; IV_LEN + plaintext.len()];
    let (iv, body) = out.split_at_mut(IV_LEN);
    rand::thread_rng().fill_bytes(iv);
    body.copy_from_slice(plaintext.as_bytes());
    cfb_apply!(Encryptor, key, iv, body, encrypt)?;
    Ok(URL_SAFE.encode(&out))
}

/// Reverse [`encrypt`]
///
/// # Errors
///
/// `Crypto` if the input is not base64, is shorter than an IV, or does not
/// decrypt to UTF-8.
pub fn decrypt(key: &[u8], encoded: &str) -> Result<String> {
    let mut raw = URL_SAFE
        .decode(encoded.trim())
        .map_err(|e| Error::Crypto(e.to_string()))?;
    if raw.len() < IV_LEN {
        return Err(Error::Crypto("ciphertext too short".to_string()));
    }
    let (iv, body) = raw.split_at_mut(IV_LEN);
    cfb_apply!(Decryptor, key, iv, body, decrypt)?;
    String::from_utf8(body.to_vec()).map_err(|e| Error::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: &[u8] = b"b61ba8270ccc3c1d42b4417e7bd60b71";

    #[test]
    fn roundtrip_known_key() {
        let ct = encrypt(KEY, "data").unwrap();
        assert_ne!(ct, "data");
        assert_eq!(decrypt(KEY, &ct).unwrap(), "data");
    }

    #[test]
    fn ciphertext_varies_between_calls() {
        let a = encrypt(KEY, "same input").unwrap();
        let b = encrypt(KEY, "same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn every_key_size_works() {
        for len in VALID_KEY_LENGTHS {
            let key = vec![7u8; len];
            let ct = encrypt(&key, "{\"a\":1}").unwrap();
            assert_eq!(decrypt(&key, &ct).unwrap(), "{\"a\":1}");
        }
    }

    #[test]
    fn bad_key_length_rejected() {
        assert!(validate_key(b"short").is_err());
        assert!(matches!(encrypt(b"short", "x"), Err(Error::Crypto(_))));
    }

    #[test]
    fn plaintext_json_is_not_ciphertext() {
        assert!(decrypt(KEY, "{\"Version\":\"v2\"}").is_err());
    }

    #[test]
    fn short_input_rejected() {
        let short = URL_SAFE.encode([1u8, 2, 3]);
        assert!(decrypt(KEY, &short).is_err());
    }

    proptest! {
        #[test]
        fn decrypt_inverts_encrypt(
            key in prop::sample::select(VALID_KEY_LENGTHS.to_vec())
                .prop_flat_map(|n| prop::collection::vec(any::<u8>(), n)),
            text in ".{0,256}",
        ) {
            let ct = encrypt(&key, &text).unwrap();
            prop_assert_eq!(decrypt(&key, &ct).unwrap(), text);
        }
    }
}
