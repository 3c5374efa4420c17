use crate::CryptoError;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use domain::Spec;
use rand_core::{OsRng, RngCore};
use serde_json::Value;

/// 加密值前缀。
pub const CIPHER_PREFIX: &str = "cipher:";

/// 需要加密的键（大小写不敏感）。
pub const SECRET_KEYS: [&str; 5] = [
    "password",
    "token",
    "access_token",
    "authorization",
    "authentication",
];

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// 校验并右填充密钥到 32 字节。
pub fn pad_secret(secret: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let bytes = secret.as_bytes();
    if bytes.is_empty() {
        return Err(CryptoError::InvalidSecret("secret is empty".to_string()));
    }
    if bytes.len() > KEY_LEN {
        return Err(CryptoError::InvalidSecret(format!(
            "secret longer than {} bytes",
            KEY_LEN
        )));
    }
    let mut key = [b'0'; KEY_LEN];
    key[..bytes.len()].copy_from_slice(bytes);
    Ok(key)
}

fn is_secret_key(key: &str) -> bool {
    SECRET_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// ChaCha20-Poly1305 字段加密器。
#[derive(Clone)]
pub struct SecretCipher {
    cipher: ChaCha20Poly1305,
}

impl SecretCipher {
    pub fn new(secret: &str) -> Result<Self, CryptoError> {
        let key = pad_secret(secret)?;
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    /// 加密为 `cipher:<hex(nonce||ciphertext)>`；已加密的值原样返回。
    pub fn encrypt(&self, plain: &str) -> Result<String, CryptoError> {
        if plain.starts_with(CIPHER_PREFIX) || plain.is_empty() {
            return Ok(plain.to_string());
        }
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(format!("{}{}", CIPHER_PREFIX, hex::encode(out)))
    }

    /// 解密；不带前缀的明文原样返回。
    pub fn decrypt(&self, text: &str) -> Result<String, CryptoError> {
        let Some(encoded) = text.strip_prefix(CIPHER_PREFIX) else {
            return Ok(text.to_string());
        };
        let raw = hex::decode(encoded).map_err(|err| CryptoError::Decrypt(err.to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(CryptoError::Decrypt("payload too short".to_string()));
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt("authentication failed".to_string()))?;
        String::from_utf8(plain).map_err(|err| CryptoError::Decrypt(err.to_string()))
    }

    /// 递归加密映射中的敏感键。
    pub fn encrypt_secrets(&self, map: &mut Spec) -> Result<(), CryptoError> {
        self.walk(map, &|cipher, text| cipher.encrypt(text))
    }

    /// 递归解密映射中的敏感键。
    pub fn decrypt_secrets(&self, map: &mut Spec) -> Result<(), CryptoError> {
        self.walk(map, &|cipher, text| cipher.decrypt(text))
    }

    /// 对任意 JSON 值解密（变量结果使用）。
    pub fn decrypt_value(&self, value: &mut Value) -> Result<(), CryptoError> {
        match value {
            Value::Object(map) => self.decrypt_secrets(map),
            Value::Array(items) => items.iter_mut().try_for_each(|item| self.decrypt_value(item)),
            _ => Ok(()),
        }
    }

    fn walk(
        &self,
        map: &mut Spec,
        apply: &dyn Fn(&SecretCipher, &str) -> Result<String, CryptoError>,
    ) -> Result<(), CryptoError> {
        for (key, value) in map.iter_mut() {
            match value {
                Value::String(text) if is_secret_key(key) => {
                    *text = apply(self, text)?;
                }
                Value::Object(inner) => self.walk(inner, apply)?,
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        if let Value::Object(inner) = item {
                            self.walk(inner, apply)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
