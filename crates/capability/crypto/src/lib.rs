//! 敏感字段加解密：落盘加密，仅在所属组件内存中解密。

mod cipher;

pub use cipher::{CIPHER_PREFIX, SECRET_KEYS, SecretCipher, pad_secret};

/// 加解密错误。
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    #[error("encrypt failed")]
    Encrypt,
    #[error("decrypt failed: {0}")]
    Decrypt(String),
}
