use mc_crypto::{CIPHER_PREFIX, CryptoError, SecretCipher, pad_secret};
use serde_json::json;

#[test]
fn encrypt_then_decrypt_restores_plain_text() {
    let cipher = SecretCipher::new("my-secret").expect("cipher");
    let sealed = cipher.encrypt("hunter2").expect("encrypt");
    assert!(sealed.starts_with(CIPHER_PREFIX));
    assert_ne!(sealed, cipher.encrypt("hunter2").expect("encrypt"), "nonce is random");
    assert_eq!(cipher.decrypt(&sealed).expect("decrypt"), "hunter2");
    assert_eq!(cipher.decrypt("plain").expect("plain passthrough"), "plain");
}

#[test]
fn wrong_key_fails_authentication() {
    let sealed = SecretCipher::new("a").expect("cipher").encrypt("x").expect("encrypt");
    let other = SecretCipher::new("b").expect("cipher");
    assert!(matches!(other.decrypt(&sealed), Err(CryptoError::Decrypt(_))));
}

#[test]
fn secrets_in_nested_maps_are_sealed_and_opened() {
    let cipher = SecretCipher::new("k").expect("cipher");
    let mut provider = json!({
        "type": "mysensors_v2",
        "protocol": {"type": "mqtt", "username": "u", "password": "p"},
        "Token": "t",
        "servers": [{"access_token": "z"}]
    });
    let map = provider.as_object_mut().expect("object");
    cipher.encrypt_secrets(map).expect("encrypt");
    assert!(map["protocol"]["password"].as_str().unwrap_or_default().starts_with(CIPHER_PREFIX));
    assert!(map["Token"].as_str().unwrap_or_default().starts_with(CIPHER_PREFIX));
    assert_eq!(map["protocol"]["username"], "u");

    cipher.decrypt_secrets(map).expect("decrypt");
    assert_eq!(map["protocol"]["password"], "p");
    assert_eq!(map["servers"][0]["access_token"], "z");
}

#[test]
fn secret_is_validated_and_padded() {
    assert!(pad_secret("").is_err());
    assert!(pad_secret(&"x".repeat(33)).is_err());
    let key = pad_secret("abc").expect("pad");
    assert_eq!(&key[..3], b"abc");
    assert_eq!(key.len(), 32);
}
