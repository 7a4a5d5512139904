/*!
Initial-packet key derivation and decryption ([RFC 9001] §5).

The initial secret is HKDF-Extract(version salt, first client DCID); the
per-direction secret and the header-protection key, AEAD key and IV come
from TLS 1.3 HKDF-Expand-Label with the `"tls13 "` prefix. Prior to cipher
negotiation QUIC always uses AEAD_AES_128_GCM, which is the only suite
implemented here.

[RFC 9001]: https://datatracker.ietf.org/doc/html/rfc9001
*/
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, KeyInit as _, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::models::quic::*;

pub const INITIAL_SECRET_LEN: usize = 32; // SHA-256
pub const INITIAL_SALT_LEN: usize = 20;
pub const AES_KEY_LEN: usize = 16; // AEAD_AES_128_GCM
pub const AES_BLOCK_LEN: usize = 16;
pub const AES_GCM_IV_LEN: usize = 12;
pub const HP_MASK_LEN: usize = 5;
pub const HP_SAMPLE_LEN: usize = 16;

/// Version-specific salt for the initial secret.
fn initial_salt(version: u32) -> Option<&'static [u8; INITIAL_SALT_LEN]> {
    const SALT_DRAFT_20: [u8; 20] = [
        0xef, 0x4f, 0xb0, 0xab, 0xb4, 0x74, 0x70, 0xc4, 0x1b, 0xef, 0xcf, 0x80, 0x31, 0x33, 0x4f,
        0xae, 0x48, 0x5e, 0x09, 0xa0,
    ];
    const SALT_DRAFT_21: [u8; 20] = [
        0x7f, 0xbc, 0xdb, 0x0e, 0x7c, 0x66, 0xbb, 0xe9, 0x19, 0x3a, 0x96, 0xcd, 0x21, 0x51, 0x9e,
        0xbd, 0x7a, 0x02, 0x64, 0x4a,
    ];
    const SALT_DRAFT_23: [u8; 20] = [
        0xc3, 0xee, 0xf7, 0x12, 0xc7, 0x2e, 0xbb, 0x5a, 0x11, 0xa7, 0xd2, 0x43, 0x2b, 0xb4, 0x63,
        0x65, 0xbe, 0xf9, 0xf5, 0x02,
    ];
    const SALT_DRAFT_29: [u8; 20] = [
        0xaf, 0xbf, 0xec, 0x28, 0x99, 0x93, 0xd2, 0x4c, 0x9e, 0x97, 0x86, 0xf1, 0x9c, 0x61, 0x11,
        0xe0, 0x43, 0x90, 0xa8, 0x99,
    ];
    const SALT_DRAFT_33: [u8; 20] = [
        0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8, 0x0c,
        0xad, 0xcc, 0xbb, 0x7f, 0x0a,
    ];
    const SALT_V2: [u8; 20] = [
        0x0d, 0xed, 0xe3, 0xde, 0xf7, 0x00, 0xa6, 0xdb, 0x81, 0x93, 0x81, 0xbe, 0x6e, 0x26, 0x9d,
        0xcb, 0xf9, 0xbd, 0x2e, 0xd9,
    ];

    match version {
        0xff00_0014 => Some(&SALT_DRAFT_20),
        0xff00_0015 | 0xff00_0016 => Some(&SALT_DRAFT_21),
        0xff00_0017..=0xff00_001c => Some(&SALT_DRAFT_23),
        0xff00_001d..=0xff00_0020 => Some(&SALT_DRAFT_29),
        0xff00_0021 | 0xff00_0022 => Some(&SALT_DRAFT_33),
        QUIC_V1 => Some(&SALT_DRAFT_33),
        QUIC_V2 => Some(&SALT_V2),
        _ => None,
    }
}

/// TLS 1.3 HKDF-Expand-Label ([RFC 8446] §7.1) with an empty context.
///
/// [RFC 8446]: https://datatracker.ietf.org/doc/html/rfc8446
pub fn hkdf_expand_label(secret: &[u8; INITIAL_SECRET_LEN], label: &str, out: &mut [u8]) -> bool {
    const PREFIX: &[u8] = b"tls13 ";

    if PREFIX.len() + label.len() > 255 {
        return false;
    }
    let mut info = Vec::with_capacity(4 + PREFIX.len() + label.len());
    info.extend_from_slice(&(out.len() as u16).to_be_bytes());
    info.push((PREFIX.len() + label.len()) as u8);
    info.extend_from_slice(PREFIX);
    info.extend_from_slice(label.as_bytes());
    info.push(0); // empty context

    match Hkdf::<Sha256>::from_prk(secret) {
        Ok(hk) => hk.expand(&info, out).is_ok(),
        Err(_) => false,
    }
}

/// Derive the per-direction Initial secret from the first client DCID.
pub fn initial_secret(
    dcid: &[u8],
    client: bool,
    version: u32,
) -> Option<[u8; INITIAL_SECRET_LEN]> {
    let salt = initial_salt(version)?;

    // HKDF-Extract(initial_salt, client_dst_connection_id)
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), dcid);
    let prk: [u8; INITIAL_SECRET_LEN] = prk.into();

    let label = if client { "client in" } else { "server in" };
    let mut secret = [0u8; INITIAL_SECRET_LEN];
    if !hkdf_expand_label(&prk, label, &mut secret) {
        return None;
    }
    Some(secret)
}

/// AEAD key and IV derived from the direction secret.
pub fn derive_keys(
    secret: &[u8; INITIAL_SECRET_LEN],
) -> Option<([u8; AES_KEY_LEN], [u8; AES_GCM_IV_LEN])> {
    let mut key = [0u8; AES_KEY_LEN];
    let mut iv = [0u8; AES_GCM_IV_LEN];
    if !hkdf_expand_label(secret, "quic key", &mut key)
        || !hkdf_expand_label(secret, "quic iv", &mut iv)
    {
        return None;
    }
    Some((key, iv))
}

/// Header-protection key derived from the direction secret.
pub fn hp_key(secret: &[u8; INITIAL_SECRET_LEN]) -> Option<[u8; AES_KEY_LEN]> {
    let mut key = [0u8; AES_KEY_LEN];
    if !hkdf_expand_label(secret, "quic hp", &mut key) {
        return None;
    }
    Some(key)
}

/// The 5-byte mask protecting the flag bits and the packet number:
/// AES-ECB-encrypt the 16-byte ciphertext sample with the hp key.
pub fn header_protection_mask(
    sample: &[u8; HP_SAMPLE_LEN],
    secret: &[u8; INITIAL_SECRET_LEN],
) -> Option<[u8; HP_MASK_LEN]> {
    let key = hp_key(secret)?;
    let cipher = Aes128::new_from_slice(&key).ok()?;
    let mut block = aes::Block::clone_from_slice(sample);
    cipher.encrypt_block(&mut block);
    let mut mask = [0u8; HP_MASK_LEN];
    mask.copy_from_slice(&block[..HP_MASK_LEN]);
    Some(mask)
}

/// Decrypt an AEAD_AES_128_GCM Initial payload (ciphertext followed by the
/// 16-byte tag). The nonce is the IV xored with the right-aligned packet
/// number; the associated data is the reconstructed clear header.
pub fn decrypt_payload(
    secret: &[u8; INITIAL_SECRET_LEN],
    ciphertext: &[u8],
    pktnum: u64,
    aad: &[u8],
) -> Option<Vec<u8>> {
    if ciphertext.len() < AES_BLOCK_LEN {
        return None;
    }
    let (key, mut iv) = derive_keys(secret)?;

    let mut pn = pktnum;
    let mut i = AES_GCM_IV_LEN;
    while pn > 0 {
        i -= 1;
        iv[i] ^= (pn & 0xff) as u8;
        pn >>= 8;
    }

    let cipher = Aes128Gcm::new_from_slice(&key).ok()?;
    cipher
        .decrypt(Nonce::from_slice(&iv), Payload { msg: ciphertext, aad })
        .ok()
}

/// Encrypt a payload with the Initial keys; the inverse of
/// [`decrypt_payload`], used by tests to build protected packets.
pub fn encrypt_payload(
    secret: &[u8; INITIAL_SECRET_LEN],
    plaintext: &[u8],
    pktnum: u64,
    aad: &[u8],
) -> Option<Vec<u8>> {
    let (key, mut iv) = derive_keys(secret)?;

    let mut pn = pktnum;
    let mut i = AES_GCM_IV_LEN;
    while pn > 0 {
        i -= 1;
        iv[i] ^= (pn & 0xff) as u8;
        pn >>= 8;
    }

    let cipher = Aes128Gcm::new_from_slice(&key).ok()?;
    cipher
        .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 9001, appendix A: DCID 0x8394c8f03e515708, version 1
    const DCID: [u8; 8] = [0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08];

    #[test]
    fn test_client_initial_keys_v1() {
        let secret = initial_secret(&DCID, true, QUIC_V1).unwrap();
        assert_eq!(
            hex::encode(secret),
            "c00cf151ca5be075ed0ebfb5c80323c42d6b7db67881289af4008f1f6c357aea"
        );

        let (key, iv) = derive_keys(&secret).unwrap();
        assert_eq!(hex::encode(key), "1f369613dd76d5467730efcbe3b1a22d");
        assert_eq!(hex::encode(iv), "fa044b2f42a3fd3b46fb255c");

        let hp = hp_key(&secret).unwrap();
        assert_eq!(hex::encode(hp), "9f50449e04a0e810283a1e9933adedd2");
    }

    #[test]
    fn test_server_initial_keys_v1() {
        let secret = initial_secret(&DCID, false, QUIC_V1).unwrap();
        let (key, iv) = derive_keys(&secret).unwrap();
        assert_eq!(hex::encode(key), "cf3a5331653c364c88f0f379b6067e37");
        assert_eq!(hex::encode(iv), "0ac1493ca1905853b0bba03e");
        let hp = hp_key(&secret).unwrap();
        assert_eq!(hex::encode(hp), "c206b8d9b9f0f37644430b490eeaa314");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = initial_secret(&DCID, true, QUIC_V1).unwrap();
        let b = initial_secret(&DCID, true, QUIC_V1).unwrap();
        assert_eq!(a, b);
        assert_eq!(derive_keys(&a), derive_keys(&b));
        assert_eq!(hp_key(&a), hp_key(&b));
    }

    #[test]
    fn test_unsupported_version_has_no_salt() {
        assert!(initial_secret(&DCID, true, 0xdead_beef).is_none());
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let secret = initial_secret(&DCID, true, QUIC_V1).unwrap();
        let aad = [0xc0u8, 1, 2, 3];
        let plain = b"\x06\x00\x40\x01\x01";
        let ct = encrypt_payload(&secret, plain, 2, &aad).unwrap();
        assert_eq!(decrypt_payload(&secret, &ct, 2, &aad).unwrap(), plain);
        // tag verification must fail on a flipped bit
        let mut bad = ct.clone();
        bad[0] ^= 1;
        assert!(decrypt_payload(&secret, &bad, 2, &aad).is_none());
    }
}
