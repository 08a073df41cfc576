//! End-to-end encryption of the logical field stream
//!
//! Encryption runs before splitting: the included fields are serialized
//! as one TLV stream, sealed with XChaCha20-Poly1305 under an X25519
//! shared key, and replaced by ENCRYPTED, CRYPTO_NONCE and optionally
//! CRYPTO_PUBKEY fields. A fresh ephemeral sender key and a fresh random
//! 24-byte nonce are drawn on every compile, so chunk keys of an
//! encrypted veritum are not stable across recompiles.
//!
//! Decryption never raises on adversarial input: missing or tampered
//! crypto fields leave the stream untouched and callers inspect whether
//! ENCRYPTED or plaintext fields are present.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use cube::definitions::fields::{Field, FieldSet};
use cube::definitions::params::FieldType;
use cube::{generator, parser};
use log::debug;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::errors::VeritumError;

type Blake2b32 = Blake2b<U32>;

/// Size of the encryption nonce in bytes
pub const CRYPTO_NONCE_SIZE: usize = 24;

/// Options of the encryption step
pub struct EncryptOptions<'a> {
    /// X25519 public keys of the recipients; one ENCRYPTED field is
    /// produced per recipient, all sealing the same stream
    pub recipients: &'a [PublicKey],
    /// Embed the ephemeral sender public key so recipients can decrypt
    /// without out-of-band key exchange
    pub include_sender_pubkey: bool,
    /// Field types excluded from encryption on top of the default
    /// exclusions (positionals and the notification recipient)
    pub exclude: &'a [FieldType],
}

impl<'a> EncryptOptions<'a> {
    /// Encrypt towards the given recipients, embedding the sender key
    pub fn for_recipients(recipients: &'a [PublicKey]) -> Self {
        Self {
            recipients,
            include_sender_pubkey: true,
            exclude: &[],
        }
    }
}

/// Derive the symmetric key for one sender/recipient pair
///
/// BLAKE2b-32 over the raw shared secret and both public keys, binding
/// the key to the pair the way the sealed-box construction does.
fn shared_key(shared: &[u8; 32], sender: &PublicKey, recipient: &PublicKey) -> Key {
    let mut hasher = Blake2b32::new();
    hasher.update(shared);
    hasher.update(sender.as_bytes());
    hasher.update(recipient.as_bytes());
    Key::from(<[u8; 32]>::from(hasher.finalize()))
}

/// Replace the encryptable fields of `fields` with their sealed form
pub(crate) fn encrypt_fields(
    fields: &FieldSet,
    opts: &EncryptOptions<'_>,
) -> Result<FieldSet, VeritumError> {
    if opts.recipients.is_empty() {
        return Err(VeritumError::NoRecipients);
    }

    let included: Vec<&Field> = fields
        .content_fields()
        .filter(|f| !opts.exclude.contains(&f.field_type))
        .collect();
    if included.is_empty() {
        return Ok(fields.clone());
    }
    let plaintext = generator::encode_stream(
        &included.iter().map(|f| (*f).clone()).collect::<Vec<Field>>(),
    )?;

    let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let sender_pub = PublicKey::from(&ephemeral);
    let mut nonce = [0u8; CRYPTO_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut sealed: Vec<Field> = Vec::new();
    for recipient in opts.recipients {
        let shared = ephemeral.diffie_hellman(recipient);
        let cipher = XChaCha20Poly1305::new(&shared_key(shared.as_bytes(), &sender_pub, recipient));
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| VeritumError::Encryption)?;
        sealed.push(Field::new(FieldType::Encrypted, ciphertext));
    }
    sealed.push(Field::new(FieldType::CryptoNonce, nonce.to_vec()));
    if opts.include_sender_pubkey {
        sealed.push(Field::new(
            FieldType::CryptoPubkey,
            sender_pub.as_bytes().to_vec(),
        ));
    }

    // splice the sealed fields in at the position of the first included
    // field, dropping the plaintext ones
    let mut out = FieldSet::new(fields.cube_type());
    let mut spliced = false;
    for field in fields.iter() {
        if included.iter().any(|inc| std::ptr::eq(*inc, field)) {
            if !spliced {
                for f in sealed.drain(..) {
                    out.append_field(f);
                }
                spliced = true;
            }
            continue;
        }
        out.append_field(field.clone());
    }
    Ok(out)
}

/// Try to decrypt the sealed fields of `fields` in place
///
/// Returns whether decryption succeeded and the recovered fields were
/// spliced back. Any failure leaves the set untouched.
pub(crate) fn decrypt_fields(
    fields: &mut FieldSet,
    recipient_secret: &StaticSecret,
    sender_pubkey: Option<&PublicKey>,
) -> bool {
    let Some(nonce_field) = fields.get_first(FieldType::CryptoNonce) else {
        debug!("No crypto nonce present, leaving fields as they are");
        return false;
    };
    if nonce_field.value.len() != CRYPTO_NONCE_SIZE {
        debug!("Malformed crypto nonce, leaving fields as they are");
        return false;
    }
    let nonce = XNonce::clone_from_slice(&nonce_field.value);

    let sender = match sender_pubkey {
        Some(key) => *key,
        None => {
            let Some(field) = fields.get_first(FieldType::CryptoPubkey) else {
                debug!("No sender public key available, leaving fields as they are");
                return false;
            };
            let Ok(raw) = <[u8; 32]>::try_from(field.value.as_slice()) else {
                return false;
            };
            PublicKey::from(raw)
        }
    };

    let recipient_pub = PublicKey::from(recipient_secret);
    let shared = recipient_secret.diffie_hellman(&sender);
    let cipher = XChaCha20Poly1305::new(&shared_key(shared.as_bytes(), &sender, &recipient_pub));

    let mut recovered: Option<Vec<Field>> = None;
    for field in fields.get(FieldType::Encrypted) {
        let Ok(plaintext) = cipher.decrypt(&nonce, field.value.as_slice()) else {
            continue;
        };
        match parser::decode_stream(&plaintext) {
            Ok(inner) => {
                recovered = Some(inner);
                break;
            }
            Err(err) => {
                debug!("Sealed stream decrypted but failed to parse: {err}");
                return false;
            }
        }
    }
    let Some(recovered) = recovered else {
        debug!("No sealed field decrypted under this key pair");
        return false;
    };

    // splice the recovered fields in where the sealed ones sat
    let mut out = FieldSet::new(fields.cube_type());
    let mut spliced = false;
    for field in fields.iter() {
        match field.field_type {
            FieldType::Encrypted | FieldType::CryptoNonce | FieldType::CryptoPubkey => {
                if !spliced {
                    for f in &recovered {
                        out.append_field(f.clone());
                    }
                    spliced = true;
                }
            }
            _ => out.append_field(field.clone()),
        }
    }
    *fields = out;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use cube::definitions::params::CubeType;

    fn keypair() -> (StaticSecret, PublicKey) {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        (secret, public)
    }

    fn plain_set() -> FieldSet {
        FieldSet::with_fields(
            CubeType::Frozen,
            [
                Field::payload(b"secretum".to_vec()),
                Field::media_type(3),
            ],
        )
    }

    #[test]
    fn encrypt_replaces_plaintext_fields() {
        let (_, recipient) = keypair();
        let sealed = match encrypt_fields(
            &plain_set(),
            &EncryptOptions::for_recipients(std::slice::from_ref(&recipient)),
        ) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };
        assert!(sealed.get_first(FieldType::Payload).is_none());
        assert!(sealed.get_first(FieldType::MediaType).is_none());
        assert!(sealed.get_first(FieldType::Encrypted).is_some());
        assert!(matches!(
            sealed.get_first(FieldType::CryptoNonce),
            Some(f) if f.value.len() == CRYPTO_NONCE_SIZE
        ));
        assert!(sealed.get_first(FieldType::CryptoPubkey).is_some());
    }

    #[test]
    fn decrypt_round_trip() {
        let (secret, recipient) = keypair();
        let original = plain_set();
        let mut sealed = match encrypt_fields(
            &original,
            &EncryptOptions::for_recipients(std::slice::from_ref(&recipient)),
        ) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };
        assert!(decrypt_fields(&mut sealed, &secret, None));
        assert_eq!(sealed, original);
    }

    #[test]
    fn wrong_recipient_is_silently_skipped() {
        let (_, recipient) = keypair();
        let (other_secret, _) = keypair();
        let mut sealed = match encrypt_fields(
            &plain_set(),
            &EncryptOptions::for_recipients(std::slice::from_ref(&recipient)),
        ) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };
        let before = sealed.clone();
        assert!(!decrypt_fields(&mut sealed, &other_secret, None));
        assert!(sealed.equals(&before, true));
        assert!(sealed.get_first(FieldType::Encrypted).is_some());
    }

    #[test]
    fn tampered_nonce_is_silently_skipped() {
        let (secret, recipient) = keypair();
        let mut sealed = match encrypt_fields(
            &plain_set(),
            &EncryptOptions::for_recipients(std::slice::from_ref(&recipient)),
        ) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };
        if let Some(nonce) = sealed.get_first_mut(FieldType::CryptoNonce) {
            nonce.value[0] ^= 0xFF;
        }
        assert!(!decrypt_fields(&mut sealed, &secret, None));
        assert!(sealed.get_first(FieldType::Encrypted).is_some());
    }

    #[test]
    fn every_listed_recipient_can_decrypt() {
        let (secret_a, public_a) = keypair();
        let (secret_b, public_b) = keypair();
        let recipients = [public_a, public_b];
        let original = plain_set();
        let sealed = match encrypt_fields(&original, &EncryptOptions::for_recipients(&recipients))
        {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(sealed.get(FieldType::Encrypted).count(), 2);

        let mut for_a = sealed.clone();
        assert!(decrypt_fields(&mut for_a, &secret_a, None));
        assert_eq!(for_a, original);

        let mut for_b = sealed.clone();
        assert!(decrypt_fields(&mut for_b, &secret_b, None));
        assert_eq!(for_b, original);
    }

    #[test]
    fn fresh_randomness_every_compile() {
        let (_, recipient) = keypair();
        let opts = EncryptOptions::for_recipients(std::slice::from_ref(&recipient));
        let a = encrypt_fields(&plain_set(), &opts);
        let b = encrypt_fields(&plain_set(), &opts);
        let (Ok(a), Ok(b)) = (a, b) else {
            panic!("encryption failed");
        };
        // ephemeral keys and nonces differ between compiles
        assert_ne!(
            a.get_first(FieldType::CryptoNonce).map(|f| &f.value),
            b.get_first(FieldType::CryptoNonce).map(|f| &f.value),
        );
        assert_ne!(
            a.get_first(FieldType::Encrypted).map(|f| &f.value),
            b.get_first(FieldType::Encrypted).map(|f| &f.value),
        );
    }
}
