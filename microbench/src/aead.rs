use crate::config::Backend;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use log::debug;
use openssl::error::ErrorStack;
use openssl::symm::{encrypt_aead, Cipher};
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt;

/// Result type for sealing operations
pub type SealResult<T> = Result<T, SealError>;

/// Size of the nonce used by both backends. This is the nonce size of the filesystem being tuned,
/// not the 12 byte size recommended for GCM.
pub const NONCE_SIZE: usize = 16;
/// Size of the authentication tag appended to every sealed block.
pub const TAG_SIZE: usize = 16;
/// Size of an AES-256 key.
pub const KEY_SIZE: usize = 32;

/// A nonce as accepted by [`Sealer::seal`].
pub type Nonce = [u8; NONCE_SIZE];

/// AES-256 in GCM mode with a 16 byte nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// A general sealer, able to encrypt and authenticate data in a single step. Implementations
/// hold no mutable state, so a single instance can be shared by any number of threads.
pub trait Sealer: Send + Sync {
    /// Encrypt `plaintext` under `nonce`, binding `ad` as associated data. The returned buffer
    /// holds the ciphertext followed by a [`TAG_SIZE`] byte tag.
    ///
    /// The nonce is never advanced. Callers measuring throughput reuse the same nonce for every
    /// call, which is only acceptable because the output is discarded.
    fn seal(&self, nonce: &Nonce, ad: &[u8], plaintext: &[u8]) -> SealResult<Vec<u8>>;
    /// The backend this sealer was built from.
    fn backend(&self) -> Backend;
}

/// Create a new [`Sealer`] for the given backend. Failure here is meant to abort the run before
/// any measurement starts.
pub fn new(backend: Backend, key: &SymmetricKey) -> SealResult<Box<dyn Sealer>> {
    debug!("constructing {} sealer", backend);
    let sealer: Box<dyn Sealer> = match backend {
        Backend::Native => Box::new(NativeGcm::new(key)?),
        Backend::Openssl => Box::new(OpensslGcm::new(key)?),
    };
    Ok(sealer)
}

/// AES-256-GCM implemented in software by the `aes-gcm` crate.
pub struct NativeGcm {
    cipher: Aes256Gcm16,
}

impl NativeGcm {
    /// Create a new [`NativeGcm`] sealer using the provided key for all operations.
    pub fn new(key: &SymmetricKey) -> SealResult<Self> {
        let cipher = Aes256Gcm16::new_from_slice(&key[..]).map_err(|_| SealError {
            kind: SealErrorKind::Init,
            internal: InternalError::KeyLength(key.len()),
        })?;
        Ok(Self { cipher })
    }
}

impl Sealer for NativeGcm {
    fn seal(&self, nonce: &Nonce, ad: &[u8], plaintext: &[u8]) -> SealResult<Vec<u8>> {
        self.cipher
            .encrypt(
                GenericArray::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: ad,
                },
            )
            .map_err(|e| SealError {
                kind: SealErrorKind::Seal,
                internal: InternalError::Native(e),
            })
    }

    fn backend(&self) -> Backend {
        Backend::Native
    }
}

/// AES-256-GCM delegated to OpenSSL, which uses AES-NI and PCLMULQDQ where available.
pub struct OpensslGcm {
    cipher: Cipher,
    key: SymmetricKey,
}

impl OpensslGcm {
    /// Create a new [`OpensslGcm`] sealer. The cipher is exercised once with an empty message so
    /// that a nonce size OpenSSL refuses is reported here rather than on the first measurement.
    pub fn new(key: &SymmetricKey) -> SealResult<Self> {
        let cipher = Cipher::aes_256_gcm();
        if cipher.key_len() != key.len() {
            return Err(SealError {
                kind: SealErrorKind::Init,
                internal: InternalError::KeyLength(key.len()),
            });
        }
        let gcm = Self {
            cipher,
            key: key.clone(),
        };
        gcm.seal(&[0; NONCE_SIZE], &[], &[])
            .map_err(|e| SealError {
                kind: SealErrorKind::Init,
                internal: e.internal,
            })?;
        Ok(gcm)
    }
}

impl Sealer for OpensslGcm {
    fn seal(&self, nonce: &Nonce, ad: &[u8], plaintext: &[u8]) -> SealResult<Vec<u8>> {
        let mut tag = [0; TAG_SIZE];
        let mut sealed = encrypt_aead(
            self.cipher,
            &self.key[..],
            Some(&nonce[..]),
            ad,
            plaintext,
            &mut tag,
        )
        .map_err(|e| SealError {
            kind: SealErrorKind::Seal,
            internal: InternalError::Openssl(e),
        })?;
        sealed.extend_from_slice(&tag);
        Ok(sealed)
    }

    fn backend(&self) -> Backend {
        Backend::Openssl
    }
}

const HEX_KEY_LEN: usize = 2 * KEY_SIZE;

/// A symmetric encryption key of exactly 32 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Create a new [`SymmetricKey`] from the given array.
    pub const fn new(value: [u8; KEY_SIZE]) -> Self {
        Self(value)
    }

    /// The all-zero key used for measurements. It is not secret and must never protect data.
    pub const fn zero() -> Self {
        Self([0; KEY_SIZE])
    }
}

impl Default for SymmetricKey {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::ops::Deref for SymmetricKey {
    type Target = [u8; KEY_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for SymmetricKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for SymmetricKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(SymKeyVisitor)
    }
}

struct SymKeyVisitor;

impl<'de> Visitor<'de> for SymKeyVisitor {
    type Value = SymmetricKey;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a hex encoded byte slice of length 32 (64 hex chars)")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.len() != HEX_KEY_LEN {
            return Err(E::invalid_length(v.len(), &Self));
        }

        let bytes = hex::decode(v).map_err(E::custom)?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| E::invalid_length(b.len(), &Self))?;
        Ok(SymmetricKey(key))
    }
}

/// Errors related to constructing a sealer or sealing data
#[derive(Debug)]
pub struct SealError {
    kind: SealErrorKind,
    internal: InternalError,
}

impl SealError {
    /// The operation which failed.
    pub fn kind(&self) -> &SealErrorKind {
        &self.kind
    }

    #[cfg(test)]
    pub(crate) fn seal_failure() -> Self {
        SealError {
            kind: SealErrorKind::Seal,
            internal: InternalError::Native(aes_gcm::Error),
        }
    }
}

impl fmt::Display for SealError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Crypto error: {}: {}", self.kind, self.internal)
    }
}

impl std::error::Error for SealError {
    fn cause(&self) -> Option<&dyn std::error::Error> {
        match self.internal {
            InternalError::Native(ref e) => Some(e),
            InternalError::Openssl(ref e) => Some(e),
            InternalError::KeyLength(_) => None,
        }
    }
}

#[derive(Debug)]
enum InternalError {
    Native(aes_gcm::Error),
    Openssl(ErrorStack),
    KeyLength(usize),
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InternalError::Native(e) => write!(f, "{}", e),
            InternalError::Openssl(e) => write!(f, "{}", e),
            InternalError::KeyLength(len) => {
                write!(f, "invalid key length {}, expected {}", len, KEY_SIZE)
            }
        }
    }
}

/// Specific error type related to sealing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealErrorKind {
    /// Error while constructing the backend
    Init,
    /// Error while sealing data
    Seal,
}

impl fmt::Display for SealErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Operation {}",
            match self {
                SealErrorKind::Init => "INIT",
                SealErrorKind::Seal => "SEAL",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{new, NativeGcm, OpensslGcm, Sealer, SymmetricKey, NONCE_SIZE, TAG_SIZE};
    use crate::config::Backend;
    use rand::Rng;

    #[test]
    fn sealed_length_includes_tag() {
        let nonce = [0u8; NONCE_SIZE];
        let ad = [0u8; 24];
        let plaintext = vec![0u8; 4096];

        for backend in [Backend::Native, Backend::Openssl] {
            let sealer = new(backend, &SymmetricKey::zero()).unwrap();
            let sealed = sealer.seal(&nonce, &ad, &plaintext).unwrap();
            assert_eq!(sealed.len(), plaintext.len() + TAG_SIZE);
            assert_eq!(sealer.backend(), backend);
        }
    }

    #[test]
    fn backends_agree() {
        let key = SymmetricKey::new(rand::thread_rng().gen::<[u8; 32]>());
        let nonce = rand::thread_rng().gen::<[u8; NONCE_SIZE]>();
        let ad = rand::thread_rng().gen::<[u8; 24]>();
        let plaintext = rand::thread_rng().gen::<[u8; 32]>();

        let native = NativeGcm::new(&key).unwrap();
        let openssl = OpensslGcm::new(&key).unwrap();

        assert_eq!(
            native.seal(&nonce, &ad, &plaintext).unwrap(),
            openssl.seal(&nonce, &ad, &plaintext).unwrap()
        );
    }

    #[test]
    fn nonce_reuse_is_deterministic() {
        let sealer = new(Backend::Openssl, &SymmetricKey::zero()).unwrap();
        let nonce = [0u8; NONCE_SIZE];
        let first = sealer.seal(&nonce, &[], b"block").unwrap();
        let second = sealer.seal(&nonce, &[], b"block").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn key_hex_roundtrip() {
        let key: SymmetricKey = serde_json::from_str(
            "\"000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f\"",
        )
        .unwrap();
        assert_eq!(key[31], 0x1f);
        assert!(serde_json::from_str::<SymmetricKey>("\"0001\"").is_err());
        assert_eq!(
            serde_json::to_string(&SymmetricKey::zero()).unwrap(),
            format!("\"{}\"", "0".repeat(64))
        );
    }
}
