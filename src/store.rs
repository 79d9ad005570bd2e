//! Content-addressed, gzip-compressed, optionally AES-256-GCM-encrypted
//! chunk blob store. Path layout: `{chunkDir}/{sha}.gz`
//! (plaintext) or `{sha}.gz.enc` (encrypted); writes are atomic
//! (temp file + rename); readers accept either form.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use flate2::write::GzEncoder;
use flate2::read::GzDecoder;
use flate2::Compression;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::chunk::Chunk;
use crate::error::{CoreError, Result};

pub const MAGIC: &[u8; 8] = b"CVAULTE1";
pub const VERSION_CURRENT: u8 = 0x02;
pub const VERSION_V1: u8 = 0x01;
pub const HKDF_INFO: &[u8] = b"codevault-chunk-v1";
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_ID_LEN: usize = 4;

/// Abstraction over salt/IV generation so IV-reuse can be tested
/// deterministically with a stubbed source.
pub trait SaltIvSource: Send + Sync {
    fn next_salt_iv(&self) -> ([u8; SALT_LEN], [u8; IV_LEN]);
}

pub struct OsRandomSource;

impl SaltIvSource for OsRandomSource {
    fn next_salt_iv(&self) -> ([u8; SALT_LEN], [u8; IV_LEN]) {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);
        (salt, iv)
    }
}

/// Test fixture: always returns the same bytes, used to exercise the
/// IV-reuse guard deterministically.
pub struct ConstantSource {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
}

impl SaltIvSource for ConstantSource {
    fn next_salt_iv(&self) -> ([u8; SALT_LEN], [u8; IV_LEN]) {
        (self.salt, self.iv)
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeySet {
    pub primary: Option<[u8; 32]>,
    pub deprecated: Vec<[u8; 32]>,
}

impl KeySet {
    fn all(&self) -> Vec<[u8; 32]> {
        let mut out = Vec::new();
        if let Some(k) = self.primary {
            out.push(k);
        }
        out.extend(self.deprecated.iter().copied());
        out
    }
}

fn key_id_of(key: &[u8; 32]) -> [u8; KEY_ID_LEN] {
    let digest = Sha256::digest(key);
    let mut out = [0u8; KEY_ID_LEN];
    out.copy_from_slice(&digest[..KEY_ID_LEN]);
    out
}

fn derive_key(key: &[u8; 32], salt: &[u8; SALT_LEN]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(salt), key);
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm).expect("32 is a valid HKDF-SHA256 output length");
    okm
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

pub struct ChunkStore {
    chunk_dir: PathBuf,
    keys: KeySet,
    rng: Box<dyn SaltIvSource>,
    seen_iv: Mutex<HashSet<([u8; KEY_ID_LEN], [u8; SALT_LEN], [u8; IV_LEN])>>,
}

impl ChunkStore {
    pub fn new(chunk_dir: impl Into<PathBuf>, keys: KeySet) -> Self {
        Self::with_rng(chunk_dir, keys, Box::new(OsRandomSource))
    }

    pub fn with_rng(chunk_dir: impl Into<PathBuf>, keys: KeySet, rng: Box<dyn SaltIvSource>) -> Self {
        Self { chunk_dir: chunk_dir.into(), keys, rng, seen_iv: Mutex::new(HashSet::new()) }
    }

    fn plain_path(&self, sha: &str) -> PathBuf {
        self.chunk_dir.join(format!("{sha}.gz"))
    }

    fn enc_path(&self, sha: &str) -> PathBuf {
        self.chunk_dir.join(format!("{sha}.gz.enc"))
    }

    /// Writes `code`'s gzipped (and optionally encrypted) blob, returning
    /// its `sha1_hex`. Content-addressed: writes are idempotent for
    /// identical content, so concurrent writers of the same `sha` race
    /// harmlessly.
    pub fn write(&self, code: &str, encrypt: bool) -> Result<String> {
        let sha = Chunk::sha1_hex(code.as_bytes());
        let gz = gzip(code.as_bytes())?;

        std::fs::create_dir_all(&self.chunk_dir)?;

        if encrypt {
            let primary = self.keys.primary.ok_or_else(|| CoreError::EncryptionKeyRequired { sha: sha.clone() })?;
            let frame = self.encrypt_frame(&gz, &primary)?;
            self.atomic_write(&self.enc_path(&sha), &frame)?;
        } else {
            self.atomic_write(&self.plain_path(&sha), &gz)?;
        }
        Ok(sha)
    }

    fn encrypt_frame(&self, gz: &[u8], primary: &[u8; 32]) -> Result<Vec<u8>> {
        let key_id = key_id_of(primary);
        let (salt, iv) = self.rng.next_salt_iv();

        {
            let mut seen = self.seen_iv.lock().expect("seen_iv mutex poisoned");
            let marker = (key_id, salt, iv);
            if seen.contains(&marker) {
                return Err(CoreError::EncryptionIvReuse { key_id: hex::encode(key_id) });
            }
            seen.insert(marker);
        }

        let derived = derive_key(primary, &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
        let nonce = Nonce::from_slice(&iv);
        let ct = cipher
            .encrypt(nonce, Payload { msg: gz, aad: &[] })
            .map_err(|_| CoreError::EncryptionAuthFailed { sha: String::new() })?;

        let mut frame = Vec::with_capacity(8 + 1 + KEY_ID_LEN + SALT_LEN + IV_LEN + ct.len());
        frame.extend_from_slice(MAGIC);
        frame.push(VERSION_CURRENT);
        frame.extend_from_slice(&key_id);
        frame.extend_from_slice(&salt);
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&ct);
        Ok(frame)
    }

    fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension(format!("{}.tmp", path.extension().and_then(|e| e.to_str()).unwrap_or("")));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Reads and decodes the blob for `sha`, trying the plaintext form
    /// first, then the encrypted form.
    pub fn read(&self, sha: &str) -> Result<String> {
        let plain = self.plain_path(sha);
        if plain.exists() {
            let raw = std::fs::read(&plain).map_err(|e| CoreError::ChunkReadFailed { sha: sha.into(), source: e })?;
            let decompressed = gunzip(&raw).map_err(|e| CoreError::ChunkDecompressionFailed { sha: sha.into(), source: e })?;
            return String::from_utf8(decompressed).map_err(|_| CoreError::ChunkDecompressionFailed {
                sha: sha.into(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 chunk"),
            });
        }

        let enc = self.enc_path(sha);
        if enc.exists() {
            let raw = std::fs::read(&enc).map_err(|e| CoreError::ChunkReadFailed { sha: sha.into(), source: e })?;
            let gz = self.decrypt_frame(&raw, sha)?;
            let decompressed = gunzip(&gz).map_err(|e| CoreError::ChunkDecompressionFailed { sha: sha.into(), source: e })?;
            return String::from_utf8(decompressed).map_err(|_| CoreError::ChunkDecompressionFailed {
                sha: sha.into(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 chunk"),
            });
        }

        Err(CoreError::FileNotFound { path: plain })
    }

    fn decrypt_frame(&self, raw: &[u8], sha: &str) -> Result<Vec<u8>> {
        if raw.len() < 9 || &raw[0..8] != MAGIC {
            return Err(CoreError::ChunkDecompressionFailed {
                sha: sha.into(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "bad magic"),
            });
        }
        let version = raw[8];
        let (key_id, rest) = if version == VERSION_CURRENT {
            let start = 9;
            let key_id = &raw[start..start + KEY_ID_LEN];
            (Some(key_id.to_vec()), &raw[start + KEY_ID_LEN..])
        } else if version == VERSION_V1 {
            (None, &raw[9..])
        } else {
            return Err(CoreError::ChunkDecompressionFailed {
                sha: sha.into(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "unsupported version"),
            });
        };

        if rest.len() < SALT_LEN + IV_LEN + TAG_LEN {
            return Err(CoreError::ChunkDecompressionFailed {
                sha: sha.into(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "truncated frame"),
            });
        }
        let salt: [u8; SALT_LEN] = rest[..SALT_LEN].try_into().unwrap();
        let iv: [u8; IV_LEN] = rest[SALT_LEN..SALT_LEN + IV_LEN].try_into().unwrap();
        let ct = &rest[SALT_LEN + IV_LEN..];

        let all_keys = self.keys.all();
        if all_keys.is_empty() {
            return Err(CoreError::EncryptionKeyRequired { sha: sha.into() });
        }

        let mut ordered: Vec<&[u8; 32]> = Vec::with_capacity(all_keys.len());
        if let Some(ref kid) = key_id {
            for k in &all_keys {
                if key_id_of(k) == kid.as_slice() {
                    ordered.push(k);
                }
            }
        }
        for k in &all_keys {
            if !ordered.contains(&k) {
                ordered.push(k);
            }
        }

        let nonce = Nonce::from_slice(&iv);
        for key in ordered {
            let derived = derive_key(key, &salt);
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
            if let Ok(pt) = cipher.decrypt(nonce, Payload { msg: ct, aad: &[] }) {
                return Ok(pt);
            }
        }
        Err(CoreError::EncryptionAuthFailed { sha: sha.into() })
    }

    /// Removes both plaintext and encrypted forms if present.
    pub fn delete(&self, sha: &str) -> Result<()> {
        let plain = self.plain_path(sha);
        let enc = self.enc_path(sha);
        if plain.exists() {
            std::fs::remove_file(&plain)?;
        }
        if enc.exists() {
            std::fs::remove_file(&enc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyset(primary: [u8; 32]) -> KeySet {
        KeySet { primary: Some(primary), deprecated: vec![] }
    }

    #[test]
    fn round_trip_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path(), KeySet::default());
        let sha = store.write("fn main() {}", false).unwrap();
        assert_eq!(sha, Chunk::sha1_hex(b"fn main() {}"));
        let read_back = store.read(&sha).unwrap();
        assert_eq!(read_back, "fn main() {}");
    }

    #[test]
    fn round_trip_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let key = [9u8; 32];
        let store = ChunkStore::new(dir.path(), keyset(key));
        let sha = store.write("struct S;", true).unwrap();
        let read_back = store.read(&sha).unwrap();
        assert_eq!(read_back, "struct S;");
    }

    #[test]
    fn encrypted_round_trip_with_deprecated_key_set() {
        let dir = tempfile::tempdir().unwrap();
        let old_key = [1u8; 32];
        let new_key = [2u8; 32];
        let writer = ChunkStore::new(dir.path(), keyset(old_key));
        let sha = writer.write("fn a() {}", true).unwrap();

        let reader = ChunkStore::new(dir.path(), KeySet { primary: Some(new_key), deprecated: vec![old_key] });
        let read_back = reader.read(&sha).unwrap();
        assert_eq!(read_back, "fn a() {}");
    }

    #[test]
    fn iv_reuse_is_rejected_on_second_write() {
        let dir = tempfile::tempdir().unwrap();
        let key = [3u8; 32];
        let rng = Box::new(ConstantSource { salt: [0u8; SALT_LEN], iv: [0u8; IV_LEN] });
        let store = ChunkStore::with_rng(dir.path(), keyset(key), rng);

        store.write("fn one() {}", true).unwrap();
        let err = store.write("fn two() {}", true);
        assert!(matches!(err, Err(CoreError::EncryptionIvReuse { .. })));
    }

    #[test]
    fn missing_key_surfaces_key_required() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path(), KeySet::default());
        let err = store.write("fn a() {}", true);
        assert!(matches!(err, Err(CoreError::EncryptionKeyRequired { .. })));
    }

    #[test]
    fn v1_frame_is_decryptable() {
        let dir = tempfile::tempdir().unwrap();
        let key = [4u8; 32];
        let gz = gzip(b"fn v1() {}").unwrap();
        let salt = [5u8; SALT_LEN];
        let iv = [6u8; IV_LEN];
        let derived = derive_key(&key, &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
        let ct = cipher.encrypt(Nonce::from_slice(&iv), Payload { msg: &gz, aad: &[] }).unwrap();

        let mut frame = Vec::new();
        frame.extend_from_slice(MAGIC);
        frame.push(VERSION_V1);
        frame.extend_from_slice(&salt);
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&ct);

        let sha = Chunk::sha1_hex(b"fn v1() {}");
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join(format!("{sha}.gz.enc")), &frame).unwrap();

        let store = ChunkStore::new(dir.path(), keyset(key));
        let read_back = store.read(&sha).unwrap();
        assert_eq!(read_back, "fn v1() {}");
    }

    #[test]
    fn delete_removes_both_forms() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path(), KeySet::default());
        let sha = store.write("fn a() {}", false).unwrap();
        store.delete(&sha).unwrap();
        assert!(store.read(&sha).is_err());
    }
}
