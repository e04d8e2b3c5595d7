//! Authenticated encryption envelope
//!
//! Wraps an already-built container (or any opaque file) with
//! confidentiality and integrity. The wire format, in this exact order:
//!
//! ```text
//! "encrypted:"  (10 bytes, ASCII label)
//! HMAC-SHA256   (32 bytes, computed over the full plaintext)
//! IV            (16 bytes, fresh per encryption)
//! ciphertext    (AES in output-feedback mode, same length as plaintext)
//! ```
//!
//! The label is the sole signal that a file is encrypted: [`OfbEnvelope::decrypt`]
//! on a file that does not start with it returns the input unchanged and
//! successfully, whatever the secret. When the label is present the tag is
//! recomputed over the decrypted plaintext and compared in constant time;
//! on mismatch the decrypted bytes are destroyed and a distinguished
//! authentication failure is returned.
//!
//! The secret doubles as both the HMAC key and the cipher key, so its
//! length must be a valid AES key size (16, 24 or 32 bytes). That reuse
//! is a deliberate part of the contract, kept behind the single `secret`
//! parameter so a future KDF-based split stays a contained change.

use crate::error::{ArchiveError, ArchiveErrorKind, Result};
use aes::{Aes128, Aes192, Aes256};
use hmac::{Hmac, Mac};
use ofb::cipher::{KeyIvInit, StreamCipher};
use ofb::Ofb;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::Sha256;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Label marking a file as encrypted
pub const ENCRYPTED_LABEL: &[u8; 10] = b"encrypted:";

const TAG_LEN: usize = 32;
const IV_LEN: usize = 16;
const CHUNK_LEN: usize = 8192;

type HmacSha256 = Hmac<Sha256>;

/// Encrypts and decrypts archives with AES-OFB + HMAC-SHA256
///
/// The random source used for initialization vectors is injectable so
/// tests can make encryption deterministic; the default draws from an
/// OS-seeded CSPRNG.
pub struct OfbEnvelope {
    random: Box<dyn RngCore + Send>,
}

impl OfbEnvelope {
    /// Create an envelope drawing IVs from an OS-seeded generator
    pub fn new() -> Self {
        OfbEnvelope {
            random: Box::new(StdRng::from_os_rng()),
        }
    }

    /// Create an envelope drawing IVs from the given generator
    pub fn with_random_source(random: Box<dyn RngCore + Send>) -> Self {
        OfbEnvelope { random }
    }

    /// Encrypt `path` with `secret`, returning the encrypted file's path.
    ///
    /// The secret length is validated before anything else happens: an
    /// invalid key size fails without touching the random source. The
    /// authentication tag covers the plaintext and is computed before
    /// encryption.
    pub fn encrypt(&mut self, path: &Path, secret: &[u8]) -> Result<PathBuf> {
        debug!("encrypting file {:?}", path);
        validate_secret(secret)?;

        let mut archive = File::open(path).map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::OpeningFile)
                .with_filename(path)
                .with_source(e)
        })?;
        let mut tmp = NamedTempFile::with_prefix("coldpack-")
            .map_err(|e| ArchiveError::new(ArchiveErrorKind::TempFile).with_source(e))?;

        let tag: [u8; TAG_LEN] = file_hmac(&mut archive, secret, path)?
            .finalize()
            .into_bytes()
            .into();

        let mut iv = [0u8; IV_LEN];
        self.random.fill_bytes(&mut iv);

        let out = tmp.as_file_mut();
        out.write_all(ENCRYPTED_LABEL).map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::WritingLabel)
                .with_filename(path)
                .with_source(e)
        })?;
        out.write_all(&tag).map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::WritingAuth)
                .with_filename(path)
                .with_source(e)
        })?;
        out.write_all(&iv).map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::WritingIv)
                .with_filename(path)
                .with_source(e)
        })?;

        let mut cipher = OfbCipher::new(secret, &iv)?;
        let written = stream_apply(
            &mut archive,
            out,
            &mut cipher,
            path,
            ArchiveErrorKind::Encrypt,
        )?;
        debug!("wrote {} encrypted bytes", written);

        let (_, encrypted_path) = tmp
            .keep()
            .map_err(|e| ArchiveError::new(ArchiveErrorKind::TempFile).with_source(e))?;
        info!("file {:?} encrypted to {:?}", path, encrypted_path);
        Ok(encrypted_path)
    }

    /// Decrypt `path` with `secret`, returning the decrypted file's path.
    ///
    /// A file that does not start with the `encrypted:` label is returned
    /// unchanged. Decrypted content is only exposed after its
    /// authentication tag verifies.
    pub fn decrypt(&self, path: &Path, secret: &[u8]) -> Result<PathBuf> {
        debug!("decrypting file {:?}", path);

        let mut encrypted = File::open(path).map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::OpeningFile)
                .with_filename(path)
                .with_source(e)
        })?;

        let mut label = [0u8; ENCRYPTED_LABEL.len()];
        match encrypted.read_exact(&mut label) {
            Ok(()) if &label == ENCRYPTED_LABEL => {}
            Ok(()) => {
                debug!("file {:?} carries no encryption label, returning as-is", path);
                return Ok(path.to_path_buf());
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("file {:?} is shorter than the label, returning as-is", path);
                return Ok(path.to_path_buf());
            }
            Err(e) => {
                return Err(ArchiveError::new(ArchiveErrorKind::ReadingLabel)
                    .with_filename(path)
                    .with_source(e)
                    .into())
            }
        }

        validate_secret(secret)?;

        let mut tag = [0u8; TAG_LEN];
        encrypted.read_exact(&mut tag).map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::ReadingAuth)
                .with_filename(path)
                .with_source(e)
        })?;
        let mut iv = [0u8; IV_LEN];
        encrypted.read_exact(&mut iv).map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::ReadingIv)
                .with_filename(path)
                .with_source(e)
        })?;

        let mut tmp = NamedTempFile::with_prefix("coldpack-")
            .map_err(|e| ArchiveError::new(ArchiveErrorKind::TempFile).with_source(e))?;

        let mut cipher = OfbCipher::new(secret, &iv)?;
        let written = stream_apply(
            &mut encrypted,
            tmp.as_file_mut(),
            &mut cipher,
            path,
            ArchiveErrorKind::Decrypt,
        )?;
        debug!("decrypted {} bytes", written);

        // The temporary file is removed on drop, so a forged archive
        // never leaves its plaintext behind.
        file_hmac(tmp.as_file_mut(), secret, path)?
            .verify_slice(&tag)
            .map_err(|_| ArchiveError::new(ArchiveErrorKind::AuthenticationFailed))?;

        let (_, plain_path) = tmp
            .keep()
            .map_err(|e| ArchiveError::new(ArchiveErrorKind::TempFile).with_source(e))?;
        info!("file {:?} decrypted to {:?}", path, plain_path);
        Ok(plain_path)
    }
}

impl Default for OfbEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OfbEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfbEnvelope").finish_non_exhaustive()
    }
}

/// AES-OFB keyed by the secret's length
enum OfbCipher {
    Aes128(Ofb<Aes128>),
    Aes192(Ofb<Aes192>),
    Aes256(Ofb<Aes256>),
}

impl OfbCipher {
    fn new(secret: &[u8], iv: &[u8; IV_LEN]) -> Result<Self> {
        let init_error = |e: ofb::cipher::InvalidLength| {
            ArchiveError::new(ArchiveErrorKind::InitCipher).with_source(e.to_string())
        };
        match secret.len() {
            16 => Ok(OfbCipher::Aes128(
                Ofb::new_from_slices(secret, iv).map_err(init_error)?,
            )),
            24 => Ok(OfbCipher::Aes192(
                Ofb::new_from_slices(secret, iv).map_err(init_error)?,
            )),
            32 => Ok(OfbCipher::Aes256(
                Ofb::new_from_slices(secret, iv).map_err(init_error)?,
            )),
            n => Err(invalid_key_size(n).into()),
        }
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) {
        match self {
            OfbCipher::Aes128(cipher) => cipher.apply_keystream(buf),
            OfbCipher::Aes192(cipher) => cipher.apply_keystream(buf),
            OfbCipher::Aes256(cipher) => cipher.apply_keystream(buf),
        }
    }
}

fn validate_secret(secret: &[u8]) -> Result<()> {
    match secret.len() {
        16 | 24 | 32 => Ok(()),
        n => Err(invalid_key_size(n).into()),
    }
}

fn invalid_key_size(len: usize) -> ArchiveError {
    ArchiveError::new(ArchiveErrorKind::InitCipher)
        .with_source(format!("invalid key size {len}, expected 16, 24 or 32 bytes"))
}

/// Pump `input` through the cipher into `output` in fixed-size chunks.
fn stream_apply(
    input: &mut File,
    output: &mut File,
    cipher: &mut OfbCipher,
    filename: &Path,
    kind: ArchiveErrorKind,
) -> Result<u64> {
    let stream_error = |e: std::io::Error| {
        ArchiveError::new(kind).with_filename(filename).with_source(e)
    };

    let mut buffer = vec![0u8; CHUNK_LEN];
    let mut total = 0u64;
    loop {
        let read = input.read(&mut buffer).map_err(stream_error)?;
        if read == 0 {
            break;
        }
        cipher.apply_keystream(&mut buffer[..read]);
        output.write_all(&buffer[..read]).map_err(stream_error)?;
        total += read as u64;
    }
    output.flush().map_err(stream_error)?;
    Ok(total)
}

/// HMAC-SHA256 over a whole file, leaving the cursor back at the start.
fn file_hmac(file: &mut File, secret: &[u8], filename: &Path) -> Result<HmacSha256> {
    let rewind_error = |e: std::io::Error| {
        ArchiveError::new(ArchiveErrorKind::Rewind)
            .with_filename(filename)
            .with_source(e)
    };
    let hmac_error = |msg: String| {
        ArchiveError::new(ArchiveErrorKind::ComputeHmac)
            .with_filename(filename)
            .with_source(msg)
    };

    file.seek(SeekFrom::Start(0)).map_err(rewind_error)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| hmac_error(e.to_string()))?;
    let mut buffer = vec![0u8; CHUNK_LEN];
    loop {
        let read = file.read(&mut buffer).map_err(|e| hmac_error(e.to_string()))?;
        if read == 0 {
            break;
        }
        mac.update(&buffer[..read]);
    }

    file.seek(SeekFrom::Start(0)).map_err(rewind_error)?;
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const SECRET16: &[u8] = b"0123456789abcdef";

    fn seeded_envelope(seed: u64) -> OfbEnvelope {
        OfbEnvelope::with_random_source(Box::new(StdRng::seed_from_u64(seed)))
    }

    #[test]
    fn test_wire_layout() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain.bin");
        let content = b"the payload under protection";
        fs::write(&plain, content).unwrap();

        let mut envelope = seeded_envelope(7);
        let encrypted_path = envelope.encrypt(&plain, SECRET16).unwrap();
        let encrypted = fs::read(&encrypted_path).unwrap();

        assert_eq!(&encrypted[..10], ENCRYPTED_LABEL.as_slice());
        assert_eq!(encrypted.len(), 10 + TAG_LEN + IV_LEN + content.len());
        // OFB never expands or pads the payload.
        assert_ne!(&encrypted[10 + TAG_LEN + IV_LEN..], content.as_slice());
        fs::remove_file(encrypted_path).unwrap();
    }

    #[test]
    fn test_same_seed_same_ciphertext() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain.bin");
        fs::write(&plain, b"deterministic please").unwrap();

        let first_path = seeded_envelope(42).encrypt(&plain, SECRET16).unwrap();
        let second_path = seeded_envelope(42).encrypt(&plain, SECRET16).unwrap();
        assert_eq!(fs::read(&first_path).unwrap(), fs::read(&second_path).unwrap());
        fs::remove_file(first_path).unwrap();
        fs::remove_file(second_path).unwrap();
    }

    #[test]
    fn test_label_sniffing_returns_input_unchanged() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("not-encrypted.txt");
        fs::write(&plain, b"just some text").unwrap();

        let envelope = OfbEnvelope::new();
        // Works with any secret, even an invalid one: the label decides.
        let returned = envelope.decrypt(&plain, b"whatever").unwrap();
        assert_eq!(returned, plain);
        assert_eq!(fs::read(&plain).unwrap(), b"just some text");

        // Also for files shorter than the label itself.
        let tiny = dir.path().join("tiny");
        fs::write(&tiny, b"hi").unwrap();
        assert_eq!(envelope.decrypt(&tiny, SECRET16).unwrap(), tiny);
    }

    #[test]
    fn test_invalid_key_size_fails_before_touching_random_source() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain.bin");
        fs::write(&plain, b"content").unwrap();

        struct CountingRng {
            inner: StdRng,
            calls: Arc<AtomicUsize>,
        }
        impl RngCore for CountingRng {
            fn next_u32(&mut self) -> u32 {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.next_u32()
            }
            fn next_u64(&mut self) -> u64 {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.next_u64()
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.fill_bytes(dest)
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let mut envelope = OfbEnvelope::with_random_source(Box::new(CountingRng {
            inner: StdRng::seed_from_u64(0),
            calls: calls.clone(),
        }));

        let err = envelope.encrypt(&plain, b"short key").unwrap_err();
        match err {
            Error::Archive(archive_err) => {
                assert_eq!(archive_err.kind, ArchiveErrorKind::InitCipher)
            }
            other => panic!("expected archive error, got {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_key_size_on_decrypt_of_labeled_file() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain.bin");
        fs::write(&plain, b"content").unwrap();

        let mut envelope = seeded_envelope(1);
        let encrypted_path = envelope.encrypt(&plain, SECRET16).unwrap();

        let err = envelope.decrypt(&encrypted_path, b"bad").unwrap_err();
        match err {
            Error::Archive(archive_err) => {
                assert_eq!(archive_err.kind, ArchiveErrorKind::InitCipher)
            }
            other => panic!("expected archive error, got {other}"),
        }
        fs::remove_file(encrypted_path).unwrap();
    }

    #[test]
    fn test_truncated_stream_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let truncated = dir.path().join("truncated");
        // Label present but the tag is cut short.
        let mut bytes = ENCRYPTED_LABEL.to_vec();
        bytes.extend_from_slice(&[0u8; 5]);
        fs::write(&truncated, &bytes).unwrap();

        let err = OfbEnvelope::new().decrypt(&truncated, SECRET16).unwrap_err();
        match err {
            Error::Archive(archive_err) => {
                assert_eq!(archive_err.kind, ArchiveErrorKind::ReadingAuth)
            }
            other => panic!("expected archive error, got {other}"),
        }
    }
}
