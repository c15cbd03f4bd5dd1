pub mod error;
mod gcm;

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::{fs::File, io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter}};
use tracing::{debug, warn};

use self::{error::*, gcm::GcmStream};

pub const ALGORITHM: &str = "aes-256-gcm";

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
/// Must stay a multiple of the 16-byte GCM block
const CHUNK_SIZE: usize = 64 * 1024;

// scrypt cost: N = 2^14, r = 8, p = 1
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

///
/// Everything besides the passphrase needed to decrypt a ciphertext.
/// Persisted verbatim alongside the artifact; losing any field makes the
/// ciphertext unrecoverable
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub algorithm: String,
    /// base64, 16 bytes
    pub salt: String,
    /// base64, 12 bytes
    pub iv: String,
    /// base64, 16 bytes
    pub tag: String,
}

struct DecodedEnvelope {
    salt: Vec<u8>,
    iv: [u8; IV_LEN],
    tag: [u8; TAG_LEN],
}

impl Envelope {
    fn decode(&self) -> Result<DecodedEnvelope> {
        if self.algorithm != ALGORITHM {
            return Err(Error::UnsupportedAlgorithm(self.algorithm.clone()));
        }
        let salt = decode_field("salt", &self.salt)?;
        if salt.len() < SALT_LEN {
            return Err(Error::MalformedEnvelope(format!("salt must be at least {} bytes", SALT_LEN)));
        }
        let iv = decode_field("iv", &self.iv)?.try_into()
            .map_err(|_| Error::MalformedEnvelope(format!("iv must be {} bytes", IV_LEN)))?;
        let tag = decode_field("tag", &self.tag)?.try_into()
            .map_err(|_| Error::MalformedEnvelope(format!("tag must be {} bytes", TAG_LEN)))?;

        Ok(DecodedEnvelope { salt, iv, tag })
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD.decode(value)
        .map_err(|e| Error::MalformedEnvelope(format!("invalid {} encoding: {}", name, e)))
}

///
/// Derives a 256-bit key from `passphrase` and `salt` with scrypt.
/// Runs on the blocking pool since scrypt is deliberately expensive
///
pub async fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let (passphrase, salt) = (passphrase.to_owned(), salt.to_vec());
    tokio::task::spawn_blocking(move || {
        let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(passphrase.as_bytes(), &salt, &params, &mut key)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        Ok(key)
    }).await?
}

///
/// Streams `input_path` through AES-256-GCM into `output_path` under a key
/// derived from `passphrase` and a fresh random salt. A fresh IV is drawn
/// for every call. The returned envelope carries the tag, which only exists
/// once the whole input has been consumed
///
pub async fn encrypt(input_path: &Path, output_path: &Path, passphrase: &str) -> Result<Envelope> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(passphrase, &salt).await?;
    let mut gcm = GcmStream::new(&key, &iv);

    let mut reader = BufReader::new(File::open(input_path).await?);
    let mut writer = BufWriter::new(File::create(output_path).await?);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = fill_chunk(&mut reader, &mut buf).await?;
        if n == 0 { break; }
        gcm.encrypt(&mut buf[..n])?;
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
        if n < CHUNK_SIZE { break; }
    }
    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    debug!(input = %input_path.display(), bytes = total, "encrypted");
    Ok(Envelope {
        algorithm: ALGORITHM.to_string(),
        salt: STANDARD.encode(salt),
        iv: STANDARD.encode(iv),
        tag: STANDARD.encode(gcm.finalize()),
    })
}

///
/// Streams the ciphertext at `input_path` back to plaintext at `output_path`.
///
/// Plaintext is staged in a sibling temporary file and only moved to
/// `output_path` once the tag verifies; on any failure nothing is left at
/// `output_path` and the staged file is removed
///
pub async fn decrypt(input_path: &Path, output_path: &Path, passphrase: &str, envelope: &Envelope) -> Result<()> {
    let decoded = envelope.decode()?;
    let key = derive_key(passphrase, &decoded.salt).await?;
    let mut gcm = GcmStream::new(&key, &decoded.iv);

    let staging_dir = output_path.parent().unwrap_or_else(|| Path::new("."));
    let staged = tempfile::Builder::new()
        .prefix(".decrypt-")
        .suffix(".partial")
        .tempfile_in(staging_dir)?
        .into_temp_path();

    let mut reader = BufReader::new(File::open(input_path).await?);
    let mut writer = BufWriter::new(File::create(&staged).await?);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = fill_chunk(&mut reader, &mut buf).await?;
        if n == 0 { break; }
        gcm.decrypt(&mut buf[..n])?;
        writer.write_all(&buf[..n]).await?;
        if n < CHUNK_SIZE { break; }
    }
    writer.flush().await?;
    drop(writer);

    let computed = gcm.finalize();
    if !bool::from(computed[..].ct_eq(&decoded.tag[..])) {
        warn!(input = %input_path.display(), "authentication tag mismatch");
        // staged plaintext is dropped (and removed) here
        return Err(Error::AuthenticationFailed);
    }

    staged.persist(output_path)?;
    debug!(output = %output_path.display(), "decrypted");
    Ok(())
}

///
/// Reads until `buf` is full or the reader is exhausted, so that every
/// chunk but the last is block-aligned
///
async fn fill_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 { break; }
        filled += n;
    }
    Ok(filled)
}
