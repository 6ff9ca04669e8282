//! Streaming authenticated encryption of resource content
//!
//! Blob format:
//!
//! ```text
//! header (16 bytes)
//!   [0]      protocol version (0x20)
//!   [1]      cipher id (0x01 = ChaCha20-Poly1305)
//!   [2]      log2 of the plaintext chunk size (16 = 64 KiB)
//!   [3..8]   reserved, zero
//!   [8..15]  STREAM nonce prefix
//!   [15]     reserved, zero
//! chunks
//!   STREAM-BE32 ChaCha20-Poly1305, each at most 64 KiB + 16-byte tag.
//!   The header is the associated data of the first chunk and the final
//!   chunk carries the last-block flag, so truncation is detected.
//! ```
//!
//! At most two chunks are held in memory at a time.

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::stream::{DecryptorBE32, EncryptorBE32};
use chacha20poly1305::aead::{KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key};
use pagevault_secrets::ResourceKey;
use rand::{rngs::OsRng, RngCore};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Oldest blob format version accepted (2.0)
pub const MIN_PROTOCOL_VERSION: u8 = 0x20;

pub const HEADER_LEN: usize = 16;
pub const CHUNK_SIZE: usize = 1 << CHUNK_EXPONENT;

const CHUNK_EXPONENT: u8 = 16;
const CIPHER_CHACHA20_POLY1305: u8 = 0x01;
const TAG_LEN: usize = 16;
const NONCE_PREFIX_LEN: usize = 7;
const NONCE_PREFIX_OFFSET: usize = 8;

/// Failures decrypting a content blob
#[derive(Error, Debug)]
pub enum DecryptError {
    /// A chunk failed tag verification: wrong key, tampering or truncation
    #[error("Content authentication failed")]
    AuthenticationFailed,

    #[error("Unsupported content version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// The header is truncated or names parameters we do not support
    #[error("Malformed content header: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Encrypts and decrypts content streams under a resource key
pub struct ContentCipher;

impl ContentCipher {
    /// Stream `plaintext` into `sink` as an encrypted blob.
    ///
    /// Returns the number of ciphertext bytes written. The sink is flushed
    /// but not synced.
    pub async fn encrypt_to_sink<R, W>(
        plaintext: &mut R,
        key: &ResourceKey,
        sink: &mut W,
    ) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut header = [0u8; HEADER_LEN];
        header[0] = MIN_PROTOCOL_VERSION;
        header[1] = CIPHER_CHACHA20_POLY1305;
        header[2] = CHUNK_EXPONENT;
        OsRng.fill_bytes(&mut header[NONCE_PREFIX_OFFSET..NONCE_PREFIX_OFFSET + NONCE_PREFIX_LEN]);

        let aead = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let mut encryptor = EncryptorBE32::from_aead(
            aead,
            GenericArray::from_slice(
                &header[NONCE_PREFIX_OFFSET..NONCE_PREFIX_OFFSET + NONCE_PREFIX_LEN],
            ),
        );

        sink.write_all(&header).await?;
        let mut written = HEADER_LEN as u64;

        let mut current = vec![0u8; CHUNK_SIZE];
        let mut next = vec![0u8; CHUNK_SIZE];
        let mut current_len = read_full(plaintext, &mut current).await?;
        let mut first = true;

        loop {
            let next_len = if current_len == CHUNK_SIZE {
                read_full(plaintext, &mut next).await?
            } else {
                0
            };
            let aad: &[u8] = if first { &header } else { &[] };
            let payload = Payload {
                msg: &current[..current_len],
                aad,
            };

            if next_len == 0 {
                let chunk = encryptor
                    .encrypt_last(payload)
                    .map_err(|_| io::Error::other("content encryption failed"))?;
                sink.write_all(&chunk).await?;
                written += chunk.len() as u64;
                break;
            }

            let chunk = encryptor
                .encrypt_next(payload)
                .map_err(|_| io::Error::other("content encryption failed"))?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;

            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
            first = false;
        }

        sink.flush().await?;
        Ok(written)
    }

    /// Stream a blob from `source`, writing verified plaintext to `sink`.
    ///
    /// Each chunk is authenticated before any of its bytes reach the sink.
    /// On failure, chunks that already verified may have been written.
    pub async fn decrypt_from_source<R, W>(
        source: &mut R,
        key: &ResourceKey,
        sink: &mut W,
    ) -> Result<u64, DecryptError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut header = [0u8; HEADER_LEN];
        if read_full(source, &mut header).await? != HEADER_LEN {
            return Err(DecryptError::Malformed("truncated header".to_string()));
        }
        check_header(&header)?;

        let aead = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let mut decryptor = DecryptorBE32::from_aead(
            aead,
            GenericArray::from_slice(
                &header[NONCE_PREFIX_OFFSET..NONCE_PREFIX_OFFSET + NONCE_PREFIX_LEN],
            ),
        );

        let sealed_chunk = CHUNK_SIZE + TAG_LEN;
        let mut current = vec![0u8; sealed_chunk];
        let mut next = vec![0u8; sealed_chunk];
        let mut current_len = read_full(source, &mut current).await?;
        let mut first = true;
        let mut written = 0u64;

        loop {
            let next_len = if current_len == sealed_chunk {
                read_full(source, &mut next).await?
            } else {
                0
            };
            let aad: &[u8] = if first { &header } else { &[] };
            let payload = Payload {
                msg: &current[..current_len],
                aad,
            };

            if next_len == 0 {
                let chunk = decryptor
                    .decrypt_last(payload)
                    .map_err(|_| DecryptError::AuthenticationFailed)?;
                sink.write_all(&chunk).await?;
                written += chunk.len() as u64;
                break;
            }

            let chunk = decryptor
                .decrypt_next(payload)
                .map_err(|_| DecryptError::AuthenticationFailed)?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;

            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
            first = false;
        }

        sink.flush().await?;
        Ok(written)
    }

    /// Whether `source` is a complete blob that authenticates under `key`
    pub async fn verify<R>(source: &mut R, key: &ResourceKey) -> Result<bool, io::Error>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match Self::decrypt_from_source(source, key, &mut tokio::io::sink()).await {
            Ok(_) => Ok(true),
            Err(DecryptError::Io(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }
}

fn check_header(header: &[u8; HEADER_LEN]) -> Result<(), DecryptError> {
    if header[0] < MIN_PROTOCOL_VERSION {
        return Err(DecryptError::UnsupportedVersion(header[0]));
    }
    if header[1] != CIPHER_CHACHA20_POLY1305 {
        return Err(DecryptError::Malformed(format!(
            "unknown cipher id {:#04x}",
            header[1]
        )));
    }
    if header[2] != CHUNK_EXPONENT {
        return Err(DecryptError::Malformed(format!(
            "unsupported chunk size 2^{}",
            header[2]
        )));
    }
    Ok(())
}

/// Fill `buf` unless the reader hits EOF first; returns bytes read
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
