use aes::{
    cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher},
    Aes256, Block,
};
use ghash::{universal_hash::UniversalHash, GHash};

use super::error::{Error, Result};

type Aes256Ctr = ctr::Ctr32BE<Aes256>;

/// Longest plaintext GCM can protect under one IV: 2^32 - 2 counter blocks
pub(super) const MAX_PLAINTEXT_LEN: u64 = (1 << 36) - 32;

///
/// Incremental AES-256-GCM over a stream of chunks, producing the same
/// ciphertext and tag as a one-shot GCM with a 96-bit IV and no associated data.
///
/// Every chunk except the last must be a multiple of 16 bytes, since GHASH
/// zero-pads each update.
///
pub(super) struct GcmStream {
    ctr: Aes256Ctr,
    ghash: GHash,
    tag_mask: Block,
    len: u64,
}

impl GcmStream {
    pub(super) fn new(key: &[u8; 32], iv: &[u8; 12]) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key));

        let mut h = Block::default();
        cipher.encrypt_block(&mut h);

        // J0 = IV || 0^31 || 1
        let mut j0 = Block::default();
        j0[..12].copy_from_slice(iv);
        j0[15] = 1;

        let mut tag_mask = j0;
        cipher.encrypt_block(&mut tag_mask);

        // Payload keystream starts at inc32(J0)
        let mut counter = j0;
        counter[15] = 2;

        Self {
            ctr: Aes256Ctr::new(GenericArray::from_slice(key), &counter),
            ghash: GHash::new(&h),
            tag_mask,
            len: 0,
        }
    }

    pub(super) fn encrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reserve(buf.len())?;
        self.ctr.try_apply_keystream(buf).map_err(|_| Error::InputTooLarge(MAX_PLAINTEXT_LEN))?;
        self.ghash.update_padded(buf);
        Ok(())
    }

    pub(super) fn decrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reserve(buf.len())?;
        self.ghash.update_padded(buf);
        self.ctr.try_apply_keystream(buf).map_err(|_| Error::InputTooLarge(MAX_PLAINTEXT_LEN))
    }

    fn reserve(&mut self, n: usize) -> Result<()> {
        match self.len.checked_add(n as u64) {
            Some(len) if len <= MAX_PLAINTEXT_LEN => {
                self.len = len;
                Ok(())
            }
            _ => Err(Error::InputTooLarge(MAX_PLAINTEXT_LEN)),
        }
    }

    pub(super) fn finalize(self) -> [u8; 16] {
        let mut ghash = self.ghash;
        let mut lengths = Block::default();
        lengths[8..].copy_from_slice(&(self.len * 8).to_be_bytes());
        ghash.update(&[lengths]);

        let mut tag = [0u8; 16];
        for (i, b) in ghash.finalize().iter().enumerate() {
            tag[i] = b ^ self.tag_mask[i];
        }
        tag
    }
}
