//! SHA3-384 digest helpers.
//!
//! Package blobs are identified by the URL-safe unpadded base64 of their
//! SHA3-384, the same encoding used for key ids.

use std::io::Read;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha3::{Digest, Sha3_384};

use crate::error::CryptoError;

/// Digests a byte slice.
pub fn sha3_384(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha3_384::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Digests a byte slice and encodes the result.
pub fn sha3_384_base64(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(sha3_384(data))
}

/// Digests a file in a streaming fashion, returning the encoded digest
/// and the file size.
pub fn file_sha3_384(path: &Path) -> Result<(String, u64), CryptoError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha3_384::new();
    let mut size: u64 = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((URL_SAFE_NO_PAD.encode(hasher.finalize()), size))
}
