use std::hash::{Hash, Hasher};
use std::io::{self, Read};
use std::path::Path;

use seahash::SeaHasher;

/// Hex length of the short content hash used as the primary model key.
const SHORT_HASH_LEN: usize = 16;

/// Compute a hex string hash of a hashable object.
///
/// Cheap and stable; used for cache keys, not for content identity.
pub fn cache_digest<H: Hash>(hashable: &H) -> String {
    let mut hasher = SeaHasher::new();
    hashable.hash(&mut hasher);
    hex::encode(hasher.finish().to_le_bytes())
}

/// BLAKE3 hex digest of a byte buffer.
pub fn content_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// The short form of a full hex digest, used as the primary model key.
pub fn short_hash(full: &str) -> &str {
    &full[..full.len().min(SHORT_HASH_LEN)]
}

/// Content digests for one file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub blake3: String,
    pub file_size: u64,
}

impl FileDigest {
    /// The short hash derived from the full BLAKE3 digest.
    pub fn short(&self) -> &str {
        short_hash(&self.blake3)
    }
}

/// Stream a file through BLAKE3.
///
/// Model files are multi-gigabyte; this reads in chunks rather than
/// loading the file into memory.
pub fn hash_file(path: impl AsRef<Path>) -> io::Result<FileDigest> {
    let mut file = fs_err::File::open(path.as_ref())?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 1 << 20];
    let mut file_size = 0u64;
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        file_size += read as u64;
    }
    Ok(FileDigest {
        blake3: hasher.finalize().to_hex().to_string(),
        file_size,
    })
}
