use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use crc32fast::Hasher;

/// Amount of data read before seeking to the next location in the file
pub const BLOCK_SIZE: usize = 4096;

/// Upper bound of a single forward seek between two blocks
pub const MAX_SEEK_SIZE: u32 = 64 * 1024 * 1024;

/// Open then fingerprint the file at the provided path
pub fn hash_file(path: &Path) -> io::Result<u32> {
    let file = File::open(path)?;
    hash_reader(file)
}

/// Fingerprint the provided reader, starting from its current position
///
/// Rather than reading a whole media file, a block of [`BLOCK_SIZE`] bytes is folded into a
/// running CRC-32 (IEEE), then the reader skips forward `digest % MAX_SEEK_SIZE` bytes, until a
/// read returns nothing. Not a cryptographic hash: once a seek overshoots the end of the file every
/// further read is empty, so 4096 and 8192 bytes of the same repeated byte collide.
pub fn hash_reader<R: Read + Seek>(mut reader: R) -> io::Result<u32> {
    let mut buffer = [0u8; BLOCK_SIZE];
    let mut digest = 0u32;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => return Ok(digest),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let mut hasher = Hasher::new_with_initial(digest);
        hasher.update(&buffer[..n]);
        digest = hasher.finalize();

        reader.seek(SeekFrom::Current(i64::from(digest % MAX_SEEK_SIZE)))?;
    }
}
