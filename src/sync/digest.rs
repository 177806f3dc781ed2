//! Content digests compatible with object store content tags.
//!
//! S3 reports the MD5 of a single-part object as its ETag, quoted and
//! lowercase hex encoded. Comparing a local digest in the same format
//! tells whether a transfer can be skipped.

use anyhow::Result;
use md5::{Digest, Md5};
use std::io::Read;
use std::path::Path;

/// Quoted lowercase hex MD5 of `data`, e.g. `"5d41402abc4b2a76b9719d911017c592"`.
pub fn content_tag(data: &[u8]) -> String {
    format!("\"{:x}\"", Md5::digest(data))
}

/// Content tag of a file, streamed in 64KB blocks.
pub fn file_content_tag(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 65536];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("\"{:x}\"", hasher.finalize()))
}

/// [`file_content_tag`] run on the blocking pool.
pub async fn local_content_tag(local_file: &Path) -> Result<String> {
    let path = local_file.to_path_buf();
    tokio::task::spawn_blocking(move || file_content_tag(&path)).await?
}

/// Whether the local file already holds the content behind `remote_tag`.
///
/// Any failure to read the file counts as "different" so the caller
/// transfers instead of aborting.
pub async fn same(local_file: &Path, remote_tag: &str) -> bool {
    match local_content_tag(local_file).await {
        Ok(tag) => tag == remote_tag,
        Err(_) => false,
    }
}
