//! File access for both roles: chunked reading on the sending side and a
//! staged, rename-on-complete writer on the receiving side.

use sha2::{Digest, Sha256};
use std::{io, path::{Path, PathBuf}};
use tokio::{fs::{self, File, OpenOptions}, io::{AsyncReadExt, AsyncWriteExt}};

use crate::pdu::{MAX_DATA_SIZE, MAX_FILENAME_LEN};

/// A name is acceptable on the wire only if it cannot leave the directory it
/// is joined onto.
pub fn is_bare_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FILENAME_LEN
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Final path component of `path` as a wire filename.
pub fn bare_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    is_bare_name(name).then(|| name.to_string())
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Sequential reader handing out payload-sized chunks, start to end, once.
pub struct ChunkReader {
    file: File,
    total_size: u64,
    read_so_far: u64,
    hasher: Sha256,
}

impl ChunkReader {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
        }
        Ok(Self { file, total_size: meta.len(), read_so_far: 0, hasher: Sha256::new() })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn bytes_read(&self) -> u64 {
        self.read_so_far
    }

    /// Next chunk of at most [`MAX_DATA_SIZE`] bytes; empty at end of file.
    /// Short reads are topped up so every chunk but the last is full.
    pub async fn next_chunk(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATA_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 { break; }
            filled += n;
        }
        buf.truncate(filled);
        self.hasher.update(&buf);
        self.read_so_far += filled as u64;
        Ok(buf)
    }

    /// SHA-256 of everything read so far.
    pub fn digest(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }
}

/// Receive-side file. Bytes go to a hidden staging file next to the target;
/// only [`StagedFile::finish`] makes them visible under the real name.
#[derive(Debug)]
pub struct StagedFile {
    file: File,
    staging: PathBuf,
    target: PathBuf,
    written: u64,
    hasher: Sha256,
}

pub fn staging_path(dir: &Path, name: &str, session: u64) -> PathBuf {
    dir.join(format!(".{name}.{session}.part"))
}

impl StagedFile {
    /// Open (truncating) the staging file for `name` inside `dir`.
    pub async fn create(dir: &Path, name: &str, session: u64) -> io::Result<Self> {
        let staging = staging_path(dir, name, session);
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(&staging).await?;
        Ok(Self { file, staging, target: dir.join(name), written: 0, hasher: Sha256::new() })
    }

    pub async fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await?;
        self.hasher.update(data);
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Flush, close and move the staged bytes over the target name.
    pub async fn finish(mut self) -> io::Result<(PathBuf, [u8; 32])> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        fs::rename(&self.staging, &self.target).await?;
        Ok((self.target, self.hasher.finalize().into()))
    }

    /// Close and delete the staged bytes.
    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.staging).await {
            log::warn!("could not remove staging file {:?}: {}", self.staging, e);
        }
    }
}
