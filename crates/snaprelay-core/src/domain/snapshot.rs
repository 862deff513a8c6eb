//! Snapshot artifacts and the byte sources that feed uploads.

use std::fmt;
use std::io::{Cursor, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Opaque identifier returned by the database control endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Parse the body of a successful snapshot response.
    ///
    /// The body is treated as opaque text. A JSON string literal is unquoted;
    /// anything else is kept verbatim after trimming. Returns `None` when
    /// nothing is left.
    pub fn from_response_body(body: &str) -> Option<Self> {
        let trimmed = body.trim();
        let value = match serde_json::from_str::<String>(trimmed) {
            Ok(unquoted) => unquoted.trim().to_string(),
            Err(_) => trimmed.to_string(),
        };
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Token used to find the snapshot file on disk: the last path segment.
    pub fn match_token(&self) -> &str {
        self.0
            .rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(self.0.as_str())
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

enum SourceReader {
    File(File),
    Memory(Cursor<Vec<u8>>),
}

/// A readable, seekable stream of known length.
///
/// Owning the source means owning the underlying file handle: dropping the
/// source (on success or on any error path) releases it.
pub struct ByteSource {
    reader: SourceReader,
    len: u64,
}

impl ByteSource {
    pub fn from_file(file: File, len: u64) -> Self {
        Self {
            reader: SourceReader::File(file),
            len,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self {
            reader: SourceReader::Memory(Cursor::new(bytes)),
            len,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the next chunk of at most `max` bytes. `None` at end of stream.
    pub async fn read_chunk(&mut self, max: usize) -> std::io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; max.max(1)];
        let filled = self.fill(&mut buf).await?;
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub async fn read_range(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        match &mut self.reader {
            SourceReader::File(file) => {
                file.seek(SeekFrom::Start(offset)).await?;
            }
            SourceReader::Memory(cursor) => {
                cursor.seek(SeekFrom::Start(offset)).await?;
            }
        }
        let mut buf = vec![0u8; len];
        let filled = self.fill(&mut buf).await?;
        if filled < len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {len} bytes at offset {offset}, got {filled}"),
            ));
        }
        Ok(buf)
    }

    async fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = match &mut self.reader {
                SourceReader::File(file) => file.read(&mut buf[filled..]).await?,
                SourceReader::Memory(cursor) => cursor.read(&mut buf[filled..]).await?,
            };
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.reader {
            SourceReader::File(_) => "file",
            SourceReader::Memory(_) => "memory",
        };
        f.debug_struct("ByteSource")
            .field("kind", &kind)
            .field("len", &self.len)
            .finish()
    }
}

/// A snapshot file located on disk, ready to be uploaded.
#[derive(Debug)]
pub struct SnapshotArtifact {
    /// File name; also used as the object key.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub source: ByteSource,
}

impl SnapshotArtifact {
    /// Open `path` and capture its size.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            path: path.to_path_buf(),
            size,
            source: ByteSource::from_file(file, size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("\"1585578518736.avro\"", "1585578518736.avro")]
    #[case("1585578518736.avro\n", "1585578518736.avro")]
    #[case("\"acct1/snapshots/1585578518736.avro\"", "acct1/snapshots/1585578518736.avro")]
    fn snapshot_id_parses_response_bodies(#[case] body: &str, #[case] expected: &str) {
        let id = SnapshotId::from_response_body(body).unwrap();
        assert_eq!(id.as_str(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\"\"")]
    fn empty_bodies_have_no_snapshot_id(#[case] body: &str) {
        assert!(SnapshotId::from_response_body(body).is_none());
    }

    #[test]
    fn match_token_is_last_path_segment() {
        assert_eq!(
            SnapshotId::new("acct1/snapshots/1585578518736.avro").match_token(),
            "1585578518736.avro"
        );
        assert_eq!(SnapshotId::new("1585578518736").match_token(), "1585578518736");
        assert_eq!(SnapshotId::new("dir/file/").match_token(), "file");
    }

    #[tokio::test]
    async fn read_chunk_walks_the_source() {
        let mut source = ByteSource::from_bytes(b"abcdefg".to_vec());

        assert_eq!(source.read_chunk(3).await.unwrap(), Some(b"abc".to_vec()));
        assert_eq!(source.read_chunk(3).await.unwrap(), Some(b"def".to_vec()));
        assert_eq!(source.read_chunk(3).await.unwrap(), Some(b"g".to_vec()));
        assert_eq!(source.read_chunk(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_range_seeks_in_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1585578518736.avro");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let mut artifact = SnapshotArtifact::open(&path).await.unwrap();
        assert_eq!(artifact.name, "1585578518736.avro");
        assert_eq!(artifact.size, 10);

        assert_eq!(artifact.source.read_range(6, 4).await.unwrap(), b"6789");
        assert_eq!(artifact.source.read_range(0, 2).await.unwrap(), b"01");
        let err = artifact.source.read_range(8, 4).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
