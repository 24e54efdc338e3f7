//! Archive streaming.
//!
//! Tar and zip containers are written by a blocking task into a
//! [`ChannelWriter`], which hands the bytes to the response body in
//! [`CHUNK_SIZE`] pieces. Node blobs are read through [`SyncIoBridge`], so
//! neither side holds a whole file or a whole archive in memory.

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use stash_core::{ArchiveFormat, Node};
use stash_storage::{ObjectStore, StorageError};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::io::{StreamReader, SyncIoBridge};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Size of the chunks handed to the response body.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the archive writer and the client.
const CHANNEL_DEPTH: usize = 4;

/// One file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path of the entry inside the archive.
    pub name: String,
    /// Blob key in the object store.
    pub key: String,
    /// Modification time as a unix timestamp.
    pub mtime: i64,
}

/// Lay out archive entries for `nodes`, in order.
///
/// Nodes without a file name use their id. A name already taken by an
/// earlier entry is prefixed with `<node id>/`.
pub fn plan_entries(nodes: &[Node]) -> Vec<ArchiveEntry> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    nodes
        .iter()
        .map(|node| {
            let base = node.display_name();
            let uses = seen.entry(base.clone()).or_default();
            *uses += 1;
            let name = if *uses > 1 {
                format!("{}/{}", node.id, base)
            } else {
                base
            };
            ArchiveEntry {
                name,
                key: node.id.blob_key(),
                mtime: node.last_modified.unix_timestamp(),
            }
        })
        .collect()
}

/// Stream `entries` as a `format` archive.
///
/// The archive is built on the blocking pool. If building fails part way, the
/// body ends with an error so the client sees a broken transfer rather than
/// a short archive.
pub fn stream_archive(
    storage: Arc<dyn ObjectStore>,
    format: ArchiveFormat,
    entries: Vec<ArchiveEntry>,
) -> Body {
    let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
    let handle = Handle::current();

    tokio::task::spawn_blocking(move || {
        let error_tx = tx.clone();
        let writer = ChannelWriter::new(tx);
        let result = match format {
            ArchiveFormat::Tar => write_tar(&handle, storage.as_ref(), &entries, writer),
            ArchiveFormat::Zip => write_zip(&handle, storage.as_ref(), &entries, writer),
        };
        match result {
            Ok(()) => {
                tracing::debug!(format = %format, entries = entries.len(), "Archive stream finished");
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!(format = %format, "Archive client went away");
            }
            Err(e) => {
                tracing::error!(format = %format, error = %e, "Archive stream failed");
                let _ = error_tx.blocking_send(Err(e));
            }
        }
    });

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield chunk;
        }
    };
    Body::from_stream(stream)
}

fn write_tar<W: Write>(
    handle: &Handle,
    storage: &dyn ObjectStore,
    entries: &[ArchiveEntry],
    writer: W,
) -> io::Result<()> {
    let mut builder = tar::Builder::new(writer);
    for entry in entries {
        let (size, reader) = open_blob(handle, storage, &entry.key)?;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(u64::try_from(entry.mtime).unwrap_or(0));
        builder.append_data(&mut header, &entry.name, reader)?;
    }
    let mut writer = builder.into_inner()?;
    writer.flush()
}

fn write_zip<W: Write>(
    handle: &Handle,
    storage: &dyn ObjectStore,
    entries: &[ArchiveEntry],
    writer: W,
) -> io::Result<()> {
    let mut zip = ZipWriter::new_stream(writer);
    for entry in entries {
        let (size, mut reader) = open_blob(handle, storage, &entry.key)?;
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .large_file(size >= u64::from(u32::MAX));
        zip.start_file(entry.name.as_str(), options)
            .map_err(io::Error::other)?;
        io::copy(&mut reader, &mut zip)?;
    }
    let mut writer = zip.finish().map_err(io::Error::other)?;
    writer.flush()
}

/// Open a blob for synchronous reading, returning its size and a reader
/// that yields exactly that many bytes.
fn open_blob(
    handle: &Handle,
    storage: &dyn ObjectStore,
    key: &str,
) -> io::Result<(u64, Box<dyn Read + Send>)> {
    let (meta, stream) = handle
        .block_on(async {
            let meta = storage.head(key).await?;
            let stream = storage.get_stream(key).await?;
            Ok::<_, StorageError>((meta, stream))
        })
        .map_err(io::Error::other)?;
    let reader = StreamReader::new(stream.map_err(io::Error::other));
    let bridge = SyncIoBridge::new_with_handle(reader, handle.clone());
    Ok((meta.size, Box::new(ExactReader::new(bridge, meta.size))))
}

/// Reader that fails if the inner reader ends before `remaining` bytes.
///
/// Archive headers are written with the size up front, so a short blob must
/// abort the stream instead of producing a corrupt entry.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> ExactReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("blob ended with {} bytes missing", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Synchronous writer that forwards fixed-size chunks over a channel.
///
/// Must be used from a blocking thread. Writes fail with `BrokenPipe` once
/// the receiving side is dropped.
pub struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: BytesMut,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            buf: BytesMut::with_capacity(CHUNK_SIZE),
        }
    }

    fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive receiver dropped"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= CHUNK_SIZE {
            let chunk = self.buf.split_to(CHUNK_SIZE).freeze();
            self.send(chunk)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let chunk = self.buf.split().freeze();
            self.send(chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_core::{Checksum, FileChecksums, FileInfo, NodeId};
    use stash_storage::FilesystemBackend;
    use std::io::Cursor;
    use time::OffsetDateTime;

    fn node(name: &str, data: &[u8]) -> Node {
        let now = OffsetDateTime::now_utc();
        Node {
            id: NodeId::new(),
            file: FileInfo {
                name: name.to_string(),
                size: data.len() as u64,
                checksum: FileChecksums {
                    md5: Some(Checksum::compute(data)),
                },
            },
            attributes: Default::default(),
            owner: None,
            created_on: now,
            last_modified: now,
            expiration: None,
        }
    }

    async fn store_nodes(files: &[(&str, &[u8])]) -> (tempfile::TempDir, Arc<dyn ObjectStore>, Vec<Node>) {
        let temp = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(temp.path()).await.unwrap());
        let mut nodes = Vec::new();
        for (name, data) in files {
            let n = node(name, data);
            storage
                .put(&n.id.blob_key(), Bytes::copy_from_slice(data))
                .await
                .unwrap();
            nodes.push(n);
        }
        (temp, storage, nodes)
    }

    #[test]
    fn test_plan_entries_prefixes_repeated_names() {
        let nodes = vec![node("a.txt", b"1"), node("a.txt", b"2"), node("", b"3")];
        let entries = plan_entries(&nodes);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[1].name, format!("{}/a.txt", nodes[1].id));
        assert_eq!(entries[2].name, nodes[2].id.to_string());
        assert_eq!(entries[0].key, nodes[0].id.blob_key());
    }

    #[tokio::test]
    async fn test_channel_writer_emits_fixed_chunks() {
        let (tx, mut rx) = mpsc::channel(16);
        tokio::task::spawn_blocking(move || {
            let mut writer = ChannelWriter::new(tx);
            writer.write_all(&vec![7u8; CHUNK_SIZE * 2 + 100]).unwrap();
            writer.flush().unwrap();
        })
        .await
        .unwrap();

        let mut sizes = Vec::new();
        while let Some(chunk) = rx.recv().await {
            sizes.push(chunk.unwrap().len());
        }
        assert_eq!(sizes, vec![CHUNK_SIZE, CHUNK_SIZE, 100]);
    }

    #[tokio::test]
    async fn test_channel_writer_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = tokio::task::spawn_blocking(move || {
            let mut writer = ChannelWriter::new(tx);
            writer.write_all(&vec![0u8; CHUNK_SIZE]).unwrap_err()
        })
        .await
        .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_tar_entries_have_exact_sizes() {
        let big = vec![42u8; CHUNK_SIZE * 3 + 5];
        let (_temp, storage, nodes) =
            store_nodes(&[("CCC.txt", b"abcd"), ("big.bin", &big), ("empty", b"")]).await;

        let body = stream_archive(storage, ArchiveFormat::Tar, plan_entries(&nodes));
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();

        let mut archive = tar::Archive::new(Cursor::new(bytes.to_vec()));
        let listed: Vec<(String, u64)> = archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (e.path().unwrap().display().to_string(), e.header().size().unwrap())
            })
            .collect();
        assert_eq!(
            listed,
            vec![
                ("CCC.txt".to_string(), 4),
                ("big.bin".to_string(), big.len() as u64),
                ("empty".to_string(), 0),
            ]
        );
    }

    #[tokio::test]
    async fn test_zip_roundtrips_content() {
        let (_temp, storage, nodes) =
            store_nodes(&[("one.txt", b"first file"), ("two.txt", b"second")]).await;

        let body = stream_archive(storage, ArchiveFormat::Zip, plan_entries(&nodes));
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("two.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "second");
        assert_eq!(archive.by_name("one.txt").unwrap().size(), 10);
    }

    #[tokio::test]
    async fn test_missing_blob_breaks_the_stream() {
        let (_temp, storage, mut nodes) = store_nodes(&[("a.txt", b"abcd")]).await;
        nodes.push(node("ghost.txt", b"never stored"));

        let body = stream_archive(storage, ArchiveFormat::Tar, plan_entries(&nodes));
        assert!(axum::body::to_bytes(body, usize::MAX).await.is_err());
    }
}
