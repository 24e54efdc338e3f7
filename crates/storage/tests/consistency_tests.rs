// Consistency tests for concurrent writes, reads and deletes
// Ensures readers never observe a partially written blob

mod common;

use bytes::Bytes;
use common::seeded_bytes;
use futures::StreamExt;
use stash_storage::{ByteStream, FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

async fn backend() -> (TempDir, Arc<FilesystemBackend>) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemBackend::new(temp_dir.path().to_path_buf())
        .await
        .unwrap();
    (temp_dir, Arc::new(backend))
}

async fn collect(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

async fn upload_in_chunks(store: &FilesystemBackend, key: &str, data: &Bytes) -> u64 {
    let mut upload = store.put_stream(key).await.unwrap();
    for chunk in data.chunks(4096) {
        upload.write(Bytes::copy_from_slice(chunk)).await.unwrap();
        tokio::task::yield_now().await;
    }
    upload.finish().await.unwrap()
}

#[tokio::test]
async fn test_concurrent_uploads_to_distinct_keys() {
    let (_temp, store) = backend().await;

    let mut handles = Vec::new();
    for i in 0..16u64 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let data = seeded_bytes(i, 20_000 + i as usize);
            let key = format!("nodes/node-{i}/data");
            let written = upload_in_chunks(&store, &key, &data).await;
            assert_eq!(written, data.len() as u64);
            (key, data)
        }));
    }

    for handle in handles {
        let (key, data) = handle.await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), data);
        assert_eq!(store.head(&key).await.unwrap().size, data.len() as u64);
    }
}

#[tokio::test]
async fn test_racing_uploads_to_one_key_leave_a_whole_blob() {
    let (_temp, store) = backend().await;
    let first = seeded_bytes(1, 64 * 1024);
    let second = seeded_bytes(2, 48 * 1024);

    let (a, b) = tokio::join!(
        upload_in_chunks(&store, "nodes/shared/data", &first),
        upload_in_chunks(&store, "nodes/shared/data", &second)
    );
    assert_eq!((a, b), (first.len() as u64, second.len() as u64));

    let stored = store.get("nodes/shared/data").await.unwrap();
    assert!(stored == first || stored == second);
}

#[tokio::test]
async fn test_open_stream_survives_overwrite() {
    let (_temp, store) = backend().await;
    let original = seeded_bytes(3, 256 * 1024);
    let replacement = seeded_bytes(4, 1024);
    store.put("nodes/x/data", original.clone()).await.unwrap();

    let stream = store.get_stream("nodes/x/data").await.unwrap();
    store.put("nodes/x/data", replacement.clone()).await.unwrap();

    assert_eq!(collect(stream).await, original.as_ref());
    assert_eq!(store.get("nodes/x/data").await.unwrap(), replacement);
}

#[tokio::test]
async fn test_aborted_upload_does_not_clobber_existing_blob() {
    let (_temp, store) = backend().await;
    let existing = seeded_bytes(5, 10_000);
    store.put("nodes/y/data", existing.clone()).await.unwrap();

    let mut upload = store.put_stream("nodes/y/data").await.unwrap();
    upload.write(seeded_bytes(6, 5_000)).await.unwrap();
    upload.abort().await.unwrap();

    assert_eq!(store.get("nodes/y/data").await.unwrap(), existing);
}

#[tokio::test]
async fn test_delete_during_reads() {
    let (_temp, store) = backend().await;
    let data = seeded_bytes(7, 128 * 1024);
    store.put("nodes/z/data", data.clone()).await.unwrap();

    let streams = futures::future::join_all(
        (0..4).map(|_| store.get_stream("nodes/z/data")),
    )
    .await;
    store.delete("nodes/z/data").await.unwrap();

    for stream in streams {
        assert_eq!(collect(stream.unwrap()).await, data.as_ref());
    }
    assert!(!store.exists("nodes/z/data").await.unwrap());
    assert!(store.get("nodes/z/data").await.unwrap_err().is_not_found());
}
