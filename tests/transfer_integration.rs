//! End-to-end transfer tests
//!
//! Tests for:
//! - Multi-chunk uploads and checksum verification
//! - Empty and single-chunk files
//! - File info queries
//! - Concurrent transfers to different filenames
//! - Re-uploading over an existing file

use ferry_cli::TransferProgress;
use ferry_core::checksum::checksum_bytes;
use ferry_integration_tests::{TestServer, chunk, patterned_bytes, write_local_file};
use tempfile::TempDir;

#[tokio::test]
async fn test_multi_chunk_upload_and_verify() {
    let server = TestServer::start().await;
    let local = TempDir::new().unwrap();
    let content = patterned_bytes(1_000_000);
    let path = write_local_file(local.path(), "dataset.bin", &content);

    let mut client = server.client_with_chunk_size(64 * 1024).await;
    let report = client
        .send_file(&path, "dataset.bin", &TransferProgress::hidden())
        .await
        .unwrap();

    assert!(report.success, "{}", report.message);
    assert_eq!(report.total_chunks, 16);
    assert_eq!(report.bytes_received, 1_000_000);
    assert_eq!(report.bytes_sent, 1_000_000);
    assert_eq!(report.local_checksum, checksum_bytes(&content));

    let stored = std::fs::read(server.stored_path("dataset.bin")).unwrap();
    assert_eq!(stored, content);

    let verification = client.verify(&path, "dataset.bin").await.unwrap();
    assert!(verification.matches());
    assert_eq!(verification.remote.file_size, 1_000_000);
    assert_eq!(verification.remote.checksum, checksum_bytes(&stored));
}

#[tokio::test]
async fn test_chunk_size_boundary() {
    let server = TestServer::start().await;
    let local = TempDir::new().unwrap();
    let content = patterned_bytes(4096 * 3);
    let path = write_local_file(local.path(), "exact.bin", &content);

    let mut client = server.client_with_chunk_size(4096).await;
    let report = client
        .send_file(&path, "exact.bin", &TransferProgress::hidden())
        .await
        .unwrap();

    assert!(report.success, "{}", report.message);
    assert_eq!(report.total_chunks, 3);
    assert_eq!(std::fs::read(server.stored_path("exact.bin")).unwrap(), content);
}

#[tokio::test]
async fn test_empty_file_upload() {
    let server = TestServer::start().await;
    let local = TempDir::new().unwrap();
    let path = write_local_file(local.path(), "empty.txt", b"");

    let mut client = server.client().await;
    let report = client
        .send_file(&path, "empty.txt", &TransferProgress::hidden())
        .await
        .unwrap();

    assert!(report.success, "{}", report.message);
    assert_eq!(report.total_chunks, 1);
    assert_eq!(report.bytes_received, 0);

    let info = client.file_info("empty.txt").await.unwrap();
    assert!(info.exists);
    assert_eq!(info.file_size, 0);
    assert_eq!(info.checksum, checksum_bytes(b""));
}

#[tokio::test]
async fn test_upload_under_different_name() {
    let server = TestServer::start().await;
    let local = TempDir::new().unwrap();
    let path = write_local_file(local.path(), "local-name.txt", b"renamed on upload");

    let mut client = server.client().await;
    let report = client
        .send_file(&path, "remote-name.txt", &TransferProgress::hidden())
        .await
        .unwrap();

    assert!(report.success);
    assert!(server.stored_path("remote-name.txt").exists());
    assert!(!server.stored_path("local-name.txt").exists());
}

#[tokio::test]
async fn test_reupload_truncates_previous_content() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let long = client
        .send_chunks(vec![chunk("doc.txt", b"a much longer first version", 1, 1)])
        .await
        .unwrap();
    assert!(long.success);

    let short = client
        .send_chunks(vec![chunk("doc.txt", b"v2", 1, 1)])
        .await
        .unwrap();
    assert!(short.success);

    assert_eq!(std::fs::read(server.stored_path("doc.txt")).unwrap(), b"v2");
}

#[tokio::test]
async fn test_file_info_missing() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let info = client.file_info("never-sent.bin").await.unwrap();
    assert!(!info.exists);
    assert_eq!(info.file_size, 0);
    assert_eq!(info.checksum, "");
}

#[tokio::test]
async fn test_file_info_sees_files_placed_directly() {
    let server = TestServer::start().await;
    std::fs::write(server.upload_dir().join("seeded.bin"), b"seeded").unwrap();

    let mut client = server.client().await;
    let info = client.file_info("seeded.bin").await.unwrap();
    assert!(info.exists);
    assert_eq!(info.file_size, 6);
    assert_eq!(info.checksum, checksum_bytes(b"seeded"));
}

#[tokio::test]
async fn test_concurrent_transfers_to_different_files() {
    let server = TestServer::start().await;
    let local = TempDir::new().unwrap();

    let mut tasks = Vec::new();
    for i in 0..8usize {
        let content = patterned_bytes(50_000 + i * 1_000);
        let name = format!("parallel-{i}.bin");
        let path = write_local_file(local.path(), &name, &content);
        let mut client = server.client_with_chunk_size(8 * 1024).await;

        tasks.push(tokio::spawn(async move {
            let report = client
                .send_file(&path, &name, &TransferProgress::hidden())
                .await
                .unwrap();
            (name, content, report)
        }));
    }

    for task in tasks {
        let (name, content, report) = task.await.unwrap();
        assert!(report.success, "{name}: {}", report.message);
        assert_eq!(report.bytes_received, content.len() as u64);
        assert_eq!(std::fs::read(server.stored_path(&name)).unwrap(), content);
    }
}

#[tokio::test]
async fn test_verify_detects_local_change() {
    let server = TestServer::start().await;
    let local = TempDir::new().unwrap();
    let path = write_local_file(local.path(), "drift.txt", b"original");

    let mut client = server.client().await;
    client
        .send_file(&path, "drift.txt", &TransferProgress::hidden())
        .await
        .unwrap();

    std::fs::write(&path, b"modified").unwrap();
    let verification = client.verify(&path, "drift.txt").await.unwrap();
    assert!(!verification.matches());
    assert!(verification.remote.exists);
}
