use std::sync::Arc;

use chatex_engine::relay::{chunk_artifact, ChunkReassembler, DownloadChunk, FALLBACK_DOWNLOAD_NAME};
use chatex_engine::{Artifact, ChunkedRelay, DirectorySink, DownloadSink, MemorySink, RelayError};
use pretty_assertions::assert_eq;

fn artifact(name: &str, bytes: &[u8]) -> Artifact {
    Artifact {
        file_name: name.to_string(),
        mime: "application/pdf".to_string(),
        bytes: bytes.to_vec(),
    }
}

#[test]
fn chunks_cover_the_whole_payload_in_order() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let chunks = chunk_artifact(&artifact("a.pdf", &payload), "f1", 64);

    let total = chunks[0].total;
    assert_eq!(total, chunks.len());
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.chunk.len() <= 64 && c.file_id == "f1"));
    assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), (0..total).collect::<Vec<_>>());
}

#[test]
fn empty_artifact_still_travels_as_one_chunk() {
    let chunks = chunk_artifact(&artifact("empty.txt", b""), "f2", 64);
    assert_eq!(chunks.len(), 1);

    let done = ChunkReassembler::new().receive(chunks[0].clone()).unwrap().unwrap();
    assert!(done.bytes.is_empty());
}

#[test]
fn out_of_order_and_duplicate_chunks_reassemble_once() {
    let payload = b"a conversation long enough to need several chunks".to_vec();
    let mut chunks = chunk_artifact(&artifact("My chat.pdf", &payload), "f3", 8);
    chunks.reverse();
    let reassembler = ChunkReassembler::new();

    let mut finished = Vec::new();
    for chunk in chunks.iter().take(chunks.len() - 1) {
        assert_eq!(reassembler.receive(chunk.clone()).unwrap(), None);
        assert_eq!(reassembler.receive(chunk.clone()).unwrap(), None);
    }
    assert_eq!(reassembler.pending(), 1);
    if let Some(done) = reassembler.receive(chunks[chunks.len() - 1].clone()).unwrap() {
        finished.push(done);
    }

    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].bytes, payload);
    assert_eq!(finished[0].file_name, "My-chat.pdf");
    assert_eq!(finished[0].mime, "application/pdf");
    assert_eq!(reassembler.pending(), 0);
}

#[test]
fn malformed_chunks_are_rejected() {
    let reassembler = ChunkReassembler::new();
    let base = DownloadChunk {
        file_id: "f4".to_string(),
        chunk: "QUJD".to_string(),
        index: 0,
        total: 2,
        file_name: None,
        mime: None,
    };

    for bad in [
        DownloadChunk { file_id: String::new(), ..base.clone() },
        DownloadChunk { total: 0, ..base.clone() },
        DownloadChunk { index: 2, ..base.clone() },
    ] {
        let err = reassembler.receive(bad).unwrap_err();
        assert!(matches!(err, RelayError::InvalidChunk));
        assert_eq!(err.to_string(), "Invalid chunk payload");
    }

    assert_eq!(reassembler.receive(base.clone()).unwrap(), None);
    let mismatched = DownloadChunk { index: 1, total: 3, ..base };
    assert!(matches!(reassembler.receive(mismatched), Err(RelayError::InvalidChunk)));
    assert!(matches!(
        reassembler.receive_message("{\"fileId\":\"f5\"}"),
        Err(RelayError::InvalidChunk)
    ));
}

#[test]
fn missing_name_and_mime_fall_back() {
    let message = r#"{"fileId":"f6","chunk":"aGk=","index":0,"total":1}"#;
    let done = ChunkReassembler::new().receive_message(message).unwrap().unwrap();

    assert_eq!(done.file_name, FALLBACK_DOWNLOAD_NAME);
    assert_eq!(done.mime, "application/octet-stream");
    assert_eq!(done.bytes, b"hi");
}

#[test]
fn chunked_relay_delivers_the_original_bytes() {
    let memory = Arc::new(MemorySink::new());
    let relay = ChunkedRelay::with_chunk_size(memory.clone(), 16);
    let payload: Vec<u8> = (0..200u8).collect();

    let delivered = relay.deliver(artifact("report: final.pdf", &payload)).unwrap();

    assert_eq!(delivered.file_name, "report-final.pdf");
    assert_eq!(delivered.byte_len, payload.len());
    let stored = memory.artifacts();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].bytes, payload);
}

#[test]
fn directory_sink_writes_a_sanitized_file() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectorySink::new(dir.path().join("exports"));

    let delivered = sink.deliver(artifact("Chat | notes.pdf", b"%PDF-1.5")).unwrap();

    let path = delivered.path.unwrap();
    assert_eq!(path, dir.path().join("exports").join("Chat-notes.pdf"));
    assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.5");

    sink.deliver(artifact("Chat | notes.pdf", b"second")).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"second");
}
