//! Test harness for loader and dispatcher integration tests.
//!
//! Builds a dictionary from literal `(word, rank)` chunks in a temp dir,
//! then drives the dispatcher through `Dispatcher::handle()` directly (no
//! subprocess, no real stdin).

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use wordserve_core::codec;
use wordserve_core::complete::EngineOptions;
use wordserve_core::Completer;
use wordserve_server::loader::ChunkLoader;
use wordserve_server::materialize::MaterializeOptions;
use wordserve_server::protocol::RawRequest;
use wordserve_server::Dispatcher;

/// Write `dict_NNNN.bin` for chunk `id` from `(word, stored rank)` pairs.
pub fn write_chunk(dir: &Path, id: u32, entries: &[(&str, u16)]) -> PathBuf {
    let path = dir.join(format!("dict_{id:04}.bin"));
    let entries: Vec<(Vec<u8>, u16)> =
        entries.iter().map(|(w, r)| (w.as_bytes().to_vec(), *r)).collect();
    codec::write_entries(&path, &entries).expect("write chunk");
    path
}

/// A loader over a temp data dir. Materialization is pinned to a
/// nonexistent generator and no archive URL so resize failures are
/// deterministic.
pub fn make_loader(dir: &Path, chunk_size: usize) -> Arc<ChunkLoader> {
    let options = MaterializeOptions {
        generator: Some(PathBuf::from("/nonexistent/wordserve-build")),
        archive_url: None,
    };
    ChunkLoader::new(dir.to_path_buf(), chunk_size, 1_000_000, options)
}

pub struct TestHarness {
    pub loader: Arc<ChunkLoader>,
    pub dispatcher: Dispatcher,
    pub config_path: PathBuf,
    temp_dir: TempDir,
}

impl TestHarness {
    /// Write one chunk file per slice (IDs 1, 2, ...), load them all, and
    /// wrap a dispatcher with default engine options around the loader.
    pub fn with_chunks(chunks: &[&[(&str, u16)]]) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        for (i, entries) in chunks.iter().enumerate() {
            write_chunk(temp_dir.path(), i as u32 + 1, entries);
        }
        let loader = make_loader(temp_dir.path(), 10_000);
        for id in 1..=chunks.len() as u32 {
            loader.load(id).expect("load chunk");
        }
        let config_path = temp_dir.path().join("wordserve.toml");
        let completer = Completer::new(EngineOptions::default());
        let dispatcher = Dispatcher::new(Arc::clone(&loader), completer, config_path.clone());
        TestHarness { loader, dispatcher, config_path, temp_dir }
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A completion request the way a client would send it.
    pub fn completion(&mut self, id: &str, prefix: &str, limit: u32) -> wordserve_server::protocol::Reply {
        self.dispatcher.handle(RawRequest {
            id: Some(id.to_string()),
            p: Some(prefix.to_string()),
            l: Some(limit),
            ..Default::default()
        })
    }

    /// An `action`-routed dictionary-admin request.
    pub fn admin(
        &mut self,
        id: &str,
        action: &str,
        chunk_count: Option<u32>,
    ) -> wordserve_server::protocol::Reply {
        self.dispatcher.handle(RawRequest {
            id: Some(id.to_string()),
            action: Some(action.to_string()),
            chunk_count,
            ..Default::default()
        })
    }
}
