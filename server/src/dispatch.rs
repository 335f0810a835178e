//! Request dispatcher — the framed MessagePack loop on stdin/stdout.
//!
//! Reads one request map, processes it to completion, writes one response,
//! repeats. End-of-stream is a clean shutdown; malformed frames are logged
//! and skipped. Every response is encoded to a buffer first and delivered
//! with a single `write_all`; stdout carries only wire bytes (logs are on
//! stderr).

use crate::config::Settings;
use crate::loader::{ChunkInfo, ChunkLoader};
use crate::protocol::{
    self, AdminAction, AdminReply, CompletionReply, ErrorReply, RawRequest, Reply, Request,
    SizeOption, SuggestionEntry,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use wordserve_core::Completer;

/// Completion requests between configuration re-reads.
const CONFIG_RELOAD_INTERVAL: u64 = 100;
/// Completion requests between engine cleanup-hook invocations.
const CLEANUP_INTERVAL: u64 = 50;

pub struct Dispatcher {
    loader: Arc<ChunkLoader>,
    completer: Completer,
    config_path: PathBuf,
    completion_count: u64,
}

impl Dispatcher {
    pub fn new(loader: Arc<ChunkLoader>, completer: Completer, config_path: PathBuf) -> Self {
        Dispatcher { loader, completer, config_path, completion_count: 0 }
    }

    /// Serve until the input stream ends. Returns when the client closes
    /// stdin; the caller stops the background loader afterwards.
    pub fn run(&mut self) {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut reader = stdin.lock();

        let stats = self.loader.stats();
        info!(
            words = stats.total_words,
            chunks = stats.loaded_chunks,
            available = stats.available_chunks,
            "Dispatcher ready"
        );

        loop {
            match protocol::read_message(&mut reader) {
                Ok(raw) => {
                    let reply = self.handle(raw);
                    let bytes = match protocol::encode(&reply) {
                        Ok(b) => b,
                        Err(e) => {
                            warn!(error = %e, "Could not encode response");
                            continue;
                        }
                    };
                    let mut out = stdout.lock();
                    if out.write_all(&bytes).and_then(|_| out.flush()).is_err() {
                        info!("Output stream closed, shutting down");
                        return;
                    }
                }
                Err(e) if protocol::is_eof(&e) => {
                    info!("End of request stream, shutting down");
                    return;
                }
                Err(e) => {
                    // Tolerated: skip to the next frame.
                    debug!(error = %e, "Skipping malformed frame");
                }
            }
        }
    }

    /// Route and process one decoded request. Public so tests can drive the
    /// dispatcher without a subprocess.
    pub fn handle(&mut self, raw: RawRequest) -> Reply {
        match raw.classify() {
            Request::Completion { id, prefix, limit } => self.handle_completion(id, &prefix, limit),
            Request::Admin { id, action } => Reply::Admin(self.handle_admin(id, action)),
        }
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    fn handle_completion(&mut self, id: String, prefix: &str, limit: usize) -> Reply {
        self.completion_count += 1;
        self.maintain();

        let start = Instant::now();
        let result = {
            let index = self.loader.index();
            self.completer.complete(index.trie(), prefix, limit)
        };
        match result {
            Ok(suggestions) => {
                let s: Vec<SuggestionEntry> = suggestions
                    .into_iter()
                    .enumerate()
                    .map(|(i, sg)| SuggestionEntry { w: sg.word, r: (i + 1) as u16 })
                    .collect();
                let c = s.len() as u32;
                Reply::Completion(CompletionReply {
                    id,
                    s,
                    c,
                    t: start.elapsed().as_micros() as u64,
                })
            }
            Err(e) => Reply::Error(ErrorReply { id, e: e.to_string(), c: 400 }),
        }
    }

    /// Periodic maintenance between requests: config reload every 100
    /// completions, engine scratch trim every 50. A reload failure keeps the
    /// current tunables in place.
    fn maintain(&mut self) {
        if self.completion_count % CONFIG_RELOAD_INTERVAL == 0 {
            match Settings::load_or_init(&self.config_path) {
                Ok(settings) => {
                    let options = settings.engine_options();
                    if options != *self.completer.options() {
                        info!("Applied reloaded engine options");
                        self.completer.set_options(options);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Config reload failed, keeping current options");
                }
            }
        }
        if self.completion_count % CLEANUP_INTERVAL == 0 {
            self.completer.trim_scratch();
        }
    }

    // -----------------------------------------------------------------------
    // Dictionary admin
    // -----------------------------------------------------------------------

    fn handle_admin(&mut self, id: String, action: AdminAction) -> AdminReply {
        match action {
            AdminAction::GetInfo | AdminAction::GetChunkCount => self.chunk_counts(id),
            AdminAction::SetSize { chunk_count: None } => {
                AdminReply::error(id, "set_size requires chunk_count")
            }
            AdminAction::SetSize { chunk_count: Some(n) } => {
                match self.loader.set_resident_chunk_count(n as usize) {
                    Ok(()) => self.chunk_counts(id),
                    Err(e) => {
                        warn!(requested = n, error = %e, "Resize failed");
                        let mut reply = AdminReply::error(id, e.to_string());
                        let stats = self.loader.stats();
                        reply.current_chunks = Some(stats.loaded_chunks as u32);
                        reply.available_chunks = Some(stats.available_chunks as u32);
                        reply
                    }
                }
            }
            AdminAction::GetOptions => {
                let mut reply = self.chunk_counts(id);
                let options = match self.loader.discover() {
                    Ok(infos) => size_options(&infos),
                    Err(e) => {
                        return AdminReply::error(reply.id, e.to_string());
                    }
                };
                reply.options = Some(options);
                reply
            }
            AdminAction::Unknown(name) => AdminReply::error(id, format!("unknown action: {name}")),
        }
    }

    fn chunk_counts(&self, id: String) -> AdminReply {
        let stats = self.loader.stats();
        let mut reply = AdminReply::ok(id);
        reply.current_chunks = Some(stats.loaded_chunks as u32);
        reply.available_chunks = Some(stats.available_chunks as u32);
        reply
    }
}

// ---------------------------------------------------------------------------
// Size presets
// ---------------------------------------------------------------------------

/// Deterministic resize presets over the discovered chunks: quarter, half,
/// three-quarter, and full, with cumulative word counts.
fn size_options(infos: &[ChunkInfo]) -> Vec<SizeOption> {
    const PRESETS: [(usize, usize, &str); 4] =
        [(1, 4, "small"), (1, 2, "medium"), (3, 4, "large"), (1, 1, "full")];

    let total = infos.len();
    if total == 0 {
        return Vec::new();
    }
    let mut options: Vec<SizeOption> = Vec::with_capacity(PRESETS.len());
    for (num, den, label) in PRESETS {
        let chunk_count = (total * num / den).max(1);
        if options.iter().any(|o| o.chunk_count == chunk_count as u32) {
            continue;
        }
        let word_count: u64 =
            infos.iter().take(chunk_count).map(|i| u64::from(i.entry_count)).sum();
        options.push(SizeOption {
            chunk_count: chunk_count as u32,
            word_count,
            size_label: label.to_string(),
        });
    }
    options
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
