//! Interactive terminal mode — a thin REPL over the completion engine.
//!
//! Each input line is completed and printed with scores and timing. Colon
//! commands map to the loader's admin surface. This mode is for poking at a
//! dictionary by hand; editors use the MessagePack dispatcher instead.

use crate::loader::ChunkLoader;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Instant;
use wordserve_core::Completer;

pub fn run(loader: &Arc<ChunkLoader>, completer: &mut Completer) {
    let stats = loader.stats();
    eprintln!(
        "wordserve interactive — {} words in {} chunk(s). Type a prefix, or :help.",
        stats.total_words, stats.loaded_chunks
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if let Some(command) = input.strip_prefix(':') {
            if !run_command(command, loader) {
                break;
            }
            continue;
        }

        let start = Instant::now();
        let result = {
            let index = loader.index();
            completer.complete(index.trie(), input, 0)
        };
        let elapsed = start.elapsed().as_micros();

        let mut out = stdout.lock();
        match result {
            Ok(suggestions) if suggestions.is_empty() => {
                let _ = writeln!(out, "  (no suggestions, {elapsed}µs)");
            }
            Ok(suggestions) => {
                for (i, s) in suggestions.iter().enumerate() {
                    let _ = writeln!(out, "  {:>2}. {}  [{}]", i + 1, s.word, s.score);
                }
                let _ = writeln!(out, "  {} suggestion(s), {elapsed}µs", suggestions.len());
            }
            Err(e) => {
                let _ = writeln!(out, "  error: {e}");
            }
        }
        let _ = out.flush();
    }
}

/// Returns false when the REPL should exit.
fn run_command(command: &str, loader: &Arc<ChunkLoader>) -> bool {
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("q" | "quit" | "exit") => return false,
        Some("stats") => {
            let stats = loader.stats();
            println!(
                "  words={} chunks={}/{} max_frequency={} loading={}",
                stats.total_words,
                stats.loaded_chunks,
                stats.available_chunks,
                stats.max_frequency,
                stats.is_loading
            );
            for (id, failure) in loader.failed_chunks() {
                println!(
                    "  chunk {id} failed after {} attempt(s): {}",
                    failure.attempts, failure.last_error
                );
            }
        }
        Some("size") => match parts.next().and_then(|n| n.parse::<usize>().ok()) {
            Some(n) => match loader.set_resident_chunk_count(n) {
                Ok(()) => println!("  resident chunks: {}", loader.stats().loaded_chunks),
                Err(e) => println!("  error: {e}"),
            },
            None => println!("  usage: :size <chunk-count>"),
        },
        Some("more") => match parts.next().and_then(|n| n.parse::<usize>().ok()) {
            Some(words) => {
                loader.request_more(words);
                println!("  queued background loads for ~{words} more words");
            }
            None => println!("  usage: :more <word-count>"),
        },
        Some("help") | None => {
            println!("  :stats          loader counters");
            println!("  :size <n>       resize the resident chunk set");
            println!("  :more <words>   queue background loads for more words");
            println!("  :quit           exit");
        }
        Some(other) => println!("  unknown command :{other} (try :help)"),
    }
    true
}
