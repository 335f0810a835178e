//! Prefix completion engine — the hot path.
//!
//! Turns a `(prefix, limit)` request into a ranked suggestion list in five
//! passes: validate, capture capitalization and fold to lowercase, traverse
//! the trie subtree with an over-collection budget, sort/truncate, and
//! reapply the user's capitalization. Scratch buffers live on the engine
//! value and are reused across calls on the same flow of execution.

use crate::trie::Trie;
use crate::Score;
use std::collections::HashSet;
use std::ops::ControlFlow;
use thiserror::Error;

/// Applied when a request carries no limit (or limit 0).
pub const DEFAULT_LIMIT: usize = 16;

/// Scratch capacity kept across [`Completer::trim_scratch`] calls.
const SCRATCH_KEEP: usize = 512;

// ---------------------------------------------------------------------------
// Options and errors
// ---------------------------------------------------------------------------

/// Engine tunables. The dispatcher swaps these at runtime on config reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Hard cap on a request's limit.
    pub max_limit: usize,
    pub min_prefix: usize,
    pub max_prefix: usize,
    /// Apply the input-validity filter before traversal.
    pub enable_filter: bool,
    pub min_frequency_threshold: Score,
    /// Raised threshold for prefixes of length ≤ 2 or single-byte repeats.
    pub min_frequency_short_prefix: Score,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            max_limit: 64,
            min_prefix: 1,
            max_prefix: 60,
            enable_filter: true,
            min_frequency_threshold: 20,
            min_frequency_short_prefix: 24,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompleteError {
    #[error("empty prefix")]
    EmptyPrefix,
    #[error("prefix shorter than {min} bytes")]
    PrefixTooShort { min: usize },
    #[error("prefix longer than {max} bytes")]
    PrefixTooLong { max: usize },
}

/// One ranked completion. `score` is the stored frequency score, not the
/// positional rank the wire protocol reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub word: String,
    pub score: Score,
}

// ---------------------------------------------------------------------------
// Input validity filter
// ---------------------------------------------------------------------------

/// Bytes allowed in a prefix besides letters and digits.
fn is_allowed_punct(b: u8) -> bool {
    matches!(b, b' ' | b'_' | b'-' | b'.' | b'/')
}

/// True when the prefix is worth traversing at all. Rejections here are not
/// errors: the engine answers with an empty suggestion list.
fn input_is_searchable(raw: &[u8]) -> bool {
    if raw.is_empty() {
        return false;
    }
    if raw.iter().all(u8::is_ascii_digit) {
        return false;
    }
    if !raw.iter().all(|&b| b.is_ascii_alphanumeric() || is_allowed_punct(b)) {
        return false;
    }
    // Mashed keys: "aaa", "////", ...
    if raw.len() >= 3 && raw.iter().all(|&b| b == raw[0]) {
        return false;
    }
    true
}

fn threshold_for(options: &EngineOptions, lower_prefix: &[u8]) -> Score {
    let repeated = !lower_prefix.is_empty() && lower_prefix.iter().all(|&b| b == lower_prefix[0]);
    if lower_prefix.len() <= 2 || repeated {
        options.min_frequency_short_prefix
    } else {
        options.min_frequency_threshold
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Reusable per-call buffers. Cleared at the start of each call; the
/// storage is reused across calls on the same flow.
#[derive(Default)]
struct Scratch {
    lower: Vec<u8>,
    caps: Vec<usize>,
    collected: Vec<(Vec<u8>, Score)>,
    seen: HashSet<Vec<u8>>,
}

pub struct Completer {
    options: EngineOptions,
    scratch: Scratch,
}

impl Completer {
    pub fn new(options: EngineOptions) -> Self {
        Completer { options, scratch: Scratch::default() }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Replace tunables (config reload).
    pub fn set_options(&mut self, options: EngineOptions) {
        self.options = options;
    }

    /// Cleanup hook: give back scratch storage grown by pathological calls.
    /// Called by the dispatcher between requests; must stay cheap.
    pub fn trim_scratch(&mut self) {
        let s = &mut self.scratch;
        s.collected.shrink_to(SCRATCH_KEEP);
        s.lower.shrink_to(SCRATCH_KEEP);
        s.caps.shrink_to(SCRATCH_KEEP);
        if s.seen.capacity() > SCRATCH_KEEP {
            s.seen = HashSet::with_capacity(SCRATCH_KEEP);
        }
    }

    /// Complete `prefix` against `trie`, returning at most `limit` ranked
    /// suggestions. `limit` 0 means the server default.
    pub fn complete(
        &mut self,
        trie: &Trie,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<Suggestion>, CompleteError> {
        let limit = self.check_request(prefix, limit)?;
        let raw = prefix.as_bytes();
        if self.options.enable_filter && !input_is_searchable(raw) {
            return Ok(Vec::new());
        }

        let Scratch { lower, caps, collected, seen } = &mut self.scratch;
        capture_capitalization(raw, lower, caps);
        let lower: &[u8] = lower;
        let caps: &[usize] = caps;
        let threshold = threshold_for(&self.options, lower);

        // Candidate pool with headroom beyond the limit. The walk covers the
        // whole matched subtree; once the pool is full, each new qualifying
        // word displaces the lowest-scored entry instead of being dropped,
        // so the top-ranked words survive regardless of traversal order.
        let target = limit + limit / 2;
        collected.clear();
        seen.clear();
        trie.visit_subtree(lower, |word, score| {
            if word == lower || score < threshold {
                return ControlFlow::Continue(());
            }
            if !seen.insert(word.to_vec()) {
                return ControlFlow::Continue(());
            }
            if collected.len() < target {
                collected.push((word.to_vec(), score));
            } else if let Some((pos, weakest)) =
                collected.iter().enumerate().min_by_key(|(_, (_, s))| *s)
            {
                if score > weakest.1 {
                    collected[pos] = (word.to_vec(), score);
                }
            }
            ControlFlow::Continue(())
        });

        tracing::trace!(collected = collected.len(), pool = target, threshold, "Subtree traversal done");

        // Score descending; ties break lexicographically so responses are a
        // deterministic function of the dictionary state.
        collected.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        collected.truncate(limit);

        Ok(collected
            .drain(..)
            .map(|(word, score)| Suggestion { word: recapitalize(&word, caps), score })
            .collect())
    }

    /// Streaming variant: feed `(word, score)` pairs to `consumer` in
    /// traversal order, stopping at `limit` emissions or when the consumer
    /// breaks. Shares validation, filtering, and thresholding with
    /// [`complete`](Self::complete); the caller owns any ordering.
    pub fn complete_with<F>(
        &mut self,
        trie: &Trie,
        prefix: &str,
        limit: usize,
        mut consumer: F,
    ) -> Result<usize, CompleteError>
    where
        F: FnMut(&str, Score) -> ControlFlow<()>,
    {
        let limit = self.check_request(prefix, limit)?;
        let raw = prefix.as_bytes();
        if self.options.enable_filter && !input_is_searchable(raw) {
            return Ok(0);
        }

        let Scratch { lower, caps, seen, .. } = &mut self.scratch;
        capture_capitalization(raw, lower, caps);
        let lower: &[u8] = lower;
        let caps: &[usize] = caps;
        let threshold = threshold_for(&self.options, lower);

        seen.clear();
        let mut emitted = 0usize;
        trie.visit_subtree(lower, |word, score| {
            if emitted >= limit {
                return ControlFlow::Break(());
            }
            if word == lower || score < threshold {
                return ControlFlow::Continue(());
            }
            if !seen.insert(word.to_vec()) {
                return ControlFlow::Continue(());
            }
            emitted += 1;
            consumer(&recapitalize(word, caps), score)
        });
        Ok(emitted)
    }

    /// Shared pre-traversal rejection; returns the effective limit.
    fn check_request(&self, prefix: &str, limit: usize) -> Result<usize, CompleteError> {
        let len = prefix.len();
        if len == 0 {
            return Err(CompleteError::EmptyPrefix);
        }
        if len < self.options.min_prefix {
            return Err(CompleteError::PrefixTooShort { min: self.options.min_prefix });
        }
        if len > self.options.max_prefix {
            return Err(CompleteError::PrefixTooLong { max: self.options.max_prefix });
        }
        let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
        Ok(limit.min(self.options.max_limit))
    }
}

// ---------------------------------------------------------------------------
// Capitalization
// ---------------------------------------------------------------------------

/// Record the byte positions that are uppercase ASCII and build the folded
/// lowercase prefix. Non-ASCII bytes pass through unchanged.
fn capture_capitalization(raw: &[u8], lower: &mut Vec<u8>, caps: &mut Vec<usize>) {
    lower.clear();
    caps.clear();
    for (i, &b) in raw.iter().enumerate() {
        if b.is_ascii_uppercase() {
            caps.push(i);
            lower.push(b.to_ascii_lowercase());
        } else {
            lower.push(b);
        }
    }
}

/// Raise the stored lowercase word at each captured position. Positions past
/// the word's end are ignored; bytes outside `a..z` are left alone.
fn recapitalize(word: &[u8], caps: &[usize]) -> String {
    let text = String::from_utf8_lossy(word);
    if caps.is_empty() {
        return text.into_owned();
    }
    text.char_indices()
        .map(|(i, c)| if caps.binary_search(&i).is_ok() { c.to_ascii_uppercase() } else { c })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::score_from_rank;

    /// Trie from `(word, stored rank)` pairs, the way the loader builds it.
    fn trie_from_ranks(items: &[(&str, u16)]) -> Trie {
        let mut trie = Trie::new();
        for (word, rank) in items {
            trie.insert(word.as_bytes(), score_from_rank(*rank));
        }
        trie
    }

    fn words(suggestions: &[Suggestion]) -> Vec<&str> {
        suggestions.iter().map(|s| s.word.as_str()).collect()
    }

    const HEL: &[(&str, u16)] = &[("hello", 5), ("help", 2), ("helm", 1200)];

    #[test]
    fn ranks_by_frequency_descending() {
        let trie = trie_from_ranks(HEL);
        let mut c = Completer::new(EngineOptions::default());
        let got = c.complete(&trie, "hel", 10).unwrap();
        assert_eq!(words(&got), ["help", "hello", "helm"]);
        assert_eq!(got[0].score, 65534);
        assert_eq!(got[1].score, 65531);
        assert_eq!(got[2].score, 64336);
    }

    #[test]
    fn limit_truncates_after_ranking() {
        let trie = trie_from_ranks(HEL);
        let mut c = Completer::new(EngineOptions::default());
        let got = c.complete(&trie, "hel", 1).unwrap();
        assert_eq!(words(&got), ["help"]);
    }

    #[test]
    fn small_limit_keeps_the_globally_top_scored_words() {
        // Traversal visits mead..meta in lexical order while the two best
        // scores sit on the lexically last words; the candidate pool must
        // displace weaker entries rather than stop early.
        let trie = trie_from_ranks(&[
            ("mead", 500),
            ("meal", 400),
            ("mean", 300),
            ("meat", 2),
            ("meta", 1),
        ]);
        let mut c = Completer::new(EngineOptions::default());
        let got = c.complete(&trie, "me", 2).unwrap();
        assert_eq!(words(&got), ["meta", "meat"]);
    }

    #[test]
    fn preserves_request_capitalization() {
        let trie = trie_from_ranks(HEL);
        let mut c = Completer::new(EngineOptions::default());
        let got = c.complete(&trie, "Hel", 10).unwrap();
        assert_eq!(words(&got), ["Help", "Hello", "Helm"]);

        let got = c.complete(&trie, "hEL", 10).unwrap();
        assert_eq!(words(&got), ["hELp", "hELlo", "hELm"]);
    }

    #[test]
    fn recapitalize_ignores_positions_past_word_end() {
        assert_eq!(recapitalize(b"ab", &[0, 5]), "Ab");
        // Non-letter bytes at a captured position pass through unchanged
        assert_eq!(recapitalize(b"a-b", &[1]), "a-b");
    }

    #[test]
    fn empty_prefix_is_an_error() {
        let trie = trie_from_ranks(HEL);
        let mut c = Completer::new(EngineOptions::default());
        assert_eq!(c.complete(&trie, "", 5).unwrap_err(), CompleteError::EmptyPrefix);
    }

    #[test]
    fn over_long_prefix_is_an_error() {
        let trie = trie_from_ranks(HEL);
        let mut c = Completer::new(EngineOptions::default());
        let long = "h".repeat(61);
        assert_eq!(
            c.complete(&trie, &long, 5).unwrap_err(),
            CompleteError::PrefixTooLong { max: 60 }
        );
    }

    #[test]
    fn repetitive_prefix_filters_to_empty_success() {
        // "aaa" has real continuations in the dictionary, but the filter
        // rejects mashed-key input before traversal.
        let trie = trie_from_ranks(&[("aaab", 65506), ("aaabc", 65526)]);
        let mut c = Completer::new(EngineOptions::default());
        let got = c.complete(&trie, "aaa", 5).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn filter_rejects_digits_and_symbols_as_empty() {
        let trie = trie_from_ranks(HEL);
        let mut c = Completer::new(EngineOptions::default());
        assert!(c.complete(&trie, "1234", 5).unwrap().is_empty());
        assert!(c.complete(&trie, "he;l", 5).unwrap().is_empty());
    }

    #[test]
    fn filter_allows_word_punctuation() {
        let trie = trie_from_ranks(&[("foo_bar", 1), ("foo_baz", 2)]);
        let mut c = Completer::new(EngineOptions::default());
        assert_eq!(words(&c.complete(&trie, "foo_", 10).unwrap()), ["foo_bar", "foo_baz"]);
    }

    #[test]
    fn disabled_filter_searches_anything() {
        let mut trie = Trie::new();
        trie.insert(b"aaab", 30);
        let options = EngineOptions { enable_filter: false, ..EngineOptions::default() };
        let mut c = Completer::new(options);
        // Repeated-byte prefix uses the short-prefix threshold (24): the
        // score-30 word survives.
        assert_eq!(words(&c.complete(&trie, "aaa", 5).unwrap()), ["aaab"]);
    }

    #[test]
    fn short_prefix_uses_raised_threshold() {
        let mut trie = Trie::new();
        trie.insert(b"ab", 23); // below short-prefix threshold of 24
        trie.insert(b"abc", 24);
        let mut c = Completer::new(EngineOptions::default());
        assert_eq!(words(&c.complete(&trie, "a", 10).unwrap()), ["abc"]);
        // A three-byte prefix drops back to the base threshold of 20.
        trie.insert(b"abcd", 21);
        assert_eq!(words(&c.complete(&trie, "abc", 10).unwrap()), ["abcd"]);
    }

    #[test]
    fn never_suggests_the_prefix_itself() {
        let trie = trie_from_ranks(&[("hel", 1), ("hello", 2)]);
        let mut c = Completer::new(EngineOptions::default());
        assert_eq!(words(&c.complete(&trie, "hel", 10).unwrap()), ["hello"]);
        // Capitalized request still excludes it: comparison is on the fold.
        assert_eq!(words(&c.complete(&trie, "HEL", 10).unwrap()), ["HELlo"]);
    }

    #[test]
    fn every_suggestion_extends_the_prefix() {
        let trie = trie_from_ranks(&[
            ("car", 10),
            ("cart", 20),
            ("carbon", 30),
            ("cat", 40),
            ("dog", 50),
        ]);
        let mut c = Completer::new(EngineOptions::default());
        let got = c.complete(&trie, "car", 10).unwrap();
        assert!(!got.is_empty());
        for s in &got {
            assert!(s.word.starts_with("car"), "{} does not extend 'car'", s.word);
        }
    }

    #[test]
    fn suggestions_are_distinct() {
        let trie = trie_from_ranks(&[("abc", 1), ("abd", 2), ("abe", 3)]);
        let mut c = Completer::new(EngineOptions::default());
        let got = c.complete(&trie, "ab", 10).unwrap();
        let mut seen: Vec<&str> = words(&got);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), got.len());
    }

    #[test]
    fn equal_scores_tie_break_lexicographically() {
        let mut trie = Trie::new();
        trie.insert(b"zeta", 100);
        trie.insert(b"zebra", 100);
        trie.insert(b"zen", 100);
        let mut c = Completer::new(EngineOptions::default());
        assert_eq!(words(&c.complete(&trie, "ze", 10).unwrap()), ["zebra", "zen", "zeta"]);
    }

    #[test]
    fn zero_limit_applies_server_default() {
        let mut trie = Trie::new();
        for i in 0..40u16 {
            trie.insert(format!("word{i:02}").as_bytes(), score_from_rank(i + 1));
        }
        let mut c = Completer::new(EngineOptions::default());
        let got = c.complete(&trie, "word", 0).unwrap();
        assert_eq!(got.len(), DEFAULT_LIMIT);
    }

    #[test]
    fn limit_is_capped_at_max_limit() {
        let mut trie = Trie::new();
        for i in 0..200u16 {
            trie.insert(format!("word{i:03}").as_bytes(), score_from_rank(i + 1));
        }
        let mut c = Completer::new(EngineOptions::default());
        let got = c.complete(&trie, "word", 1000).unwrap();
        assert_eq!(got.len(), 64);
    }

    #[test]
    fn callback_variant_stops_on_break() {
        let mut trie = Trie::new();
        for i in 0..50u16 {
            trie.insert(format!("word{i:02}").as_bytes(), score_from_rank(i + 1));
        }
        let mut c = Completer::new(EngineOptions::default());
        let mut streamed = Vec::new();
        let emitted = c
            .complete_with(&trie, "word", 20, |word, _| {
                streamed.push(word.to_string());
                if streamed.len() == 3 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
            })
            .unwrap();
        assert_eq!(emitted, 3);
        assert_eq!(streamed.len(), 3);
        for w in &streamed {
            assert!(w.starts_with("word"));
        }
    }

    #[test]
    fn callback_variant_honors_limit() {
        let mut trie = Trie::new();
        for i in 0..50u16 {
            trie.insert(format!("word{i:02}").as_bytes(), score_from_rank(i + 1));
        }
        let mut c = Completer::new(EngineOptions::default());
        let mut n = 0;
        let emitted = c
            .complete_with(&trie, "word", 7, |_, _| {
                n += 1;
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(emitted, 7);
        assert_eq!(n, 7);
    }

    #[test]
    fn trim_scratch_keeps_the_engine_usable() {
        let trie = trie_from_ranks(HEL);
        let mut c = Completer::new(EngineOptions::default());
        c.complete(&trie, "hel", 10).unwrap();
        c.trim_scratch();
        assert_eq!(words(&c.complete(&trie, "hel", 10).unwrap()), ["help", "hello", "helm"]);
    }
}
