//! Streaming Buffer (§4.5).
//!
//! Rebuffers upstream provider text to preserve word and embedded-JSON
//! directive boundaries before the SSE Transport ever sees it. Pure CPU,
//! no I/O (§5) — structurally grounded on the teacher's
//! `server::ResponsesSseToChatSse`, which already demonstrates the idiom
//! this crate needs: a struct holding an internal buffer that incrementally
//! parses across arbitrary chunk boundaries via a pull-style `next_event`
//! loop. Here the loop is `Push`/`Flush` instead of `poll_next`, because
//! this component is synchronous and CPU-only rather than an async
//! `Stream` — but the "accumulate until a boundary is found, then drain"
//! shape is identical.
//!
//! Contract: the sequence of `outgoing[]` returned by `push`/`flush` calls,
//! concatenated, equals the concatenation of all `push` inputs exactly
//! (lossless). Boundary detection operates on Unicode scalar values, never
//! splitting a multi-byte sequence, because the buffer always accumulates
//! into a `String` (UTF-8 by construction) and only ever drains at
//! `char`-aligned byte offsets.

/// A complete, buffer-emitted output chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferedOutput {
    /// Plain text content, word- or phrase-complete.
    Content(String),
    /// A complete, balanced JSON directive object: `{"m":...,"p":...}`.
    Directive(String),
}

fn is_boundary_char(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t' | '\n' | '.' | '?' | '!' | ',' | ':' | ';'
    )
}

const DIRECTIVE_OPENER: &str = "{\"m\":";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Word,
    Directive,
}

/// Token-aware rebuffering state machine. One instance per stream.
pub struct StreamingBuffer {
    mode: Mode,
    /// Text accumulated in `Word` mode, not yet emitted (incomplete word
    /// or phrase still short of a boundary/ceiling).
    pending: String,
    /// Text accumulated in `Directive` mode since the opener was seen,
    /// including the opener itself.
    directive_buf: String,
    /// Running brace-balance count while in `Directive` mode.
    brace_depth: i64,
    in_string: bool,
    escape_next: bool,
    phrase_ceiling_bytes: usize,
    directive_scan_limit_bytes: usize,
}

impl StreamingBuffer {
    pub fn new() -> Self {
        Self::with_limits(256, 4096)
    }

    pub fn with_limits(phrase_ceiling_bytes: usize, directive_scan_limit_bytes: usize) -> Self {
        Self {
            mode: Mode::Word,
            pending: String::new(),
            directive_buf: String::new(),
            brace_depth: 0,
            in_string: false,
            escape_next: false,
            phrase_ceiling_bytes,
            directive_scan_limit_bytes,
        }
    }

    /// Feed more upstream text; returns zero or more chunks now safe to
    /// emit to the client.
    pub fn push(&mut self, text: &str) -> Vec<BufferedOutput> {
        let mut out = Vec::new();
        for c in text.chars() {
            self.push_char(c, &mut out);
        }
        out
    }

    /// Flush whatever is withheld, regardless of boundary state. An
    /// unterminated directive is emitted as-is (spec.md §4.5 edge case).
    pub fn flush(&mut self) -> Vec<BufferedOutput> {
        let mut out = Vec::new();
        match self.mode {
            Mode::Word => {
                if !self.pending.is_empty() {
                    out.push(BufferedOutput::Content(std::mem::take(&mut self.pending)));
                }
            }
            Mode::Directive => {
                if !self.directive_buf.is_empty() {
                    out.push(BufferedOutput::Directive(std::mem::take(
                        &mut self.directive_buf,
                    )));
                }
                self.reset_directive_state();
            }
        }
        out
    }

    fn reset_directive_state(&mut self) {
        self.mode = Mode::Word;
        self.brace_depth = 0;
        self.in_string = false;
        self.escape_next = false;
        self.directive_buf.clear();
    }

    fn push_char(&mut self, c: char, out: &mut Vec<BufferedOutput>) {
        match self.mode {
            Mode::Word => self.push_char_word(c, out),
            Mode::Directive => self.push_char_directive(c, out),
        }
    }

    fn push_char_word(&mut self, c: char, out: &mut Vec<BufferedOutput>) {
        self.pending.push(c);

        if self.pending.ends_with(DIRECTIVE_OPENER) {
            // Enter directive mode; move the opener (and anything before
            // it that is already boundary-complete) out of `pending`.
            let opener_start = self.pending.len() - DIRECTIVE_OPENER.len();
            let prefix = self.pending[..opener_start].to_string();
            if !prefix.is_empty() {
                out.push(BufferedOutput::Content(prefix));
            }
            self.directive_buf = self.pending[opener_start..].to_string();
            self.pending.clear();
            self.mode = Mode::Directive;
            self.brace_depth = 0;
            self.in_string = false;
            self.escape_next = false;
            for dc in self.directive_buf.clone().chars() {
                self.advance_brace_counter(dc);
            }
            return;
        }

        if is_boundary_char(c) || self.pending.len() >= self.phrase_ceiling_bytes {
            out.push(BufferedOutput::Content(std::mem::take(&mut self.pending)));
        }
    }

    fn push_char_directive(&mut self, c: char, out: &mut Vec<BufferedOutput>) {
        self.directive_buf.push(c);
        self.advance_brace_counter(c);

        if self.brace_depth == 0 {
            let complete = std::mem::take(&mut self.directive_buf);
            out.push(BufferedOutput::Directive(complete));
            self.reset_directive_state();
            return;
        }

        if self.directive_buf.len() > self.directive_scan_limit_bytes {
            // False positive: never closed within the scan limit. Exit
            // directive mode and flush the buffered text as plain content.
            let reclaimed = std::mem::take(&mut self.directive_buf);
            out.push(BufferedOutput::Content(reclaimed));
            self.reset_directive_state();
        }
    }

    fn advance_brace_counter(&mut self, c: char) {
        if self.escape_next {
            self.escape_next = false;
            return;
        }
        match c {
            '\\' if self.in_string => self.escape_next = true,
            '"' => self.in_string = !self.in_string,
            '{' if !self.in_string => self.brace_depth += 1,
            '}' if !self.in_string => self.brace_depth -= 1,
            _ => {}
        }
    }
}

impl Default for StreamingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Flattens a list of buffered outputs back into the raw text they
/// represent (used by the lossless round-trip tests and by the audit log).
pub fn concat_outputs(outputs: &[BufferedOutput]) -> String {
    outputs
        .iter()
        .map(|o| match o {
            BufferedOutput::Content(s) => s.as_str(),
            BufferedOutput::Directive(s) => s.as_str(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_all_at_once(input: &str) -> Vec<BufferedOutput> {
        let mut buf = StreamingBuffer::new();
        let mut out = buf.push(input);
        out.extend(buf.flush());
        out
    }

    fn run_char_by_char(input: &str) -> Vec<BufferedOutput> {
        let mut buf = StreamingBuffer::new();
        let mut out = Vec::new();
        for c in input.chars() {
            out.extend(buf.push(&c.to_string()));
        }
        out.extend(buf.flush());
        out
    }

    #[test]
    fn lossless_round_trip_simple_sentence() {
        let input = "Hello there, friend. How are you?";
        let out = run_all_at_once(input);
        assert_eq!(concat_outputs(&out), input);
    }

    #[test]
    fn single_space_is_one_content_event() {
        let mut buf = StreamingBuffer::new();
        let mut out = buf.push(" ");
        out.extend(buf.flush());
        assert_eq!(out, vec![BufferedOutput::Content(" ".to_string())]);
    }

    #[test]
    fn directive_split_across_many_chunks_is_one_event() {
        let chunks = [
            "I'll spawn a fairy! {\"m\":\"spawn",
            "_character\",\"p\":{\"type\":\"fairy\"}}",
        ];
        let mut buf = StreamingBuffer::new();
        let mut out = Vec::new();
        for c in chunks {
            out.extend(buf.push(c));
        }
        out.extend(buf.flush());

        assert_eq!(
            out,
            vec![
                BufferedOutput::Content("I'll spawn a fairy! ".to_string()),
                BufferedOutput::Directive(
                    "{\"m\":\"spawn_character\",\"p\":{\"type\":\"fairy\"}}".to_string()
                ),
            ]
        );

        for d in &out {
            if let BufferedOutput::Directive(s) = d {
                let v: serde_json::Value = serde_json::from_str(s).unwrap();
                assert!(v.get("m").and_then(|m| m.as_str()).is_some());
            }
        }
    }

    #[test]
    fn directive_spanning_many_single_character_pushes_is_one_event() {
        let directive = "{\"m\":\"noop\",\"p\":{}}";
        let mut buf = StreamingBuffer::new();
        let mut out = Vec::new();
        for c in directive.chars() {
            out.extend(buf.push(&c.to_string()));
        }
        out.extend(buf.flush());
        assert_eq!(out.len(), 1);
        match &out[0] {
            BufferedOutput::Directive(s) => assert_eq!(s, directive),
            other => panic!("expected directive, got {:?}", other),
        }
    }

    #[test]
    fn directive_with_braces_inside_string_literal() {
        let directive = "{\"m\":\"say\",\"p\":{\"text\":\"a { b } c\"}}";
        let mut buf = StreamingBuffer::new();
        let mut out = buf.push(directive);
        out.extend(buf.flush());
        assert_eq!(out, vec![BufferedOutput::Directive(directive.to_string())]);
    }

    #[test]
    fn directive_with_escaped_quote_in_string() {
        let directive = "{\"m\":\"say\",\"p\":{\"text\":\"she said \\\"hi\\\"\"}}";
        let mut buf = StreamingBuffer::new();
        let mut out = buf.push(directive);
        out.extend(buf.flush());
        assert_eq!(out, vec![BufferedOutput::Directive(directive.to_string())]);
    }

    #[test]
    fn false_positive_directive_opener_bounded_by_scan_limit() {
        let mut buf = StreamingBuffer::with_limits(256, 32);
        let opener = "{\"m\":";
        let long_tail = "x".repeat(64);
        let mut out = buf.push(opener);
        out.extend(buf.push(&long_tail));
        out.extend(buf.flush());

        let joined = concat_outputs(&out);
        assert_eq!(joined, format!("{opener}{long_tail}"));
        // Must not still be sitting in an unterminated Directive chunk at EOF.
        assert!(out
            .iter()
            .all(|o| matches!(o, BufferedOutput::Content(_))));
    }

    #[test]
    fn one_char_at_a_time_preserves_word_boundaries() {
        let input = "The quick brown fox.";
        let a = run_all_at_once(input);
        let b = run_char_by_char(input);
        assert_eq!(concat_outputs(&a), input);
        assert_eq!(concat_outputs(&b), input);
        // No content chunk should end mid-word (except the final flushed one).
        for (i, chunk) in b.iter().enumerate() {
            if let BufferedOutput::Content(s) = chunk {
                if i + 1 < b.len() {
                    let last = s.chars().last().unwrap();
                    assert!(is_boundary_char(last) || s.len() as usize >= 256);
                }
            }
        }
    }

    #[test]
    fn multibyte_unicode_never_split() {
        let input = "café naïve 😀 done.";
        let out = run_char_by_char(input);
        assert_eq!(concat_outputs(&out), input);
        for chunk in &out {
            if let BufferedOutput::Content(s) = chunk {
                assert!(std::str::from_utf8(s.as_bytes()).is_ok());
            }
        }
    }

    #[test]
    fn flush_without_boundary_emits_pending_word() {
        let mut buf = StreamingBuffer::new();
        let mut out = buf.push("partial");
        assert!(out.is_empty());
        out.extend(buf.flush());
        assert_eq!(out, vec![BufferedOutput::Content("partial".to_string())]);
    }

    #[test]
    fn phrase_batching_respects_size_ceiling() {
        let mut buf = StreamingBuffer::with_limits(8, 4096);
        let input = "abcdefghij"; // no boundary chars at all
        let mut out = buf.push(input);
        out.extend(buf.flush());
        assert_eq!(concat_outputs(&out), input);
        // First emitted chunk should have been cut at the ceiling, not at EOF only.
        assert!(out.len() >= 2);
    }
}
