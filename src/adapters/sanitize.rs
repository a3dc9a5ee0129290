//! Log sanitization for patient data and secrets.
//!
//! Library code logs counts, column names, request ids and labels, never
//! full records. This module is the fallback for everything else that ends
//! up in formatted log output:
//! - Lab value assignments (`TG=1.3`, `"HDL_log": 0.96`, `Gender: "M"`)
//! - E-mail addresses
//! - Bearer tokens and JWTs
//! - Contextual secrets, hex key material and PEM blocks
//!
//! Request ids are left intact so log lines can be joined with the audit
//! trail.
//!
//! # Performance / DoS
//!
//! `sanitize()` caps its input (see `GLYCORISK_SANITIZE_MAX_BYTES`) and
//! checks a single `RegexSet` before running any replacement.

use regex::{Regex, RegexSet};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::SANITIZE_MAX_BYTES_ENV;

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

/// Maximum number of bytes to sanitize per call (16 KiB).
const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

/// Attribute names whose values are patient data.
const LAB_FIELDS: &str = "AGE|Gender|Urea|Cr|Chol|TG|HDL|LDL|VLDL|BMI|HbA1c|glicose|creatinina|colesterol";

struct Pattern {
    regex: Regex,
    replacement: String,
}

struct Patterns {
    fast_set: RegexSet,
    fast_patterns: Vec<Pattern>,
    pem: Pattern,
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }

    let mut end = max_bytes.min(input.len());
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

fn max_sanitize_bytes() -> usize {
    std::env::var(SANITIZE_MAX_BYTES_ENV)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
}

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| {
        let lab_rule = format!(
            r#"\b({LAB_FIELDS})((?:_log)?)\b("?)\s*[:=]\s*(?:-?[0-9]+(?:\.[0-9]+)?(?:[eE][-+]?[0-9]+)?|"[^"\n]{{0,32}}")"#
        );
        let fast_rules: Vec<(String, &'static str)> = vec![
            (lab_rule, "${1}${2}${3}: [REDACTED-LAB]"),
            (
                r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b".into(),
                "[REDACTED-EMAIL]",
            ),
            (
                r"\beyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\b".into(),
                "[REDACTED-JWT]",
            ),
            (r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]{16,}=*".into(), "Bearer [REDACTED-TOKEN]"),
            (
                r"(?i)\b(?:api[_-]?key|access[_-]?token|secret|password|passwd|pwd|private[_-]?key|seed|signature|token)\b\s*[:=]\s*[A-Za-z0-9+/]{32,}={0,2}".into(),
                "[REDACTED-SECRET]",
            ),
            (r"\b[0-9a-fA-F]{64,}\b".into(), "[REDACTED-KEY]"),
        ];

        let pem = Pattern {
            regex: Regex::new(
                r"(?s)-----BEGIN [A-Z0-9 ]{0,40}PRIVATE KEY-----[\s\S]{0,8192}-----END [A-Z0-9 ]{0,40}PRIVATE KEY-----",
            )
            .expect("Valid regex"),
            replacement: "[REDACTED-PEM-PRIVATE-KEY]".into(),
        };

        let fast_set = RegexSet::new(fast_rules.iter().map(|(p, _)| p.as_str())).expect("Valid regex set");
        let fast_patterns = fast_rules
            .into_iter()
            .map(|(pattern, replacement)| Pattern {
                regex: Regex::new(&pattern).expect("Valid regex"),
                replacement: replacement.to_string(),
            })
            .collect();

        Patterns {
            fast_set,
            fast_patterns,
            pem,
        }
    })
}

/// Sanitize a string by replacing patient data and secrets.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, max_sanitize_bytes())
}

fn sanitize_with_limit(input: &str, max_bytes: usize) -> String {
    let patterns = patterns();
    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut result = prefix.to_string();
    for idx in patterns.fast_set.matches(prefix).into_iter() {
        let pattern = &patterns.fast_patterns[idx];
        result = pattern
            .regex
            .replace_all(&result, pattern.replacement.as_str())
            .into_owned();
    }

    if result.contains("-----BEGIN ") && patterns.pem.regex.is_match(&result) {
        result = patterns
            .pem
            .regex
            .replace_all(&result, patterns.pem.replacement.as_str())
            .into_owned();
    }

    if truncated {
        result.push_str(" [TRUNCATED]");
    }
    result
}

/// A `tracing_subscriber` writer wrapper that sanitizes formatted log
/// output line by line before it reaches the underlying sink.
#[derive(Debug)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<M: Clone> Clone for SanitizingMakeWriter<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub struct SanitizingWriter<W> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W: std::io::Write> SanitizingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    fn flush_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let sanitized = sanitize(&String::from_utf8_lossy(&line));
            self.inner.write_all(sanitized.as_bytes())?;
        }
        Ok(())
    }
}

impl<W: std::io::Write> std::io::Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        // A formatter writing one huge line must not buffer without bound.
        let hard_cap = max_sanitize_bytes().saturating_mul(2);
        if self.buffer.len() > hard_cap {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.inner.write_all(b"\n")?;
            self.buffer.clear();
            return Ok(buf.len());
        }

        self.flush_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_lines()?;
        if !self.buffer.is_empty() {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.buffer.clear();
        }
        self.inner.flush()
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter::new(self.inner.make_writer())
    }
}
