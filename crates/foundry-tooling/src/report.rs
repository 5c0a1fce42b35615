//! Test-runner output parsing.
//!
//! Each supported runner format lives behind [`TestReportParser`]; the
//! pipeline only ever sees the parsed [`TestResults`].

use foundry_core::TestResults;
use regex::Regex;
use std::sync::LazyLock;

/// Parses a test runner's textual output into counts.
pub trait TestReportParser: Send + Sync {
    /// Runner family this parser understands.
    fn name(&self) -> &'static str;

    /// Extract a summary, or `None` when the output is not in this format.
    fn parse(&self, output: &str) -> Option<TestResults>;
}

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"\x1b\[[0-9;]*[A-Za-z]") {
    Ok(regex) => regex,
    Err(err) => panic!("Invalid ANSI escape regex: {err}"),
});

static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"(?m)^\s*Tests:?\s+(.+)$") {
    Ok(regex) => regex,
    Err(err) => panic!("Invalid summary regex: {err}"),
});

static SUMMARY_COUNT: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"(\d+)\s+(passed|failed|skipped|pending|todo)") {
        Ok(regex) => regex,
        Err(err) => panic!("Invalid count regex: {err}"),
    });

static SUMMARY_TIME: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"(?m)^\s*(?:Time:|Duration)\s+([0-9.]+)\s*(ms|s)\b") {
        Ok(regex) => regex,
        Err(err) => panic!("Invalid duration regex: {err}"),
    });

static LIBTEST_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(
        r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored;[^\n]*?(?:finished in ([0-9.]+)s)?\s*$",
    ) {
        Ok(regex) => regex,
        Err(err) => panic!("Invalid libtest regex: {err}"),
    }
});

fn strip_ansi(output: &str) -> String {
    ANSI_ESCAPE.replace_all(output, "").into_owned()
}

/// Counts are all digits, so a parse failure means the value overflowed.
fn parse_count(text: &str) -> u32 {
    text.parse().unwrap_or(u32::MAX)
}

fn to_millis(value: &str, unit: &str) -> u64 {
    let amount: f64 = value.parse().unwrap_or(0.0);
    if unit == "ms" {
        amount.round() as u64
    } else {
        (amount * 1000.0).round() as u64
    }
}

/// Jest and Vitest summaries (`Tests: 1 failed, 4 passed, 5 total` and
/// `Tests  1 failed | 4 passed (5)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JestReportParser;

impl TestReportParser for JestReportParser {
    fn name(&self) -> &'static str {
        "jest"
    }

    fn parse(&self, output: &str) -> Option<TestResults> {
        let clean = strip_ansi(output);
        let line = SUMMARY_LINE.captures_iter(&clean).last()?.get(1)?.as_str().to_owned();

        let mut results = TestResults::default();
        let mut matched = false;
        for captures in SUMMARY_COUNT.captures_iter(&line) {
            let count = parse_count(&captures[1]);
            match &captures[2] {
                "passed" => results.passed = results.passed.saturating_add(count),
                "failed" => results.failed = results.failed.saturating_add(count),
                _ => results.skipped = results.skipped.saturating_add(count),
            }
            matched = true;
        }
        if !matched {
            return None;
        }

        if let Some(time) = SUMMARY_TIME.captures_iter(&clean).last() {
            results.duration_ms = to_millis(&time[1], &time[2]);
        }
        Some(results)
    }
}

/// Rust libtest summaries, summed across every `test result:` line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibtestReportParser;

impl TestReportParser for LibtestReportParser {
    fn name(&self) -> &'static str {
        "libtest"
    }

    fn parse(&self, output: &str) -> Option<TestResults> {
        let clean = strip_ansi(output);
        let mut results: Option<TestResults> = None;
        for line in clean.lines() {
            let Some(captures) = LIBTEST_RESULT.captures(line) else {
                continue;
            };
            let summary = results.get_or_insert_with(TestResults::default);
            summary.passed = summary.passed.saturating_add(parse_count(&captures[1]));
            summary.failed = summary.failed.saturating_add(parse_count(&captures[2]));
            summary.skipped = summary.skipped.saturating_add(parse_count(&captures[3]));
            if let Some(seconds) = captures.get(4) {
                summary.duration_ms = summary
                    .duration_ms
                    .saturating_add(to_millis(seconds.as_str(), "s"));
            }
        }
        results
    }
}

/// Tries a list of parsers in order and returns the first match.
pub struct ChainedReportParser {
    parsers: Vec<Box<dyn TestReportParser>>,
}

impl ChainedReportParser {
    /// Chain the given parsers.
    pub fn new(parsers: Vec<Box<dyn TestReportParser>>) -> Self {
        Self { parsers }
    }
}

impl Default for ChainedReportParser {
    fn default() -> Self {
        Self::new(vec![Box::new(JestReportParser), Box::new(LibtestReportParser)])
    }
}

impl TestReportParser for ChainedReportParser {
    fn name(&self) -> &'static str {
        "chained"
    }

    fn parse(&self, output: &str) -> Option<TestResults> {
        self.parsers.iter().find_map(|parser| {
            let parsed = parser.parse(output);
            if parsed.is_some() {
                tracing::debug!(parser = parser.name(), "parsed test report");
            }
            parsed
        })
    }
}
