use std::io::{self, BufRead, StdinLock, Stdout, Write};

use anyhow::{Context, Result};

use crate::record::Record;

/// Which pieces of feedback to ask for.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct FeedbackRequest {
    pub rating: bool,
    pub comments: bool,
}

impl FeedbackRequest {
    #[must_use]
    pub fn is_empty(self) -> bool {
        !self.rating && !self.comments
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Feedback {
    pub rating: Option<String>,
    pub comments: Option<String>,
}

/// Source of human feedback on a finished record.
///
/// Called at most once per top-level record, synchronously, before the record
/// is persisted. Implementations may block for as long as they need.
pub trait FeedbackCollector {
    #[allow(clippy::missing_errors_doc)]
    fn collect(&mut self, record: &Record, request: FeedbackRequest) -> Result<Feedback>;
}

/// Never asks anyone; every answer is absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipFeedback;

impl FeedbackCollector for SkipFeedback {
    fn collect(&mut self, _record: &Record, _request: FeedbackRequest) -> Result<Feedback> {
        Ok(Feedback::default())
    }
}

/// Line-oriented prompt: shows the response, then reads one line per
/// requested answer. There is no timeout.
#[derive(Debug)]
pub struct StdinFeedbackCollector<R, W> {
    input: R,
    output: W,
}

impl StdinFeedbackCollector<StdinLock<'static>, Stdout> {
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> StdinFeedbackCollector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }

    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;

        let mut answer = String::new();
        self.input
            .read_line(&mut answer)
            .context("failed reading feedback answer")?;
        let answer = answer.trim();
        if answer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(answer.to_string()))
        }
    }
}

impl<R: BufRead, W: Write> FeedbackCollector for StdinFeedbackCollector<R, W> {
    fn collect(&mut self, record: &Record, request: FeedbackRequest) -> Result<Feedback> {
        if request.is_empty() {
            return Ok(Feedback::default());
        }

        writeln!(self.output, "Response from llm:")?;
        writeln!(self.output, "{}", record.output)?;

        let rating = if request.rating {
            self.ask("Rate the response? ")?
        } else {
            None
        };
        let comments = if request.comments {
            self.ask("Please provide any comments on why you gave it that rating: ")?
        } else {
            None
        };

        Ok(Feedback { rating, comments })
    }
}
