//! Human-in-the-loop input channels.
//!
//! A channel either answers a [`Question`] or reports it as pending; a pending
//! reply makes the control loop persist its state and return to the caller.

use std::cell::RefCell;
use std::io::{BufRead, Write};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a question is for; decides how the answer is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Accept the drafted plan or describe changes.
    PlanReview,
    /// Free-form answer requested by the `ask_user` tool.
    AskUser,
    /// Yes/no permission for web search during this run.
    SearchConsent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub kind: InputKind,
    pub prompt: String,
}

impl Question {
    pub fn new(kind: InputKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Answer(String),
    /// No answer yet; the run must suspend.
    Pending,
}

pub trait HumanChannel {
    fn ask(&self, question: &Question) -> Result<Reply>;
}

/// Blocks on a line from a reader (stdin in the binary).
pub struct ConsoleChannel<R, W> {
    input: RefCell<R>,
    output: RefCell<W>,
}

impl ConsoleChannel<std::io::StdinLock<'static>, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> ConsoleChannel<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
        }
    }
}

impl<R: BufRead, W: Write> HumanChannel for ConsoleChannel<R, W> {
    fn ask(&self, question: &Question) -> Result<Reply> {
        {
            let mut out = self.output.borrow_mut();
            writeln!(out, "\n{}", question.prompt.trim_end()).context("write question")?;
            write!(out, "> ").context("write prompt")?;
            out.flush().context("flush prompt")?;
        }
        let mut line = String::new();
        let n = self
            .input
            .borrow_mut()
            .read_line(&mut line)
            .context("read answer")?;
        if n == 0 {
            return Err(anyhow!("input closed while waiting for an answer"));
        }
        Ok(Reply::Answer(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Never answers; every question suspends the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredChannel;

impl HumanChannel for DeferredChannel {
    fn ask(&self, question: &Question) -> Result<Reply> {
        debug!(kind = ?question.kind, "deferring question");
        Ok(Reply::Pending)
    }
}

/// Hands out a stored answer once, then defers to `inner`.
///
/// Used on resume so the question that suspended the run receives the
/// answer supplied with `resume`.
pub struct PreloadedChannel<'a> {
    answer: RefCell<Option<String>>,
    inner: &'a dyn HumanChannel,
}

impl<'a> PreloadedChannel<'a> {
    pub fn new(answer: Option<String>, inner: &'a dyn HumanChannel) -> Self {
        Self {
            answer: RefCell::new(answer),
            inner,
        }
    }
}

impl HumanChannel for PreloadedChannel<'_> {
    fn ask(&self, question: &Question) -> Result<Reply> {
        if let Some(answer) = self.answer.borrow_mut().take() {
            debug!(kind = ?question.kind, "answering from resume input");
            return Ok(Reply::Answer(answer));
        }
        self.inner.ask(question)
    }
}

/// Interpret a yes/no answer. `None` means neither.
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_reads_one_line_per_question() {
        let input = b"yes\nadd tests please\n".as_slice();
        let channel = ConsoleChannel::new(input, Vec::new());
        let q = Question::new(InputKind::PlanReview, "Accept?");
        assert_eq!(channel.ask(&q).expect("ask"), Reply::Answer("yes".to_string()));
        assert_eq!(
            channel.ask(&q).expect("ask"),
            Reply::Answer("add tests please".to_string())
        );
        assert!(channel.ask(&q).is_err());
        let shown = String::from_utf8(channel.output.into_inner()).expect("utf8");
        assert!(shown.contains("Accept?"));
    }

    #[test]
    fn preloaded_answer_is_used_once() {
        let channel = PreloadedChannel::new(Some("blue".to_string()), &DeferredChannel);
        let q = Question::new(InputKind::AskUser, "Which colour?");
        assert_eq!(channel.ask(&q).expect("ask"), Reply::Answer("blue".to_string()));
        assert_eq!(channel.ask(&q).expect("ask"), Reply::Pending);
    }

    #[test]
    fn yes_no_parsing() {
        assert_eq!(parse_yes_no(" Yes "), Some(true));
        assert_eq!(parse_yes_no("n"), Some(false));
        assert_eq!(parse_yes_no("maybe"), None);
    }
}
