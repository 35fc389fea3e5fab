//! Line-oriented prompt abstraction for the user-mediated steps.
//!
//! Stream selection, bad-channel marking and component exclusion all block on
//! a [`Prompt`]. The console implementation reads stdin; the scripted one
//! replays a fixed list of answers, which is what tests and non-interactive
//! runs use.
use std::collections::VecDeque;
use std::io::{BufRead, Write};

use anyhow::Result;

pub trait Prompt {
    /// Ask `question`; `Ok(None)` means the input source is exhausted.
    fn ask(&mut self, question: &str) -> Result<Option<String>>;

    /// Informational output shown before a question (listings, status).
    fn say(&mut self, _line: &str) {}
}

/// stdin / stdout prompt.
#[derive(Debug, Default)]
pub struct ConsolePrompt;

impl Prompt for ConsolePrompt {
    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        let mut out = std::io::stdout().lock();
        write!(out, "{question} ")?;
        out.flush()?;
        let mut line = String::new();
        let n = std::io::stdin().lock().read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn say(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Replays canned answers; records everything shown for inspection.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    /// Questions asked and lines said, in order.
    pub transcript: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        self.transcript.push(question.to_string());
        Ok(self.answers.pop_front())
    }

    fn say(&mut self, line: &str) {
        self.transcript.push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_prompt_replays_then_closes() {
        let mut p = ScriptedPrompt::new(["1", ""]);
        assert_eq!(p.ask("a?").unwrap().as_deref(), Some("1"));
        assert_eq!(p.ask("b?").unwrap().as_deref(), Some(""));
        assert_eq!(p.ask("c?").unwrap(), None);
        assert_eq!(p.transcript, vec!["a?", "b?", "c?"]);
    }
}
