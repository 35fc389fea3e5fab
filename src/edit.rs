//! Idempotent toggle sets and the edit-command protocol.
//!
//! ```text
//! show current set ─► ask ─┬─ ""            → Confirm, stop
//!                          ├─ "a" / "a, b"  → resolve each, toggle each
//!                          │                  (unknown item → warn, ask again)
//!                          └─ end of input  → PromptClosed
//! ```
//!
//! Toggling the same item twice restores the original set.
use std::collections::BTreeSet;
use std::fmt::Display;

use anyhow::Result;
use tracing::warn;

use crate::error::PipelineError;
use crate::interact::Prompt;

/// Ordered set where [`ToggleSet::toggle`] adds absent and removes present items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleSet<K: Ord> {
    items: BTreeSet<K>,
}

impl<K: Ord> Default for ToggleSet<K> {
    fn default() -> Self {
        Self { items: BTreeSet::new() }
    }
}

impl<K: Ord + Clone> ToggleSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of `item`. Returns `true` if it is now a member.
    pub fn toggle(&mut self, item: K) -> bool {
        if self.items.remove(&item) {
            false
        } else {
            self.items.insert(item);
            true
        }
    }

    pub fn insert(&mut self, item: K) {
        self.items.insert(item);
    }

    pub fn contains(&self, item: &K) -> bool {
        self.items.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.items.iter()
    }

    /// Sorted, unique members.
    pub fn to_vec(&self) -> Vec<K> {
        self.items.iter().cloned().collect()
    }
}

impl<K: Ord + Clone> FromIterator<K> for ToggleSet<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self { items: iter.into_iter().collect() }
    }
}

/// One parsed line of edit input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditCommand {
    Confirm,
    /// Raw tokens, comma or whitespace separated.
    Toggle(Vec<String>),
}

pub fn parse_command(line: &str) -> EditCommand {
    let tokens: Vec<String> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        EditCommand::Confirm
    } else {
        EditCommand::Toggle(tokens)
    }
}

/// Run the edit loop until the user confirms.
///
/// `resolve` maps a raw token to a set item; a recoverable
/// [`PipelineError`] from it is reported and the question is asked again with
/// the set unchanged. Any other error aborts.
pub fn run_edit_loop<K, P, F>(
    prompt: &mut P,
    set: &mut ToggleSet<K>,
    question: &str,
    mut resolve: F,
) -> Result<()>
where
    K: Ord + Clone + Display,
    P: Prompt + ?Sized,
    F: FnMut(&str) -> Result<K>,
{
    loop {
        let current: Vec<String> = set.iter().map(ToString::to_string).collect();
        prompt.say(&format!("current: [{}]", current.join(", ")));

        let Some(line) = prompt.ask(question)? else {
            return Err(PipelineError::PromptClosed(question.to_string()).into());
        };
        let tokens = match parse_command(&line) {
            EditCommand::Confirm => return Ok(()),
            EditCommand::Toggle(tokens) => tokens,
        };

        match tokens.iter().map(|t| resolve(t)).collect::<Result<Vec<K>>>() {
            Ok(items) => {
                for item in items {
                    set.toggle(item);
                }
            }
            Err(e) => match e.downcast_ref::<PipelineError>() {
                Some(pe) if pe.is_recoverable() => {
                    warn!("{pe}");
                    prompt.say(&pe.to_string());
                }
                _ => return Err(e),
            },
        }
    }
}
