use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::MigrateError;

/// Operator interaction. The binary answers from the terminal; tests script
/// the answers.
pub trait Prompter: Send + Sync {
    fn confirm(&self, question: &str) -> Result<bool, MigrateError>;

    /// Read a secret without echoing it.
    fn password(&self, prompt: &str) -> Result<String, MigrateError>;

    /// Pick one of `options`; returns its index.
    fn choose(&self, question: &str, options: &[String]) -> Result<usize, MigrateError>;

    fn input(&self, prompt: &str) -> Result<String, MigrateError>;
}

/// Answers prompts from a fixed queue and remembers what was asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    asked:   Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked:   Mutex::new(Vec::new()),
        }
    }

    /// Every question asked so far, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn next(&self, question: &str) -> Result<String, MigrateError> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(question.to_string());
        }
        self.answers
            .lock()
            .map_err(|_| MigrateError::Prompt("answer queue poisoned".into()))?
            .pop_front()
            .ok_or_else(|| MigrateError::Prompt(format!("no scripted answer for: {}", question)))
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, question: &str) -> Result<bool, MigrateError> {
        let answer = self.next(question)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    fn password(&self, prompt: &str) -> Result<String, MigrateError> {
        self.next(prompt)
    }

    fn choose(&self, question: &str, options: &[String]) -> Result<usize, MigrateError> {
        let answer = self.next(question)?;
        parse_choice(&answer, options)
    }

    fn input(&self, prompt: &str) -> Result<String, MigrateError> {
        self.next(prompt)
    }
}

/// Ask `prompter` to pick one of `items`, shown through `label`.
pub fn choose_item<'a, T>(
    prompter: &dyn Prompter,
    question: &str,
    items: &'a [T],
    label: impl Fn(&T) -> String,
) -> Result<&'a T, MigrateError> {
    let labels: Vec<String> = items.iter().map(label).collect();
    let idx = prompter.choose(question, &labels)?;
    items
        .get(idx)
        .ok_or_else(|| MigrateError::Prompt(format!("choice {} is out of range for '{}'", idx + 1, question)))
}

/// Accept either a 1-based index or one of the option labels.
pub fn parse_choice(answer: &str, options: &[String]) -> Result<usize, MigrateError> {
    let answer = answer.trim();
    if let Ok(n) = answer.parse::<usize>() {
        if (1..=options.len()).contains(&n) {
            return Ok(n - 1);
        }
    }
    options
        .iter()
        .position(|o| o == answer)
        .ok_or_else(|| MigrateError::Prompt(format!("'{}' is not one of {:?}", answer, options)))
}
