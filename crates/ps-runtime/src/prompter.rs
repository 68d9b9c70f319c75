//! Operator interaction seam: ASK_USER answers and approval prompts.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{BufRead, Write};

use ps_core::{PsError, PsResult};

pub trait UserPrompter {
    /// Ask the operator a question, optionally with a fixed choice list,
    /// and return the typed answer.
    fn ask(&self, question: &str, choices: &[String]) -> PsResult<String>;

    /// Yes/no approval for a pending action.
    fn confirm(&self, summary: &str) -> PsResult<bool>;
}

/// Interactive prompter on the controlling terminal.
#[derive(Debug, Default)]
pub struct TtyPrompter;

impl UserPrompter for TtyPrompter {
    fn ask(&self, question: &str, choices: &[String]) -> PsResult<String> {
        let mut stdout = std::io::stdout().lock();
        if choices.is_empty() {
            writeln!(stdout, "[ps] {question}")
        } else {
            writeln!(stdout, "[ps] {question} ({})", choices.join(" / "))
        }
        .map_err(|err| PsError::Tool(format!("Failed to prompt operator: {err}")))?;
        stdout
            .flush()
            .map_err(|err| PsError::Tool(format!("Failed to prompt operator: {err}")))?;

        let mut answer = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut answer)
            .map_err(|err| PsError::Tool(format!("Failed to read operator answer: {err}")))?;
        Ok(answer.trim_end_matches(['\r', '\n']).to_string())
    }

    fn confirm(&self, summary: &str) -> PsResult<bool> {
        let answer = self.ask(&format!("approve {summary}? [y/N]"), &[])?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}

/// Canned answers for tests and headless runs.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: Vec<String>) -> Self {
        Self {
            answers: RefCell::new(answers.into()),
        }
    }
}

impl UserPrompter for ScriptedPrompter {
    fn ask(&self, question: &str, _choices: &[String]) -> PsResult<String> {
        self.answers.borrow_mut().pop_front().ok_or_else(|| {
            PsError::Tool(format!(
                "No scripted answer available for question: {question}"
            ))
        })
    }

    fn confirm(&self, summary: &str) -> PsResult<bool> {
        let answer = self.ask(summary, &[])?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}
