//! SX-018: Operator confirmation before a change set is executed.

use regex::Regex;
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::LazyLock;

static AFFIRMATIVE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*y(es)?\s*$").ok());

/// Only `y` or `yes` (any case, surrounding whitespace ignored) proceeds.
pub fn is_affirmative(answer: &str) -> bool {
    AFFIRMATIVE.as_ref().is_some_and(|re| re.is_match(answer))
}

/// Asks the operator a question and returns the raw answer.
pub trait Confirmer {
    fn ask(&mut self, prompt: &str) -> std::io::Result<String>;
}

/// Prompts on stdout and reads one line from stdin.
#[derive(Debug, Default)]
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn ask(&mut self, prompt: &str) -> std::io::Result<String> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{} ", prompt)?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    }
}

/// Replays canned answers in order; an exhausted script answers "n".
#[derive(Debug, Default)]
pub struct ScriptedConfirmer {
    answers: VecDeque<String>,
    pub prompts: Vec<String>,
}

impl ScriptedConfirmer {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
        }
    }
}

impl Confirmer for ScriptedConfirmer {
    fn ask(&mut self, prompt: &str) -> std::io::Result<String> {
        self.prompts.push(prompt.to_string());
        Ok(self.answers.pop_front().unwrap_or_else(|| "n".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sx018_affirmative_answers() {
        for yes in ["y", "Y", "yes", "YES", "Yes", " y\n", "yes\r\n"] {
            assert!(is_affirmative(yes), "{:?} should proceed", yes);
        }
    }

    #[test]
    fn test_sx018_everything_else_declines() {
        for no in ["", "n", "no", "ye", "yess", "y y", "sure", "yes please", "\n"] {
            assert!(!is_affirmative(no), "{:?} should cancel", no);
        }
    }

    #[test]
    fn test_sx018_scripted_replay() {
        let mut c = ScriptedConfirmer::new(["yes", "no"]);
        assert_eq!(c.ask("first?").unwrap(), "yes");
        assert_eq!(c.ask("second?").unwrap(), "no");
        assert_eq!(c.ask("third?").unwrap(), "n");
        assert_eq!(c.prompts, vec!["first?", "second?", "third?"]);
    }
}
