//! Interactive prompt handling.

use anyhow::Result;

/// Trait for interactive terminal prompts.
pub trait Prompter: Send + Sync + std::fmt::Debug {
    /// Present a list of options and return the selected index.
    fn select(&self, prompt: &str, default: Option<usize>, options: &[String]) -> Result<usize>;

    /// Prompt for free-text input.
    fn input(&self, prompt: &str, default: &str) -> Result<String>;

    /// Prompt for password input (hidden).
    fn password(&self, prompt: &str) -> Result<String>;

    /// Prompt for yes/no confirmation.
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;
}

/// Dialoguer-based prompter implementation.
#[derive(Debug, Default)]
pub struct DialoguerPrompter;

impl DialoguerPrompter {
    /// Create a new prompter.
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for DialoguerPrompter {
    fn select(&self, prompt: &str, default: Option<usize>, options: &[String]) -> Result<usize> {
        let mut sel = dialoguer::Select::new().with_prompt(prompt).items(options);
        if let Some(d) = default {
            sel = sel.default(d);
        }
        Ok(sel.interact()?)
    }

    fn input(&self, prompt: &str, default: &str) -> Result<String> {
        let mut input = dialoguer::Input::new()
            .with_prompt(prompt)
            .allow_empty(true);
        if !default.is_empty() {
            input = input.default(default.to_string());
        }
        Ok(input.interact_text()?)
    }

    fn password(&self, prompt: &str) -> Result<String> {
        Ok(dialoguer::Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()?)
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        Ok(dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }
}

/// Stub prompter for testing that returns pre-configured answers.
///
/// Every prompt is recorded in `prompts` so tests can assert on what the
/// user would have seen.
#[derive(Debug, Default)]
pub struct StubPrompter {
    /// Pre-configured select answers (index).
    pub select_answers: std::sync::Mutex<Vec<usize>>,
    /// Pre-configured input answers.
    pub input_answers: std::sync::Mutex<Vec<String>>,
    /// Pre-configured password answers.
    pub password_answers: std::sync::Mutex<Vec<String>>,
    /// Pre-configured confirm answers.
    pub confirm_answers: std::sync::Mutex<Vec<bool>>,
    /// Prompts shown so far.
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl StubPrompter {
    fn record(&self, prompt: &str) {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(prompt.to_string());
    }

    /// Prompts shown so far.
    pub fn seen(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Prompter for StubPrompter {
    fn select(&self, prompt: &str, default: Option<usize>, _options: &[String]) -> Result<usize> {
        self.record(prompt);
        let mut answers = self
            .select_answers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if answers.is_empty() {
            Ok(default.unwrap_or(0))
        } else {
            Ok(answers.remove(0))
        }
    }

    fn input(&self, prompt: &str, default: &str) -> Result<String> {
        self.record(prompt);
        let mut answers = self
            .input_answers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if answers.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answers.remove(0))
        }
    }

    fn password(&self, prompt: &str) -> Result<String> {
        self.record(prompt);
        let mut answers = self
            .password_answers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if answers.is_empty() {
            anyhow::bail!("no password answer configured for {prompt:?}")
        }
        Ok(answers.remove(0))
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        self.record(prompt);
        let mut answers = self
            .confirm_answers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if answers.is_empty() {
            Ok(default)
        } else {
            Ok(answers.remove(0))
        }
    }
}
