//! SQL-safe identifier derivation.
//!
//! Column labels from real-world files are free text ("Customer ID", "amount ($)", "1st name").
//! [`SqlNamer`] turns them into lower snake_case identifiers capped at [`MAX_NAME_LEN`]
//! characters and guarantees that every name it hands out is distinct.

use std::collections::HashSet;

/// Maximum identifier length produced by [`SqlNamer`].
pub const MAX_NAME_LEN: usize = 64;

/// Prefix applied to names that would otherwise start with a digit.
pub const DEFAULT_PREFIX: &str = "col";

/// Hands out unique SQL identifiers.
///
/// Names longer than [`MAX_NAME_LEN`] are truncated and always receive a zero-padded counter
/// suffix (`_001`, `_002`, ...). The counter is scoped to the namer, so two truncated names never
/// collide; an untruncated name that was already handed out gets the same treatment.
#[derive(Debug, Default)]
pub struct SqlNamer {
    used: HashSet<String>,
    counter: usize,
}

impl SqlNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a unique column name using the default `col` prefix.
    pub fn sql_name(&mut self, input: &str) -> String {
        self.sql_name_with_prefix(input, DEFAULT_PREFIX)
    }

    /// Derive a unique name, prefixing inputs that start with a digit by `prefix`.
    pub fn sql_name_with_prefix(&mut self, input: &str, prefix: &str) -> String {
        let base = base_name(input, prefix);

        let name = if base.len() > MAX_NAME_LEN || self.used.contains(&base) {
            self.suffixed(&base)
        } else {
            base
        };

        self.used.insert(name.clone());
        name
    }

    fn suffixed(&mut self, base: &str) -> String {
        loop {
            self.counter += 1;
            let suffix = format!("_{:03}", self.counter);
            let keep = MAX_NAME_LEN.saturating_sub(suffix.len()).min(base.len());
            let candidate = format!("{}{}", base[..keep].trim_end_matches('_'), suffix);
            if !self.used.contains(&candidate) {
                return candidate;
            }
        }
    }
}

fn base_name(input: &str, prefix: &str) -> String {
    let snake = snake_case(input);
    let starts_with_digit = snake.chars().next().is_some_and(|c| c.is_ascii_digit());

    if snake.is_empty() || starts_with_digit {
        let prefix = match snake_case(prefix) {
            p if p.is_empty() => DEFAULT_PREFIX.to_string(),
            p => p,
        };
        if snake.is_empty() {
            prefix
        } else {
            format!("{prefix}_{snake}")
        }
    } else {
        snake
    }
}

/// Lower snake_case of `input`.
///
/// Words are split on any non-alphanumeric character, on lower-to-upper case changes, and between
/// letters and digits: `"abcDEF"` → `"abc_def"`, `"abc1234def"` → `"abc_1234_def"`.
pub fn snake_case(input: &str) -> String {
    words(input).join("_")
}

/// lowerCamelCase of `input`: `"people_import"` → `"peopleImport"`.
pub fn camel_case(input: &str) -> String {
    let mut out = String::new();
    for (i, word) in words(input).into_iter().enumerate() {
        if i == 0 {
            out.push_str(&word);
            continue;
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

fn words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in input.chars() {
        if !c.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }

        if let Some(p) = prev {
            let boundary = (p.is_ascii_lowercase() && c.is_ascii_uppercase())
                || (p.is_ascii_alphabetic() && c.is_ascii_digit())
                || (p.is_ascii_digit() && c.is_ascii_alphabetic());
            if boundary && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }

        current.push(c.to_ascii_lowercase());
        prev = Some(c);
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}
