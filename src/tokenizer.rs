// src/tokenizer.rs
//
// Text to (tokens, labels) for the tokenize stage.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::info;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::data_loader::dataset::DatasetError;

/// Anything that can turn a transcript into tokens and integer labels.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> (Vec<String>, Vec<i64>);
}

/// Bracketed non-linguistic symbols: `[noise]`, `<unk>`, `{laugh}`.
static NON_LANG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\[[^\[\]]+\]|<[^<>]+>|\{[^{}]+\})").expect("non-lang symbol pattern is a valid regex")
});

fn read_lines(path: &Path) -> Result<Vec<String>, DatasetError> {
    let text = std::fs::read_to_string(path).map_err(|e| DatasetError::io(path.display().to_string(), e))?;
    Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
}

/// Read a `token id` per line symbol table.
pub fn read_symbol_table(path: impl AsRef<Path>) -> Result<HashMap<String, i64>, DatasetError> {
    let path = path.as_ref();
    let mut table = HashMap::new();
    for line in read_lines(path)? {
        let mut parts = line.split_whitespace();
        let (Some(token), Some(id), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("{}: malformed symbol table line `{line}`", path.display()).into());
        };
        let id: i64 = id
            .parse()
            .map_err(|e| format!("{}: bad id in `{line}`: {e}", path.display()))?;
        table.insert(token.to_string(), id);
    }
    info!("read {} symbols from {}", table.len(), path.display());
    Ok(table)
}

/// Read the non-linguistic symbol list, one symbol per line.
pub fn read_non_lang_symbols(path: impl AsRef<Path>) -> Result<Vec<String>, DatasetError> {
    let path = path.as_ref();
    let syms = read_lines(path)?;
    if let Some(bad) = syms.iter().find(|s| !NON_LANG_PATTERN.is_match(s)) {
        return Err(format!(
            "{}: non-linguistic symbol `{bad}` must look like [xx], <xx> or {{xx}}",
            path.display()
        )
        .into());
    }
    Ok(syms)
}

/// Character-level tokenizer over a fixed symbol table.
#[derive(Debug, Clone)]
pub struct CharTokenizer {
    symbol_table: HashMap<String, i64>,
    non_lang_syms: HashSet<String>,
    split_with_space: bool,
    unk: String,
}

impl CharTokenizer {
    pub fn new(symbol_table: HashMap<String, i64>) -> Self {
        Self {
            symbol_table,
            non_lang_syms: HashSet::new(),
            split_with_space: false,
            unk: "<unk>".to_string(),
        }
    }

    pub fn from_files(
        symbol_table: impl AsRef<Path>,
        non_lang_syms: Option<&Path>,
    ) -> Result<Self, DatasetError> {
        let mut tok = Self::new(read_symbol_table(symbol_table)?);
        if let Some(p) = non_lang_syms {
            tok = tok.non_lang_syms(read_non_lang_symbols(p)?);
        }
        Ok(tok)
    }

    pub fn non_lang_syms(mut self, syms: impl IntoIterator<Item = String>) -> Self {
        self.non_lang_syms = syms.into_iter().collect();
        self
    }

    /// Split on single spaces (word-level units) instead of characters.
    pub fn split_with_space(mut self, yes: bool) -> Self {
        self.split_with_space = yes;
        self
    }

    pub fn unk(mut self, unk: impl Into<String>) -> Self {
        self.unk = unk.into();
        self
    }

    /// Split `line` into bracketed symbol spans and plain text spans.
    ///
    /// Spans that are only whitespace are dropped.
    fn parts(line: &str) -> Vec<&str> {
        let mut parts = Vec::new();
        let mut last = 0;
        for m in NON_LANG_PATTERN.find_iter(line) {
            parts.push(&line[last..m.start()]);
            parts.push(m.as_str());
            last = m.end();
        }
        parts.push(&line[last..]);
        parts.retain(|p| !p.trim().is_empty());
        parts
    }

    pub fn text2tokens(&self, line: &str) -> Vec<String> {
        let line = line.trim();
        let upper;
        let parts = if self.non_lang_syms.is_empty() {
            vec![line]
        } else {
            upper = line.to_uppercase();
            Self::parts(&upper)
        };

        let mut tokens = Vec::new();
        for part in parts {
            if self.non_lang_syms.contains(part) {
                tokens.push(part.to_string());
            } else if self.split_with_space {
                tokens.extend(part.split(' ').map(str::to_string));
            } else {
                tokens.extend(part.chars().map(|c| if c == ' ' { "▁".to_string() } else { c.to_string() }));
            }
        }
        tokens
    }

    /// Map tokens to ids; unknown tokens become `unk` when it is in the table.
    pub fn tokens2ids(&self, tokens: &[String]) -> Vec<i64> {
        let unk = self.symbol_table.get(&self.unk).copied();
        tokens
            .iter()
            .filter_map(|t| self.symbol_table.get(t).copied().or(unk))
            .collect()
    }
}

impl Tokenizer for CharTokenizer {
    fn tokenize(&self, text: &str) -> (Vec<String>, Vec<i64>) {
        let tokens = self.text2tokens(text);
        let ids = self.tokens2ids(&tokens);
        (tokens, ids)
    }
}
