// src/text2token.rs
//
// Line-oriented transcript tokenization used by the `text2token` binary.
//
//   utt1 hello world   --skip-ncols 1   ->   utt1 h e l l o <space> w o r l d

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use log::{debug, info};
use regex::Regex;

/// How the text part of a line is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransType {
    /// Fixed-size character chunks.
    #[default]
    Char,
    /// Space-separated phones; `sil` becomes the space symbol.
    Phn,
    /// CJK characters one per token, English words through a BPE model.
    #[value(name = "cn_char_en_bpe")]
    CnCharEnBpe,
}

/// Subword encoder for the English part of mixed transcripts.
pub trait PieceEncoder: Send + Sync {
    fn encode_as_pieces(&self, text: &str) -> Result<Vec<String>>;
}

impl PieceEncoder for tokenizers::Tokenizer {
    fn encode_as_pieces(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self
            .encode(text, false)
            .map_err(|e| anyhow!("BPE encode failed for `{text}`: {e}"))?;
        Ok(encoding.get_tokens().to_vec())
    }
}

/// Load a `tokenizers` JSON model.
pub fn load_bpe_model(path: &Path) -> Result<tokenizers::Tokenizer> {
    tokenizers::Tokenizer::from_file(path)
        .map_err(|e| anyhow!("failed to load BPE model {}: {e}", path.display()))
}

/// Read the non-linguistic symbol list; blank lines are ignored.
pub fn read_symbol_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read symbol list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text2TokenOptions {
    pub nchar: usize,
    pub skip_ncols: usize,
    pub space: String,
    pub trans_type: TransType,
}

impl Default for Text2TokenOptions {
    fn default() -> Self {
        Self {
            nchar: 1,
            skip_ncols: 0,
            space: "<space>".to_string(),
            trans_type: TransType::Char,
        }
    }
}

/// A piece of the text part: a non-linguistic symbol, or ordinary text.
#[derive(Debug, PartialEq, Eq)]
enum Span<'a> {
    Symbol(&'a str),
    Text(&'a str),
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

/// Split on CJK characters, keeping each as its own piece and dropping
/// whitespace-only pieces.
fn seg_char(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if is_cjk(c) {
            pieces.push(&text[start..i]);
            pieces.push(&text[i..i + c.len_utf8()]);
            start = i + c.len_utf8();
        }
    }
    pieces.push(&text[start..]);
    pieces.retain(|p| !p.trim().is_empty());
    pieces
}

pub struct TextTokenizer {
    opts: Text2TokenOptions,
    symbols: Vec<Regex>,
    bpe: Option<Box<dyn PieceEncoder>>,
}

impl std::fmt::Debug for TextTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextTokenizer")
            .field("opts", &self.opts)
            .field("symbols", &self.symbols.len())
            .field("bpe", &self.bpe.is_some())
            .finish()
    }
}

impl TextTokenizer {
    pub fn new(
        opts: Text2TokenOptions,
        non_lang_syms: &[String],
        bpe: Option<Box<dyn PieceEncoder>>,
    ) -> Result<Self> {
        if opts.nchar == 0 {
            bail!("--nchar must be at least 1");
        }
        if opts.trans_type == TransType::CnCharEnBpe && bpe.is_none() {
            bail!("trans type cn_char_en_bpe needs a BPE model");
        }
        let symbols = non_lang_syms
            .iter()
            .map(|s| Regex::new(&regex::escape(s)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { opts, symbols, bpe })
    }

    /// Cut `text` into symbol and non-symbol spans.
    fn spans<'a>(&self, text: &'a str) -> Vec<Span<'a>> {
        let mut matches: Vec<(usize, usize)> = self
            .symbols
            .iter()
            .flat_map(|re| re.find_iter(text).map(|m| (m.start(), m.end())))
            .collect();
        matches.sort_unstable();

        let mut spans = Vec::new();
        let mut pos = 0;
        for (start, end) in matches {
            if start < pos {
                continue;
            }
            if start > pos {
                spans.push(Span::Text(&text[pos..start]));
            }
            spans.push(Span::Symbol(&text[start..end]));
            pos = end;
        }
        if pos < text.len() {
            spans.push(Span::Text(&text[pos..]));
        }
        spans
    }

    fn char_tokens(&self, text: &str) -> Vec<String> {
        let units: Vec<String> = self
            .spans(text)
            .into_iter()
            .flat_map(|span| match span {
                Span::Symbol(s) => vec![s.to_string()],
                Span::Text(t) => t.chars().map(String::from).collect(),
            })
            .collect();
        units.chunks(self.opts.nchar).map(|c| c.concat()).collect()
    }

    fn cn_char_en_bpe_tokens(&self, text: &str) -> Result<Vec<String>> {
        let Some(bpe) = self.bpe.as_deref() else {
            bail!("trans type cn_char_en_bpe needs a BPE model");
        };
        let mut tokens = Vec::new();
        for span in self.spans(text) {
            let t = match span {
                Span::Symbol(s) => {
                    tokens.push(s.to_string());
                    continue;
                }
                Span::Text(t) => t,
            };
            for piece in seg_char(t) {
                // "▁" (U+2581) separates English words
                for word in piece.trim().split('▁').filter(|w| !w.is_empty()) {
                    if word.bytes().all(|b| b.is_ascii_alphabetic()) {
                        tokens.extend(bpe.encode_as_pieces(word)?);
                    } else {
                        tokens.push(word.to_string());
                    }
                }
            }
        }
        Ok(tokens)
    }

    /// Tokenize one input line (without its newline).
    pub fn process_line(&self, line: &str) -> Result<String> {
        let cols: Vec<&str> = line.split_whitespace().collect();
        let skip = self.opts.skip_ncols.min(cols.len());
        let head = cols[..skip].join(" ");
        let text = cols[skip..].join(" ");

        let tokens = match self.opts.trans_type {
            TransType::Char => self.char_tokens(&text),
            TransType::Phn => text.split(' ').map(str::to_string).collect(),
            TransType::CnCharEnBpe => self.cn_char_en_bpe_tokens(&text)?,
        };
        let space = self.opts.space.as_str();
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| {
                let t = t.replace(' ', space);
                match self.opts.trans_type {
                    TransType::Phn => t.replace("sil", space),
                    _ => t,
                }
            })
            .collect();
        debug!("{} -> {} tokens", line, tokens.len());

        let body = tokens.join(" ");
        Ok(if self.opts.skip_ncols > 0 {
            format!("{head} {body}")
        } else {
            body
        })
    }

    /// Tokenize every line of `input` into `output`.
    pub fn run<R: BufRead, W: Write>(&self, input: R, mut output: W) -> Result<usize> {
        let mut n = 0;
        for line in input.lines() {
            let line = line.context("failed to read input line")?;
            writeln!(output, "{}", self.process_line(&line)?)?;
            n += 1;
        }
        output.flush()?;
        info!("tokenized {n} lines");
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_opts(nchar: usize, skip: usize) -> Text2TokenOptions {
        Text2TokenOptions {
            nchar,
            skip_ncols: skip,
            ..Text2TokenOptions::default()
        }
    }

    /// Splits words into two-letter pieces, marking the first with `▁`.
    struct Pairs;

    impl PieceEncoder for Pairs {
        fn encode_as_pieces(&self, text: &str) -> Result<Vec<String>> {
            let chars: Vec<char> = text.chars().collect();
            Ok(chars
                .chunks(2)
                .enumerate()
                .map(|(i, c)| {
                    let s: String = c.iter().collect();
                    if i == 0 { format!("▁{s}") } else { s }
                })
                .collect())
        }
    }

    #[test]
    fn char_mode_with_key_column() {
        let t = TextTokenizer::new(char_opts(1, 1), &[], None).unwrap();
        assert_eq!(
            t.process_line("utt1 hello world").unwrap(),
            "utt1 h e l l o <space> w o r l d"
        );
    }

    #[test]
    fn nchar_chunks() {
        let t = TextTokenizer::new(char_opts(2, 0), &[], None).unwrap();
        assert_eq!(t.process_line("aabbc").unwrap(), "aa bb c");
    }

    #[test]
    fn non_lang_symbols_are_atomic() {
        let syms = vec!["<NOISE>".to_string(), "[laugh]".to_string()];
        let t = TextTokenizer::new(char_opts(1, 1), &syms, None).unwrap();
        assert_eq!(
            t.process_line("u1 ab<NOISE>c [laugh]").unwrap(),
            "u1 a b <NOISE> c <space> [laugh]"
        );
    }

    #[test]
    fn phn_mode_maps_sil() {
        let opts = Text2TokenOptions {
            trans_type: TransType::Phn,
            skip_ncols: 1,
            ..Text2TokenOptions::default()
        };
        let t = TextTokenizer::new(opts, &[], None).unwrap();
        assert_eq!(t.process_line("x sil b r ih sil").unwrap(), "x <space> b r ih <space>");
    }

    #[test]
    fn cn_char_en_bpe_mode() {
        let opts = Text2TokenOptions {
            trans_type: TransType::CnCharEnBpe,
            ..Text2TokenOptions::default()
        };
        assert!(TextTokenizer::new(opts.clone(), &[], None).is_err());
        let t = TextTokenizer::new(opts, &[], Some(Box::new(Pairs))).unwrap();
        assert_eq!(t.process_line("你好hello▁ok 123").unwrap(), "你 好 ▁he ll o ok<space>123");
    }

    #[test]
    fn seg_char_keeps_cjk_separate() {
        assert_eq!(seg_char("ab你 好c"), vec!["ab", "你", "好", "c"]);
    }

    #[test]
    fn run_counts_lines() {
        let t = TextTokenizer::new(char_opts(1, 1), &[], None).unwrap();
        let mut out = Vec::new();
        let n = t.run("a xy\nb z\n".as_bytes(), &mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "a x y\nb z\n");
    }
}
