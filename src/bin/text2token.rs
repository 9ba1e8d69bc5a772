// src/bin/text2token.rs

//! Convert raw transcripts to space-separated tokens.
//!
//! Examples:
//! ```bash
//! text2token -s 1 data/train/text                       # utt1 h e l l o <space> w o r l d
//! text2token -s 1 -n 2 data/train/text                  # two characters per token
//! text2token -s 1 -l nls.txt data/train/text            # keep <NOISE> etc. whole
//! text2token -s 1 -t phn data/timit/text                # sil -> <space>
//! text2token -s 1 -t cn_char_en_bpe -m bpe.json text    # 中文 chars + English BPE
//! cat text | text2token -s 1 > tokens
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use asr_datapipe::text2token::{
    load_bpe_model, read_symbol_list, PieceEncoder, Text2TokenOptions, TextTokenizer, TransType,
};

#[derive(Parser)]
#[command(author, version, about = "convert raw text to tokenized text")]
struct Cli {
    #[arg(
        short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Number of characters per token, i.e. aabb -> a a b b with -n 1 and aa bb with -n 2
    #[arg(short = 'n', long = "nchar", default_value_t = 1)]
    nchar: usize,

    /// Pass the first N columns through unchanged
    #[arg(short = 's', long = "skip-ncols", default_value_t = 0)]
    skip_ncols: usize,

    /// Symbol written in place of a space
    #[arg(long = "space", default_value = "<space>")]
    space: String,

    /// BPE model (tokenizers JSON) for the English part
    #[arg(short = 'm', long = "bpe-model", value_name = "FILE")]
    bpe_model: Option<PathBuf>,

    /// List of non-linguistic symbols, e.g. <NOISE>, one per line
    #[arg(short = 'l', long = "non-lang-syms", value_name = "FILE")]
    non_lang_syms: Option<PathBuf>,

    /// Transcript type
    #[arg(short = 't', long = "trans-type", alias = "trans_type", value_enum, default_value_t = TransType::Char)]
    trans_type: TransType,

    /// Input text; standard input when omitted
    text: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let non_lang_syms = match cli.non_lang_syms.as_deref() {
        Some(p) => read_symbol_list(p)?,
        None => Vec::new(),
    };
    let bpe = match cli.bpe_model.as_deref() {
        Some(p) => Some(Box::new(load_bpe_model(p)?) as Box<dyn PieceEncoder>),
        None => None,
    };
    let opts = Text2TokenOptions {
        nchar: cli.nchar,
        skip_ncols: cli.skip_ncols,
        space: cli.space,
        trans_type: cli.trans_type,
    };
    let tokenizer = TextTokenizer::new(opts, &non_lang_syms, bpe)?;

    let stdout = io::stdout();
    let output = BufWriter::new(stdout.lock());
    let result = match cli.text {
        Some(path) => {
            let file = File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
            tokenizer.run(BufReader::new(file), output)
        }
        None => tokenizer.run(io::stdin().lock(), output),
    };

    match result {
        Ok(_) => Ok(()),
        // Gracefully exit on broken pipe (e.g., when piped to head)
        Err(e)
            if e.downcast_ref::<io::Error>()
                .is_some_and(|io| io.kind() == ErrorKind::BrokenPipe) =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}
