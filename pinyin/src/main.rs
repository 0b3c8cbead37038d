use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use pinyin_ime::{key, Candidate, ImeGlue, Parser, PinyinConfig, PinyinIme};

/// Glue that prints every engine callback to stdout and remembers the
/// last candidate list so `:N` can select from it.
#[derive(Default)]
struct TerminalGlue {
    candidates: Vec<Candidate>,
}

impl ImeGlue for TerminalGlue {
    fn send_candidates(&mut self, candidates: &[Candidate]) {
        self.candidates = candidates.to_vec();
        if candidates.is_empty() {
            return;
        }
        for (i, c) in candidates.iter().take(9).enumerate() {
            println!("  {}. {} ({}) weight={:.4}", i + 1, c.text, c.syllables, c.weight);
        }
    }

    fn send_pending_symbols(&mut self, symbols: &str) {
        if !symbols.is_empty() {
            println!("[{}]", symbols);
        }
    }

    fn send_key(&mut self, code: i32) {
        println!("<key {}>", code);
    }

    fn send_string(&mut self, text: &str) {
        println!(">> {}", text);
    }

    fn alter_keyboard(&mut self, layout: &str) {
        println!("<layout {}>", layout);
    }
}

#[derive(ClapParser)]
#[command(name = "pinyin-ime")]
#[command(about = "Pinyin to Hanzi input method driven from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Dictionary snapshot (.json or .bincode)
    #[arg(short, long, default_value = "data/pinyin.json")]
    dict: PathBuf,

    /// Keep the dictionary in a persistent store at this path
    #[arg(long)]
    persistent: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: each line is typed key by key
    Repl,
    /// Print the ranked segmentations of an input
    Segment {
        input: String,
        /// Alternatives to print
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
}

fn load_config(cli: &Cli) -> Result<PinyinConfig> {
    let mut config = match &cli.config {
        Some(path) => PinyinConfig::load_toml(path)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PinyinConfig::default(),
    };
    if let Some(path) = &cli.persistent {
        config.base_mut().persistent_backend = true;
        config.base_mut().database_path = Some(path.clone());
    }
    Ok(config)
}

fn print_segmentations(input: &str, limit: usize) {
    let all = Parser::new().parse(input);
    if all.is_empty() {
        println!("(nothing to segment)");
    }
    for (i, seg) in all.iter().take(limit).enumerate() {
        let kinds: Vec<String> = seg
            .syllables
            .iter()
            .map(|s| format!("{}:{:?}", s.text, s.kind))
            .collect();
        println!("{}. {} cost={}", i + 1, kinds.join(" "), seg.cost);
    }
}

/// Feed one REPL line into the engine.
///
/// `:N` selects candidate N, `:bs` and `:ret` send backspace and return,
/// `:show TYPE` focuses a field type and `:key CODE` sends a raw code.
/// Anything else is typed character by character.
fn handle_line(ime: &mut PinyinIme<TerminalGlue>, line: &str) {
    let Some(command) = line.strip_prefix(':') else {
        for c in line.chars() {
            ime.click(c as i32);
        }
        return;
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("bs"), _) => ime.click(key::BACKSPACE),
        (Some("ret"), _) => ime.click(key::RETURN),
        (Some("show"), field) => ime.show(field.unwrap_or("text")),
        (Some("key"), Some(code)) => match code.parse::<i32>() {
            Ok(code) => ime.click(code),
            Err(_) => eprintln!("not a key code: {}", code),
        },
        (Some(n), _) => {
            let picked = n
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| ime.glue().and_then(|g| g.candidates.get(i).cloned()));
            match picked {
                Some(c) => ime.select(&c.text, &c.syllables),
                None => eprintln!("no candidate {}", n),
            }
        }
        (None, _) => {}
    }
}

fn run_repl(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let mut ime: PinyinIme<TerminalGlue> = PinyinIme::open(config, &cli.dict)
        .with_context(|| format!("loading dictionary {}", cli.dict.display()))?;
    ime.init(TerminalGlue::default());

    println!("pinyin-ime: type pinyin and press Enter, `:N` to pick a candidate");
    println!("Ctrl-D to exit.");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        handle_line(&mut ime, input);
        // nothing else competes for the thread between lines
        ime.run_pending();
    }

    let stats = ime.decoder().cache_stats();
    tracing::info!(hits = stats.hits, misses = stats.misses, "session finished");
    ime.uninit();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pinyin_ime=info".parse()?)
                .add_directive("hanzi_decoder_core=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Some(Commands::Segment { input, limit }) => {
            print_segmentations(input, *limit);
            Ok(())
        }
        Some(Commands::Repl) | None => run_repl(&cli),
    }
}
