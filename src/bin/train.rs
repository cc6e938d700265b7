//! Training and generation driver.
//!
//! Loads a corpus (one example per line), constructs a network or
//! resumes one from a JSON checkpoint, then runs the training loop with
//! periodic metric logging, sample generation, and checkpointing. With
//! `--generate N` it skips training and prints N samples from an
//! existing checkpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Train a GRU on a corpus of short texts
//! cargo run --release --bin train -- --data corpus.txt
//!
//! # Resume from a checkpoint and train with a custom architecture
//! cargo run --release --bin train -- --data corpus.txt --resume \
//!     --cell lstm --hidden 40,40 --step-size 0.001
//!
//! # Generate ten samples from a trained checkpoint
//! cargo run --release --bin train -- --generate 10 --temperature 0.8
//! ```

use clap::Parser;
use starling::{CellType, Error, Network, Result, TrainingLogger};
use std::fs;
use std::path::Path;

#[derive(Parser)]
#[command(name = "train", about = "Train a character-level recurrent text generator")]
struct Args {
    /// Corpus file, one training example per line
    #[arg(long, default_value = "corpus.txt")]
    data: String,

    /// Cell type: gru or lstm
    #[arg(long, default_value = "gru")]
    cell: String,

    /// Character embedding width
    #[arg(long, default_value_t = 5)]
    letter_size: usize,

    /// Hidden layer widths, comma separated
    #[arg(long, default_value = "20,20")]
    hidden: String,

    /// Step size for the solver update
    #[arg(long, default_value_t = 0.002)]
    step_size: f32,

    /// Number of training iterations to run
    #[arg(long, default_value_t = 50_000)]
    iterations: u64,

    /// Log metrics every N iterations
    #[arg(long, default_value_t = 100)]
    log_every: u64,

    /// Generate a sample every N iterations (0 disables)
    #[arg(long, default_value_t = 1_000)]
    sample_every: u64,

    /// Write a checkpoint every N iterations (0 disables)
    #[arg(long, default_value_t = 1_000)]
    save_every: u64,

    /// Checkpoint file path
    #[arg(long, default_value = "net-state.json")]
    checkpoint: String,

    /// Resume from the checkpoint instead of constructing a new network
    #[arg(long)]
    resume: bool,

    /// Sampling temperature
    #[arg(long, default_value_t = 1.0)]
    temperature: f32,

    /// Generate N samples from the checkpoint and exit
    #[arg(long)]
    generate: Option<usize>,

    /// CSV metrics file path
    #[arg(long, default_value = "training_log.csv")]
    log_csv: String,
}

fn load_corpus(path: &str) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    let corpus: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if corpus.is_empty() {
        return Err(Error::Configuration(format!(
            "corpus file {path:?} has no non-empty lines"
        )));
    }
    Ok(corpus)
}

fn parse_hidden(list: &str) -> Result<Vec<usize>> {
    list.split(',')
        .map(|part| {
            part.trim().parse::<usize>().map_err(|_| {
                Error::Configuration(format!("invalid hidden layer width {part:?}"))
            })
        })
        .collect()
}

fn run(args: Args) -> Result<()> {
    if let Some(count) = args.generate {
        let mut net = Network::load(&args.checkpoint)?;
        println!(
            "Loaded checkpoint {:?} ({} iterations, {} parameters)",
            args.checkpoint,
            net.iterations(),
            net.num_parameters()
        );
        for _ in 0..count {
            println!("{}", net.predict(args.temperature)?);
        }
        return Ok(());
    }

    let corpus = load_corpus(&args.data)?;
    let mut net = if args.resume && Path::new(&args.checkpoint).exists() {
        let net = Network::load(&args.checkpoint)?;
        println!(
            "Resumed {:?} at iteration {}",
            args.checkpoint,
            net.iterations()
        );
        net
    } else {
        let cell: CellType = args.cell.parse()?;
        let hidden = parse_hidden(&args.hidden)?;
        let net = Network::new(&corpus, args.letter_size, hidden, cell)?;
        println!(
            "New {} network: {} characters, {} parameters, max_gen {}",
            cell,
            net.codec().charset_len(),
            net.num_parameters(),
            net.params().max_gen
        );
        net
    };

    let mut logger = TrainingLogger::new(&args.log_csv)?;
    println!(
        "Training on {} examples for {} iterations",
        corpus.len(),
        args.iterations
    );

    for i in 1..=args.iterations {
        let (perplexity, cost) = net.train(args.step_size)?;

        if args.log_every > 0 && i % args.log_every == 0 {
            let sample = if args.sample_every > 0 && i % args.sample_every == 0 {
                Some(net.predict(args.temperature)?)
            } else {
                None
            };
            logger.log(
                net.iterations(),
                args.step_size,
                cost,
                perplexity,
                sample.as_deref(),
            )?;
        }

        if args.save_every > 0 && i % args.save_every == 0 {
            net.save(&args.checkpoint)?;
        }
    }

    net.save(&args.checkpoint)?;
    println!(
        "Done: {} iterations, checkpoint written to {:?}",
        net.iterations(),
        args.checkpoint
    );
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
