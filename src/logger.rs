//! Training metric logging.
//!
//! [`TrainingLogger`] appends one CSV row per logged training step and
//! mirrors it to the console. The file is flushed after every row so a
//! crashed run keeps everything logged so far.
//!
//! ## CSV Format
//!
//! - `iteration`: training iteration count
//! - `elapsed_seconds`: time since the logger was created
//! - `step_size`: step size used for the update
//! - `cost`: negative log-likelihood of the sampled example
//! - `perplexity`: base-2 perplexity of the sampled example
//! - `sample`: optional generated text

use crate::error::Result;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// CSV + console logger for the training loop.
pub struct TrainingLogger {
    log_file: File,
    start_time: Instant,
    last_log_time: Instant,
}

impl TrainingLogger {
    /// Create a logger, truncating any existing file at `path` and
    /// writing the CSV header.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let mut log_file = File::create(path)?;
        writeln!(
            log_file,
            "iteration,elapsed_seconds,step_size,cost,perplexity,sample"
        )?;

        let now = Instant::now();
        Ok(Self {
            log_file,
            start_time: now,
            last_log_time: now,
        })
    }

    /// Log one training step to the CSV file and the console.
    pub fn log(
        &mut self,
        iteration: u64,
        step_size: f32,
        cost: f32,
        perplexity: f32,
        sample: Option<&str>,
    ) -> Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f32();
        let sample_escaped = sample.map(|s| s.replace('"', "\"\"")).unwrap_or_default();

        writeln!(
            self.log_file,
            "{},{:.2},{:.6},{:.4},{:.2},\"{}\"",
            iteration, elapsed, step_size, cost, perplexity, sample_escaped
        )?;
        self.log_file.flush()?;

        let step_time = self.last_log_time.elapsed().as_secs_f32();
        println!(
            "Iter {:7} | Time: {:7.1}s (+{:.1}s) | Cost: {:.4} | Perplexity: {:.2}",
            iteration, elapsed, step_time, cost, perplexity
        );
        if let Some(text) = sample {
            println!("  Sample: \"{}\"", text);
        }

        self.last_log_time = Instant::now();
        Ok(())
    }
}
