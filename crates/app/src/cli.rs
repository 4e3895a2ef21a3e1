use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Run a single poll cycle and exit.
    #[arg(long, default_value_t = false)]
    pub once: bool,
    /// Generate replies and log them without posting, liking or recording.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}
