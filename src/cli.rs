//! Command-line arguments.

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "courtside", about = "Court rental availability aggregator")]
pub struct Args {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty)]
    pub tracing: TracingFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}
