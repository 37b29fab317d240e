use anyhow::Result;
use clap::Parser;
use log::info;

use sluice_core::local_file_reader::LocalFileReader;
use sluice_core::tool::init_log;
use sluice_feeder::feeder::RecordFeeder;

#[derive(Parser, Debug)]
#[command(about = "sluice record feeder")]
struct Args {
    /// Server endpoint, e.g. "127.0.0.1:50061".
    #[arg(long)]
    endpoint: String,

    /// Files of raw records, one JSON payload per line.
    #[arg(long, required = true, num_args = 1..)]
    files: Vec<String>,

    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    #[arg(long, default_value_t = 1)]
    threads: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_log();

    let args = Args::parse();

    info!(
        "starting feeder, endpoint: {}, files: {}, batch_size: {}, threads: {}",
        args.endpoint,
        args.files.len(),
        args.batch_size,
        args.threads
    );

    RecordFeeder::<LocalFileReader>::start_local_file_feeder(
        &args.endpoint,
        &args.files,
        args.batch_size,
        args.threads,
    )
    .await?;

    Ok(())
}
