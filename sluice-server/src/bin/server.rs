use anyhow::Result;
use clap::Parser;
use log::info;

use local_ip_address::local_ip;
use tonic::transport::Server;

use sluice_core::config::PipelineConfig;
use sluice_core::sluice::sluice_server::SluiceServer;
use sluice_core::tool::init_log;
use sluice_core::tool::wait_for_signal;
use sluice_core::tool::MESSAGE_LIMIT;
use sluice_server::pipeline::StreamPipeline;
use sluice_server::request_handler::SluiceServerImpl;

#[derive(Parser, Debug)]
#[command(about = "sluice pipeline server")]
struct Args {
    /// Path of the toml config file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    table_dir: Option<String>,

    #[arg(long)]
    dead_letter_dir: Option<String>,
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(port) = args.port {
        config.listen_port = port;
    }

    if let Some(table_dir) = &args.table_dir {
        config.table_dir = table_dir.clone();
    }

    if let Some(dead_letter_dir) = &args.dead_letter_dir {
        config.dead_letter_dir = dead_letter_dir.clone();
    }

    config.validate()?;

    Ok(config)
}

async fn serve(config: PipelineConfig) -> Result<()> {
    let my_local_ip = local_ip().unwrap();

    let addr = format!("{}:{}", my_local_ip, config.listen_port)
        .parse()
        .unwrap();

    let listen_port = config.listen_port;

    let pipeline = StreamPipeline::start(config)?;

    let sluice_server = SluiceServerImpl::new(pipeline.clone());

    let signal = wait_for_signal();

    info!(
        "Starting gRPC Server..., ip: {}, port: {}",
        my_local_ip, listen_port
    );

    Server::builder()
        .add_service(
            SluiceServer::new(sluice_server)
                .max_decoding_message_size(MESSAGE_LIMIT)
                .max_encoding_message_size(MESSAGE_LIMIT),
        )
        .serve_with_shutdown(addr, signal)
        .await
        .unwrap();

    // Drain open windows and flush everything before releasing resources.
    pipeline.shutdown().await?;

    Ok(())
}

fn main() -> Result<()> {
    init_log();

    let args = Args::parse();
    let config = build_config(&args)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(serve(config))?;

    Ok(())
}
