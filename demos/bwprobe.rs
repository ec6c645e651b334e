use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use clap_derive::{Parser, ValueEnum};
use tracing::{error, info, Level};

use bwprobe::probe::endpoint::{run_receiver, run_sender};
use bwprobe::probe::probe_config::ProbeConfig;
use bwprobe::probe::result_sink::{CsvResultSink, ResultSink};

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Sender,
    Receiver,
}

/// Estimates available bandwidth between two hosts with bursts of UDP probes. Start the
///  receiver first, then the sender, with identical parameters on both sides.
#[derive(Parser)]
struct Args {
    #[clap(value_enum)]
    role: RoleArg,

    /// the receiver's UDP address for probe packets
    probe_address: SocketAddr,
    /// the receiver's TCP address for the control connection
    control_address: SocketAddr,

    #[clap(long, default_value_t = 1500)]
    packet_size: usize,
    #[clap(long, default_value_t = 100)]
    num_packets: usize,
    #[clap(long, default_value_t = 20)]
    num_levels: u16,

    #[clap(long, default_value_t = 2000)]
    read_timeout_millis: u64,
    #[clap(long, default_value_t = 1000)]
    settle_delay_millis: u64,

    #[clap(long, default_value = "Data")]
    result_dir: PathBuf,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = ProbeConfig::new(args.probe_address, args.control_address);
    config.packet_size = args.packet_size;
    config.num_packets = args.num_packets;
    config.num_levels = args.num_levels;
    config.read_timeout = Duration::from_millis(args.read_timeout_millis);
    config.settle_delay = Duration::from_millis(args.settle_delay_millis);
    config.result_dir = args.result_dir;
    let config = Arc::new(config);

    let result = match args.role {
        RoleArg::Sender => run_sender(config.clone()).await,
        RoleArg::Receiver => run_receiver(config.clone()).await,
    };

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            error!("probing session failed: {}", e);
            return Err(e);
        }
    };

    info!("delta_r: {:.2} Mbps, achieved rates: {}", result.delta_r_mbps, result.to_csv_row());
    CsvResultSink::new(&config.result_dir)
        .append(&result).await
}
