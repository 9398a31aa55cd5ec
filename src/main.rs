use std::path::PathBuf;

use clap::Parser;

use hashswarm::{conf::Conf, engine};

#[derive(Parser, Debug)]
#[command(version, about = "Swarm-based file replication over chunk hashes")]
struct Cli {
    /// Number of client ranks in the group (the tracker is rank 0)
    #[clap(short = 'n', long)]
    clients: usize,
    /// Directory holding the per-client input manifests (in<rank>.txt)
    #[clap(short, long, default_value = ".")]
    input_dir: PathBuf,
    /// Directory completed downloads are written into
    #[clap(short, long, default_value = ".")]
    download_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Cli::parse();

    let conf = Conf::new(args.clients, args.input_dir, args.download_dir);
    if let Err(e) = engine::run(conf).await {
        eprintln!("fabric failed: {}", e);
        std::process::exit(1);
    }
}
