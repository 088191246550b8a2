use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::info;

use nfq_ids::config::{DEFAULT_MODEL_DIR, DEFAULT_QUEUE_NUM};
use nfq_ids::{Config, FailPolicy, ModelName};

/// Classify packets queued by netfilter and accept or drop each one.
#[derive(Parser, Debug)]
#[command(name = "nfq-ids", version, about, long_about = None)]
struct Cli {
    /// Pretrained model to load (knn, dt)
    model: String,

    /// NFQUEUE number to bind
    #[arg(short, long, default_value_t = DEFAULT_QUEUE_NUM)]
    queue: u16,

    /// Directory holding preprocessor.json and the model files
    #[arg(long, default_value = DEFAULT_MODEL_DIR)]
    model_dir: PathBuf,

    /// Verdict for packets that cannot be parsed or scored
    #[arg(long, value_enum, default_value_t = FailPolicy::Forward)]
    on_error: FailPolicy,

    /// Append one CSV row per verdict to this file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Log statistics every N packets (0 disables)
    #[arg(long, default_value_t = 1000)]
    stats_interval: u64,
}

impl Cli {
    fn into_config(self) -> nfq_ids::Result<Config> {
        let mut config = Config::new(ModelName::parse(&self.model)?);
        config.queue.queue_num = self.queue;
        config.model_dir = self.model_dir;
        config.fail_policy = self.on_error;
        config.record_path = self.record;
        config.stats_interval = self.stats_interval;
        Ok(config)
    }
}

#[cfg(target_os = "linux")]
fn start() -> nfq_ids::Result<nfq_ids::LoopStats> {
    // A missing model argument exits inside clap with status 2; an unknown
    // one comes back as a UsageError with the same status.
    let config = Cli::parse().into_config()?;

    ctrlc::set_handler(|| {
        info!("Interrupted, shutting down");
        process::exit(0);
    })?;

    let loader = nfq_ids::JsonArtifactLoader::new(&config.model_dir);
    nfq_ids::run(&config, &loader, nfq_ids::interceptor::bind_queue)
}

#[cfg(target_os = "linux")]
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match start() {
        Ok(stats) => {
            info!("Stopped after {} packets", stats.received);
        }
        Err(e) => {
            eprintln!("[Error] {}", e);
            process::exit(e.exit_code());
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("[Error] nfq-ids needs Linux netfilter queue support.");
    process::exit(1);
}
