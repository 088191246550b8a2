use std::path::PathBuf;

use clap::ValueEnum;

use crate::interceptor::Verdict;
use crate::model_predictor::ModelName;

pub const DEFAULT_QUEUE_NUM: u16 = 1;
pub const DEFAULT_MODEL_DIR: &str = "Models";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub queue_num: u16,
    /// Bytes of each packet copied to userspace; 0xffff copies whole packets.
    pub copy_range: u16,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_num: DEFAULT_QUEUE_NUM,
            copy_range: 0xffff,
        }
    }
}

/// Verdict for packets that could not be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FailPolicy {
    /// Fail open: let the packet through.
    #[default]
    Forward,
    /// Fail closed: drop the packet.
    Discard,
}

impl FailPolicy {
    pub fn verdict(&self) -> Verdict {
        match self {
            FailPolicy::Forward => Verdict::Forward,
            FailPolicy::Discard => Verdict::Discard,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelName,
    pub model_dir: PathBuf,
    pub queue: QueueConfig,
    pub fail_policy: FailPolicy,
    /// CSV file receiving one row per verdict.
    pub record_path: Option<PathBuf>,
    /// Log loop statistics every this many packets; 0 disables.
    pub stats_interval: u64,
}

impl Config {
    pub fn new(model: ModelName) -> Self {
        Self {
            model,
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            queue: QueueConfig::default(),
            fail_policy: FailPolicy::default(),
            record_path: None,
            stats_interval: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new(ModelName::Knn);
        assert_eq!(config.queue.queue_num, 1);
        assert_eq!(config.queue.copy_range, 0xffff);
        assert_eq!(config.model_dir, PathBuf::from("Models"));
        assert_eq!(config.fail_policy, FailPolicy::Forward);
        assert!(config.record_path.is_none());
    }

    #[test]
    fn test_fail_policy_verdicts() {
        assert_eq!(FailPolicy::Forward.verdict(), Verdict::Forward);
        assert_eq!(FailPolicy::Discard.verdict(), Verdict::Discard);
    }
}
