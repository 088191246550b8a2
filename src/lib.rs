//! Inline NFQUEUE packet classifier.
//!
//! Packets queued by netfilter are parsed, turned into the feature vector a
//! pretrained model expects, normalized, classified and answered with a
//! forward or discard verdict, one at a time.

pub mod classifier;
pub mod config;
pub mod detector;
pub mod error;
pub mod features;
pub mod interceptor;
pub mod model_predictor;
pub mod packet;
pub mod preprocess;
pub mod recorder;

#[cfg(test)]
mod tests;

use log::info;

pub use config::{Config, FailPolicy, QueueConfig};
pub use detector::{Decision, Detector, LoopStats};
pub use error::{IdsError, Result};
pub use interceptor::{PacketQueue, Verdict};
pub use model_predictor::{ArtifactLoader, JsonArtifactLoader, ModelName, ModelPredictor};

/// Loads the model, binds the queue and runs the decision loop.
///
/// Nothing is bound when the model fails to load, and no packet is touched
/// when binding fails.
pub fn run<L, Q, B>(config: &Config, loader: &L, bind: B) -> Result<LoopStats>
where
    L: ArtifactLoader,
    Q: PacketQueue,
    B: FnOnce(&QueueConfig) -> Result<Q>,
{
    let predictor = loader.load(config.model)?;

    let recorder = match &config.record_path {
        Some(path) => {
            info!("Recording decisions to {}", path.display());
            Some(recorder::BoxedRecorder::create(path, predictor.schema())?)
        }
        None => None,
    };

    let mut queue = bind(&config.queue)?;

    let mut detector = Detector::new(&predictor, config.fail_policy)
        .with_stats_interval(config.stats_interval);
    if let Some(recorder) = recorder {
        detector = detector.with_recorder(recorder);
    }
    detector.run(&mut queue)
}
