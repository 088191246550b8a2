use log::{debug, info, warn};

use crate::classifier::Label;
use crate::config::FailPolicy;
use crate::error::Result;
use crate::features::FeatureVector;
use crate::interceptor::{InterceptedPacket, PacketQueue, Verdict};
use crate::model_predictor::ModelPredictor;
use crate::packet::{parse_packet, ParsedHeaders};
use crate::recorder::BoxedRecorder;

/// Outcome of running one packet through the pipeline.
#[derive(Debug, Clone)]
pub struct Decision {
    pub headers: ParsedHeaders,
    pub features: FeatureVector,
    pub label: Label,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub received: u64,
    pub forwarded: u64,
    pub discarded: u64,
    pub malicious: u64,
    /// Packets answered by the fail policy.
    pub failed: u64,
    pub overflows: u64,
}

impl LoopStats {
    fn count_verdict(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Forward => self.forwarded += 1,
            Verdict::Discard => self.discarded += 1,
        }
    }
}

/// Per-packet decision loop over a bound queue and a loaded model.
pub struct Detector<'a> {
    predictor: &'a ModelPredictor,
    fail_policy: FailPolicy,
    recorder: Option<BoxedRecorder>,
    stats: LoopStats,
    stats_interval: u64,
}

impl<'a> Detector<'a> {
    pub fn new(predictor: &'a ModelPredictor, fail_policy: FailPolicy) -> Self {
        Detector {
            predictor,
            fail_policy,
            recorder: None,
            stats: LoopStats::default(),
            stats_interval: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: BoxedRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_stats_interval(mut self, every: u64) -> Self {
        self.stats_interval = every;
        self
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Parse, build, normalize and classify one packet.
    pub fn classify(&self, payload: &[u8]) -> Result<Decision> {
        let headers = parse_packet(payload)?;
        let features = FeatureVector::build(&headers, self.predictor.schema())?;
        let label = self.predictor.predict(&features)?;
        Ok(Decision {
            headers,
            features,
            label,
            verdict: Verdict::from(label),
        })
    }

    /// Verdict for one packet. Never fails: unclassifiable packets get the
    /// fail-policy verdict.
    pub fn decide(&mut self, payload: &[u8]) -> Verdict {
        self.stats.received += 1;

        let verdict = match self.classify(payload) {
            Ok(decision) => {
                if decision.label == Label::Malicious {
                    self.stats.malicious += 1;
                    info!(
                        "Malicious packet {}:{} -> {}:{} (proto {}), discarding",
                        decision.headers.ip.source,
                        decision.headers.transport.src_port(),
                        decision.headers.ip.destination,
                        decision.headers.transport.dst_port(),
                        decision.headers.ip.protocol
                    );
                }
                if let Some(recorder) = self.recorder.as_mut() {
                    if let Err(e) = recorder.record_decision(&decision) {
                        warn!("Failed to record decision: {}", e);
                    }
                }
                decision.verdict
            }
            Err(e) => {
                self.stats.failed += 1;
                let verdict = self.fail_policy.verdict();
                if e.is_per_packet() {
                    debug!("Unclassifiable packet ({} bytes): {}; {}", payload.len(), e, verdict);
                } else {
                    warn!("Classification failed ({} bytes): {}; {}", payload.len(), e, verdict);
                }
                if let Some(recorder) = self.recorder.as_mut() {
                    if let Err(e) = recorder.record_failure(verdict) {
                        warn!("Failed to record decision: {}", e);
                    }
                }
                verdict
            }
        };

        self.stats.count_verdict(verdict);
        verdict
    }

    /// Receive → decide → verdict until the queue is exhausted.
    ///
    /// Buffer overflows are logged and skipped; any other queue error ends
    /// the loop.
    pub fn run<Q: PacketQueue>(&mut self, queue: &mut Q) -> Result<LoopStats> {
        info!(
            "Classifying packets with model {} (on error: {:?})",
            self.predictor.name(),
            self.fail_policy
        );

        loop {
            let packet = match queue.recv() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!("Packet source closed");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    self.stats.overflows += 1;
                    warn!("Buffer error, packets lost: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let verdict = self.decide(packet.payload());
            queue.verdict(packet, verdict)?;

            if self.stats_interval > 0 && self.stats.received % self.stats_interval == 0 {
                self.log_stats();
            }
        }

        self.log_stats();
        Ok(self.stats.clone())
    }

    pub fn log_stats(&self) {
        let s = &self.stats;
        info!(
            "Packets: {} | forwarded: {} | discarded: {} | malicious: {} | failed: {} | overflows: {}",
            s.received, s.forwarded, s.discarded, s.malicious, s.failed, s.overflows
        );
    }
}
