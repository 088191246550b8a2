//! Kernel packet queue boundary.
//!
//! [`PacketQueue`] is a blocking source of intercepted packets plus the sink
//! for their verdicts. A packet is moved into [`PacketQueue::verdict`], so it
//! cannot be answered twice.

use std::fmt;

use crate::classifier::Label;
use crate::config::QueueConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Discard,
}

impl From<Label> for Verdict {
    fn from(label: Label) -> Self {
        match label {
            Label::Benign => Verdict::Forward,
            Label::Malicious => Verdict::Discard,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Forward => write!(f, "forward"),
            Verdict::Discard => write!(f, "discard"),
        }
    }
}

pub trait InterceptedPacket {
    fn payload(&self) -> &[u8];
}

pub trait PacketQueue {
    type Packet: InterceptedPacket;

    /// Blocks for the next packet. `Ok(None)` means the source is exhausted;
    /// `Err(IdsError::BufferOverflow)` means packets were lost but the queue
    /// is still usable.
    fn recv(&mut self) -> Result<Option<Self::Packet>>;

    fn verdict(&mut self, packet: Self::Packet, verdict: Verdict) -> Result<()>;
}

#[cfg(target_os = "linux")]
pub use self::linux::NfQueue;

#[cfg(target_os = "linux")]
mod linux {
    use std::io::ErrorKind;

    use log::{debug, info};

    use super::{InterceptedPacket, PacketQueue, Verdict};
    use crate::config::QueueConfig;
    use crate::error::{IdsError, Result};

    impl InterceptedPacket for nfq::Message {
        fn payload(&self) -> &[u8] {
            self.get_payload()
        }
    }

    /// A bound netfilter queue.
    pub struct NfQueue {
        queue: nfq::Queue,
        queue_num: u16,
    }

    impl NfQueue {
        pub fn bind(config: &QueueConfig) -> Result<Self> {
            let mut queue = nfq::Queue::open().map_err(IdsError::from_bind_error)?;
            // Report socket overruns as ENOBUFS instead of dropping silently.
            queue
                .set_recv_enobufs(true)
                .map_err(IdsError::from_bind_error)?;
            queue
                .bind(config.queue_num)
                .map_err(IdsError::from_bind_error)?;
            // Whole packets, not just metadata.
            queue
                .set_copy_range(config.queue_num, config.copy_range)
                .map_err(IdsError::from_bind_error)?;

            info!(
                "Bound NFQUEUE {} (copy range {} bytes)",
                config.queue_num, config.copy_range
            );
            Ok(NfQueue {
                queue,
                queue_num: config.queue_num,
            })
        }
    }

    impl PacketQueue for NfQueue {
        type Packet = nfq::Message;

        fn recv(&mut self) -> Result<Option<nfq::Message>> {
            loop {
                match self.queue.recv() {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {
                        debug!("recv interrupted, retrying");
                        continue;
                    }
                    Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                        return Err(IdsError::BufferOverflow(e.to_string()));
                    }
                    Err(e) => return Err(IdsError::QueueError(e.to_string())),
                }
            }
        }

        fn verdict(&mut self, mut packet: nfq::Message, verdict: Verdict) -> Result<()> {
            packet.set_verdict(match verdict {
                Verdict::Forward => nfq::Verdict::Accept,
                Verdict::Discard => nfq::Verdict::Drop,
            });
            self.queue
                .verdict(packet)
                .map_err(|e| IdsError::QueueError(e.to_string()))
        }
    }

    impl Drop for NfQueue {
        fn drop(&mut self) {
            if let Err(e) = self.queue.unbind(self.queue_num) {
                debug!("unbind of queue {} failed: {}", self.queue_num, e);
            }
            info!("NFQUEUE {} released", self.queue_num);
        }
    }
}

/// Binds the platform's packet queue.
#[cfg(target_os = "linux")]
pub fn bind_queue(config: &QueueConfig) -> Result<NfQueue> {
    NfQueue::bind(config)
}
