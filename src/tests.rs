#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;

    use crate::classifier::Label;
    use crate::detector::Detector;
    use crate::error::{IdsError, Result};
    use crate::features::{FeatureVector, PacketFeatures, Schema};
    use crate::interceptor::{InterceptedPacket, PacketQueue, Verdict};
    use crate::model_predictor::test_artifacts::{port_tree, write_model_dir};
    use crate::model_predictor::{ArtifactLoader, JsonArtifactLoader, ModelName};
    use crate::packet::parse_packet;
    use crate::packet::test_packets::*;
    use crate::{run, Config, FailPolicy};

    enum Event {
        Packet(Vec<u8>),
        /// A packet the kernel refuses a verdict for.
        Unanswerable(Vec<u8>),
        Overflow,
        Broken,
    }

    struct ScriptedPacket {
        id: usize,
        bytes: Vec<u8>,
        refuse_verdict: bool,
    }

    impl InterceptedPacket for ScriptedPacket {
        fn payload(&self) -> &[u8] {
            &self.bytes
        }
    }

    /// Replays a fixed list of queue events and records the verdicts given.
    #[derive(Default)]
    struct ScriptedQueue {
        events: VecDeque<Event>,
        next_id: usize,
        verdicts: Vec<(usize, Verdict)>,
    }

    impl ScriptedQueue {
        fn new(events: Vec<Event>) -> Self {
            ScriptedQueue {
                events: events.into(),
                ..Default::default()
            }
        }

        fn verdicts(&self) -> Vec<Verdict> {
            self.verdicts.iter().map(|(_, v)| *v).collect()
        }
    }

    impl PacketQueue for ScriptedQueue {
        type Packet = ScriptedPacket;

        fn recv(&mut self) -> Result<Option<ScriptedPacket>> {
            match self.events.pop_front() {
                None => Ok(None),
                Some(Event::Overflow) => Err(IdsError::BufferOverflow("No buffer space available".to_string())),
                Some(Event::Broken) => Err(IdsError::QueueError("netlink socket closed".to_string())),
                Some(Event::Packet(bytes)) => {
                    self.next_id += 1;
                    Ok(Some(ScriptedPacket { id: self.next_id, bytes, refuse_verdict: false }))
                }
                Some(Event::Unanswerable(bytes)) => {
                    self.next_id += 1;
                    Ok(Some(ScriptedPacket { id: self.next_id, bytes, refuse_verdict: true }))
                }
            }
        }

        fn verdict(&mut self, packet: ScriptedPacket, verdict: Verdict) -> Result<()> {
            assert!(
                self.verdicts.iter().all(|(id, _)| *id != packet.id),
                "packet {} answered twice",
                packet.id
            );
            if packet.refuse_verdict {
                return Err(IdsError::QueueError("verdict rejected: No such file or directory".to_string()));
            }
            self.verdicts.push((packet.id, verdict));
            Ok(())
        }
    }

    fn large_packet() -> Vec<u8> {
        tcp_packet(&TcpSpec {
            dst_port: 60000,
            flags: 0x18,
            payload: vec![0xAB; 1460],
            ..Default::default()
        })
    }

    #[test]
    fn test_syn_scenario_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path());
        let loader = JsonArtifactLoader::new(dir.path());

        let packet = syn_443();
        let headers = parse_packet(&packet).unwrap();
        let record = PacketFeatures::from_headers(&headers);
        assert_eq!(record.tcp_flag_syn, 1);
        assert_eq!(record.tcp_options_mss_val, 0);
        assert_eq!(record.tcp_window_size, 64240);
        assert_eq!(record.ip_ttl, 64);

        // Both shipped test artifacts score this SYN as benign.
        for model in ModelName::ALL {
            let predictor = loader.load(model).unwrap();
            let vector = FeatureVector::build(&headers, predictor.schema()).unwrap();
            assert_eq!(vector.len(), 10);
            assert_eq!(predictor.predict(&vector).unwrap(), Label::Benign, "model {}", model);

            let mut queue = ScriptedQueue::new(vec![Event::Packet(packet.clone())]);
            let mut detector = Detector::new(&predictor, FailPolicy::Discard);
            detector.run(&mut queue).unwrap();
            assert_eq!(queue.verdicts(), vec![Verdict::Forward]);
        }
    }

    #[test]
    fn test_large_packet_is_discarded_by_both_models() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path());
        let loader = JsonArtifactLoader::new(dir.path());

        for model in ModelName::ALL {
            let predictor = loader.load(model).unwrap();
            let mut queue = ScriptedQueue::new(vec![Event::Packet(large_packet())]);
            let stats = Detector::new(&predictor, FailPolicy::Forward)
                .run(&mut queue)
                .unwrap();
            assert_eq!(queue.verdicts(), vec![Verdict::Discard], "model {}", model);
            assert_eq!(stats.malicious, 1);
        }
    }

    #[test]
    fn test_determinism() {
        let predictor = port_tree();
        let detector = Detector::new(&predictor, FailPolicy::Forward);
        let packet = tcp_packet(&TcpSpec {
            options: vec![2, 4, 0x05, 0xb4],
            ..Default::default()
        });

        let first = detector.classify(&packet).unwrap();
        let second = detector.classify(&packet.clone()).unwrap();
        assert_eq!(first.features, second.features);
        assert_eq!(first.headers, second.headers);
        assert_eq!(first.verdict, second.verdict);
    }

    #[test]
    fn test_overflow_recovery() {
        let predictor = port_tree();
        let mut queue = ScriptedQueue::new(vec![
            Event::Overflow,
            Event::Packet(syn_443()),
            Event::Overflow,
            Event::Overflow,
            Event::Packet(tcp_packet(&TcpSpec { dst_port: 22, ..Default::default() })),
        ]);

        let stats = Detector::new(&predictor, FailPolicy::Forward)
            .run(&mut queue)
            .unwrap();
        assert_eq!(queue.verdicts(), vec![Verdict::Forward, Verdict::Discard]);
        assert_eq!(stats.overflows, 3);
        assert_eq!(stats.received, 2);
    }

    #[test]
    fn test_fatal_queue_error_stops_loop() {
        let predictor = port_tree();
        let mut queue = ScriptedQueue::new(vec![
            Event::Packet(syn_443()),
            Event::Broken,
            Event::Packet(syn_443()),
        ]);

        let result = Detector::new(&predictor, FailPolicy::Forward).run(&mut queue);
        assert!(matches!(result, Err(IdsError::QueueError(_))));
        assert_eq!(queue.verdicts().len(), 1);
    }

    #[test]
    fn test_failed_verdict_stops_loop() {
        let predictor = port_tree();
        let mut queue = ScriptedQueue::new(vec![
            Event::Packet(syn_443()),
            Event::Unanswerable(syn_443()),
            Event::Packet(syn_443()),
        ]);

        let mut detector = Detector::new(&predictor, FailPolicy::Forward);
        let result = detector.run(&mut queue);
        assert!(matches!(result, Err(IdsError::QueueError(_))));
        assert_eq!(queue.verdicts(), vec![Verdict::Forward]);
        // The packet after the failed verdict was never received.
        assert_eq!(queue.events.len(), 1);
        assert_eq!(detector.stats().received, 2);
    }

    #[test]
    fn test_every_packet_gets_exactly_one_verdict() {
        let predictor = port_tree();
        let mut icmp = syn_443();
        icmp[9] = 1;
        let packets = vec![
            syn_443(),
            vec![],
            udp_packet(5353, 443, b"query"),
            icmp,
            tcp_packet(&TcpSpec { options: vec![2, 9, 0, 0], ..Default::default() }),
            large_packet(),
        ];
        let count = packets.len();

        for policy in [FailPolicy::Forward, FailPolicy::Discard] {
            let mut queue = ScriptedQueue::new(packets.iter().cloned().map(Event::Packet).collect());
            let stats = Detector::new(&predictor, policy).run(&mut queue).unwrap();

            let fail = policy.verdict();
            assert_eq!(
                queue.verdicts(),
                vec![Verdict::Forward, fail, Verdict::Forward, fail, fail, Verdict::Discard]
            );
            assert_eq!(stats.received as usize, count);
            assert_eq!(stats.failed, 3);
            assert_eq!(stats.forwarded + stats.discarded, count as u64);
        }
    }

    #[test]
    fn test_privilege_failure_binds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path());
        let mut config = Config::new(ModelName::Dt);
        config.model_dir = dir.path().to_path_buf();
        let loader = JsonArtifactLoader::new(&config.model_dir);

        let bind = |_: &crate::QueueConfig| -> Result<ScriptedQueue> {
            Err(IdsError::from_bind_error(std::io::Error::from_raw_os_error(libc::EPERM)))
        };
        let err = run(&config, &loader, bind).unwrap_err();
        assert!(matches!(err, IdsError::PermissionError(_)));
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn test_model_load_failure_happens_before_bind() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(ModelName::Knn);
        let loader = JsonArtifactLoader::new(dir.path());

        let bound = Cell::new(false);
        let bind = |_: &crate::QueueConfig| -> Result<ScriptedQueue> {
            bound.set(true);
            Ok(ScriptedQueue::new(vec![Event::Packet(syn_443())]))
        };
        let err = run(&config, &loader, bind).unwrap_err();
        assert!(matches!(err, IdsError::ModelLoadError(_)));
        assert_ne!(err.exit_code(), 0);
        assert!(!bound.get());
    }

    #[test]
    fn test_run_binds_configured_queue_and_records() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path());
        let record_path = dir.path().join("decisions.csv");

        let mut config = Config::new(ModelName::Knn);
        config.queue.queue_num = 7;
        config.record_path = Some(record_path.clone());
        let loader = JsonArtifactLoader::new(dir.path());

        let bind = |queue: &crate::QueueConfig| -> Result<ScriptedQueue> {
            assert_eq!(queue.queue_num, 7);
            assert_eq!(queue.copy_range, 0xffff);
            Ok(ScriptedQueue::new(vec![
                Event::Packet(syn_443()),
                Event::Overflow,
                Event::Packet(large_packet()),
            ]))
        };
        let stats = run(&config, &loader, bind).unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.overflows, 1);

        let csv = std::fs::read_to_string(record_path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(&Schema::flow().names().join(",")));
        assert!(lines[1].contains(",benign,forward,"));
        assert!(lines[2].contains(",malicious,discard,"));
    }
}
