use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{IdsError, Result};
use crate::packet::{ParsedHeaders, TcpFlags, Transport};

/// Column order the shipped preprocessor and classifiers were fitted with.
pub const FLOW_SCHEMA: [&str; 10] = [
    "dst_port",
    "ip_prot",
    "flow_duration",
    "down_up_ratio",
    "pkt_len_max",
    "bytes_per_s",
    "pkt_per_s",
    "fwd_pkt_cnt",
    "fwd_pkt_len_tot",
    "fwd_pkt_len_max",
];

/// Per-packet header columns, in capture-record order.
pub const HEADER_FEATURES: [&str; 20] = [
    "ip_id",
    "ip_flag_df",
    "ip_ttl",
    "ip_len",
    "ip_dsfield",
    "tcp_srcport",
    "tcp_seq",
    "tcp_len",
    "tcp_hdr_len",
    "tcp_flag_fin",
    "tcp_flag_syn",
    "tcp_flag_rst",
    "tcp_flag_push",
    "tcp_flag_ack",
    "tcp_flag_urg",
    "tcp_flag_cwr",
    "tcp_window_size",
    "tcp_urgent_pointer",
    "tcp_options_mss_val",
    "tcp_flag_ece",
];

pub fn is_known_feature(name: &str) -> bool {
    FLOW_SCHEMA.contains(&name) || HEADER_FEATURES.contains(&name)
}

/// Ordered feature names a model expects. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Schema(Arc<[String]>);

impl Schema {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(IdsError::SchemaError("feature schema is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for name in &names {
            if !is_known_feature(name) {
                return Err(IdsError::SchemaError(format!("unknown feature '{}'", name)));
            }
            if !seen.insert(name.as_str()) {
                return Err(IdsError::SchemaError(format!("duplicate feature '{}'", name)));
            }
        }

        Ok(Schema(names.into()))
    }

    pub fn flow() -> Self {
        Schema(FLOW_SCHEMA.iter().map(|name| name.to_string()).collect())
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| n == name)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

/// Every feature derivable from a single packet.
///
/// A lone packet is a one-packet forward flow: it has no duration, no
/// backward traffic, and its own length is the total and the maximum.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PacketFeatures {
    // Flow view
    pub dst_port: u16,
    pub ip_prot: u8,
    pub flow_duration: f64,
    pub down_up_ratio: f64,
    pub pkt_len_max: u16,
    pub bytes_per_s: f64,
    pub pkt_per_s: f64,
    pub fwd_pkt_cnt: u32,
    pub fwd_pkt_len_tot: u32,
    pub fwd_pkt_len_max: u16,

    // Header view
    pub ip_id: u16,
    pub ip_flag_df: u8,
    pub ip_ttl: u8,
    pub ip_len: u16,
    pub ip_dsfield: u8,
    pub tcp_srcport: u16,
    pub tcp_seq: u32,
    pub tcp_len: usize,
    pub tcp_hdr_len: usize,
    pub tcp_flag_fin: u8,
    pub tcp_flag_syn: u8,
    pub tcp_flag_rst: u8,
    pub tcp_flag_push: u8,
    pub tcp_flag_ack: u8,
    pub tcp_flag_urg: u8,
    pub tcp_flag_cwr: u8,
    pub tcp_window_size: u16,
    pub tcp_urgent_pointer: u16,
    pub tcp_options_mss_val: u64,
    pub tcp_flag_ece: u8,
}

impl PacketFeatures {
    pub fn from_headers(headers: &ParsedHeaders) -> Self {
        let ip = &headers.ip;
        let transport = &headers.transport;

        let mut features = PacketFeatures {
            dst_port: transport.dst_port(),
            ip_prot: ip.protocol,
            flow_duration: 0.0,
            down_up_ratio: 0.0,
            pkt_len_max: ip.total_length,
            bytes_per_s: 0.0,
            pkt_per_s: 0.0,
            fwd_pkt_cnt: 1,
            fwd_pkt_len_tot: ip.total_length as u32,
            fwd_pkt_len_max: ip.total_length,

            ip_id: ip.identification,
            ip_flag_df: ip.dont_fragment as u8,
            ip_ttl: ip.ttl,
            ip_len: ip.total_length,
            ip_dsfield: ip.tos,
            tcp_srcport: transport.src_port(),
            tcp_len: transport.payload_len(),
            tcp_hdr_len: transport.header_len(),
            ..Default::default()
        };

        if let Transport::Tcp(tcp) = transport {
            let flags = tcp.flags;
            features.tcp_seq = tcp.sequence;
            features.tcp_flag_fin = flags.bit(TcpFlags::FIN);
            features.tcp_flag_syn = flags.bit(TcpFlags::SYN);
            features.tcp_flag_rst = flags.bit(TcpFlags::RST);
            features.tcp_flag_push = flags.bit(TcpFlags::PSH);
            features.tcp_flag_ack = flags.bit(TcpFlags::ACK);
            features.tcp_flag_urg = flags.bit(TcpFlags::URG);
            features.tcp_flag_cwr = flags.bit(TcpFlags::CWR);
            features.tcp_flag_ece = flags.bit(TcpFlags::ECE);
            features.tcp_window_size = tcp.window;
            features.tcp_urgent_pointer = tcp.urgent_ptr;
            features.tcp_options_mss_val = tcp.mss;
        }

        features
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        let value = match name {
            "dst_port" => self.dst_port as f64,
            "ip_prot" => self.ip_prot as f64,
            "flow_duration" => self.flow_duration,
            "down_up_ratio" => self.down_up_ratio,
            "pkt_len_max" => self.pkt_len_max as f64,
            "bytes_per_s" => self.bytes_per_s,
            "pkt_per_s" => self.pkt_per_s,
            "fwd_pkt_cnt" => self.fwd_pkt_cnt as f64,
            "fwd_pkt_len_tot" => self.fwd_pkt_len_tot as f64,
            "fwd_pkt_len_max" => self.fwd_pkt_len_max as f64,
            "ip_id" => self.ip_id as f64,
            "ip_flag_df" => self.ip_flag_df as f64,
            "ip_ttl" => self.ip_ttl as f64,
            "ip_len" => self.ip_len as f64,
            "ip_dsfield" => self.ip_dsfield as f64,
            "tcp_srcport" => self.tcp_srcport as f64,
            "tcp_seq" => self.tcp_seq as f64,
            "tcp_len" => self.tcp_len as f64,
            "tcp_hdr_len" => self.tcp_hdr_len as f64,
            "tcp_flag_fin" => self.tcp_flag_fin as f64,
            "tcp_flag_syn" => self.tcp_flag_syn as f64,
            "tcp_flag_rst" => self.tcp_flag_rst as f64,
            "tcp_flag_push" => self.tcp_flag_push as f64,
            "tcp_flag_ack" => self.tcp_flag_ack as f64,
            "tcp_flag_urg" => self.tcp_flag_urg as f64,
            "tcp_flag_cwr" => self.tcp_flag_cwr as f64,
            "tcp_window_size" => self.tcp_window_size as f64,
            "tcp_urgent_pointer" => self.tcp_urgent_pointer as f64,
            "tcp_options_mss_val" => self.tcp_options_mss_val as f64,
            "tcp_flag_ece" => self.tcp_flag_ece as f64,
            _ => return None,
        };
        Some(value)
    }
}

/// Named values laid out in a model's schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: Schema,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn build(headers: &ParsedHeaders, schema: &Schema) -> Result<Self> {
        let features = PacketFeatures::from_headers(headers);
        Self::from_features(&features, schema)
    }

    pub fn from_features(features: &PacketFeatures, schema: &Schema) -> Result<Self> {
        let values = schema
            .names()
            .iter()
            .map(|name| {
                features.get(name).ok_or_else(|| {
                    IdsError::SchemaError(format!("no source for feature '{}'", name))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        Ok(FeatureVector {
            schema: schema.clone(),
            values,
        })
    }

    pub fn from_values(schema: &Schema, values: Vec<f64>) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(IdsError::SchemaError(format!(
                "{} values for a {} feature schema",
                values.len(),
                schema.len()
            )));
        }
        Ok(FeatureVector {
            schema: schema.clone(),
            values,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.position(name).map(|i| self.values[i])
    }
}
