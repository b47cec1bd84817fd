use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ConfigurationError;
use crate::models::{
    adversary::{ForwardDecision, PacketMeta},
    common::NodeId,
    node::NodeTable,
    traits::{IForwarder, INodeRegistry},
};
use crate::scheduler::{EventQueue, SimEvent};
use crate::stats::FlowMonitor;

/// 周期送信フローの設定
///
/// 経路制御は対象外のため、中継ノード列 `relays` を固定経路として与えます。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
    pub id: u32,
    pub source: NodeId,
    pub destination: NodeId,
    #[serde(default)]
    pub relays: Vec<NodeId>,
    pub start_s: f64,
    pub interval_s: f64,
    pub packet_size_bytes: u32,
    #[serde(default)]
    pub stop_s: Option<f64>,
    /// 送信パケット数の上限（未指定なら停止時刻まで送信）
    #[serde(default)]
    pub max_packets: Option<u64>,
    /// 宛先で受信したパケットを送信元へ折り返すか（エコー応答）
    #[serde(default)]
    pub echo: bool,
}

/// 経路上を移動中のパケット
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightPacket {
    pub route_index: usize,
    /// 次に受信するホップの添字
    pub hop: usize,
    pub meta: PacketMeta,
}

/// 内部経路（設定フローとその折り返しフロー）
#[derive(Debug, Clone)]
struct FlowRoute {
    flow_id: u32,
    source: NodeId,
    destination: NodeId,
    /// 中継ノード列＋宛先
    hops: Vec<NodeId>,
    packet_size_bytes: u32,
    start_s: f64,
    interval_s: f64,
    stop_s: Option<f64>,
    max_packets: Option<u64>,
    /// 折り返しフローの経路添字
    reply: Option<usize>,
    /// 周期送信を行うか（折り返しフローはfalse）
    periodic: bool,
    next_sequence: u64,
}

/// ハートビートトラフィックとホップ毎のパケット搬送
#[derive(Debug, Clone)]
pub struct TrafficModel {
    routes: Vec<FlowRoute>,
    per_hop_delay_s: f64,
}

impl TrafficModel {
    /// フロー設定を検証してトラフィックモデルを作成
    pub fn new(
        flows: &[FlowSpec],
        per_hop_delay_s: f64,
        registry: &impl INodeRegistry,
    ) -> Result<Self, ConfigurationError> {
        let mut ids = HashSet::new();
        for flow in flows {
            Self::validate_flow(flow, registry)?;
            if !ids.insert(flow.id) {
                return Err(invalid(flow.id, "duplicate flow id"));
            }
        }
        if !(per_hop_delay_s > 0.0) || !per_hop_delay_s.is_finite() {
            return Err(ConfigurationError::InvalidFlow {
                flow_id: flows.first().map(|f| f.id).unwrap_or(0),
                reason: format!("per-hop delay {per_hop_delay_s}s must be positive"),
            });
        }

        let mut routes: Vec<FlowRoute> = flows
            .iter()
            .map(|flow| {
                let mut hops = flow.relays.clone();
                hops.push(flow.destination);
                FlowRoute {
                    flow_id: flow.id,
                    source: flow.source,
                    destination: flow.destination,
                    hops,
                    packet_size_bytes: flow.packet_size_bytes,
                    start_s: flow.start_s,
                    interval_s: flow.interval_s,
                    stop_s: flow.stop_s,
                    max_packets: flow.max_packets,
                    reply: None,
                    periodic: true,
                    next_sequence: 0,
                }
            })
            .collect();

        // 折り返しフローは設定フローIDの最大値の後ろに採番する
        let mut next_id = flows.iter().map(|f| f.id).max().map(|id| id + 1).unwrap_or(0);
        for (index, flow) in flows.iter().enumerate() {
            if !flow.echo {
                continue;
            }
            let mut hops: Vec<NodeId> = flow.relays.iter().rev().copied().collect();
            hops.push(flow.source);
            routes[index].reply = Some(routes.len());
            routes.push(FlowRoute {
                flow_id: next_id,
                source: flow.destination,
                destination: flow.source,
                hops,
                packet_size_bytes: flow.packet_size_bytes,
                start_s: flow.start_s,
                interval_s: flow.interval_s,
                stop_s: flow.stop_s,
                max_packets: None,
                reply: None,
                periodic: false,
                next_sequence: 0,
            });
            next_id += 1;
        }

        Ok(Self { routes, per_hop_delay_s })
    }

    fn validate_flow(flow: &FlowSpec, registry: &impl INodeRegistry) -> Result<(), ConfigurationError> {
        for id in [flow.source, flow.destination].iter().chain(flow.relays.iter()) {
            if !registry.contains(*id) {
                return Err(ConfigurationError::UnknownNode(*id));
            }
        }
        if flow.source == flow.destination {
            return Err(invalid(flow.id, "source and destination are the same node"));
        }
        if flow.relays.contains(&flow.source) || flow.relays.contains(&flow.destination) {
            return Err(invalid(flow.id, "relay path revisits an endpoint"));
        }
        if !(flow.interval_s > 0.0) || !flow.interval_s.is_finite() {
            return Err(invalid(flow.id, "interval must be positive"));
        }
        if !flow.start_s.is_finite() || flow.start_s < 0.0 {
            return Err(invalid(flow.id, "start time must be non-negative"));
        }
        if let Some(stop) = flow.stop_s {
            if stop < flow.start_s {
                return Err(invalid(flow.id, "stop time precedes start time"));
            }
        }
        if flow.packet_size_bytes == 0 {
            return Err(invalid(flow.id, "packet size must be positive"));
        }
        if flow.max_packets == Some(0) {
            return Err(invalid(flow.id, "packet limit must be positive"));
        }
        Ok(())
    }

    /// 全フローを統計収集に登録し、周期送信タイマーを登録
    pub fn install(&self, queue: &mut EventQueue<SimEvent>, monitor: &mut FlowMonitor) {
        for (index, route) in self.routes.iter().enumerate() {
            monitor.register_flow(route.flow_id, route.source, route.destination);
            if route.periodic {
                queue.schedule_repeating(route.start_s, route.interval_s, SimEvent::SendPacket { flow_index: index });
            }
        }
    }

    pub fn flow_count(&self) -> usize {
        self.routes.len()
    }

    /// フローのパケット送信
    pub fn on_send(
        &mut self,
        route_index: usize,
        now: f64,
        queue: &mut EventQueue<SimEvent>,
        monitor: &mut FlowMonitor,
    ) {
        let Some(route) = self.routes.get(route_index) else {
            return;
        };
        if route.stop_s.is_some_and(|stop| now > stop) {
            return;
        }
        if route.max_packets.is_some_and(|max| route.next_sequence >= max) {
            return;
        }
        self.emit(route_index, now, queue, monitor);
    }

    fn emit(&mut self, route_index: usize, now: f64, queue: &mut EventQueue<SimEvent>, monitor: &mut FlowMonitor) {
        let per_hop_delay_s = self.per_hop_delay_s;
        let Some(route) = self.routes.get_mut(route_index) else {
            return;
        };

        let meta = PacketMeta {
            flow_id: route.flow_id,
            sequence: route.next_sequence,
            source: route.source,
            destination: route.destination,
            size_bytes: route.packet_size_bytes,
            sent_at: now,
            arrived_at: now,
        };
        route.next_sequence += 1;

        monitor.record_tx(meta.flow_id, now, meta.size_bytes);
        trace!(
            flow_id = meta.flow_id,
            sequence = meta.sequence,
            time_s = now,
            "PACKET_SENT: パケットを送信しました"
        );

        queue.schedule_at(
            now + per_hop_delay_s,
            SimEvent::PacketArrival(InFlightPacket {
                route_index,
                hop: 0,
                meta,
            }),
        );
    }

    /// パケットのホップ到着処理
    ///
    /// 受信ノードの転送判定で破棄されたパケットはその場で消失し、
    /// 送信元へは何も通知されません。
    pub fn on_arrival(
        &mut self,
        packet: InFlightPacket,
        now: f64,
        nodes: &mut NodeTable,
        queue: &mut EventQueue<SimEvent>,
        monitor: &mut FlowMonitor,
    ) {
        let Some(route) = self.routes.get(packet.route_index) else {
            return;
        };
        let Some(&receiver) = route.hops.get(packet.hop) else {
            return;
        };
        let is_last_hop = packet.hop + 1 == route.hops.len();
        let reply = route.reply;

        let meta = PacketMeta {
            arrived_at: now,
            ..packet.meta
        };
        let decision = match nodes.get_mut(receiver) {
            Ok(node) => node.forward(&meta),
            Err(_) => ForwardDecision::Drop,
        };
        if decision == ForwardDecision::Drop {
            debug!(
                flow_id = meta.flow_id,
                sequence = meta.sequence,
                node_id = %receiver,
                time_s = now,
                "PACKET_LOST: 受信ノードでパケットが破棄されました"
            );
            return;
        }

        if is_last_hop {
            monitor.record_rx(meta.flow_id, now, now - meta.sent_at, meta.size_bytes);
            if let Some(reply_index) = reply {
                self.emit(reply_index, now, queue, monitor);
            }
        } else {
            queue.schedule_at(
                now + self.per_hop_delay_s,
                SimEvent::PacketArrival(InFlightPacket {
                    hop: packet.hop + 1,
                    meta,
                    ..packet
                }),
            );
        }
    }
}

fn invalid(flow_id: u32, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidFlow {
        flow_id,
        reason: reason.to_string(),
    }
}
