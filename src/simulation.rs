//! # Simulation モジュール
//!
//! MANET群れシミュレーションの中核となるシミュレーションエンジンを提供します。
//!
//! このモジュールは離散事象シミュレーションのメインループを管理し、
//! 群れの隊形制御・攻撃ノードの有効化・ハートビートトラフィックを
//! 単一のイベントキューで直列に実行します。各イベントは完了まで実行され、
//! 並行して動くコンポーネントはありません。
//!
//! ## 主要機能
//!
//! - **初期化**: シナリオ設定を検証し、群れ・巡回軌道・攻撃ノード・フローを設置
//! - **イベントループ**: 停止時刻までイベントを時刻順に処理
//! - **位置積分**: イベント間のノード位置を等速運動で進める
//! - **統計確定**: 実行終了後にフロー記録を一度だけ集計
//!
//! ## 同時刻イベントの処理順序
//!
//! 同時刻のイベントは登録順に処理されます。隊形切り替えは追従タイマーより先に
//! 登録されるため、同時刻の切り替えは必ず次のティックより先に反映されます。
//!
//! ## 使用例
//!
//! ```no_run
//! use manetsim::simulation::SimulationEngine;
//! use manetsim::scenario::ScenarioConfig;
//!
//! let config = ScenarioConfig::from_file("scenarios/swarm_grayhole.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! let report = engine.run();
//! report.metrics.print_report("GRAYHOLE SWARM METRICS");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use tracing::{debug, error, info, trace};

use crate::error::{ConfigurationError, ScenarioError};
use crate::models::*;
use crate::scenario::{MobilityConfig, ScenarioConfig};
use crate::scheduler::{EventQueue, SimEvent};
use crate::stats::{FlowMonitor, FlowRecord, SummaryMetrics, summarize};

/// ノード毎の転送統計
#[derive(Debug, Clone, PartialEq)]
pub struct NodeForwardingStats {
    pub node_id: NodeId,
    pub policy: Option<DropPolicy>,
    pub accepted: u64,
    pub dropped: u64,
}

/// 終了時点のノード状態
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFinalState {
    pub node_id: NodeId,
    pub role: NodeRole,
    pub position: Position3D,
    /// ランダムウェイポイントで開始した移動区間数（移動モデルなしは0）
    pub waypoint_legs: u64,
}

/// 実行結果
#[derive(Debug, Clone)]
pub struct RunReport {
    pub end_time_s: f64,
    pub event_count: u64,
    pub records: Vec<FlowRecord>,
    pub metrics: SummaryMetrics,
    pub forwarding: Vec<NodeForwardingStats>,
    pub nodes: Vec<NodeFinalState>,
}

pub struct SimulationEngine {
    pub current_time: f64,
    pub stop_time: f64,
    pub seed: u64,
    pub event_count: u64,

    pub nodes: NodeTable,
    pub formation: Option<FormationController>,
    pub traffic: Option<TrafficModel>,
    pub monitor: FlowMonitor,
    queue: EventQueue<SimEvent>,

    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        let stop_time = scenario.sim.stop_time_s;
        let seed = scenario.sim.seed;
        let nodes = NodeTable::new(&scenario.initial_positions(), seed);

        Self {
            current_time: 0.0,
            stop_time,
            seed,
            event_count: 0,
            nodes,
            formation: None,
            traffic: None,
            monitor: FlowMonitor::new(),
            queue: EventQueue::new(),
            scenario_config: scenario,
            verbose_level,
        }
    }

    /// シナリオ設定に基づいて全コンポーネントを設置
    ///
    /// 作業用のノード登録簿とイベントキューに対して設置を行い、全て成功した場合のみ
    /// エンジンへ反映します。失敗時には部分的な隊形やポリシーは残りません。
    pub fn initialize(&mut self) -> Result<(), ScenarioError> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }
        self.scenario_config.validate()?;

        let mut nodes = self.nodes.clone();
        let mut queue = EventQueue::new();
        let mut monitor = FlowMonitor::new();

        let formation = self.initialize_swarm(&mut nodes, &mut queue)?;
        self.initialize_mobility(&mut nodes)?;
        self.initialize_adversaries(&mut nodes, &mut queue)?;
        let traffic = self.initialize_traffic(&nodes, &mut queue, &mut monitor)?;

        self.nodes = nodes;
        self.queue = queue;
        self.monitor = monitor;
        self.formation = formation;
        self.traffic = Some(traffic);

        if self.verbose_level > 0 {
            info!("初期化完了:");
            info!("  ノード: {}台", self.nodes.len());
            info!(
                "  追従ノード: {}台",
                self.formation.as_ref().map(|f| f.followers.len()).unwrap_or(0)
            );
            info!("  攻撃ノード: {}台", self.scenario_config.adversaries.len());
            info!(
                "  フロー: {}本",
                self.traffic.as_ref().map(|t| t.flow_count()).unwrap_or(0)
            );
        }

        Ok(())
    }

    fn initialize_swarm(
        &self,
        nodes: &mut NodeTable,
        queue: &mut EventQueue<SimEvent>,
    ) -> Result<Option<FormationController>, ScenarioError> {
        let Some(swarm) = &self.scenario_config.swarm else {
            return Ok(None);
        };

        let controller = FormationController::new(
            swarm.leader,
            swarm.followers.clone(),
            swarm.formations.tight_offsets(),
            swarm.formations.wide_offsets(),
            swarm.initial_formation,
            swarm.tick_period_s,
        )?;
        controller.validate_members(&*nodes)?;

        let start_position: Position3D = swarm.start_position.into();
        match &swarm.patrol {
            Some(patrol) => {
                let path = patrol.to_path()?;
                controller.initialize_leader_trajectory(&path, start_position, nodes, queue)?;
            }
            None => {
                nodes.set_position(controller.leader, start_position)?;
            }
        }

        nodes.get_mut(controller.leader)?.role = NodeRole::Leader;
        for id in &controller.followers {
            nodes.get_mut(*id)?.role = NodeRole::Follower;
        }

        // 切り替えは追従タイマーより先に登録する
        for switch in &swarm.switches {
            queue.schedule_at(switch.at_s, SimEvent::SwitchFormation(switch.formation));
        }
        controller.register_tick(swarm.first_tick_s, queue);

        if self.verbose_level > 1 {
            debug!(
                "群れ初期化: リーダー {} / 追従 {}台 (周期: {:.1}秒, 隊形切替: {}回)",
                controller.leader,
                controller.followers.len(),
                controller.tick_period_s,
                swarm.switches.len()
            );
        }

        Ok(Some(controller))
    }

    /// 群れに属さないノードへ移動モデルを設定
    fn initialize_mobility(&self, nodes: &mut NodeTable) -> Result<(), ScenarioError> {
        let Some(MobilityConfig::RandomWaypoint(params)) = self.scenario_config.nodes.mobility else {
            return Ok(());
        };

        let plain: Vec<NodeId> = nodes
            .iter()
            .filter(|node| node.role == NodeRole::Plain)
            .map(|node| node.id)
            .collect();
        for id in &plain {
            let place_randomly = !self.scenario_config.has_explicit_position(*id);
            nodes.enable_random_waypoint(*id, params, place_randomly)?;
        }

        info!(
            nodes = plain.len(),
            min_speed_mps = params.min_speed_mps,
            max_speed_mps = params.max_speed_mps,
            pause_s = params.pause_s,
            "MOBILITY_INITIALIZED: ランダムウェイポイント移動を設定しました"
        );
        Ok(())
    }

    fn initialize_adversaries(
        &self,
        nodes: &mut NodeTable,
        queue: &mut EventQueue<SimEvent>,
    ) -> Result<(), ScenarioError> {
        let mut seen = std::collections::HashSet::new();
        for adversary in &self.scenario_config.adversaries {
            if !seen.insert(adversary.node) {
                return Err(ConfigurationError::DuplicateAdversary(adversary.node).into());
            }
            let policy = adversary.to_policy()?;
            nodes.attach_policy(adversary.node, policy)?;
            queue.schedule_at(adversary.activate_at_s, SimEvent::ActivateAttack(adversary.node));

            if self.verbose_level > 1 {
                debug!(
                    "攻撃ノード設定: {} ({}, 有効化: {:.1}秒)",
                    adversary.node,
                    policy.label(),
                    adversary.activate_at_s
                );
            }
        }
        Ok(())
    }

    fn initialize_traffic(
        &self,
        nodes: &NodeTable,
        queue: &mut EventQueue<SimEvent>,
        monitor: &mut FlowMonitor,
    ) -> Result<TrafficModel, ScenarioError> {
        let traffic = TrafficModel::new(
            &self.scenario_config.traffic.flows,
            self.scenario_config.sim.per_hop_delay_s,
            nodes,
        )?;
        traffic.install(queue, monitor);
        Ok(traffic)
    }

    /// 停止時刻までイベントを処理し、統計を確定する
    pub fn run(&mut self) -> RunReport {
        info!("=== シミュレーション実行開始 ===");

        while let Some((at, event)) = self.queue.pop_until(self.stop_time) {
            self.nodes.advance(at - self.current_time);
            self.current_time = at;
            self.handle_event(event);
            self.event_count += 1;

            if self.verbose_level > 2 {
                trace!("時刻: {:.3}秒 (イベント: {})", self.current_time, self.event_count);
            }

            if self.event_count % 1000 == 0 && self.verbose_level > 0 {
                let progress = (self.current_time / self.stop_time) * 100.0;
                info!(
                    "進行状況: {:.1}% ({:.1}/{:.1}秒)",
                    progress, self.current_time, self.stop_time
                );
            }
        }

        self.nodes.advance(self.stop_time - self.current_time);
        self.current_time = self.stop_time;

        let records = self.monitor.finalize();
        let metrics = summarize(&records);
        let forwarding = self
            .nodes
            .iter()
            .filter(|node| node.behavior.state != PolicyState::Unattached)
            .map(|node| NodeForwardingStats {
                node_id: node.id,
                policy: node.behavior.active_policy(),
                accepted: node.behavior.accepted,
                dropped: node.behavior.dropped,
            })
            .collect();
        let nodes = self
            .nodes
            .iter()
            .map(|node| NodeFinalState {
                node_id: node.id,
                role: node.role,
                position: node.position,
                waypoint_legs: node.mobility.as_ref().map(|m| m.legs()).unwrap_or(0),
            })
            .collect();

        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.1}秒", self.current_time);
        info!("総イベント数: {}", self.event_count);

        RunReport {
            end_time_s: self.current_time,
            event_count: self.event_count,
            records,
            metrics,
            forwarding,
            nodes,
        }
    }

    fn handle_event(&mut self, event: SimEvent) {
        let now = self.current_time;
        match event {
            SimEvent::SetLeaderVelocity(velocity) => {
                if let Some(formation) = &self.formation {
                    if let Err(e) = formation.set_leader_velocity(&mut self.nodes, velocity) {
                        error!("リーダー速度の設定に失敗しました: {}", e);
                    }
                    debug!(
                        time_s = now,
                        velocity_x = velocity.x,
                        velocity_y = velocity.y,
                        "LEADER_VELOCITY: リーダーの速度を変更しました"
                    );
                }
            }
            SimEvent::SwitchFormation(variant) => {
                if let Some(formation) = &mut self.formation {
                    formation.switch_formation(variant);
                }
            }
            SimEvent::FollowerTick => {
                if let Some(formation) = &mut self.formation {
                    if let Err(e) = formation.on_follower_tick(&mut self.nodes) {
                        error!("追従ノード位置の更新に失敗しました: {}", e);
                    }
                }
            }
            SimEvent::ActivateAttack(node_id) => {
                self.nodes.activate(node_id, now);
            }
            SimEvent::SendPacket { flow_index } => {
                if let Some(traffic) = &mut self.traffic {
                    traffic.on_send(flow_index, now, &mut self.queue, &mut self.monitor);
                }
            }
            SimEvent::PacketArrival(packet) => {
                if let Some(traffic) = &mut self.traffic {
                    traffic.on_arrival(packet, now, &mut self.nodes, &mut self.queue, &mut self.monitor);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWARM_YAML: &str = r#"
meta: { version: "1.0", name: swarm, description: test }
sim: { stop_time_s: 90.0, seed: 11 }
nodes: { count: 7 }
swarm:
  leader: 0
  followers: [1, 2, 3, 4, 5, 6]
  start_position: { x_m: 0.0, y_m: 0.0 }
  switches:
    - { at_s: 30.0, formation: wide }
    - { at_s: 60.0, formation: tight }
  patrol: { shape: rectangle, side_m: 300.0, speed_mps: 10.0 }
traffic:
  flows:
    - { id: 0, source: 1, destination: 0, start_s: 2.0, interval_s: 2.0, packet_size_bytes: 64 }
    - { id: 1, source: 3, destination: 0, relays: [2], start_s: 2.0, interval_s: 2.0, packet_size_bytes: 64 }
"#;

    fn engine(yaml: &str) -> SimulationEngine {
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        SimulationEngine::new(config, 0)
    }

    #[test]
    fn test_baseline_swarm_delivers_all_packets() {
        let mut engine = engine(SWARM_YAML);
        engine.initialize().unwrap();
        let report = engine.run();

        assert_eq!(report.end_time_s, 90.0);
        // t = 2, 4, ..., 88, 90 の45回送信（t=90の送信は停止時刻までに届かない）
        assert_eq!(report.records[0].tx_packets, 45);
        assert_eq!(report.records[0].rx_packets, 44);
        assert!(report.metrics.delivery_ratio_pct > 97.0);
        assert!(report.forwarding.is_empty());
    }

    #[test]
    fn test_followers_track_leader_at_last_tick() {
        let mut engine = engine(SWARM_YAML);
        engine.initialize().unwrap();
        engine.run();

        // 最終ティックは t=89（切り替えは60秒で tight に戻る）
        // t=89 のリーダーは下辺の手前: 90秒で (0,300) に到達するので (10, 300)
        let follower = engine.nodes.position(NodeId(2)).unwrap();
        let expected = Position3D::planar(10.0, 300.0) + FormationOffsets::default_tight().offsets[1];
        assert!(follower.distance_xy(&expected) < 1e-6, "follower at {follower}");
        assert_eq!(engine.formation.as_ref().unwrap().active_variant(), FormationVariant::Tight);
        assert_eq!(engine.formation.as_ref().unwrap().tick_count(), 45);
    }

    #[test]
    fn test_blackhole_relay_after_activation() {
        let yaml = format!(
            "{SWARM_YAML}adversaries:\n  - {{ node: 2, policy: blackhole, activate_at_s: 45.0 }}\n"
        );
        let mut engine = engine(&yaml);
        engine.initialize().unwrap();
        let report = engine.run();

        let relayed = &report.records[1];
        // 45秒以前の送信（t=2..44 の22回）のみ配送
        assert_eq!(relayed.rx_packets, 22);
        assert_eq!(report.records[0].rx_packets, 44);
        assert_eq!(report.forwarding.len(), 1);
        assert_eq!(report.forwarding[0].policy, Some(DropPolicy::DeterministicDrop));
        // t=46..88 の22回が破棄され、t=90 の送信は停止時刻までに中継へ届かない
        assert_eq!(report.forwarding[0].dropped, 22);
    }

    #[test]
    fn test_grayhole_run_is_reproducible() {
        let yaml = format!(
            "{SWARM_YAML}adversaries:\n  - {{ node: 2, policy: grayhole, probability: 0.3, activate_at_s: 45.0 }}\n"
        );
        let mut first = engine(&yaml);
        first.initialize().unwrap();
        let a = first.run();
        let mut second = engine(&yaml);
        second.initialize().unwrap();
        let b = second.run();

        assert_eq!(a.records, b.records);
        // 有効化前の22回は必ず配送される
        assert!(a.records[1].rx_packets >= 22);
        assert!(a.records[1].rx_packets <= 45);
    }

    #[test]
    fn test_switch_and_tick_at_same_instant() {
        let yaml = r#"
meta: { version: "1.0", name: tie, description: test }
sim: { stop_time_s: 31.0, seed: 1 }
nodes: { count: 7 }
swarm:
  leader: 0
  followers: [1, 2, 3, 4, 5, 6]
  start_position: { x_m: 0.0, y_m: 0.0 }
  first_tick_s: 30.0
  tick_period_s: 100.0
  switches:
    - { at_s: 30.0, formation: wide }
"#;
        let mut engine = engine(yaml);
        engine.initialize().unwrap();
        engine.run();

        // 30秒のティックは同時刻の切り替え後の散開隊形を使う
        let formation = engine.formation.as_ref().unwrap();
        assert_eq!(formation.tick_count(), 1);
        assert_eq!(formation.active_variant(), FormationVariant::Wide);
        assert_eq!(engine.nodes.position(NodeId(2)).unwrap(), Position3D::planar(90.0, 0.0));
    }

    #[test]
    fn test_duplicate_adversary_aborts_initialize() {
        let yaml = format!(
            "{SWARM_YAML}adversaries:\n  - {{ node: 1, policy: blackhole, activate_at_s: 15.0 }}\n  - {{ node: 1, policy: grayhole, probability: 0.3, activate_at_s: 5.0 }}\n"
        );
        let mut engine = engine(&yaml);
        assert!(matches!(
            engine.initialize().unwrap_err(),
            ScenarioError::Configuration(ConfigurationError::DuplicateAdversary(NodeId(1)))
        ));
        assert_eq!(engine.nodes.get(NodeId(1)).unwrap().behavior.state, PolicyState::Unattached);
        assert_eq!(engine.run().event_count, 0);
    }

    #[test]
    fn test_random_waypoint_moves_only_plain_nodes() {
        let yaml = r#"
meta: { version: "1.0", name: rwp, description: test }
sim: { stop_time_s: 40.0, seed: 3 }
nodes:
  count: 10
  mobility:
    model: random_waypoint
    min_speed_mps: 1.0
    max_speed_mps: 5.0
    pause_s: 1.0
    area: { x_min_m: 0.0, x_max_m: 300.0, y_min_m: 0.0, y_max_m: 300.0 }
swarm:
  leader: 0
  followers: [1, 2, 3, 4, 5, 6]
  start_position: { x_m: 1000.0, y_m: 1000.0 }
traffic:
  flows:
    - { id: 0, source: 8, destination: 9, start_s: 10.0, interval_s: 0.5, packet_size_bytes: 64, max_packets: 50, echo: true }
"#;
        let mut first = engine(yaml);
        first.initialize().unwrap();
        let report = first.run();

        let area = WaypointArea {
            x_min_m: 0.0,
            x_max_m: 300.0,
            y_min_m: 0.0,
            y_max_m: 300.0,
        };
        for state in &report.nodes {
            match state.role {
                NodeRole::Plain => {
                    assert!(area.contains(&state.position));
                    assert!(state.waypoint_legs > 0);
                }
                _ => {
                    assert_eq!(state.waypoint_legs, 0);
                    assert!(!area.contains(&state.position));
                }
            }
        }
        assert_eq!(report.records[0].tx_packets, 50);

        let mut second = engine(yaml);
        second.initialize().unwrap();
        assert_eq!(second.run().nodes, report.nodes);
    }

    #[test]
    fn test_bundled_static_blackhole_swallows_capped_echo() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/static_blackhole.yaml");
        let config = ScenarioConfig::from_file(path).unwrap();
        let mut engine = SimulationEngine::new(config, 0);
        engine.initialize().unwrap();
        let report = engine.run();

        // t=10.0..34.5 の50回のみ送信され、全てノード5で破棄される
        assert_eq!(report.records[0].tx_packets, 50);
        assert_eq!(report.records[0].rx_packets, 0);
        assert_eq!(report.metrics.delivery_ratio_pct, 0.0);
        assert_eq!(report.forwarding[0].node_id, NodeId(5));
        assert_eq!(report.forwarding[0].dropped, 50);
    }

    #[test]
    fn test_failed_initialize_installs_nothing() {
        let yaml = format!(
            "{SWARM_YAML}adversaries:\n  - {{ node: 2, policy: blackhole, activate_at_s: 5.0 }}\n  - {{ node: 3, policy: wormhole }}\n"
        );
        let mut engine = engine(&yaml);
        let err = engine.initialize().unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Configuration(ConfigurationError::UnknownPolicy(_))
        ));
        assert!(engine.formation.is_none());
        assert!(engine.traffic.is_none());
        assert_eq!(engine.nodes.get(NodeId(2)).unwrap().behavior.state, PolicyState::Unattached);

        let report = engine.run();
        assert!(report.records.is_empty());
        assert_eq!(report.event_count, 0);
    }
}
