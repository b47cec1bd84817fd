use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{ConfigurationError, ScenarioError};
use crate::models::{
    ControlPoint, DropPolicy, FlowSpec, FormationOffsets, FormationVariant, NodeId, PatrolPath, Position3D,
    RandomWaypointParams, Velocity3D,
};

/// シナリオメタデータ
#[derive(Debug, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// 停止時刻（秒）
    pub stop_time_s: f64,
    pub seed: u64,
    /// 1ホップあたりの伝送遅延（秒）
    #[serde(default = "default_per_hop_delay")]
    pub per_hop_delay_s: f64,
}

fn default_per_hop_delay() -> f64 {
    0.002
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Position2D {
    pub x_m: f64,
    pub y_m: f64,
}

impl From<Position2D> for Position3D {
    fn from(p: Position2D) -> Self {
        Position3D::planar(p.x_m, p.y_m)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Velocity2D {
    pub x_mps: f64,
    pub y_mps: f64,
}

impl From<Velocity2D> for Velocity3D {
    fn from(v: Velocity2D) -> Self {
        Velocity3D::new(v.x_mps, v.y_mps, 0.0)
    }
}

/// 群れに属さないノードの移動モデル
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum MobilityConfig {
    /// 矩形範囲内のランダムウェイポイント
    RandomWaypoint(RandomWaypointParams),
}

/// ノード配置設定
///
/// 位置を指定しないノードは原点に配置されます。ただし移動モデルが設定されている
/// 場合、群れに属さないノードの未指定位置は移動範囲内の乱数地点になります。
#[derive(Debug, Deserialize, Serialize)]
pub struct NodesConfig {
    pub count: u32,
    #[serde(default)]
    pub positions: Vec<Position2D>,
    #[serde(default)]
    pub mobility: Option<MobilityConfig>,
}

/// 巡回軌道設定
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum PatrolConfig {
    /// 正方形巡回
    Rectangle {
        side_m: f64,
        speed_mps: f64,
        #[serde(default)]
        start_s: f64,
        #[serde(default = "default_loops")]
        loops: u32,
    },
    /// 任意の制御点列
    ControlPoints {
        control_points: Vec<ControlPointConfig>,
        period_s: f64,
        #[serde(default = "default_loops")]
        loops: u32,
    },
}

fn default_loops() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ControlPointConfig {
    pub at_s: f64,
    pub velocity: Velocity2D,
}

impl PatrolConfig {
    /// 巡回軌道を構築（制御点順序の検証を含む）
    pub fn to_path(&self) -> Result<PatrolPath, ConfigurationError> {
        let (path, loops) = match self {
            PatrolConfig::Rectangle {
                side_m,
                speed_mps,
                start_s,
                loops,
            } => (PatrolPath::rectangle(*side_m, *speed_mps, *start_s)?, *loops),
            PatrolConfig::ControlPoints {
                control_points,
                period_s,
                loops,
            } => {
                let points = control_points
                    .iter()
                    .map(|p| ControlPoint {
                        at_s: p.at_s,
                        velocity: p.velocity.into(),
                    })
                    .collect();
                (PatrolPath::from_control_points(points, *period_s)?, *loops)
            }
        };

        if loops == 0 {
            return Err(ConfigurationError::InvalidLoopCount(loops));
        }
        if loops > 1 {
            let repeated = path.repeated(loops);
            repeated.validate()?;
            Ok(repeated)
        } else {
            Ok(path)
        }
    }
}

/// 隊形切り替え設定
#[derive(Debug, Deserialize, Serialize)]
pub struct FormationSwitchConfig {
    pub at_s: f64,
    pub formation: FormationVariant,
}

/// 隊形オフセット設定（省略時は6機用の標準隊形）
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FormationsConfig {
    #[serde(default)]
    pub tight: Option<Vec<Position2D>>,
    #[serde(default)]
    pub wide: Option<Vec<Position2D>>,
}

impl FormationsConfig {
    pub fn tight_offsets(&self) -> FormationOffsets {
        match &self.tight {
            Some(offsets) => FormationOffsets::new(FormationVariant::Tight, offsets.iter().map(|&p| p.into()).collect()),
            None => FormationOffsets::default_tight(),
        }
    }

    pub fn wide_offsets(&self) -> FormationOffsets {
        match &self.wide {
            Some(offsets) => FormationOffsets::new(FormationVariant::Wide, offsets.iter().map(|&p| p.into()).collect()),
            None => FormationOffsets::default_wide(),
        }
    }
}

/// 群れ設定
#[derive(Debug, Deserialize, Serialize)]
pub struct SwarmConfig {
    pub leader: NodeId,
    pub followers: Vec<NodeId>,
    pub start_position: Position2D,
    #[serde(default = "default_tick_period")]
    pub tick_period_s: f64,
    #[serde(default = "default_first_tick")]
    pub first_tick_s: f64,
    #[serde(default = "default_formation")]
    pub initial_formation: FormationVariant,
    #[serde(default)]
    pub formations: FormationsConfig,
    #[serde(default)]
    pub switches: Vec<FormationSwitchConfig>,
    pub patrol: Option<PatrolConfig>,
}

fn default_tick_period() -> f64 {
    2.0
}

fn default_first_tick() -> f64 {
    1.0
}

fn default_formation() -> FormationVariant {
    FormationVariant::Tight
}

/// 攻撃ノード設定
#[derive(Debug, Deserialize, Serialize)]
pub struct AdversaryConfig {
    pub node: NodeId,
    /// none / deterministic-drop (blackhole) / probabilistic-drop (grayhole)
    pub policy: String,
    #[serde(default)]
    pub probability: Option<f64>,
    /// 攻撃の有効化時刻（秒）
    #[serde(default)]
    pub activate_at_s: f64,
}

impl AdversaryConfig {
    pub fn to_policy(&self) -> Result<DropPolicy, ConfigurationError> {
        DropPolicy::from_kind(&self.policy, self.probability)
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TrafficConfig {
    #[serde(default)]
    pub flows: Vec<FlowSpec>,
}

/// 出力設定
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    /// フロー記録のJSON出力先
    #[serde(default)]
    pub flows_file: Option<String>,
    #[serde(default)]
    pub report_title: Option<String>,
}

/// 完全なシナリオ設定
#[derive(Debug, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub nodes: NodesConfig,
    #[serde(default)]
    pub swarm: Option<SwarmConfig>,
    #[serde(default)]
    pub adversaries: Vec<AdversaryConfig>,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        // ファイル読み込み
        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        // YAML解析
        let config: ScenarioConfig =
            serde_yaml::from_str(&contents).map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        // 基本的な検証
        config.validate()?;

        Ok(config)
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        // 時間設定の検証
        if !(self.sim.stop_time_s > 0.0) {
            return Err(ScenarioError::ValidationError("stop_time_s must be positive".to_string()));
        }
        if !(self.sim.per_hop_delay_s > 0.0) {
            return Err(ScenarioError::ValidationError("per_hop_delay_s must be positive".to_string()));
        }

        // ノード数の検証
        if self.nodes.count == 0 {
            return Err(ScenarioError::ValidationError("nodes.count must be positive".to_string()));
        }
        if self.nodes.positions.len() > self.nodes.count as usize {
            return Err(ScenarioError::ValidationError(format!(
                "{} positions given for {} nodes",
                self.nodes.positions.len(),
                self.nodes.count
            )));
        }

        // 群れ設定の検証
        if let Some(swarm) = &self.swarm {
            for id in std::iter::once(&swarm.leader).chain(swarm.followers.iter()) {
                self.check_node(*id)?;
            }
            if let Some(patrol) = &swarm.patrol {
                patrol.to_path()?;
            }
            for switch in &swarm.switches {
                if !is_valid_time(switch.at_s) {
                    return Err(ScenarioError::ValidationError(format!(
                        "formation switch at {}s is before simulation start",
                        switch.at_s
                    )));
                }
            }
        }

        // 移動モデルの検証
        if let Some(MobilityConfig::RandomWaypoint(params)) = &self.nodes.mobility {
            params.validate()?;
        }

        // 攻撃ノードの検証（1ノードにつき1エントリ）
        let mut adversary_nodes = HashSet::new();
        for adversary in &self.adversaries {
            self.check_node(adversary.node)?;
            if !adversary_nodes.insert(adversary.node) {
                return Err(ConfigurationError::DuplicateAdversary(adversary.node).into());
            }
            adversary.to_policy()?;
            if !is_valid_time(adversary.activate_at_s) {
                return Err(ScenarioError::ValidationError(format!(
                    "adversary {} activates before simulation start",
                    adversary.node
                )));
            }
        }

        // フローの検証
        for flow in &self.traffic.flows {
            for id in [flow.source, flow.destination].iter().chain(flow.relays.iter()) {
                self.check_node(*id)?;
            }
        }

        Ok(())
    }

    /// 位置が明示的に指定されているか
    pub fn has_explicit_position(&self, id: NodeId) -> bool {
        id.index() < self.nodes.positions.len()
    }

    fn check_node(&self, id: NodeId) -> Result<(), ConfigurationError> {
        if id.0 < self.nodes.count {
            Ok(())
        } else {
            Err(ConfigurationError::UnknownNode(id))
        }
    }

    /// 全ノードの初期位置
    pub fn initial_positions(&self) -> Vec<Position3D> {
        (0..self.nodes.count as usize)
            .map(|i| {
                self.nodes
                    .positions
                    .get(i)
                    .map(|&p| Position3D::from(p))
                    .unwrap_or_default()
            })
            .collect()
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("停止時刻: {:.1}秒", self.sim.stop_time_s);
        println!("ホップ遅延: {:.4}秒", self.sim.per_hop_delay_s);
        println!("シード値: {}", self.sim.seed);
        println!("ノード数: {}", self.nodes.count);
        if let Some(MobilityConfig::RandomWaypoint(params)) = &self.nodes.mobility {
            println!(
                "移動モデル: ランダムウェイポイント ({:.1}〜{:.1}m/s, 停止 {:.1}秒, 範囲 {:.0}x{:.0}m)",
                params.min_speed_mps,
                params.max_speed_mps,
                params.pause_s,
                params.area.x_max_m - params.area.x_min_m,
                params.area.y_max_m - params.area.y_min_m
            );
        }
        println!();

        if let Some(swarm) = &self.swarm {
            println!("=== 群れ ===");
            println!("リーダー: {}", swarm.leader);
            println!("追従ノード: {}機", swarm.followers.len());
            println!("更新周期: {:.1}秒 (初回: {:.1}秒)", swarm.tick_period_s, swarm.first_tick_s);
            println!("初期隊形: {}", swarm.initial_formation);
            for switch in &swarm.switches {
                println!("  {:.1}秒: {} 隊形へ切り替え", switch.at_s, switch.formation);
            }
            println!();
        }

        println!("=== 攻撃ノード ===");
        if self.adversaries.is_empty() {
            println!("なし");
        }
        for adversary in &self.adversaries {
            match adversary.probability {
                Some(p) => println!(
                    "  {}: {} (p={:.2}, 有効化: {:.1}秒)",
                    adversary.node, adversary.policy, p, adversary.activate_at_s
                ),
                None => println!(
                    "  {}: {} (有効化: {:.1}秒)",
                    adversary.node, adversary.policy, adversary.activate_at_s
                ),
            }
        }
        println!();

        println!("=== トラフィック ===");
        println!("フロー数: {}", self.traffic.flows.len());
        for flow in &self.traffic.flows {
            println!(
                "  flow {}: {} -> {} (中継 {}ホップ, {}B / {:.1}秒)",
                flow.id,
                flow.source,
                flow.destination,
                flow.relays.len(),
                flow.packet_size_bytes,
                flow.interval_s
            );
        }
    }
}

/// 非負の有限時刻か（NaNは不可）
fn is_valid_time(at_s: f64) -> bool {
    at_s.is_finite() && at_s >= 0.0
}
