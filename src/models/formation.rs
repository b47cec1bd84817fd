use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigurationError;
use crate::models::{
    common::{NodeId, Position3D, Velocity3D},
    patrol::PatrolPath,
    traits::INodeRegistry,
};
use crate::scheduler::{EventQueue, SimEvent};

/// 隊形の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormationVariant {
    /// 密集隊形
    Tight,
    /// 散開隊形
    Wide,
}

impl fmt::Display for FormationVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormationVariant::Tight => write!(f, "tight"),
            FormationVariant::Wide => write!(f, "wide"),
        }
    }
}

/// 隊形のオフセット集合
///
/// 追従ノードの順位（ノードIDではない）毎に、リーダー位置からの相対位置を1つ持ちます。
#[derive(Debug, Clone, PartialEq)]
pub struct FormationOffsets {
    pub variant: FormationVariant,
    pub offsets: Vec<Position3D>,
}

impl FormationOffsets {
    pub fn new(variant: FormationVariant, offsets: Vec<Position3D>) -> Self {
        Self { variant, offsets }
    }

    /// 6機用の標準密集隊形（リーダーから30〜40m）
    pub fn default_tight() -> Self {
        Self::new(
            FormationVariant::Tight,
            vec![
                Position3D::planar(-40.0, 0.0),
                Position3D::planar(40.0, 0.0),
                Position3D::planar(0.0, 40.0),
                Position3D::planar(0.0, -40.0),
                Position3D::planar(-30.0, 30.0),
                Position3D::planar(30.0, -30.0),
            ],
        )
    }

    /// 6機用の標準散開隊形（リーダーから65〜90m）
    pub fn default_wide() -> Self {
        Self::new(
            FormationVariant::Wide,
            vec![
                Position3D::planar(-90.0, 0.0),
                Position3D::planar(90.0, 0.0),
                Position3D::planar(0.0, 90.0),
                Position3D::planar(0.0, -90.0),
                Position3D::planar(-65.0, 65.0),
                Position3D::planar(65.0, -65.0),
            ],
        )
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// 群れの隊形・巡回制御
///
/// 追従ノードは独自の運動モデルを持たず、位置は `on_follower_tick` でのみ更新されます。
/// そのため追従ノードの位置は常にティック周期分だけリーダーから遅れます。
#[derive(Debug, Clone)]
pub struct FormationController {
    /// リーダーノード
    pub leader: NodeId,
    /// 順位順の追従ノード（セットアップ時に固定）
    pub followers: Vec<NodeId>,
    /// 追従位置更新の周期（秒）
    pub tick_period_s: f64,
    tight: FormationOffsets,
    wide: FormationOffsets,
    active: FormationVariant,
    tick_count: u64,
}

impl FormationController {
    /// 隊形制御を作成
    ///
    /// 両隊形のオフセット数が追従ノード数と一致しない場合は構成エラーになります。
    pub fn new(
        leader: NodeId,
        followers: Vec<NodeId>,
        tight: FormationOffsets,
        wide: FormationOffsets,
        initial: FormationVariant,
        tick_period_s: f64,
    ) -> Result<Self, ConfigurationError> {
        if !(tick_period_s > 0.0) || !tick_period_s.is_finite() {
            return Err(ConfigurationError::InvalidTickPeriod(tick_period_s));
        }

        let mut seen = HashSet::new();
        for id in std::iter::once(&leader).chain(followers.iter()) {
            if !seen.insert(*id) {
                return Err(ConfigurationError::DuplicateSwarmMember(*id));
            }
        }

        for (variant, set) in [(FormationVariant::Tight, &tight), (FormationVariant::Wide, &wide)] {
            if set.len() != followers.len() {
                return Err(ConfigurationError::FormationSize {
                    variant,
                    expected: followers.len(),
                    got: set.len(),
                });
            }
        }

        Ok(Self {
            leader,
            followers,
            tick_period_s,
            tight,
            wide,
            active: initial,
            tick_count: 0,
        })
    }

    /// 群れの全メンバーが登録簿に存在するか検証
    pub fn validate_members(&self, registry: &impl INodeRegistry) -> Result<(), ConfigurationError> {
        for id in std::iter::once(&self.leader).chain(self.followers.iter()) {
            if !registry.contains(*id) {
                return Err(ConfigurationError::UnknownNode(*id));
            }
        }
        Ok(())
    }

    /// 現在有効な隊形
    pub fn active_variant(&self) -> FormationVariant {
        self.active
    }

    /// 現在有効な隊形のオフセット
    pub fn active_offsets(&self) -> &[Position3D] {
        match self.active {
            FormationVariant::Tight => &self.tight.offsets,
            FormationVariant::Wide => &self.wide.offsets,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// リーダーの巡回軌道を設定
    ///
    /// 制御点の検証が成功した後にのみ、リーダーを初期位置に置き、
    /// 制御点毎の速度変更イベントを登録します。
    pub fn initialize_leader_trajectory(
        &self,
        path: &PatrolPath,
        start_position: Position3D,
        registry: &mut impl INodeRegistry,
        queue: &mut EventQueue<SimEvent>,
    ) -> Result<(), ConfigurationError> {
        path.validate()?;
        if !registry.contains(self.leader) {
            return Err(ConfigurationError::UnknownNode(self.leader));
        }

        registry.set_position(self.leader, start_position)?;
        for point in &path.control_points {
            queue.schedule_at(point.at_s, SimEvent::SetLeaderVelocity(point.velocity));
        }

        info!(
            leader_id = %self.leader,
            start = %start_position,
            control_points = path.control_points.len(),
            period_s = path.period_s,
            "PATROL_INITIALIZED: リーダーの巡回軌道を設定しました"
        );
        Ok(())
    }

    /// 追従位置更新を繰り返しタイマーとして登録
    pub fn register_tick(&self, first_tick_s: f64, queue: &mut EventQueue<SimEvent>) {
        queue.schedule_repeating(first_tick_s, self.tick_period_s, SimEvent::FollowerTick);
    }

    /// リーダー速度の変更
    pub fn set_leader_velocity(
        &self,
        registry: &mut impl INodeRegistry,
        velocity: Velocity3D,
    ) -> Result<(), ConfigurationError> {
        registry.set_velocity(self.leader, velocity)
    }

    /// 追従ノード位置の更新
    ///
    /// リーダー位置を一度だけ読み、全順位 i について `leader + offsets[i]` を設定します。
    pub fn on_follower_tick(&mut self, registry: &mut impl INodeRegistry) -> Result<(), ConfigurationError> {
        let leader_position = registry.position(self.leader)?;
        let offsets = match self.active {
            FormationVariant::Tight => &self.tight.offsets,
            FormationVariant::Wide => &self.wide.offsets,
        };

        for (follower, offset) in self.followers.iter().zip(offsets.iter()) {
            registry.set_position(*follower, leader_position + *offset)?;
        }
        self.tick_count += 1;

        debug!(
            leader_x = leader_position.x,
            leader_y = leader_position.y,
            formation = %self.active,
            tick = self.tick_count,
            "FOLLOWER_TICK: 追従ノード位置を更新しました"
        );
        Ok(())
    }

    /// 隊形の切り替え
    ///
    /// 有効な隊形の列挙値を置き換えるだけで、次回ティックから反映されます。
    pub fn switch_formation(&mut self, variant: FormationVariant) {
        if self.active != variant {
            info!(
                from = %self.active,
                to = %variant,
                "FORMATION_SWITCH: 隊形を切り替えました"
            );
        }
        self.active = variant;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::node::NodeTable;

    fn swarm() -> (FormationController, NodeTable) {
        let table = NodeTable::new(&[Position3D::default(); 7], 0);
        let controller = FormationController::new(
            NodeId(0),
            (1..7).map(NodeId).collect(),
            FormationOffsets::default_tight(),
            FormationOffsets::default_wide(),
            FormationVariant::Tight,
            2.0,
        )
        .unwrap();
        (controller, table)
    }

    #[test]
    fn test_tick_places_followers_at_offsets() {
        let (mut controller, mut table) = swarm();
        table.set_position(NodeId(0), Position3D::planar(100.0, 50.0)).unwrap();
        controller.on_follower_tick(&mut table).unwrap();

        let offsets = FormationOffsets::default_tight().offsets;
        for (rank, id) in controller.followers.iter().enumerate() {
            assert_eq!(
                table.position(*id).unwrap(),
                Position3D::planar(100.0, 50.0) + offsets[rank]
            );
        }
    }

    #[test]
    fn test_followers_lag_until_next_tick() {
        let (mut controller, mut table) = swarm();
        table.set_velocity(NodeId(0), Velocity3D::new(10.0, 0.0, 0.0)).unwrap();
        controller.on_follower_tick(&mut table).unwrap();
        table.advance(2.0);

        // リーダーは移動済みだが追従ノードは前回ティックの位置のまま
        assert_eq!(table.position(NodeId(0)).unwrap(), Position3D::planar(20.0, 0.0));
        assert_eq!(table.position(NodeId(1)).unwrap(), Position3D::planar(-40.0, 0.0));

        controller.on_follower_tick(&mut table).unwrap();
        assert_eq!(table.position(NodeId(1)).unwrap(), Position3D::planar(-20.0, 0.0));
    }

    #[test]
    fn test_switch_takes_effect_on_next_tick() {
        let (mut controller, mut table) = swarm();
        controller.on_follower_tick(&mut table).unwrap();
        controller.switch_formation(FormationVariant::Wide);
        assert_eq!(table.position(NodeId(2)).unwrap(), Position3D::planar(40.0, 0.0));

        controller.on_follower_tick(&mut table).unwrap();
        assert_eq!(table.position(NodeId(2)).unwrap(), Position3D::planar(90.0, 0.0));
    }

    #[test]
    fn test_switch_is_idempotent_within_tick() {
        let (mut once, mut table_once) = swarm();
        let (mut twice, mut table_twice) = swarm();
        table_once.set_position(NodeId(0), Position3D::planar(7.0, 3.0)).unwrap();
        table_twice.set_position(NodeId(0), Position3D::planar(7.0, 3.0)).unwrap();

        once.switch_formation(FormationVariant::Wide);
        twice.switch_formation(FormationVariant::Wide);
        twice.switch_formation(FormationVariant::Wide);
        once.on_follower_tick(&mut table_once).unwrap();
        twice.on_follower_tick(&mut table_twice).unwrap();

        for id in 1..7 {
            assert_eq!(
                table_once.position(NodeId(id)).unwrap(),
                table_twice.position(NodeId(id)).unwrap()
            );
        }
    }

    #[test]
    fn test_formation_size_mismatch() {
        let err = FormationController::new(
            NodeId(0),
            (1..4).map(NodeId).collect(),
            FormationOffsets::default_tight(),
            FormationOffsets::default_wide(),
            FormationVariant::Tight,
            2.0,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::FormationSize {
                variant: FormationVariant::Tight,
                expected: 3,
                got: 6
            }
        );
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let err = FormationController::new(
            NodeId(0),
            vec![NodeId(1), NodeId(0)],
            FormationOffsets::new(FormationVariant::Tight, vec![Position3D::default(); 2]),
            FormationOffsets::new(FormationVariant::Wide, vec![Position3D::default(); 2]),
            FormationVariant::Tight,
            2.0,
        )
        .unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateSwarmMember(NodeId(0)));
    }

    #[test]
    fn test_trajectory_schedules_control_points() {
        let (controller, mut table) = swarm();
        let mut queue = EventQueue::new();
        let path = PatrolPath::rectangle(300.0, 10.0, 0.0).unwrap();
        controller
            .initialize_leader_trajectory(&path, Position3D::planar(0.0, 0.0), &mut table, &mut queue)
            .unwrap();

        let times: Vec<f64> = std::iter::from_fn(|| queue.pop_until(1000.0)).map(|(t, _)| t).collect();
        assert_eq!(times, vec![0.0, 30.0, 60.0, 90.0]);
    }

    #[test]
    fn test_invalid_trajectory_leaves_no_state() {
        let (controller, mut table) = swarm();
        table.set_position(NodeId(0), Position3D::planar(5.0, 5.0)).unwrap();
        let mut queue = EventQueue::new();
        let mut path = PatrolPath::rectangle(300.0, 10.0, 0.0).unwrap();
        path.control_points[2].at_s = 20.0;

        let result = controller.initialize_leader_trajectory(&path, Position3D::default(), &mut table, &mut queue);
        assert!(matches!(result, Err(ConfigurationError::NonIncreasingControlPoints { .. })));
        assert!(queue.is_empty());
        assert_eq!(table.position(NodeId(0)).unwrap(), Position3D::planar(5.0, 5.0));
    }

    #[test]
    fn test_leader_closes_patrol_loop() {
        let (controller, mut table) = swarm();
        let mut queue = EventQueue::new();
        let path = PatrolPath::rectangle(300.0, 10.0, 0.0).unwrap();
        controller
            .initialize_leader_trajectory(&path, Position3D::default(), &mut table, &mut queue)
            .unwrap();

        let mut now = 0.0;
        while let Some((at, event)) = queue.pop_until(120.0) {
            table.advance(at - now);
            now = at;
            if let SimEvent::SetLeaderVelocity(v) = event {
                controller.set_leader_velocity(&mut table, v).unwrap();
            }
        }
        table.advance(120.0 - now);

        let end = table.position(NodeId(0)).unwrap();
        assert!(end.magnitude() < 1e-9, "leader ended at {end}");
    }
}
