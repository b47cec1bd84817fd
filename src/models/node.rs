use crate::error::ConfigurationError;
use crate::models::{
    adversary::{DropPolicy, ForwardDecision, ForwardingBehavior, PacketMeta},
    common::{NodeId, NodeRole, Position3D, Velocity3D},
    mobility::{RandomWaypoint, RandomWaypointParams},
    traits::{IForwarder, IMovable, INodeRegistry},
};

/// MANETノード
///
/// シミュレーション開始時に一度だけ生成され、破棄されることはありません。
/// 攻撃的振る舞いはノード自身の転送判定として保持されます。
#[derive(Debug, Clone)]
pub struct Node {
    /// ノードの一意識別子
    pub id: NodeId,
    /// 現在位置
    pub position: Position3D,
    /// 現在速度
    pub velocity: Velocity3D,
    /// 群れにおける役割
    pub role: NodeRole,
    /// 受信パケットの転送振る舞い
    pub behavior: ForwardingBehavior,
    /// 自律移動モデル（未設定なら等速直線運動）
    pub mobility: Option<RandomWaypoint>,
}

impl Node {
    pub fn new(id: NodeId, position: Position3D, global_seed: u64) -> Self {
        Self {
            id,
            position,
            velocity: Velocity3D::zero(),
            role: NodeRole::Plain,
            behavior: ForwardingBehavior::new(id, global_seed),
            mobility: None,
        }
    }

    /// 有効化待ちの破棄ポリシーを付与
    pub fn attach_policy(&mut self, policy: DropPolicy) -> Result<(), ConfigurationError> {
        self.behavior.attach(policy)
    }

    /// 破棄ポリシーを有効化
    pub fn activate(&mut self, now: f64) -> bool {
        self.behavior.activate(now)
    }
}

impl IMovable for Node {
    fn move_agent(&mut self, dt: f64) {
        match &mut self.mobility {
            Some(model) => {
                let (position, velocity) = model.step(self.position, dt);
                self.position = position;
                self.velocity = velocity;
            }
            // 等速直線運動
            None => self.position = self.position + self.velocity * dt,
        }
    }

    fn get_position(&self) -> Position3D {
        self.position
    }

    fn get_velocity(&self) -> Velocity3D {
        self.velocity
    }

    fn set_position(&mut self, position: Position3D) {
        self.position = position;
    }

    fn set_velocity(&mut self, velocity: Velocity3D) {
        self.velocity = velocity;
    }
}

impl IForwarder for Node {
    fn forward(&mut self, packet: &PacketMeta) -> ForwardDecision {
        self.behavior.decide(packet)
    }
}

/// ノード登録簿
///
/// ノードIDは0からの連番で、ベクタの添字と一致します。
/// 速度変更イベントの間の位置積分はこの登録簿が担当します。
#[derive(Debug, Clone)]
pub struct NodeTable {
    nodes: Vec<Node>,
    global_seed: u64,
}

impl NodeTable {
    /// 指定位置にノードを生成（ID = 添字）
    pub fn new(positions: &[Position3D], global_seed: u64) -> Self {
        let nodes = positions
            .iter()
            .enumerate()
            .map(|(i, position)| Node::new(NodeId(i as u32), *position, global_seed))
            .collect();
        Self { nodes, global_seed }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Result<&Node, ConfigurationError> {
        self.nodes.get(id.index()).ok_or(ConfigurationError::UnknownNode(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, ConfigurationError> {
        self.nodes.get_mut(id.index()).ok_or(ConfigurationError::UnknownNode(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// 全ノードを dt 秒だけ等速運動させる
    pub fn advance(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        for node in &mut self.nodes {
            node.move_agent(dt);
        }
    }

    /// ノードに有効化待ちの破棄ポリシーを付与
    pub fn attach_policy(&mut self, id: NodeId, policy: DropPolicy) -> Result<(), ConfigurationError> {
        self.get_mut(id)?.attach_policy(policy)
    }

    /// ノードにランダムウェイポイント移動を設定
    ///
    /// `place_randomly` の場合は初期位置も移動範囲内の乱数地点に置き直します。
    pub fn enable_random_waypoint(
        &mut self,
        id: NodeId,
        params: RandomWaypointParams,
        place_randomly: bool,
    ) -> Result<(), ConfigurationError> {
        params.validate()?;
        let global_seed = self.global_seed;
        let node = self.get_mut(id)?;
        let mut model = RandomWaypoint::new(params, id, global_seed);
        if place_randomly {
            node.position = model.random_position();
        }
        node.velocity = Velocity3D::zero();
        node.mobility = Some(model);
        Ok(())
    }

    /// ノードの破棄ポリシーを有効化（未登録IDの場合は何もしない）
    pub fn activate(&mut self, id: NodeId, now: f64) -> bool {
        self.nodes
            .get_mut(id.index())
            .map(|node| node.activate(now))
            .unwrap_or(false)
    }
}

impl INodeRegistry for NodeTable {
    fn position(&self, id: NodeId) -> Result<Position3D, ConfigurationError> {
        Ok(self.get(id)?.get_position())
    }

    fn set_position(&mut self, id: NodeId, position: Position3D) -> Result<(), ConfigurationError> {
        IMovable::set_position(self.get_mut(id)?, position);
        Ok(())
    }

    fn velocity(&self, id: NodeId) -> Result<Velocity3D, ConfigurationError> {
        Ok(self.get(id)?.get_velocity())
    }

    fn set_velocity(&mut self, id: NodeId, velocity: Velocity3D) -> Result<(), ConfigurationError> {
        IMovable::set_velocity(self.get_mut(id)?, velocity);
        Ok(())
    }

    fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_integrates_velocity() {
        let mut table = NodeTable::new(&[Position3D::planar(0.0, 0.0), Position3D::planar(5.0, 5.0)], 0);
        table.set_velocity(NodeId(0), Velocity3D::new(10.0, 0.0, 0.0)).unwrap();
        table.advance(3.0);
        assert_eq!(table.position(NodeId(0)).unwrap(), Position3D::planar(30.0, 0.0));
        assert_eq!(table.position(NodeId(1)).unwrap(), Position3D::planar(5.0, 5.0));
    }

    #[test]
    fn test_waypoint_nodes_move_on_their_own() {
        use crate::models::mobility::WaypointArea;

        let params = RandomWaypointParams {
            min_speed_mps: 1.0,
            max_speed_mps: 5.0,
            pause_s: 1.0,
            area: WaypointArea {
                x_min_m: 0.0,
                x_max_m: 300.0,
                y_min_m: 0.0,
                y_max_m: 300.0,
            },
        };
        let mut table = NodeTable::new(&[Position3D::planar(1000.0, 1000.0), Position3D::default()], 3);
        table.enable_random_waypoint(NodeId(0), params, true).unwrap();

        let placed = table.position(NodeId(0)).unwrap();
        assert!(params.area.contains(&placed));

        table.advance(20.0);
        let moved = table.position(NodeId(0)).unwrap();
        assert_ne!(moved, placed);
        assert!(params.area.contains(&moved));
        assert_eq!(table.position(NodeId(1)).unwrap(), Position3D::default());
    }

    #[test]
    fn test_unknown_node() {
        let mut table = NodeTable::new(&[Position3D::default()], 0);
        assert_eq!(
            table.position(NodeId(9)),
            Err(ConfigurationError::UnknownNode(NodeId(9)))
        );
        assert!(table.attach_policy(NodeId(9), DropPolicy::DeterministicDrop).is_err());
        assert!(!table.activate(NodeId(9), 1.0));
    }

    #[test]
    fn test_node_forward_uses_attached_policy() {
        let mut table = NodeTable::new(&[Position3D::default(); 3], 1);
        table.attach_policy(NodeId(1), DropPolicy::DeterministicDrop).unwrap();
        let packet = PacketMeta {
            flow_id: 0,
            sequence: 0,
            source: NodeId(2),
            destination: NodeId(0),
            size_bytes: 64,
            sent_at: 0.0,
            arrived_at: 0.0,
        };

        let relay = table.get_mut(NodeId(1)).unwrap();
        assert_eq!(relay.forward(&packet), ForwardDecision::Accept);
        assert!(table.activate(NodeId(1), 5.0));
        let relay = table.get_mut(NodeId(1)).unwrap();
        assert_eq!(relay.forward(&packet), ForwardDecision::Drop);
    }
}
