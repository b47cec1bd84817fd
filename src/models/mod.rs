// 基本的なデータ型
pub mod common;

// エージェントの基本インターフェース（trait）定義
pub mod traits;

// 各モデルの実装
pub mod node;
pub mod mobility;
pub mod patrol;
pub mod formation;
pub mod adversary;
pub mod traffic;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use node::{Node, NodeTable};
pub use mobility::{RandomWaypoint, RandomWaypointParams, WaypointArea};
pub use patrol::{ControlPoint, PatrolPath};
pub use formation::{FormationController, FormationOffsets, FormationVariant};
pub use adversary::{DropPolicy, ForwardDecision, ForwardingBehavior, PacketMeta, PolicyState};
pub use traffic::{FlowSpec, InFlightPacket, TrafficModel};
