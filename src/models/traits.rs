use crate::error::ConfigurationError;
use crate::models::adversary::{ForwardDecision, PacketMeta};
use crate::models::common::*;

/// 移動可能なエージェントのインターフェース
pub trait IMovable {
    /// 等速運動による移動処理
    fn move_agent(&mut self, dt: f64);

    /// 現在位置の取得
    fn get_position(&self) -> Position3D;

    /// 現在速度の取得
    fn get_velocity(&self) -> Velocity3D;

    /// 位置の設定
    fn set_position(&mut self, position: Position3D);

    /// 速度の設定
    fn set_velocity(&mut self, velocity: Velocity3D);
}

/// 受信パケットの転送判定インターフェース
///
/// ノードのインターフェース境界で、プロトコルスタックへ渡す前に呼び出されます。
pub trait IForwarder {
    /// 受信パケットを受理するか破棄するかを判定
    fn forward(&mut self, packet: &PacketMeta) -> ForwardDecision;
}

/// ノード位置・速度の登録簿インターフェース
///
/// 群れ制御はこのインターフェース経由でのみノード状態に触れます。
pub trait INodeRegistry {
    /// ノード位置の取得
    fn position(&self, id: NodeId) -> Result<Position3D, ConfigurationError>;

    /// ノード位置の設定
    fn set_position(&mut self, id: NodeId, position: Position3D) -> Result<(), ConfigurationError>;

    /// ノード速度の取得
    fn velocity(&self, id: NodeId) -> Result<Velocity3D, ConfigurationError>;

    /// ノード速度の設定
    fn set_velocity(&mut self, id: NodeId, velocity: Velocity3D) -> Result<(), ConfigurationError>;

    /// ノードが存在するかどうか
    fn contains(&self, id: NodeId) -> bool;
}
