use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::ConfigurationError;
use crate::models::common::NodeId;

/// 64ビット黄金比定数（ノード毎の乱数シード分散用）
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

/// パケット破棄ポリシー
///
/// 攻撃はパケット転送境界でのみ表現され、悪意あるノードも経路制御には
/// 通常通り参加します。そのため近隣ノードからは実際にトラフィックが
/// 流れるまで攻撃を観測できません。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DropPolicy {
    /// 通常転送
    None,
    /// 全パケット破棄（ブラックホール）
    DeterministicDrop,
    /// 確率 p で破棄（グレイホール）
    ProbabilisticDrop { probability: f64 },
}

impl DropPolicy {
    /// 破棄確率を検証してグレイホールポリシーを作成
    pub fn probabilistic(probability: f64) -> Result<Self, ConfigurationError> {
        if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
            return Err(ConfigurationError::InvalidDropProbability(probability));
        }
        Ok(DropPolicy::ProbabilisticDrop { probability })
    }

    /// シナリオファイルのポリシー名からポリシーを作成
    ///
    /// 未知のポリシー名はここで構成エラーとなり、判定時には決して失敗しません。
    pub fn from_kind(kind: &str, probability: Option<f64>) -> Result<Self, ConfigurationError> {
        match kind.to_lowercase().as_str() {
            "none" => Ok(DropPolicy::None),
            "deterministic-drop" | "blackhole" => Ok(DropPolicy::DeterministicDrop),
            "probabilistic-drop" | "grayhole" => {
                let p = probability.ok_or_else(|| ConfigurationError::MissingProbability(kind.to_string()))?;
                DropPolicy::probabilistic(p)
            }
            _ => Err(ConfigurationError::UnknownPolicy(kind.to_string())),
        }
    }

    /// 設定済みポリシーの再検証（デシリアライズ経由で作られた値向け）
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let DropPolicy::ProbabilisticDrop { probability } = *self {
            DropPolicy::probabilistic(probability)?;
        }
        Ok(())
    }

    pub fn label(&self) -> &'static str {
        match self {
            DropPolicy::None => "none",
            DropPolicy::DeterministicDrop => "blackhole",
            DropPolicy::ProbabilisticDrop { .. } => "grayhole",
        }
    }
}

/// 転送判定の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDecision {
    Accept,
    Drop,
}

/// 判定に渡されるパケットのメタデータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketMeta {
    pub flow_id: u32,
    pub sequence: u64,
    pub source: NodeId,
    pub destination: NodeId,
    pub size_bytes: u32,
    /// 送信元での送信時刻（秒）
    pub sent_at: f64,
    /// 受信ノードへの到着時刻（秒）
    pub arrived_at: f64,
}

/// ポリシーの有効化状態
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolicyState {
    /// ポリシー未設定
    Unattached,
    /// 設定済みだが未有効化（通常転送）
    Pending(DropPolicy),
    /// 有効化済み
    Active { policy: DropPolicy, since_s: f64 },
}

/// ノードに付与される転送振る舞い
///
/// 乱数はノード毎に独立したSmallRngを持ち、シードは
/// `global_seed XOR (node_id * MIXING_CONSTANT)` で決まります。
#[derive(Debug, Clone)]
pub struct ForwardingBehavior {
    pub node_id: NodeId,
    pub state: PolicyState,
    rng: SmallRng,
    pub accepted: u64,
    pub dropped: u64,
}

impl ForwardingBehavior {
    pub fn new(node_id: NodeId, global_seed: u64) -> Self {
        let seed = global_seed ^ (node_id.0 as u64).wrapping_mul(MIXING_CONSTANT);
        Self {
            node_id,
            state: PolicyState::Unattached,
            rng: SmallRng::seed_from_u64(seed),
            accepted: 0,
            dropped: 0,
        }
    }

    /// 有効化待ちのポリシーを設定
    pub fn attach(&mut self, policy: DropPolicy) -> Result<(), ConfigurationError> {
        policy.validate()?;
        if let PolicyState::Active { .. } = self.state {
            return Err(ConfigurationError::PolicyAlreadyActive(self.node_id));
        }
        self.state = PolicyState::Pending(policy);
        Ok(())
    }

    /// 待機中のポリシーを有効化
    ///
    /// 遷移は一度きりで、無効化はありません。遷移した場合にtrueを返します。
    pub fn activate(&mut self, now: f64) -> bool {
        match self.state {
            PolicyState::Pending(policy) => {
                self.state = PolicyState::Active { policy, since_s: now };
                warn!(
                    node_id = %self.node_id,
                    time_s = now,
                    policy = policy.label(),
                    "ATTACK_ACTIVATED: 悪意あるノードの攻撃が有効化されました"
                );
                true
            }
            _ => false,
        }
    }

    /// 現在有効なポリシー
    pub fn active_policy(&self) -> Option<DropPolicy> {
        match self.state {
            PolicyState::Active { policy, .. } => Some(policy),
            _ => None,
        }
    }

    /// 受信パケットの受理・破棄判定
    ///
    /// 有効化前はポリシーに関わらず受理します。グレイホールは毎回独立に
    /// [0,1) の一様乱数を1回引き、p 未満なら破棄します。
    pub fn decide(&mut self, packet: &PacketMeta) -> ForwardDecision {
        let decision = match self.active_policy() {
            None | Some(DropPolicy::None) => ForwardDecision::Accept,
            Some(DropPolicy::DeterministicDrop) => ForwardDecision::Drop,
            Some(DropPolicy::ProbabilisticDrop { probability }) => {
                let sample: f64 = self.rng.r#gen();
                if sample < probability {
                    ForwardDecision::Drop
                } else {
                    ForwardDecision::Accept
                }
            }
        };

        match decision {
            ForwardDecision::Accept => self.accepted += 1,
            ForwardDecision::Drop => {
                self.dropped += 1;
                trace!(
                    node_id = %self.node_id,
                    flow_id = packet.flow_id,
                    sequence = packet.sequence,
                    time_s = packet.arrived_at,
                    "PACKET_DROPPED: パケットを破棄しました"
                );
            }
        }

        decision
    }
}
