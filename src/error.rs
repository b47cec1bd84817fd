//! # Error モジュール
//!
//! セットアップ時に検出される構成エラーと、シナリオファイル読み込みエラーを定義します。
//! どちらもイベント実行中には発生せず、初期化段階で同期的に返されます。

use std::path::PathBuf;

use thiserror::Error;

use crate::models::{FormationVariant, NodeId};

/// 群れ制御・攻撃モデル・トラフィック設定の構成エラー
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("patrol control point {index} at {at_s}s does not come after the previous point at {previous_s}s")]
    NonIncreasingControlPoints {
        index: usize,
        at_s: f64,
        previous_s: f64,
    },

    #[error("patrol path has no control points")]
    EmptyPatrolPath,

    #[error("patrol control point {index} has invalid time {at_s}")]
    InvalidControlPointTime { index: usize, at_s: f64 },

    #[error("patrol side {side_m}m and speed {speed_mps}m/s must both be positive")]
    InvalidPatrolGeometry { side_m: f64, speed_mps: f64 },

    #[error("patrol period {period_s}s must be positive and longer than the control point span {span_s}s")]
    InvalidPatrolPeriod { period_s: f64, span_s: f64 },

    #[error("patrol loop count must be at least 1 (got {0})")]
    InvalidLoopCount(u32),

    #[error("random waypoint model: {0}")]
    InvalidWaypointModel(String),

    #[error("drop probability {0} is outside [0, 1]")]
    InvalidDropProbability(f64),

    #[error("unrecognized drop policy '{0}'")]
    UnknownPolicy(String),

    #[error("drop policy '{0}' requires a probability")]
    MissingProbability(String),

    #[error("node {0} already has an active drop policy")]
    PolicyAlreadyActive(NodeId),

    #[error("node {0} is listed as an adversary more than once")]
    DuplicateAdversary(NodeId),

    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("{variant:?} formation has {got} offsets but the swarm has {expected} followers")]
    FormationSize {
        variant: FormationVariant,
        expected: usize,
        got: usize,
    },

    #[error("node {0} is assigned more than one swarm role")]
    DuplicateSwarmMember(NodeId),

    #[error("tick period {0}s must be positive")]
    InvalidTickPeriod(f64),

    #[error("flow {flow_id}: {reason}")]
    InvalidFlow { flow_id: u32, reason: String },
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),

    #[error("設定検証エラー: {0}")]
    ValidationError(String),

    #[error("構成エラー: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// フロー記録ファイルの入出力エラー
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("フロー記録ファイルの入出力エラー {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("フロー記録のJSON変換エラー {}: {}", .0.display(), .1)]
    Json(PathBuf, #[source] serde_json::Error),
}
