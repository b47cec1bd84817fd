use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::models::common::{NodeId, Position3D, Velocity3D};

/// 64ビット黄金比定数（ノード毎の乱数シード分散用）
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

/// 転送判定の乱数系列と分離するための定数
const MOBILITY_STREAM: u64 = 0x6d6f_6269_6c69_7479;

/// 移動範囲（XY平面の矩形）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaypointArea {
    pub x_min_m: f64,
    pub x_max_m: f64,
    pub y_min_m: f64,
    pub y_max_m: f64,
}

impl WaypointArea {
    pub fn contains(&self, position: &Position3D) -> bool {
        (self.x_min_m..=self.x_max_m).contains(&position.x) && (self.y_min_m..=self.y_max_m).contains(&position.y)
    }
}

/// ランダムウェイポイントのパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomWaypointParams {
    pub min_speed_mps: f64,
    pub max_speed_mps: f64,
    /// 到着後の停止時間（秒）
    pub pause_s: f64,
    pub area: WaypointArea,
}

impl RandomWaypointParams {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| Err(ConfigurationError::InvalidWaypointModel(reason.to_string()));

        if !self.min_speed_mps.is_finite() || !(self.min_speed_mps > 0.0) {
            return invalid("minimum speed must be positive");
        }
        if !self.max_speed_mps.is_finite() || self.max_speed_mps < self.min_speed_mps {
            return invalid("maximum speed must not be below the minimum speed");
        }
        if !self.pause_s.is_finite() || !(self.pause_s > 0.0) {
            return invalid("pause must be positive");
        }
        let area = &self.area;
        let bounds = [area.x_min_m, area.x_max_m, area.y_min_m, area.y_max_m];
        if bounds.iter().any(|b| !b.is_finite()) || !(area.x_max_m > area.x_min_m) || !(area.y_max_m > area.y_min_m) {
            return invalid("area must have positive width and height");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum WaypointPhase {
    /// 停止中（残り時間）
    Paused { remaining_s: f64 },
    /// 目標地点へ移動中
    Moving { target: Position3D, speed_mps: f64 },
}

/// ノード毎のランダムウェイポイント移動
///
/// 停止から始まり、停止時間経過後に範囲内の一様乱数地点と一様乱数速度を選んで
/// 直進します。到着すると再び停止します。速度変更は `step` の区間内で厳密に
/// 処理されるため、イベントを追加登録する必要はありません。
#[derive(Debug, Clone)]
pub struct RandomWaypoint {
    params: RandomWaypointParams,
    phase: WaypointPhase,
    rng: SmallRng,
    legs: u64,
}

impl RandomWaypoint {
    pub fn new(params: RandomWaypointParams, node_id: NodeId, global_seed: u64) -> Self {
        let seed = global_seed ^ MOBILITY_STREAM ^ (node_id.0 as u64).wrapping_mul(MIXING_CONSTANT);
        Self {
            params,
            phase: WaypointPhase::Paused {
                remaining_s: params.pause_s,
            },
            rng: SmallRng::seed_from_u64(seed),
            legs: 0,
        }
    }

    pub fn params(&self) -> &RandomWaypointParams {
        &self.params
    }

    /// 開始した移動区間の数
    pub fn legs(&self) -> u64 {
        self.legs
    }

    /// 移動範囲内の一様乱数地点
    pub fn random_position(&mut self) -> Position3D {
        let area = self.params.area;
        Position3D::planar(
            self.rng.gen_range(area.x_min_m..=area.x_max_m),
            self.rng.gen_range(area.y_min_m..=area.y_max_m),
        )
    }

    fn begin_leg(&mut self) {
        let target = self.random_position();
        let speed_mps = if self.params.max_speed_mps > self.params.min_speed_mps {
            self.rng.gen_range(self.params.min_speed_mps..self.params.max_speed_mps)
        } else {
            self.params.min_speed_mps
        };
        self.phase = WaypointPhase::Moving { target, speed_mps };
        self.legs += 1;
    }

    /// `position` から dt 秒進めた位置と、区間終了時点の速度を返す
    pub fn step(&mut self, position: Position3D, dt: f64) -> (Position3D, Velocity3D) {
        let mut position = position;
        let mut velocity = Velocity3D::zero();
        let mut remaining = dt;

        while remaining > 0.0 {
            match self.phase {
                WaypointPhase::Paused { remaining_s } => {
                    velocity = Velocity3D::zero();
                    if remaining < remaining_s {
                        self.phase = WaypointPhase::Paused {
                            remaining_s: remaining_s - remaining,
                        };
                        remaining = 0.0;
                    } else {
                        remaining -= remaining_s;
                        self.begin_leg();
                    }
                }
                WaypointPhase::Moving { target, speed_mps } => {
                    let distance = position.distance_xy(&target);
                    let arrival_s = distance / speed_mps;
                    if remaining < arrival_s {
                        let delta = target - position;
                        velocity = Velocity3D::new(delta.x / distance * speed_mps, delta.y / distance * speed_mps, 0.0);
                        position = position + velocity * remaining;
                        remaining = 0.0;
                    } else {
                        position = target;
                        velocity = Velocity3D::zero();
                        remaining -= arrival_s;
                        self.phase = WaypointPhase::Paused {
                            remaining_s: self.params.pause_s,
                        };
                    }
                }
            }
        }

        (position, velocity)
    }
}
