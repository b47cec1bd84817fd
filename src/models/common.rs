use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// 3次元位置を表す構造体
///
/// 本シミュレーションは平面運動のみを扱うため、z は常に0です。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position3D {
    pub x: f64, // m
    pub y: f64, // m
    #[serde(default)]
    pub z: f64, // m
}

impl Position3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// XY平面上の位置を作成（z = 0）
    pub fn planar(x: f64, y: f64) -> Self {
        Self::new(x, y, 0.0)
    }

    /// XY平面での2次元距離を計算
    pub fn distance_xy(&self, other: &Position3D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// ベクトルの長さ（原点からの距離）
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }
}

impl Add for Position3D {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Position3D {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

// 等速運動の積分 position + velocity * dt
impl Add<Velocity3D> for Position3D {
    type Output = Self;

    fn add(self, displacement: Velocity3D) -> Self::Output {
        Self::new(self.x + displacement.x, self.y + displacement.y, self.z + displacement.z)
    }
}

impl fmt::Display for Position3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// 3次元速度を表す構造体
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity3D {
    pub x: f64, // m/s
    pub y: f64, // m/s
    #[serde(default)]
    pub z: f64, // m/s
}

impl Velocity3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// 速度ベクトルの大きさ
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }
}

impl Mul<f64> for Velocity3D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

/// ノードの一意識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// ノードの役割
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// 巡回軌道を持つ群れのリーダー
    Leader,
    /// リーダーからのオフセットで位置が決まる追従ノード
    Follower,
    /// 群れに属さない通常ノード
    Plain,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Leader => write!(f, "leader"),
            NodeRole::Follower => write!(f, "follower"),
            NodeRole::Plain => write!(f, "plain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_plus_velocity_integrates() {
        let p = Position3D::planar(10.0, 0.0) + Velocity3D::new(10.0, -5.0, 0.0) * 2.0;
        assert_eq!(p, Position3D::planar(30.0, -10.0));
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(2).to_string(), "n2");
        assert_eq!(NodeId(7).index(), 7);
        assert_eq!(NodeRole::Follower.to_string(), "follower");
    }
}
