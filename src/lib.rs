//! # manetsim
//!
//! 移動アドホックネットワーク（MANET）の群れ編隊・攻撃ノード・フロー統計シミュレーター
//!
//! - 群れのリーダー巡回と追従ノードの隊形制御
//! - ブラックホール／グレイホール攻撃のパケット転送境界でのモデル化
//! - フロー統計からの配送率・遅延・スループット算出

pub mod error;
pub mod logging;
pub mod models;
pub mod scenario;
pub mod scheduler;
pub mod simulation;
pub mod stats;
