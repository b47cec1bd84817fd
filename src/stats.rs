//! # Stats モジュール
//!
//! フロー毎のカウンタ収集と、実行終了後の集計指標の算出を提供します。
//!
//! ## 主要機能
//!
//! - **FlowMonitor**: 実行中に送受信パケット数・遅延・バイト数をフロー毎に記録
//! - **summarize**: 確定したフロー記録から配送率・平均遅延・スループットを算出
//! - **JSON出力**: オフライン分析用にフロー記録をファイルへ書き出し・読み込み
//!
//! 集計指標は保存されず、要求されるたびにフロー記録から再計算されます。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::models::NodeId;

/// フロー毎の統計カウンタ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: u32,
    pub source: NodeId,
    pub destination: NodeId,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// 受信パケットのエンドツーエンド遅延の合計（秒）
    pub delay_sum_s: f64,
    /// 最初の送信時刻（秒）
    pub time_first_tx_s: f64,
    /// 最後の受信時刻（秒、未受信なら0）
    pub time_last_rx_s: f64,
    /// 終了時点で未着のパケット数
    #[serde(default)]
    pub lost_packets: u64,
}

impl FlowRecord {
    pub fn new(flow_id: u32, source: NodeId, destination: NodeId) -> Self {
        Self {
            flow_id,
            source,
            destination,
            tx_packets: 0,
            rx_packets: 0,
            tx_bytes: 0,
            rx_bytes: 0,
            delay_sum_s: 0.0,
            time_first_tx_s: 0.0,
            time_last_rx_s: 0.0,
            lost_packets: 0,
        }
    }

    /// このフローのスループット寄与（bit/s）
    ///
    /// 受信がない（最終受信時刻が0）フローは0です。最終受信時刻が最初の送信時刻以下の
    /// フローは計測区間が定義できないため、同じく0として扱います。
    pub fn throughput_bps(&self) -> f64 {
        if self.time_last_rx_s <= 0.0 {
            return 0.0;
        }
        let interval = self.time_last_rx_s - self.time_first_tx_s;
        if interval <= 0.0 {
            return 0.0;
        }
        (self.rx_bytes as f64 * 8.0) / interval
    }
}

/// 集計指標
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SummaryMetrics {
    pub total_tx_packets: u64,
    pub total_rx_packets: u64,
    /// パケット配送率（%）
    pub delivery_ratio_pct: f64,
    /// 平均エンドツーエンド遅延（秒）
    pub average_delay_s: f64,
    /// 全フローのスループット合計（bit/s）
    pub throughput_bps: f64,
}

impl SummaryMetrics {
    pub fn throughput_kbps(&self) -> f64 {
        self.throughput_bps / 1000.0
    }

    /// 集計結果をコンソールに表示
    pub fn print_report(&self, title: &str) {
        println!();
        println!("===== {} =====", title);
        println!("送信パケット数: {}", self.total_tx_packets);
        println!("受信パケット数: {}", self.total_rx_packets);
        println!("PDR: {:.2} %", self.delivery_ratio_pct);
        println!("平均遅延: {:.6} s", self.average_delay_s);
        println!("スループット: {:.3} kbps", self.throughput_kbps());
        println!("{}", "=".repeat(title.chars().count() + 12));
    }
}

/// フロー記録から集計指標を算出
///
/// 副作用のない決定的な関数で、入力の並び順に依存しません。
pub fn summarize(records: &[FlowRecord]) -> SummaryMetrics {
    let total_tx: u64 = records.iter().map(|r| r.tx_packets).sum();
    let total_rx: u64 = records.iter().map(|r| r.rx_packets).sum();
    let total_delay: f64 = records.iter().map(|r| r.delay_sum_s).sum();
    let throughput_bps: f64 = records.iter().map(FlowRecord::throughput_bps).sum();

    let delivery_ratio_pct = if total_tx > 0 {
        (total_rx as f64 / total_tx as f64) * 100.0
    } else {
        0.0
    };
    let average_delay_s = if total_rx > 0 {
        total_delay / total_rx as f64
    } else {
        0.0
    };

    SummaryMetrics {
        total_tx_packets: total_tx,
        total_rx_packets: total_rx,
        delivery_ratio_pct,
        average_delay_s,
        throughput_bps,
    }
}

/// 実行中のフロー統計収集
#[derive(Debug, Default)]
pub struct FlowMonitor {
    flows: BTreeMap<u32, FlowRecord>,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_flow(&mut self, flow_id: u32, source: NodeId, destination: NodeId) {
        self.flows
            .entry(flow_id)
            .or_insert_with(|| FlowRecord::new(flow_id, source, destination));
    }

    pub fn record_tx(&mut self, flow_id: u32, now: f64, bytes: u32) {
        if let Some(record) = self.flows.get_mut(&flow_id) {
            if record.tx_packets == 0 {
                record.time_first_tx_s = now;
            }
            record.tx_packets += 1;
            record.tx_bytes += bytes as u64;
        }
    }

    pub fn record_rx(&mut self, flow_id: u32, now: f64, delay_s: f64, bytes: u32) {
        if let Some(record) = self.flows.get_mut(&flow_id) {
            record.rx_packets += 1;
            record.rx_bytes += bytes as u64;
            record.delay_sum_s += delay_s;
            record.time_last_rx_s = now;
        }
    }

    /// 実行終了時のフロー記録（フローID順）
    pub fn finalize(&self) -> Vec<FlowRecord> {
        self.flows
            .values()
            .map(|record| FlowRecord {
                lost_packets: record.tx_packets.saturating_sub(record.rx_packets),
                ..record.clone()
            })
            .collect()
    }
}

/// フロー記録をJSONファイルへ書き出し
pub fn write_flow_records<P: AsRef<Path>>(path: P, records: &[FlowRecord]) -> Result<(), ExportError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ExportError::Io(path.to_path_buf(), e))?;
    }
    let json = serde_json::to_string_pretty(records).map_err(|e| ExportError::Json(path.to_path_buf(), e))?;
    fs::write(path, json).map_err(|e| ExportError::Io(path.to_path_buf(), e))
}

/// JSONファイルからフロー記録を読み込み
pub fn read_flow_records<P: AsRef<Path>>(path: P) -> Result<Vec<FlowRecord>, ExportError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| ExportError::Io(path.to_path_buf(), e))?;
    serde_json::from_str(&contents).map_err(|e| ExportError::Json(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(flow_id: u32, tx: u64, rx: u64, delay: f64, rx_bytes: u64, first_tx: f64, last_rx: f64) -> FlowRecord {
        FlowRecord {
            tx_packets: tx,
            rx_packets: rx,
            delay_sum_s: delay,
            rx_bytes,
            time_first_tx_s: first_tx,
            time_last_rx_s: last_rx,
            ..FlowRecord::new(flow_id, NodeId(1), NodeId(0))
        }
    }

    #[test]
    fn test_summarize_empty() {
        let metrics = summarize(&[]);
        assert_eq!(metrics.delivery_ratio_pct, 0.0);
        assert_eq!(metrics.average_delay_s, 0.0);
        assert_eq!(metrics.throughput_kbps(), 0.0);
    }

    #[test]
    fn test_summarize_single_flow() {
        let metrics = summarize(&[record(1, 50, 45, 9.0, 2880, 10.0, 39.0)]);
        assert!((metrics.delivery_ratio_pct - 90.0).abs() < 1e-9);
        assert!((metrics.average_delay_s - 0.2).abs() < 1e-9);
        assert!((metrics.throughput_bps - 23040.0 / 29.0).abs() < 1e-9);
        assert!((metrics.throughput_kbps() - 0.794_482_758_6).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_is_order_independent() {
        let records = vec![
            record(1, 50, 45, 9.0, 2880, 10.0, 39.0),
            record(2, 20, 0, 0.0, 0, 2.0, 0.0),
            record(3, 44, 40, 0.4, 2560, 2.0, 88.0),
        ];
        let mut reversed = records.clone();
        reversed.reverse();
        let a = summarize(&records);
        let b = summarize(&reversed);
        assert_eq!(a.total_tx_packets, b.total_tx_packets);
        assert_eq!(a.total_rx_packets, b.total_rx_packets);
        assert!((a.delivery_ratio_pct - b.delivery_ratio_pct).abs() < 1e-9);
        assert!((a.average_delay_s - b.average_delay_s).abs() < 1e-12);
        assert!((a.throughput_bps - b.throughput_bps).abs() < 1e-9);
    }

    #[test]
    fn test_flow_without_receptions_contributes_no_throughput() {
        let metrics = summarize(&[record(1, 10, 0, 0.0, 0, 1.0, 0.0)]);
        assert_eq!(metrics.delivery_ratio_pct, 0.0);
        assert_eq!(metrics.average_delay_s, 0.0);
        assert_eq!(metrics.throughput_bps, 0.0);
    }

    #[test]
    fn test_zero_length_interval_contributes_no_throughput() {
        let metrics = summarize(&[record(1, 1, 1, 0.0, 64, 5.0, 5.0)]);
        assert!(metrics.throughput_bps.is_finite());
        assert_eq!(metrics.throughput_bps, 0.0);
        assert_eq!(metrics.delivery_ratio_pct, 100.0);
    }

    #[test]
    fn test_monitor_tracks_first_tx_and_last_rx() {
        let mut monitor = FlowMonitor::new();
        monitor.register_flow(7, NodeId(3), NodeId(0));
        monitor.record_tx(7, 2.0, 64);
        monitor.record_tx(7, 4.0, 64);
        monitor.record_rx(7, 2.01, 0.01, 64);
        monitor.record_tx(99, 3.0, 64);

        let records = monitor.finalize();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.time_first_tx_s, 2.0);
        assert_eq!(r.time_last_rx_s, 2.01);
        assert_eq!(r.tx_bytes, 128);
        assert_eq!(r.lost_packets, 1);
    }

    #[test]
    fn test_flow_records_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("flows.json");
        let records = vec![record(1, 50, 45, 9.0, 2880, 10.0, 39.0)];

        write_flow_records(&path, &records).unwrap();
        let loaded = read_flow_records(&path).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_flow_records(dir.path().join("missing.json")),
            Err(ExportError::Io(..))
        ));
    }
}
