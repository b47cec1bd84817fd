//! # Scheduler モジュール
//!
//! 離散事象シミュレーションのイベントキューを提供します。
//!
//! イベントは発火時刻の早い順に取り出され、同時刻のイベントは登録順に処理されます。
//! 周期イベントは一度だけ登録する繰り返しタイマーとして表現し、取り出されるたびに
//! キュー自身が次回分を再登録します。コールバックの自己再登録連鎖は使いません。
//!
//! 登録済みイベントの取り消しはできません。周期タイマーを止める唯一の方法は
//! シミュレーションの停止時刻に到達することです。

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::models::{FormationVariant, NodeId, Velocity3D};
use crate::models::traffic::InFlightPacket;

/// シミュレーション中に発生するイベント
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// リーダーの速度変更（巡回軌道の制御点）
    SetLeaderVelocity(Velocity3D),
    /// 隊形の切り替え
    SwitchFormation(FormationVariant),
    /// 追従ノード位置の更新
    FollowerTick,
    /// 攻撃ポリシーの有効化
    ActivateAttack(NodeId),
    /// フローのパケット送信
    SendPacket { flow_index: usize },
    /// パケットの次ホップ到着
    PacketArrival(InFlightPacket),
}

#[derive(Debug)]
struct ScheduledEvent<E> {
    at: f64,
    sequence: u64,
    period: Option<f64>,
    event: E,
}

impl<E> PartialEq for ScheduledEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E> Eq for ScheduledEvent<E> {}

impl<E> PartialOrd for ScheduledEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for ScheduledEvent<E> {
    // BinaryHeapは最大ヒープなので逆順に比較する
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// 時刻順イベントキュー
#[derive(Debug)]
pub struct EventQueue<E> {
    heap: BinaryHeap<ScheduledEvent<E>>,
    next_sequence: u64,
    now: f64,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
            now: 0.0,
        }
    }
}

impl<E: Clone> EventQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最後に取り出したイベントの時刻
    pub fn now(&self) -> f64 {
        self.now
    }

    /// 時刻 `at` に一度だけ発火するイベントを登録
    ///
    /// 現在時刻より前の時刻は現在時刻に切り上げられます。
    pub fn schedule_at(&mut self, at: f64, event: E) {
        self.push(at, None, event);
    }

    /// `first_at` から `period` 秒毎に発火する繰り返しイベントを登録
    pub fn schedule_repeating(&mut self, first_at: f64, period: f64, event: E) {
        debug_assert!(period > 0.0, "repeating timer period must be positive");
        self.push(first_at, Some(period), event);
    }

    fn push(&mut self, at: f64, period: Option<f64>, event: E) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEvent {
            at: at.max(self.now),
            sequence,
            period,
            event,
        });
    }

    /// 次のイベント時刻
    pub fn peek_time(&self) -> Option<f64> {
        self.heap.peek().map(|entry| entry.at)
    }

    /// `stop` 以前に発火する次のイベントを取り出す
    ///
    /// 繰り返しイベントは取り出し時に次回分が再登録されます。
    pub fn pop_until(&mut self, stop: f64) -> Option<(f64, E)> {
        if self.heap.peek()?.at > stop {
            return None;
        }
        let entry = self.heap.pop()?;
        self.now = entry.at;

        if let Some(period) = entry.period {
            self.push(entry.at + period, Some(period), entry.event.clone());
        }

        Some((entry.at, entry.event))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
