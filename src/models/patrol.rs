use crate::error::ConfigurationError;
use crate::models::common::Velocity3D;

/// 巡回軌道の制御点
///
/// シミュレーション開始からの経過時刻 `at_s` にリーダーの速度を `velocity` へ変更します。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoint {
    pub at_s: f64,
    pub velocity: Velocity3D,
}

/// リーダーの巡回軌道
///
/// 制御点は時刻の狭義単調増加順に並びます。軌道は自動で再始動しないため、
/// 複数周回させる場合は `repeated` で制御点を追加発行します。
#[derive(Debug, Clone, PartialEq)]
pub struct PatrolPath {
    pub control_points: Vec<ControlPoint>,
    /// 1周分の所要時間（秒）
    pub period_s: f64,
}

impl PatrolPath {
    /// 一辺 `side_m` の正方形を速度 `speed_mps` で右→上→左→下に巡回する軌道
    ///
    /// 速度変更時刻は `start_s + {0, S/v, 2S/v, 3S/v}` です。
    pub fn rectangle(side_m: f64, speed_mps: f64, start_s: f64) -> Result<Self, ConfigurationError> {
        if !(side_m > 0.0 && speed_mps > 0.0) || !side_m.is_finite() || !speed_mps.is_finite() {
            return Err(ConfigurationError::InvalidPatrolGeometry { side_m, speed_mps });
        }

        let edge_s = side_m / speed_mps;
        let headings = [
            Velocity3D::new(speed_mps, 0.0, 0.0),
            Velocity3D::new(0.0, speed_mps, 0.0),
            Velocity3D::new(-speed_mps, 0.0, 0.0),
            Velocity3D::new(0.0, -speed_mps, 0.0),
        ];

        let control_points = headings
            .iter()
            .enumerate()
            .map(|(i, velocity)| ControlPoint {
                at_s: start_s + i as f64 * edge_s,
                velocity: *velocity,
            })
            .collect();

        let path = Self {
            control_points,
            period_s: 4.0 * edge_s,
        };
        path.validate()?;
        Ok(path)
    }

    /// 任意の制御点列から軌道を作成
    pub fn from_control_points(control_points: Vec<ControlPoint>, period_s: f64) -> Result<Self, ConfigurationError> {
        let path = Self { control_points, period_s };
        path.validate()?;
        Ok(path)
    }

    /// 制御点の時刻順序を検証
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.control_points.is_empty() {
            return Err(ConfigurationError::EmptyPatrolPath);
        }

        let mut previous: Option<f64> = None;
        for (index, point) in self.control_points.iter().enumerate() {
            if !point.at_s.is_finite() || point.at_s < 0.0 {
                return Err(ConfigurationError::InvalidControlPointTime { index, at_s: point.at_s });
            }
            if let Some(previous_s) = previous {
                if point.at_s <= previous_s {
                    return Err(ConfigurationError::NonIncreasingControlPoints {
                        index,
                        at_s: point.at_s,
                        previous_s,
                    });
                }
            }
            previous = Some(point.at_s);
        }

        // 1周の所要時間は制御点の時刻幅より長くなければならない
        let span_s = match (self.control_points.first(), self.control_points.last()) {
            (Some(first), Some(last)) => last.at_s - first.at_s,
            _ => 0.0,
        };
        if !self.period_s.is_finite() || !(self.period_s > span_s) || !(self.period_s > 0.0) {
            return Err(ConfigurationError::InvalidPatrolPeriod {
                period_s: self.period_s,
                span_s,
            });
        }

        Ok(())
    }

    /// 軌道を `loops` 周分に拡張した新しい軌道を返す
    ///
    /// 拡張後の `period_s` は全周回の合計時間です。
    pub fn repeated(&self, loops: u32) -> Self {
        let mut control_points = Vec::with_capacity(self.control_points.len() * loops as usize);
        for lap in 0..loops {
            let offset = lap as f64 * self.period_s;
            control_points.extend(self.control_points.iter().map(|point| ControlPoint {
                at_s: point.at_s + offset,
                velocity: point.velocity,
            }));
        }
        Self {
            control_points,
            period_s: self.period_s * loops as f64,
        }
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.control_points.iter().map(|p| p.at_s).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_schedule() {
        let path = PatrolPath::rectangle(300.0, 10.0, 0.0).unwrap();
        assert_eq!(path.thresholds(), vec![0.0, 30.0, 60.0, 90.0]);
        assert_eq!(path.period_s, 120.0);
        assert_eq!(path.control_points[1].velocity, Velocity3D::new(0.0, 10.0, 0.0));
        assert_eq!(path.control_points[3].velocity, Velocity3D::new(0.0, -10.0, 0.0));
    }

    #[test]
    fn test_non_increasing_thresholds_rejected() {
        let v = Velocity3D::new(1.0, 0.0, 0.0);
        let points = [0.0, 30.0, 20.0, 90.0]
            .iter()
            .map(|&at_s| ControlPoint { at_s, velocity: v })
            .collect();
        assert_eq!(
            PatrolPath::from_control_points(points, 120.0),
            Err(ConfigurationError::NonIncreasingControlPoints {
                index: 2,
                at_s: 20.0,
                previous_s: 30.0
            })
        );
    }

    #[test]
    fn test_equal_thresholds_rejected() {
        let v = Velocity3D::zero();
        let points = vec![ControlPoint { at_s: 5.0, velocity: v }, ControlPoint { at_s: 5.0, velocity: v }];
        assert!(PatrolPath::from_control_points(points, 10.0).is_err());
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(PatrolPath::rectangle(0.0, 10.0, 0.0).is_err());
        assert!(PatrolPath::rectangle(300.0, -1.0, 0.0).is_err());
        assert_eq!(
            PatrolPath::from_control_points(Vec::new(), 1.0),
            Err(ConfigurationError::EmptyPatrolPath)
        );
    }

    #[test]
    fn test_repeated_keeps_strict_order() {
        let path = PatrolPath::rectangle(100.0, 10.0, 5.0).unwrap().repeated(2);
        assert_eq!(path.thresholds(), vec![5.0, 15.0, 25.0, 35.0, 45.0, 55.0, 65.0, 75.0]);
        assert_eq!(path.period_s, 80.0);
        assert!(path.validate().is_ok());
    }

    #[test]
    fn test_period_must_cover_control_points() {
        let v = Velocity3D::new(10.0, 0.0, 0.0);
        let points = || -> Vec<ControlPoint> {
            [0.0, 30.0, 60.0, 90.0]
                .iter()
                .map(|&at_s| ControlPoint { at_s, velocity: v })
                .collect()
        };

        assert_eq!(
            PatrolPath::from_control_points(points(), 10.0),
            Err(ConfigurationError::InvalidPatrolPeriod {
                period_s: 10.0,
                span_s: 90.0
            })
        );
        assert!(PatrolPath::from_control_points(points(), 90.0).is_err());
        assert!(PatrolPath::from_control_points(points(), -5.0).is_err());
        assert!(PatrolPath::from_control_points(points(), f64::NAN).is_err());
        assert!(PatrolPath::from_control_points(points(), 120.0).is_ok());
    }

    #[test]
    fn test_zero_repeats_is_empty() {
        let path = PatrolPath::rectangle(300.0, 10.0, 0.0).unwrap().repeated(0);
        assert_eq!(path.validate(), Err(ConfigurationError::EmptyPatrolPath));
    }
}
