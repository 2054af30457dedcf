/// 信标状态跟踪
///
/// 为每个已知信标维护有界的平滑 RSSI 窗口与最近可见时间，
/// 应用带左移的指数移动平均（EMA），并剔除超时信标。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::positioning::beacon::{BeaconId, BeaconRegistry, RawObservation};
use crate::positioning::distance::estimate_distance;
use crate::positioning::solver::SolverProblem;

/// 信标失联判定阈值（秒）
pub const MAX_AGE_SECONDS: f64 = 12.0;

/// 单个被跟踪信标的状态
#[derive(Clone, Debug)]
pub struct TrackedBeacon {
    pub id: BeaconId,
    /// 最近一次更新时从坐标记录复制的平面位置
    pub x: f64,
    pub y: f64,
    /// 1 米处的参考 RSSI (dBm)
    pub calibrated_power: i32,
    pub last_seen: DateTime<Utc>,
    /// 平滑 RSSI 窗口，旧值在前，长度不超过 windowSize + 1
    rssi_window: Vec<i32>,
}

impl TrackedBeacon {
    /// 当前平滑值（窗口的最后一个元素）
    pub fn smoothed_rssi(&self) -> Option<i32> {
        self.rssi_window.last().copied()
    }

    /// 平滑窗口的只读视图
    pub fn window(&self) -> &[i32] {
        &self.rssi_window
    }
}

/// 信标状态跟踪器
///
/// 跟踪器独占全部跟踪状态并且是唯一写者；
/// 每个扫描周期按 ingest -> snapshot 顺序在同一路径上串行执行。
#[derive(Clone, Debug)]
pub struct BeaconTracker {
    window_size: usize,
    tracks: HashMap<BeaconId, TrackedBeacon>,
    /// 快照按插入顺序输出
    order: Vec<BeaconId>,
}

impl BeaconTracker {
    /// 创建跟踪器，window_size 为 EMA 平滑窗口大小（有效范围由调用方保证）
    pub fn new(window_size: usize) -> Self {
        BeaconTracker {
            window_size,
            tracks: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// 当前窗口大小
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// 被跟踪信标数量
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// 查询某个信标的跟踪状态
    pub fn track(&self, id: BeaconId) -> Option<&TrackedBeacon> {
        self.tracks.get(&id)
    }

    /// 按插入顺序迭代全部跟踪状态
    pub fn iter(&self) -> impl Iterator<Item = &TrackedBeacon> {
        self.order.iter().filter_map(|id| self.tracks.get(id))
    }

    /// 变更平滑窗口大小
    ///
    /// 超长的窗口立即截断为最近的 new_size 个样本（丢弃最旧值），
    /// 其余平滑历史保持不变。
    pub fn set_window_size(&mut self, new_size: usize) {
        self.window_size = new_size;
        for tracked in self.tracks.values_mut() {
            if tracked.rssi_window.len() > new_size + 1 {
                let surplus = tracked.rssi_window.len() - new_size;
                tracked.rssi_window.drain(..surplus);
            }
        }
    }

    /// 摄入一个扫描周期的原始观测
    ///
    /// 只处理与已知坐标记录匹配的观测；不匹配者静默忽略。
    /// 处理完毕后剔除所有超过失联阈值的信标。
    pub fn ingest(
        &mut self,
        observations: &[RawObservation],
        known: &BeaconRegistry,
        now: DateTime<Utc>,
    ) {
        for observation in observations {
            let Some(record) = known.lookup(observation.major, observation.minor) else {
                continue;
            };
            let id = BeaconId::new(observation.major, observation.minor);

            match self.tracks.get_mut(&id) {
                Some(tracked) => {
                    // 元数据无条件刷新
                    tracked.x = record.x;
                    tracked.y = record.y;
                    tracked.calibrated_power = record.calibrated_power;
                    tracked.last_seen = now;

                    // 重复读数不参与平滑
                    if tracked.rssi_window.last() != Some(&observation.rssi) {
                        if tracked.rssi_window.len() < self.window_size + 1 {
                            tracked.rssi_window.push(observation.rssi);
                        } else {
                            // 以窗口固定下标 windowSize 处的样本为基准的递推 EMA，
                            // 四舍五入远离零
                            let anchor = tracked.rssi_window[self.window_size];
                            let weight = 2.0 / (self.window_size as f64 + 1.0);
                            let ema =
                                (observation.rssi - anchor) as f64 * weight + anchor as f64;
                            tracked.rssi_window.remove(0);
                            tracked.rssi_window.push(ema.round() as i32);
                        }
                    }
                }
                None => {
                    self.tracks.insert(
                        id,
                        TrackedBeacon {
                            id,
                            x: record.x,
                            y: record.y,
                            calibrated_power: record.calibrated_power,
                            last_seen: now,
                            rssi_window: vec![observation.rssi],
                        },
                    );
                    self.order.push(id);
                }
            }
        }

        // 移除超时信标
        self.tracks.retain(|id, tracked| {
            let age = (now - tracked.last_seen).num_milliseconds() as f64 / 1000.0;
            let keep = age <= MAX_AGE_SECONDS;
            if !keep {
                debug!(
                    major = id.major,
                    minor = id.minor,
                    age_seconds = age,
                    "信标超时，移除跟踪状态"
                );
            }
            keep
        });
        let tracks = &self.tracks;
        self.order.retain(|id| tracks.contains_key(id));
    }

    /// 生成本周期的求解器输入快照
    ///
    /// 每个被跟踪信标贡献一组 (坐标, 距离)，
    /// 距离由参考功率和当前平滑 RSSI 反解得出。
    pub fn snapshot(&self) -> SolverProblem {
        let mut problem = SolverProblem::new();
        for tracked in self.iter() {
            let Some(rssi) = tracked.smoothed_rssi() else {
                continue;
            };
            problem.push(
                vec![tracked.x, tracked.y],
                estimate_distance(tracked.calibrated_power, rssi),
            );
        }
        problem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positioning::beacon::KnownBeacon;
    use chrono::Duration;

    const UUID: &str = "07070707-0405-0607-0809-0A0B0C0D0E00";

    fn registry() -> BeaconRegistry {
        BeaconRegistry::from_vec(
            UUID,
            vec![
                KnownBeacon {
                    uuid: UUID.to_string(),
                    major: 256,
                    minor: 256,
                    x: 0.0,
                    y: 0.0,
                    calibrated_power: -59,
                    name: "B1".to_string(),
                },
                KnownBeacon {
                    uuid: UUID.to_string(),
                    major: 256,
                    minor: 512,
                    x: 10.0,
                    y: 0.0,
                    calibrated_power: -59,
                    name: "B2".to_string(),
                },
            ],
        )
    }

    fn observe(minor: u16, rssi: i32, at: DateTime<Utc>) -> RawObservation {
        RawObservation::new(256, minor, rssi, at)
    }

    #[test]
    fn test_first_observation_creates_track() {
        let mut tracker = BeaconTracker::new(10);
        let now = Utc::now();
        tracker.ingest(&[observe(256, -61, now)], &registry(), now);

        let tracked = tracker.track(BeaconId::new(256, 256)).unwrap();
        assert_eq!(tracked.window(), &[-61]);
        assert_eq!(tracked.smoothed_rssi(), Some(-61));
        assert_eq!(tracked.calibrated_power, -59);
    }

    #[test]
    fn test_unknown_beacon_ignored() {
        let mut tracker = BeaconTracker::new(10);
        let now = Utc::now();
        tracker.ingest(&[observe(9999, -61, now)], &registry(), now);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_duplicate_reading_refreshes_metadata_only() {
        let mut tracker = BeaconTracker::new(10);
        let known = registry();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);

        tracker.ingest(&[observe(256, -61, t0)], &known, t0);
        tracker.ingest(&[observe(256, -61, t1)], &known, t1);

        let tracked = tracker.track(BeaconId::new(256, 256)).unwrap();
        // 重复读数不进入窗口，但最近可见时间刷新
        assert_eq!(tracked.window(), &[-61]);
        assert_eq!(tracked.last_seen, t1);
    }

    #[test]
    fn test_window_never_exceeds_size_plus_one() {
        let window_size = 4;
        let mut tracker = BeaconTracker::new(window_size);
        let known = registry();
        let mut now = Utc::now();

        // 送入远多于窗口容量的互异样本
        for i in 0..20 {
            let rssi = -60 - (i % 2) as i32 - (i as i32 / 2);
            tracker.ingest(&[observe(256, rssi, now)], &known, now);
            now += Duration::milliseconds(500);
        }

        let tracked = tracker.track(BeaconId::new(256, 256)).unwrap();
        assert_eq!(tracked.window().len(), window_size + 1);
    }

    #[test]
    fn test_ema_uses_window_anchor() {
        let window_size = 2;
        let mut tracker = BeaconTracker::new(window_size);
        let known = registry();
        let mut now = Utc::now();

        // 填满窗口：[-60, -62, -64]
        for rssi in [-60, -62, -64] {
            tracker.ingest(&[observe(256, rssi, now)], &known, now);
            now += Duration::milliseconds(500);
        }
        // 窗口已满，基准取下标 windowSize 处（-64），weight = 2/3：
        // ema = (-70 + 64) * 2/3 - 64 = -68
        tracker.ingest(&[observe(256, -70, now)], &known, now);

        let tracked = tracker.track(BeaconId::new(256, 256)).unwrap();
        assert_eq!(tracked.window(), &[-62, -64, -68]);
    }

    #[test]
    fn test_ema_rounds_half_away_from_zero() {
        let window_size = 3;
        let mut tracker = BeaconTracker::new(window_size);
        let known = registry();
        let mut now = Utc::now();

        // 填满窗口：[-60, -61, -62, -63]
        for rssi in [-60, -61, -62, -63] {
            tracker.ingest(&[observe(256, rssi, now)], &known, now);
            now += Duration::milliseconds(500);
        }
        // weight = 0.5, ema = (-70 + 63) * 0.5 - 63 = -66.5 -> 远离零舍入为 -67
        tracker.ingest(&[observe(256, -70, now)], &known, now);

        let tracked = tracker.track(BeaconId::new(256, 256)).unwrap();
        assert_eq!(tracked.smoothed_rssi(), Some(-67));
    }

    #[test]
    fn test_stale_beacon_evicted() {
        let mut tracker = BeaconTracker::new(10);
        let known = registry();
        let t0 = Utc::now();

        tracker.ingest(&[observe(256, -61, t0)], &known, t0);
        assert_eq!(tracker.len(), 1);

        // 12 秒内仍保留
        let t1 = t0 + Duration::seconds(11);
        tracker.ingest(&[], &known, t1);
        assert_eq!(tracker.len(), 1);

        // 超过 12 秒后剔除
        let t2 = t0 + Duration::seconds(13);
        tracker.ingest(&[], &known, t2);
        assert!(tracker.is_empty());
        assert!(tracker.snapshot().is_empty());
    }

    #[test]
    fn test_set_window_size_truncates_oldest() {
        let mut tracker = BeaconTracker::new(10);
        let known = registry();
        let mut now = Utc::now();

        for rssi in [-60, -61, -62, -63, -64, -65] {
            tracker.ingest(&[observe(256, rssi, now)], &known, now);
            now += Duration::milliseconds(500);
        }
        assert_eq!(
            tracker.track(BeaconId::new(256, 256)).unwrap().window().len(),
            6
        );

        tracker.set_window_size(3);
        let tracked = tracker.track(BeaconId::new(256, 256)).unwrap();
        // 只保留最近 3 个样本
        assert_eq!(tracked.window(), &[-63, -64, -65]);

        // 缩小窗口绝不延长任何已有窗口
        tracker.set_window_size(50);
        let tracked = tracker.track(BeaconId::new(256, 256)).unwrap();
        assert_eq!(tracked.window().len(), 3);
    }

    #[test]
    fn test_snapshot_contains_distances() {
        let mut tracker = BeaconTracker::new(10);
        let known = registry();
        let now = Utc::now();

        tracker.ingest(
            &[observe(256, -59, now), observe(512, -79, now)],
            &known,
            now,
        );

        let problem = tracker.snapshot();
        assert_eq!(problem.len(), 2);
        // RSSI 等于参考功率 -> 1 米；衰减 20 dB -> 10 米
        assert!((problem.distances[0] - 1.0).abs() < 1e-12);
        assert!((problem.distances[1] - 10.0).abs() < 1e-9);
        assert_eq!(problem.positions[0], vec![0.0, 0.0]);
        assert_eq!(problem.positions[1], vec![10.0, 0.0]);
    }
}
