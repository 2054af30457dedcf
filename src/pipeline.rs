/// 定位管线
///
/// 每个扫描周期按 ingest -> snapshot -> solve 的顺序串行执行。
/// 扫描协作方和配置协作方的所有通知（观测、窗口变更、标定开始/停止）
/// 统一汇入同一条消息队列，保证跟踪状态只有单一写者。

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::positioning::{
    BeaconId, BeaconRegistry, Calibrator, PositionUpdate, RawObservation, BeaconTracker,
    solve_location,
};
use crate::settings::PositioningSettings;

/// 送入管线的事件
#[derive(Clone, Debug)]
pub enum ScanEvent {
    /// 一个扫描周期的原始观测
    Observations(Vec<RawObservation>),
    /// 平滑窗口大小变更
    WindowSizeChanged(usize),
    /// 开始对单个信标进行 1 米参考功率标定
    CalibrationStart(BeaconId),
    /// 停止标定，丢弃未完成的进度
    CalibrationStop,
}

/// 管线输出
#[derive(Clone, Debug)]
pub enum PipelineOutput {
    /// 一个扫描周期的定位结果
    Position(PositionUpdate),
    /// 标定完成
    CalibrationFinished {
        beacon: BeaconId,
        /// 平均 RSSI，即该信标的 1 米参考功率
        average_rssi: i32,
    },
}

/// 定位管线
///
/// 独占跟踪器与标定会话；同步 handle 适合嵌入宿主自己的循环，
/// 异步 run 消费消息队列并推送输出。
pub struct PositioningPipeline {
    registry: BeaconRegistry,
    tracker: BeaconTracker,
    calibrator: Option<Calibrator>,
    calibration_data_size: usize,
}

impl PositioningPipeline {
    pub fn new(settings: &PositioningSettings, registry: BeaconRegistry) -> Self {
        PositioningPipeline {
            registry,
            tracker: BeaconTracker::new(settings.ema_size),
            calibrator: None,
            calibration_data_size: settings.calibration_data_size,
        }
    }

    /// 已知信标注册表（配置协作方更新坐标记录时使用）
    pub fn registry_mut(&mut self) -> &mut BeaconRegistry {
        &mut self.registry
    }

    pub fn registry(&self) -> &BeaconRegistry {
        &self.registry
    }

    /// 当前跟踪器状态（供可视化协作方读取）
    pub fn tracker(&self) -> &BeaconTracker {
        &self.tracker
    }

    /// 处理一个事件
    ///
    /// 观测事件总是产生一个 Position 输出；标定采满样本时
    /// 额外产生一个 CalibrationFinished 输出。
    pub fn handle(&mut self, event: ScanEvent, now: DateTime<Utc>) -> Vec<PipelineOutput> {
        match event {
            ScanEvent::Observations(observations) => self.run_cycle(&observations, now),
            ScanEvent::WindowSizeChanged(new_size) => {
                self.tracker.set_window_size(new_size);
                Vec::new()
            }
            ScanEvent::CalibrationStart(target) => {
                self.calibrator = Some(Calibrator::new(target, self.calibration_data_size));
                Vec::new()
            }
            ScanEvent::CalibrationStop => {
                if self.calibrator.take().is_some() {
                    debug!("标定中止，进度已丢弃");
                }
                Vec::new()
            }
        }
    }

    /// 执行一个扫描周期
    fn run_cycle(
        &mut self,
        observations: &[RawObservation],
        now: DateTime<Utc>,
    ) -> Vec<PipelineOutput> {
        let mut outputs = Vec::new();

        // 标定旁路复用同一观测流，在单写者路径内处理
        if let Some(calibrator) = self.calibrator.as_mut() {
            let target = calibrator.target();
            for observation in observations {
                if !target.matches(observation.major, observation.minor) {
                    continue;
                }
                if let Some(average_rssi) = calibrator.push(observation.rssi) {
                    outputs.push(PipelineOutput::CalibrationFinished {
                        beacon: target,
                        average_rssi,
                    });
                    self.calibrator = None;
                    break;
                }
            }
        }

        self.tracker.ingest(observations, &self.registry, now);
        let problem = self.tracker.snapshot();

        // 任何求解失败都只意味着本周期没有估计，下一周期重新计算
        let location = match solve_location(&problem) {
            Ok(location) => Some(location),
            Err(error) => {
                debug!(%error, beacon_count = problem.len(), "本周期无位置估计");
                None
            }
        };

        outputs.push(PipelineOutput::Position(PositionUpdate {
            location,
            beacon_count: problem.len(),
            timestamp: now,
        }));
        outputs
    }

    /// 异步运行管线直至事件通道关闭
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ScanEvent>,
        outputs: mpsc::Sender<PipelineOutput>,
    ) {
        while let Some(event) = events.recv().await {
            for output in self.handle(event, Utc::now()) {
                if outputs.send(output).await.is_err() {
                    warn!("输出通道已关闭，管线停止");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positioning::KnownBeacon;
    use crate::settings::DEFAULT_UUID;

    fn known(minor: u16, x: f64, y: f64) -> KnownBeacon {
        KnownBeacon {
            uuid: DEFAULT_UUID.to_string(),
            major: 1,
            minor,
            x,
            y,
            calibrated_power: -59,
            name: String::new(),
        }
    }

    fn pipeline() -> PositioningPipeline {
        let registry = BeaconRegistry::from_vec(
            DEFAULT_UUID,
            vec![known(1, 0.0, 0.0), known(2, 10.0, 0.0), known(3, 5.0, 10.0)],
        );
        PositioningPipeline::new(&PositioningSettings::default(), registry)
    }

    fn observations(rssi: i32, at: DateTime<Utc>) -> ScanEvent {
        ScanEvent::Observations(vec![
            RawObservation::new(1, 1, rssi, at),
            RawObservation::new(1, 2, rssi, at),
            RawObservation::new(1, 3, rssi, at),
        ])
    }

    #[test]
    fn test_cycle_produces_position_update() {
        let mut pipeline = pipeline();
        let now = Utc::now();

        let outputs = pipeline.handle(observations(-59, now), now);
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            PipelineOutput::Position(update) => {
                assert_eq!(update.beacon_count, 3);
                assert!(update.location.is_some());
            }
            other => panic!("意外的输出: {:?}", other),
        }
    }

    #[test]
    fn test_insufficient_beacons_degrade_to_none() {
        let mut pipeline = pipeline();
        let now = Utc::now();

        let event = ScanEvent::Observations(vec![RawObservation::new(1, 1, -59, now)]);
        let outputs = pipeline.handle(event, now);
        match &outputs[0] {
            PipelineOutput::Position(update) => {
                assert_eq!(update.beacon_count, 1);
                assert!(update.location.is_none());
            }
            other => panic!("意外的输出: {:?}", other),
        }
    }

    #[test]
    fn test_calibration_side_channel() {
        let mut pipeline = pipeline();
        let mut now = Utc::now();
        let target = BeaconId::new(1, 1);

        pipeline.handle(ScanEvent::CalibrationStart(target), now);

        // 默认需采集 30 个样本；前 29 个周期只有定位输出
        for _ in 0..29 {
            let outputs = pipeline.handle(observations(-60, now), now);
            assert_eq!(outputs.len(), 1);
            now = now + chrono::Duration::seconds(1);
        }

        let outputs = pipeline.handle(observations(-60, now), now);
        assert_eq!(outputs.len(), 2);
        match &outputs[0] {
            PipelineOutput::CalibrationFinished {
                beacon,
                average_rssi,
            } => {
                assert_eq!(*beacon, target);
                assert_eq!(*average_rssi, -60);
            }
            other => panic!("意外的输出: {:?}", other),
        }
    }

    #[test]
    fn test_calibration_stop_discards_progress() {
        let mut pipeline = pipeline();
        let now = Utc::now();
        let target = BeaconId::new(1, 1);

        pipeline.handle(ScanEvent::CalibrationStart(target), now);
        pipeline.handle(observations(-60, now), now);
        pipeline.handle(ScanEvent::CalibrationStop, now);

        // 停止后继续观测不再产生标定输出
        let outputs = pipeline.handle(observations(-60, now), now);
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn test_window_size_event_forwards_to_tracker() {
        let mut pipeline = pipeline();
        assert_eq!(pipeline.tracker().window_size(), 10);
        pipeline.handle(ScanEvent::WindowSizeChanged(20), Utc::now());
        assert_eq!(pipeline.tracker().window_size(), 20);
    }
}
