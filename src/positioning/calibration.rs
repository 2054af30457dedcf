/// 1 米参考功率标定
///
/// 针对单个信标采集固定数量的原始 RSSI 样本并取平均，
/// 得到该信标在 1 米处的参考功率。

use crate::positioning::beacon::BeaconId;

/// 标定会话
///
/// 由配置协作方启动；原始读数经由与普通观测相同的
/// 单写者路径送入，采满样本后给出平均值。
#[derive(Clone, Debug)]
pub struct Calibrator {
    target: BeaconId,
    sample_count: usize,
    sum: f64,
    count: usize,
}

impl Calibrator {
    /// 为目标信标创建标定会话，sample_count 为需采集的样本数
    pub fn new(target: BeaconId, sample_count: usize) -> Self {
        Calibrator {
            target,
            sample_count,
            sum: 0.0,
            count: 0,
        }
    }

    /// 标定目标
    pub fn target(&self) -> BeaconId {
        self.target
    }

    /// 已采集 / 需采集的样本数
    pub fn progress(&self) -> (usize, usize) {
        (self.count, self.sample_count)
    }

    /// 送入一个原始 RSSI 样本
    ///
    /// 采满样本后返回平均值（向零截断），否则返回 None。
    pub fn push(&mut self, rssi: i32) -> Option<i32> {
        self.count += 1;
        self.sum += f64::from(-rssi);

        if self.count >= self.sample_count {
            let average = -(self.sum / self.count as f64);
            Some(average as i32)
        } else {
            None
        }
    }
}
