/// 定位结果数据结构

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 平面位置估计
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location2D {
    pub x: f64,
    pub y: f64,
}

impl Location2D {
    pub fn new(x: f64, y: f64) -> Self {
        Location2D { x, y }
    }

    /// 获取坐标对
    pub fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// 与另一位置的欧几里得距离
    pub fn distance_to(&self, other: &Location2D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for Location2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// 单个扫描周期的定位输出
///
/// 求解失败或信标不足时 location 为 None，
/// 下一周期以新数据重新计算，不沿用旧位置。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub location: Option<Location2D>,
    /// 参与本周期求解的信标数量
    pub beacon_count: usize,
    pub timestamp: DateTime<Utc>,
}
