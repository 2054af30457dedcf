/// 室内定位核心模块
///
/// 该模块提供定位核心的三个组成部分：
/// - 距离估算（RSSI -> 距离）
/// - 信标状态跟踪（平滑、剔除、快照）
/// - 位置求解（非线性最小二乘）

pub mod beacon;
pub mod calibration;
pub mod distance;
pub mod results;
pub mod solver;
pub mod tracker;

pub use beacon::*;
pub use calibration::*;
pub use distance::*;
pub use results::*;
pub use solver::*;
pub use tracker::*;
