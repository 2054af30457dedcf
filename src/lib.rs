/// 蓝牙信标室内定位库
///
/// 支持的功能：
/// - RSSI 转距离计算（对数路径损耗模型）
/// - 信标状态跟踪（EMA 平滑、超时剔除）
/// - 非线性最小二乘定位（Levenberg-Marquardt + 列主元 QR）
/// - 1 米参考功率标定
/// - 按扫描周期驱动的定位管线

pub mod pipeline;
pub mod positioning;
pub mod settings;
