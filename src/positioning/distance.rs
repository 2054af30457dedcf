/// RSSI 转距离计算
///
/// 对数路径损耗模型，路径损耗指数固定为 2：
/// d = 10 ^ ((calibratedPower - rssi) / 20)

/// 根据 1 米参考功率和观测 RSSI 估算距离（米）
///
/// 纯函数，对所有整数输入均有定义。
pub fn estimate_distance(calibrated_power: i32, rssi: i32) -> f64 {
    let ratio_db = calibrated_power - rssi;
    10_f64.powf(ratio_db as f64 / 20.0)
}

/// 反解：给定距离时模型预期的 RSSI（用于仿真和测试）
pub fn expected_rssi(calibrated_power: i32, distance: f64) -> f64 {
    if distance <= 0.0 {
        return f64::NEG_INFINITY;
    }
    calibrated_power as f64 - 20.0 * distance.log10()
}
