/// 应用配置
///
/// 宿主应用中的全局设置单例在此改为显式的配置值，
/// 在构造跟踪器和管线时传入，核心不持有进程级可变状态。

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 默认区域 UUID
pub const DEFAULT_UUID: &str = "07070707-0405-0607-0809-0A0B0C0D0E00";

const DEFAULT_EMA_SIZE: usize = 10;
const DEFAULT_CALIBRATION_DATA_SIZE: usize = 30;

const MIN_EMA_SIZE: usize = 5;
const MAX_EMA_SIZE: usize = 100;

const UUID_PATTERN: &str =
    r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}$";

/// 配置错误
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("UUID 格式无效: {0}")]
    InvalidUuid(String),
    #[error("EMA 窗口大小超出范围 {MIN_EMA_SIZE}..={MAX_EMA_SIZE}: {0}")]
    EmaSizeOutOfRange(usize),
    #[error("标定样本数必须大于零")]
    CalibrationSizeInvalid,
    #[error("配置解析失败: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("UUID 校验表达式无效: {0}")]
    Pattern(#[from] regex::Error),
}

/// 定位配置
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositioningSettings {
    /// 扫描区域 UUID
    pub uuid: String,
    /// EMA 平滑窗口大小
    pub ema_size: usize,
    /// 标定需采集的样本数
    pub calibration_data_size: usize,
}

impl Default for PositioningSettings {
    fn default() -> Self {
        PositioningSettings {
            uuid: DEFAULT_UUID.to_string(),
            ema_size: DEFAULT_EMA_SIZE,
            calibration_data_size: DEFAULT_CALIBRATION_DATA_SIZE,
        }
    }
}

impl PositioningSettings {
    /// 校验配置的合理性
    pub fn validate(&self) -> Result<(), SettingsError> {
        let uuid_format = Regex::new(UUID_PATTERN)?;
        if !uuid_format.is_match(&self.uuid) {
            return Err(SettingsError::InvalidUuid(self.uuid.clone()));
        }
        if self.ema_size < MIN_EMA_SIZE || self.ema_size > MAX_EMA_SIZE {
            return Err(SettingsError::EmaSizeOutOfRange(self.ema_size));
        }
        if self.calibration_data_size == 0 {
            return Err(SettingsError::CalibrationSizeInvalid);
        }
        Ok(())
    }

    /// 从 JSON 加载并校验
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: PositioningSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string(self)?)
    }
}
