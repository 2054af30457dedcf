/// 信标标识与已知信标坐标

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// iBeacon 标识 (major, minor)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeaconId {
    pub major: u16,
    pub minor: u16,
}

impl BeaconId {
    /// 创建新的标识
    pub fn new(major: u16, minor: u16) -> Self {
        BeaconId { major, minor }
    }

    /// 是否与给定的 (major, minor) 匹配
    pub fn matches(&self, major: u16, minor: u16) -> bool {
        self.major == major && self.minor == minor
    }
}

/// 已知信标坐标记录
///
/// 由外部配置协作方创建和编辑，核心只读。
/// 同一 (uuid, major, minor) 至多存在一条记录。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnownBeacon {
    /// 区域 UUID（字符串形式）
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
    /// X 坐标（米）
    pub x: f64,
    /// Y 坐标（米）
    pub y: f64,
    /// 1 米处的参考 RSSI (dBm)
    pub calibrated_power: i32,
    /// 友好名称（可为空）
    #[serde(default)]
    pub name: String,
}

impl KnownBeacon {
    pub fn id(&self) -> BeaconId {
        BeaconId::new(self.major, self.minor)
    }
}

/// 单次原始观测
///
/// 由扫描协作方每周期产生，核心不持久化。
#[derive(Clone, Debug)]
pub struct RawObservation {
    pub major: u16,
    pub minor: u16,
    /// 观测到的 RSSI (dBm)
    pub rssi: i32,
    /// 观测时间戳
    pub observed_at: DateTime<Utc>,
}

impl RawObservation {
    pub fn new(major: u16, minor: u16, rssi: i32, observed_at: DateTime<Utc>) -> Self {
        RawObservation {
            major,
            minor,
            rssi,
            observed_at,
        }
    }
}

/// 已知信标注册表
///
/// 按 (uuid, major, minor) 索引坐标记录；
/// 摄入路径只在配置的区域 UUID 内按 (major, minor) 查询。
#[derive(Clone, Debug, Default)]
pub struct BeaconRegistry {
    region_uuid: String,
    beacons: HashMap<(String, u16, u16), KnownBeacon>,
}

impl BeaconRegistry {
    /// 创建空的注册表
    pub fn new(region_uuid: impl Into<String>) -> Self {
        BeaconRegistry {
            region_uuid: region_uuid.into(),
            beacons: HashMap::new(),
        }
    }

    /// 从记录向量创建注册表
    pub fn from_vec(region_uuid: impl Into<String>, records: Vec<KnownBeacon>) -> Self {
        let mut registry = BeaconRegistry::new(region_uuid);
        for record in records {
            registry.upsert(record);
        }
        registry
    }

    /// 从 JSON 数组加载注册表（配置协作方的交接格式）
    pub fn from_json(region_uuid: impl Into<String>, json: &str) -> Result<Self, serde_json::Error> {
        let records: Vec<KnownBeacon> = serde_json::from_str(json)?;
        Ok(Self::from_vec(region_uuid, records))
    }

    /// 导出为 JSON 数组
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let records: Vec<&KnownBeacon> = self.beacons.values().collect();
        serde_json::to_string(&records)
    }

    /// 区域 UUID
    pub fn region_uuid(&self) -> &str {
        &self.region_uuid
    }

    /// 插入或更新一条记录；同一标识的旧记录被替换
    pub fn upsert(&mut self, record: KnownBeacon) {
        self.beacons
            .insert((record.uuid.clone(), record.major, record.minor), record);
    }

    /// 删除一条记录
    pub fn remove(&mut self, uuid: &str, major: u16, minor: u16) -> Option<KnownBeacon> {
        self.beacons.remove(&(uuid.to_string(), major, minor))
    }

    /// 在配置的区域 UUID 内按 (major, minor) 查询
    pub fn lookup(&self, major: u16, minor: u16) -> Option<&KnownBeacon> {
        self.beacons.get(&(self.region_uuid.clone(), major, minor))
    }

    /// 记录数量
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// 迭代所有记录
    pub fn iter(&self) -> impl Iterator<Item = &KnownBeacon> {
        self.beacons.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "07070707-0405-0607-0809-0A0B0C0D0E00";

    fn known(major: u16, minor: u16, x: f64, y: f64) -> KnownBeacon {
        KnownBeacon {
            uuid: UUID.to_string(),
            major,
            minor,
            x,
            y,
            calibrated_power: -59,
            name: String::new(),
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = BeaconRegistry::from_vec(UUID, vec![known(256, 256, 0.0, 0.0)]);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(256, 256).is_some());
        assert!(registry.lookup(256, 512).is_none());
    }

    #[test]
    fn test_registry_upsert_replaces() {
        let mut registry = BeaconRegistry::new(UUID);
        registry.upsert(known(1, 1, 0.0, 0.0));
        registry.upsert(known(1, 1, 3.5, 4.5));

        // 同一标识只保留一条记录
        assert_eq!(registry.len(), 1);
        let record = registry.lookup(1, 1).unwrap();
        assert_eq!(record.x, 3.5);
        assert_eq!(record.y, 4.5);
    }

    #[test]
    fn test_registry_ignores_other_region() {
        let mut registry = BeaconRegistry::new(UUID);
        let mut foreign = known(9, 9, 1.0, 1.0);
        foreign.uuid = "11111111-2222-3333-4444-555555555555".to_string();
        registry.upsert(foreign);

        // 其他区域的记录不参与摄入查询
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(9, 9).is_none());
    }

    #[test]
    fn test_registry_json_round_trip() {
        let registry = BeaconRegistry::from_vec(
            UUID,
            vec![known(1, 1, 0.0, 0.0), known(1, 2, 10.0, 0.0)],
        );
        let json = registry.to_json().unwrap();
        let restored = BeaconRegistry::from_json(UUID, &json).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(restored.lookup(1, 2).is_some());
    }
}
