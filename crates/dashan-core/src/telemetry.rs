//! 遥测上报

use dashan_behavior::Emotion;
use dashan_protocol::SensorData;
use serde::Serialize;

/// 一次遥测快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryUpdate {
    /// 状态名（大写）
    pub state: String,
    pub expression: u8,
    pub brightness: u8,
    pub servo_h: u16,
    pub servo_v: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor: Option<SensorData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<(Emotion, f64)>,
}

impl TelemetryUpdate {
    pub fn with_sensor(mut self, sensor: SensorData) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn with_emotion(mut self, emotion: Emotion, intensity: f64) -> Self {
        self.emotion = Some((emotion, intensity));
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 遥测输出（例如 WebSocket 推送），由主循环线程调用
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, update: TelemetryUpdate);
}

/// 丢弃所有遥测
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn publish(&self, _update: TelemetryUpdate) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> TelemetryUpdate {
        TelemetryUpdate {
            state: "LISTEN".into(),
            expression: 0x02,
            brightness: 255,
            servo_h: 90,
            servo_v: 95,
            sensor: None,
            emotion: None,
        }
    }

    #[test]
    fn test_json_omits_absent_fields() {
        let json: serde_json::Value = serde_json::from_str(&update().to_json()).unwrap();
        assert_eq!(json["state"], "LISTEN");
        assert_eq!(json["servo_v"], 95);
        assert!(json.get("sensor").is_none());
        assert!(json.get("emotion").is_none());
    }

    #[test]
    fn test_json_with_sensor_and_emotion() {
        let sensor = SensorData {
            distance_mm: 120,
            proximity: 1,
            light: 40,
        };
        let json: serde_json::Value =
            serde_json::from_str(&update().with_sensor(sensor).with_emotion(Emotion::Happy, 0.5).to_json())
                .unwrap();
        assert_eq!(json["sensor"]["distance_mm"], 120);
        assert_eq!(json["emotion"][0], "happy");
        assert_eq!(json["emotion"][1], 0.5);
    }
}
