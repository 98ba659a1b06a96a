//! frame graph 的配置，可以从 toml 文件加载

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RgError, RgResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RgSettings {
    /// 同时在 GPU 上执行的帧数，也是延迟销毁等待的帧数
    pub frames_in_flight: usize,
    /// 单个 recording 中 task 数量的上限
    pub max_tasks_per_recording: usize,
    /// 一次 barrier flush 中 barrier 描述符数量的上限
    pub max_barriers_per_flush: usize,
    /// 一帧中 submission batch 数量的上限
    pub max_batches: usize,
    /// 单个 batch 中录制线程数量的上限
    pub max_threads_per_batch: usize,
    /// 缓存对象在多少帧未被使用且没有引用之后会被回收
    pub cache_max_unused_frames: u64,
    /// 是否为每个 recording 保留调试导出所需的信息
    pub record_debug_dumps: bool,
    /// 是否用 debug label 包裹每个 task
    pub debug_labels: bool,
    /// debug 构建中，违反调用约定时除了返回错误之外再触发断言
    pub assert_contracts: bool,
}

impl Default for RgSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            max_tasks_per_recording: 4096,
            max_barriers_per_flush: 256,
            max_batches: 64,
            max_threads_per_batch: 16,
            cache_max_unused_frames: 8,
            record_debug_dumps: true,
            debug_labels: true,
            assert_contracts: false,
        }
    }
}

impl RgSettings {
    pub fn from_toml_str(text: &str) -> RgResult<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> RgResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::info!("load frame graph settings from {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> RgResult<()> {
        if self.frames_in_flight == 0 {
            return Err(RgError::Settings("frames_in_flight must be at least 1".to_string()));
        }
        if self.max_tasks_per_recording == 0 || self.max_barriers_per_flush == 0 {
            return Err(RgError::Settings("task and barrier capacities must be non-zero".to_string()));
        }
        if self.max_batches == 0 || self.max_threads_per_batch == 0 {
            return Err(RgError::Settings("batch capacities must be non-zero".to_string()));
        }
        // 缓存对象被回收时，使用它的帧必须已经执行完毕
        if self.cache_max_unused_frames < self.frames_in_flight as u64 {
            return Err(RgError::Settings(format!(
                "cache_max_unused_frames ({}) must not be smaller than frames_in_flight ({})",
                self.cache_max_unused_frames, self.frames_in_flight
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings = RgSettings::from_toml_str("frames_in_flight = 2\ndebug_labels = false\n").unwrap();
        assert_eq!(settings.frames_in_flight, 2);
        assert!(!settings.debug_labels);
        assert_eq!(settings.max_batches, RgSettings::default().max_batches);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(matches!(RgSettings::from_toml_str("frames_in_flight = 0"), Err(RgError::Settings(_))));
        assert!(matches!(
            RgSettings::from_toml_str("frames_in_flight = 4\ncache_max_unused_frames = 2"),
            Err(RgError::Settings(_))
        ));
        assert!(matches!(RgSettings::from_toml_str("frames_in_flight = \"three\""), Err(RgError::SettingsParse(_))));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let settings = RgSettings {
            max_tasks_per_recording: 12,
            ..Default::default()
        };
        let text = toml::to_string(&settings).unwrap();
        assert_eq!(RgSettings::from_toml_str(&text).unwrap(), settings);
    }
}
