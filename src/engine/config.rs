//! ### English
//! Runtime configuration: GL thread, view frame pacing and capture defaults.
//! Layered as defaults ← optional TOML file ← `GL_PIPELINE__*` environment variables.
//!
//! ### 中文
//! 运行时配置：GL 线程、view 帧节奏与截帧默认值。
//! 分层顺序：默认值 ← 可选 TOML 文件 ← `GL_PIPELINE__*` 环境变量。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::error::Result;

/// ### English
/// Top-level configuration.
///
/// ### 中文
/// 顶层配置。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub gl_thread: GlThreadConfig,
    pub view: ViewConfig,
    pub capture: CaptureConfig,
}

/// ### English
/// GL worker thread settings.
///
/// ### 中文
/// GL 工作线程设置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlThreadConfig {
    /// ### English
    /// Thread name (shows up in debuggers and panic messages).
    ///
    /// ### 中文
    /// 线程名（用于调试器与 panic 信息）。
    pub name: String,
    /// ### English
    /// How long `GlThread::spawn` waits for the context factory to finish.
    ///
    /// ### 中文
    /// `GlThread::spawn` 等待上下文工厂完成的最长时间。
    pub init_timeout_ms: u64,
    /// ### English
    /// Requested GL / GLES major version.
    ///
    /// ### 中文
    /// 请求的 GL / GLES 主版本号。
    pub gl_major: u8,
    pub gl_minor: u8,
}

impl Default for GlThreadConfig {
    fn default() -> Self {
        Self {
            name: "GLThread".to_string(),
            init_timeout_ms: 5_000,
            gl_major: 3,
            gl_minor: 0,
        }
    }
}

impl GlThreadConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

/// ### English
/// View frame pacing. `target_fps == 0` means frames are driven by an external vsync tick.
///
/// ### 中文
/// view 帧节奏。`target_fps == 0` 表示由外部 vsync tick 驱动。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub target_fps: u32,
}

impl ViewConfig {
    /// ### English
    /// Frame interval for fixed-rate pacing, `None` in external-vsync mode.
    ///
    /// ### 中文
    /// 固定帧率模式下的帧间隔；外部 vsync 模式返回 `None`。
    pub fn frame_interval(&self) -> Option<Duration> {
        if self.target_fps == 0 {
            return None;
        }
        let nanos = (1_000_000_000u64 / self.target_fps as u64).max(1);
        Some(Duration::from_nanos(nanos))
    }
}

/// ### English
/// Capture defaults.
///
/// ### 中文
/// 截帧默认值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// ### English
    /// Interval used by the single-shot `trigger()`.
    ///
    /// ### 中文
    /// 单次 `trigger()` 使用的间隔。
    pub default_interval_ms: u64,
}

impl PipelineConfig {
    /// ### English
    /// Loads configuration from defaults, an optional TOML file and the environment.
    ///
    /// #### Parameters
    /// - `path`: Optional TOML file; a missing file is an error only when a path is given.
    ///
    /// ### 中文
    /// 从默认值、可选 TOML 文件与环境变量加载配置。
    ///
    /// #### 参数
    /// - `path`：可选的 TOML 文件；只有显式给出路径时，文件缺失才视为错误。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("GL_PIPELINE").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
