/// ### English
/// Engine internal modules (GL thread, GL backend, pipeline stages, view lifecycle).
///
/// ### 中文
/// 引擎内部模块（GL 线程、GL 后端、管线阶段、view 生命周期）。
pub mod config;
pub mod error;
pub mod frame;
pub mod gl;
pub mod gl_thread;
pub mod matrix;
pub mod pipeline;
pub mod view;
pub mod vsync;

#[cfg(test)]
pub(crate) mod test_support;
