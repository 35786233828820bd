//! ### English
//! Minimal 4×4 column-major matrix helpers for texture and MVP transforms.
//!
//! ### 中文
//! 用于纹理变换与 MVP 变换的最小 4×4 列主序矩阵工具。

/// ### English
/// 16-element column-major matrix (GL layout).
///
/// ### 中文
/// 16 元素列主序矩阵（GL 布局）。
pub type Mat4 = [f32; 16];

#[rustfmt::skip]
pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// ### English
/// Scale matrix with the given axis factors (used for mirroring with ±1).
///
/// ### 中文
/// 按给定轴系数生成缩放矩阵（镜像时使用 ±1）。
pub fn scale(x: f32, y: f32) -> Mat4 {
    let mut out = IDENTITY;
    out[0] = x;
    out[5] = y;
    out
}

/// ### English
/// Texture-space vertical flip (`t -> 1 - t`).
///
/// ### 中文
/// 纹理空间的垂直翻转（`t -> 1 - t`）。
pub fn flip_vertical() -> Mat4 {
    let mut out = IDENTITY;
    out[5] = -1.0;
    out[13] = 1.0;
    out
}
