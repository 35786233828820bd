//! ### English
//! GLSL ES 1.00 sources for the textured-quad drawer and the effect fragment variants.
//!
//! ### 中文
//! 纹理四边形绘制器与各效果片元着色器变体的 GLSL ES 1.00 源码。

use crate::engine::pipeline::Effect;

pub const VERTEX_SHADER: &str = r#"
uniform mat4 uMVPMatrix;
uniform mat4 uTexMatrix;
attribute highp vec4 aPosition;
attribute highp vec4 aTextureCoord;
varying highp vec2 vTextureCoord;
void main() {
    gl_Position = uMVPMatrix * aPosition;
    vTextureCoord = (uTexMatrix * aTextureCoord).xy;
}
"#;

const HEADER_2D: &str = "precision mediump float;\nuniform sampler2D sTexture;\n";

const HEADER_OES: &str = "#extension GL_OES_EGL_image_external : require\n\
precision mediump float;\nuniform samplerExternalOES sTexture;\n";

const COMMON: &str = "varying highp vec2 vTextureCoord;\nuniform vec4 uParams;\n";

/// ### English
/// Body of `main()` for each effect. `c` holds the sampled color.
///
/// ### 中文
/// 各效果 `main()` 的函数体；`c` 为采样得到的颜色。
fn effect_body(effect: Effect) -> &'static str {
    match effect {
        Effect::None => "gl_FragColor = c;",
        Effect::Grayscale => {
            "float y = dot(c.rgb, vec3(0.299, 0.587, 0.114));\n\
             gl_FragColor = vec4(y, y, y, c.a);"
        }
        Effect::Sepia => {
            "vec3 s = vec3(dot(c.rgb, vec3(0.393, 0.769, 0.189)),\n\
                           dot(c.rgb, vec3(0.349, 0.686, 0.168)),\n\
                           dot(c.rgb, vec3(0.272, 0.534, 0.131)));\n\
             gl_FragColor = vec4(min(s, vec3(1.0)), c.a);"
        }
        Effect::Negative => "gl_FragColor = vec4(vec3(1.0) - c.rgb, c.a);",
        Effect::Brightness => "gl_FragColor = vec4(clamp(c.rgb + uParams.x, 0.0, 1.0), c.a);",
        Effect::Contrast => {
            "gl_FragColor = vec4(clamp((c.rgb - 0.5) * uParams.x + 0.5, 0.0, 1.0), c.a);"
        }
        Effect::Posterize => {
            "float levels = max(uParams.x, 2.0);\n\
             gl_FragColor = vec4(floor(c.rgb * levels) / (levels - 1.0), c.a);"
        }
    }
}

/// ### English
/// Builds the fragment shader for `effect`, sampling a 2D or an external (OES) texture.
///
/// ### 中文
/// 为 `effect` 生成片元着色器，采样 2D 纹理或外部（OES）纹理。
pub fn fragment_shader(effect: Effect, is_oes: bool) -> String {
    let header = if is_oes { HEADER_OES } else { HEADER_2D };
    format!(
        "{header}{COMMON}void main() {{\nvec4 c = texture2D(sTexture, vTextureCoord);\n{}\n}}\n",
        effect_body(effect)
    )
}
