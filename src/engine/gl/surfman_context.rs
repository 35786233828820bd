//! ### English
//! surfman + glow implementation of [`GlContext`].
//! Owns one surfman context with a 1×1 generic surface (so the context can always be made
//! current), window targets as surfman widget surfaces, and offscreen targets as FBO + texture
//! pairs living in the same context.
//!
//! ### 中文
//! 基于 surfman + glow 的 [`GlContext`] 实现。
//! 持有一个 surfman 上下文及 1×1 的通用 surface（保证上下文始终可以 make current），
//! 窗口目标为 surfman widget surface，离屏目标为同一上下文中的 FBO + 纹理对。

use std::collections::HashMap;
use std::ffi::c_void;
use std::num::NonZeroU32;

use dpi::PhysicalSize;
use euclid::default::Size2D;
use glow::HasContext as _;
use surfman::{
    Connection, Context, ContextAttributeFlags, ContextAttributes, Device, GLApi, GLVersion,
    Surface, SurfaceAccess, SurfaceType,
};
use tracing::debug;

use crate::engine::config::GlThreadConfig;
use crate::engine::error::GlError;
use crate::engine::pipeline::Effect;

use super::shaders;
use super::{DrawPass, GlContext, RenderTarget, TargetRequest, Viewport};

/// ### English
/// `GL_TEXTURE_EXTERNAL_OES`.
///
/// ### 中文
/// `GL_TEXTURE_EXTERNAL_OES`。
const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

const ATTRIB_POSITION: u32 = 0;
const ATTRIB_TEXTURE_COORD: u32 = 1;

/// ### English
/// Interleaved `(x, y, s, t)` triangle strip covering the viewport.
///
/// ### 中文
/// 交错排列的 `(x, y, s, t)` 三角形带，铺满整个视口。
#[rustfmt::skip]
const FULL_QUAD: [f32; 16] = [
    -1.0, -1.0, 0.0, 0.0,
     1.0, -1.0, 1.0, 0.0,
    -1.0,  1.0, 0.0, 1.0,
     1.0,  1.0, 1.0, 1.0,
];

fn parse_gl_version(version: &str) -> (u32, u32) {
    /*
    ### English
    Expected forms: `"4.6.0 ..."` or `"OpenGL ES 3.2 ..."`.

    ### 中文
    期望的版本字符串形式：`"4.6.0 ..."` 或 `"OpenGL ES 3.2 ..."`。
    */
    let Some(token) = version
        .split_whitespace()
        .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))
    else {
        return (0, 0);
    };
    let mut parts = token.split('.');
    let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (major, minor)
}

fn context_error(what: &str, err: surfman::Error) -> GlError {
    GlError::Context(format!("{what}: {err:?}"))
}

struct DrawProgram {
    program: glow::Program,
    u_mvp: Option<glow::UniformLocation>,
    u_tex_matrix: Option<glow::UniformLocation>,
    u_params: Option<glow::UniformLocation>,
    u_sampler: Option<glow::UniformLocation>,
}

enum TargetSlot {
    /// ### English
    /// Widget surface; `None` while it is bound to the context.
    ///
    /// ### 中文
    /// widget surface；绑定到上下文期间为 `None`。
    Window {
        surface: Option<Surface>,
        size: PhysicalSize<u32>,
    },
    Offscreen {
        framebuffer: glow::Framebuffer,
        texture: glow::Texture,
        size: PhysicalSize<u32>,
    },
}

/// ### English
/// Production GL context for the GL thread. Not `Send`: create it inside the
/// [`GlThread`](crate::engine::gl_thread::GlThread) factory.
///
/// ### 中文
/// GL 线程使用的生产 GL 上下文。非 `Send`：请在
/// [`GlThread`](crate::engine::gl_thread::GlThread) 的工厂闭包中创建。
pub struct SurfmanGlContext {
    connection: Connection,
    device: Device,
    context: Context,
    gl: glow::Context,
    gles: bool,
    gles3: bool,
    quad: Option<glow::Buffer>,
    programs: HashMap<(Effect, bool), DrawProgram>,
    targets: HashMap<u32, TargetSlot>,
    next_target: u32,
    /// ### English
    /// Window target whose surface is currently bound (`None` = the base surface).
    ///
    /// ### 中文
    /// 当前绑定到上下文的窗口目标（`None` 表示基础 surface）。
    bound_window: Option<u32>,
    base_surface: Option<Surface>,
}

impl SurfmanGlContext {
    /// ### English
    /// Creates the context and makes it current on the calling thread.
    /// Must be called on the thread that will own it (the GL thread).
    ///
    /// ### 中文
    /// 创建上下文并使其在调用线程上成为 current。
    /// 必须在将要持有它的线程（GL 线程）中调用。
    pub fn new(config: &GlThreadConfig) -> Result<Self, GlError> {
        let connection =
            Connection::new().map_err(|err| context_error("create surfman Connection", err))?;
        let adapter = connection
            .create_adapter()
            .map_err(|err| context_error("create adapter", err))?;
        let mut device = connection
            .create_device(&adapter)
            .map_err(|err| context_error("create device", err))?;

        let attributes = ContextAttributes {
            version: GLVersion::new(config.gl_major, config.gl_minor),
            flags: ContextAttributeFlags::empty(),
        };
        let descriptor = device
            .create_context_descriptor(&attributes)
            .map_err(|err| context_error("create context descriptor", err))?;
        let mut context = device
            .create_context(&descriptor, None)
            .map_err(|err| context_error("create context", err))?;

        let surface = match device.create_surface(
            &context,
            SurfaceAccess::GPUOnly,
            SurfaceType::Generic {
                size: Size2D::new(1, 1),
            },
        ) {
            Ok(surface) => surface,
            Err(err) => {
                let _ = device.destroy_context(&mut context);
                return Err(context_error("create base surface", err));
            }
        };
        if let Err((err, mut surface)) = device.bind_surface_to_context(&mut context, surface) {
            let _ = device.destroy_surface(&mut context, &mut surface);
            let _ = device.destroy_context(&mut context);
            return Err(context_error("bind base surface", err));
        }
        if let Err(err) = device.make_context_current(&context) {
            let _ = device.destroy_context(&mut context);
            return Err(context_error("make context current", err));
        }

        let gl = unsafe {
            glow::Context::from_loader_function(|name| device.get_proc_address(&context, name))
        };

        let gles = matches!(device.gl_api(), GLApi::GLES);
        let version = unsafe { gl.get_parameter_string(glow::VERSION) };
        let (major, minor) = parse_gl_version(&version);
        debug!(%version, major, minor, gles, "GL context created");

        Ok(Self {
            connection,
            device,
            context,
            gl,
            gles,
            gles3: gles && major >= 3,
            quad: None,
            programs: HashMap::new(),
            targets: HashMap::new(),
            next_target: 1,
            bound_window: None,
            base_surface: None,
        })
    }

    fn make_context_current(&self) -> Result<(), GlError> {
        self.device
            .make_context_current(&self.context)
            .map_err(|err| context_error("make context current", err))
    }

    /// ### English
    /// Swaps the surface bound to the context; the previously bound surface goes back to its
    /// owner (a window slot or the base surface).
    ///
    /// ### 中文
    /// 切换绑定到上下文的 surface；之前绑定的 surface 归还给其所有者（窗口槽位或基础 surface）。
    fn bind_window(&mut self, window: Option<u32>) -> Result<(), GlError> {
        if self.bound_window == window {
            return Ok(());
        }

        let incoming = match window {
            Some(id) => match self.targets.get_mut(&id) {
                Some(TargetSlot::Window { surface, .. }) => surface.take(),
                _ => return Err(GlError::UnknownTarget(id)),
            },
            None => self.base_surface.take(),
        };
        let Some(incoming) = incoming else {
            return Err(GlError::Surface("surface already bound".to_string()));
        };

        let outgoing = self
            .device
            .unbind_surface_from_context(&mut self.context)
            .map_err(|err| context_error("unbind surface", err))?;
        if let Some(outgoing) = outgoing {
            self.store_surface(self.bound_window, outgoing);
        }

        match self
            .device
            .bind_surface_to_context(&mut self.context, incoming)
        {
            Ok(()) => {
                self.bound_window = window;
                Ok(())
            }
            Err((err, surface)) => {
                self.store_surface(window, surface);
                Err(context_error("bind surface", err))
            }
        }
    }

    fn store_surface(&mut self, owner: Option<u32>, surface: Surface) {
        match owner.and_then(|id| self.targets.get_mut(&id)) {
            Some(TargetSlot::Window { surface: slot, .. }) => *slot = Some(surface),
            _ => self.base_surface = Some(surface),
        }
    }

    fn bind_context_framebuffer(&self) -> Result<(), GlError> {
        let framebuffer = self
            .device
            .context_surface_info(&self.context)
            .map_err(|err| context_error("query surface info", err))?
            .and_then(|info| info.framebuffer_object);
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer);
        }
        Ok(())
    }

    fn create_offscreen(&mut self, size: PhysicalSize<u32>) -> Result<TargetSlot, GlError> {
        self.make_context_current()?;
        let gl = &self.gl;
        unsafe {
            let texture = gl.create_texture().map_err(GlError::Surface)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            allocate_rgba(gl, size);
            for (pname, value) in [
                (glow::TEXTURE_MIN_FILTER, glow::LINEAR),
                (glow::TEXTURE_MAG_FILTER, glow::LINEAR),
                (glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE),
                (glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE),
            ] {
                gl.tex_parameter_i32(glow::TEXTURE_2D, pname, value as i32);
            }

            let framebuffer = match gl.create_framebuffer() {
                Ok(framebuffer) => framebuffer,
                Err(err) => {
                    gl.delete_texture(texture);
                    return Err(GlError::Surface(err));
                }
            };
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_texture(glow::TEXTURE_2D, None);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(framebuffer);
                gl.delete_texture(texture);
                return Err(GlError::IncompleteFramebuffer(status));
            }

            Ok(TargetSlot::Offscreen {
                framebuffer,
                texture,
                size,
            })
        }
    }

    fn create_window(
        &mut self,
        native_window: usize,
        size: PhysicalSize<u32>,
    ) -> Result<TargetSlot, GlError> {
        let native_widget = unsafe {
            self.connection.create_native_widget_from_ptr(
                native_window as *mut c_void,
                Size2D::new(size.width as i32, size.height as i32),
            )
        };
        let surface = self
            .device
            .create_surface(
                &self.context,
                SurfaceAccess::GPUOnly,
                SurfaceType::Widget { native_widget },
            )
            .map_err(|err| context_error("create window surface", err))?;
        Ok(TargetSlot::Window {
            surface: Some(surface),
            size,
        })
    }

    fn quad_buffer(&mut self) -> Result<glow::Buffer, GlError> {
        if let Some(quad) = self.quad {
            return Ok(quad);
        }
        let quad = unsafe {
            let buffer = self.gl.create_buffer().map_err(GlError::Surface)?;
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(&FULL_QUAD),
                glow::STATIC_DRAW,
            );
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            buffer
        };
        self.quad = Some(quad);
        Ok(quad)
    }

    fn program(&mut self, effect: Effect, is_oes: bool) -> Result<&DrawProgram, GlError> {
        if is_oes && !self.gles {
            return Err(GlError::Unsupported(
                "external (OES) textures require a GLES context",
            ));
        }
        if !self.programs.contains_key(&(effect, is_oes)) {
            let program = build_program(&self.gl, effect, is_oes)?;
            debug!(?effect, is_oes, "compiled effect program");
            self.programs.insert((effect, is_oes), program);
        }
        self.programs
            .get(&(effect, is_oes))
            .ok_or(GlError::Shader("program cache miss".to_string()))
    }

    fn destroy_slot(&mut self, id: u32, slot: TargetSlot) {
        match slot {
            TargetSlot::Offscreen {
                framebuffer,
                texture,
                ..
            } => unsafe {
                self.gl.delete_framebuffer(framebuffer);
                self.gl.delete_texture(texture);
            },
            TargetSlot::Window { surface, .. } => {
                let surface = match surface {
                    Some(surface) => Some(surface),
                    None if self.bound_window == Some(id) => {
                        let unbound = self
                            .device
                            .unbind_surface_from_context(&mut self.context)
                            .ok()
                            .flatten();
                        self.bound_window = None;
                        unbound
                    }
                    None => None,
                };
                if let Some(mut surface) = surface {
                    let _ = self.device.destroy_surface(&mut self.context, &mut surface);
                }
                if self.bound_window.is_none()
                    && let Some(base) = self.base_surface.take()
                    && let Err((_, base)) =
                        self.device.bind_surface_to_context(&mut self.context, base)
                {
                    self.base_surface = Some(base);
                }
            }
        }
    }
}

fn allocate_rgba(gl: &glow::Context, size: PhysicalSize<u32>) {
    unsafe {
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA as i32,
            size.width as i32,
            size.height as i32,
            0,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(None),
        );
    }
}

fn compile_shader(gl: &glow::Context, kind: u32, source: &str) -> Result<glow::Shader, GlError> {
    unsafe {
        let shader = gl.create_shader(kind).map_err(GlError::Shader)?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(GlError::Shader(log));
        }
        Ok(shader)
    }
}

fn build_program(gl: &glow::Context, effect: Effect, is_oes: bool) -> Result<DrawProgram, GlError> {
    let vertex = compile_shader(gl, glow::VERTEX_SHADER, shaders::VERTEX_SHADER)?;
    let fragment = match compile_shader(
        gl,
        glow::FRAGMENT_SHADER,
        &shaders::fragment_shader(effect, is_oes),
    ) {
        Ok(fragment) => fragment,
        Err(err) => {
            unsafe { gl.delete_shader(vertex) };
            return Err(err);
        }
    };

    unsafe {
        let program = match gl.create_program() {
            Ok(program) => program,
            Err(err) => {
                gl.delete_shader(vertex);
                gl.delete_shader(fragment);
                return Err(GlError::Shader(err));
            }
        };
        gl.attach_shader(program, vertex);
        gl.attach_shader(program, fragment);
        gl.bind_attrib_location(program, ATTRIB_POSITION, "aPosition");
        gl.bind_attrib_location(program, ATTRIB_TEXTURE_COORD, "aTextureCoord");
        gl.link_program(program);
        gl.detach_shader(program, vertex);
        gl.detach_shader(program, fragment);
        gl.delete_shader(vertex);
        gl.delete_shader(fragment);
        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(GlError::Shader(log));
        }

        Ok(DrawProgram {
            program,
            u_mvp: gl.get_uniform_location(program, "uMVPMatrix"),
            u_tex_matrix: gl.get_uniform_location(program, "uTexMatrix"),
            u_params: gl.get_uniform_location(program, "uParams"),
            u_sampler: gl.get_uniform_location(program, "sTexture"),
        })
    }
}

impl GlContext for SurfmanGlContext {
    fn is_gles3(&self) -> bool {
        self.gles3
    }

    fn create_target(&mut self, request: TargetRequest) -> Result<RenderTarget, GlError> {
        let slot = match request {
            TargetRequest::Offscreen { size } => self.create_offscreen(size)?,
            TargetRequest::Window {
                native_window,
                size,
            } => self.create_window(native_window, size)?,
        };
        let id = self.next_target;
        self.next_target = self.next_target.wrapping_add(1).max(1);
        self.targets.insert(id, slot);
        debug!(render_target = id, ?request, "render target created");
        Ok(RenderTarget(id))
    }

    fn resize_target(
        &mut self,
        target: RenderTarget,
        new_size: PhysicalSize<u32>,
    ) -> Result<(), GlError> {
        self.make_context_current()?;
        match self.targets.get_mut(&target.0) {
            Some(TargetSlot::Offscreen { texture, size, .. }) => {
                if *size == new_size {
                    return Ok(());
                }
                unsafe {
                    self.gl.bind_texture(glow::TEXTURE_2D, Some(*texture));
                    allocate_rgba(&self.gl, new_size);
                    self.gl.bind_texture(glow::TEXTURE_2D, None);
                }
                *size = new_size;
                Ok(())
            }
            Some(TargetSlot::Window { size, .. }) => {
                *size = new_size;
                Ok(())
            }
            None => Err(GlError::UnknownTarget(target.0)),
        }
    }

    fn release_target(&mut self, target: RenderTarget) {
        let Some(slot) = self.targets.remove(&target.0) else {
            return;
        };
        if self.make_context_current().is_err() {
            return;
        }
        self.destroy_slot(target.0, slot);
        debug!(render_target = target.0, "render target released");
    }

    fn target_texture(&self, target: RenderTarget) -> Option<u32> {
        match self.targets.get(&target.0) {
            Some(TargetSlot::Offscreen { texture, .. }) => Some(texture.0.get()),
            _ => None,
        }
    }

    fn make_current(&mut self, target: RenderTarget) -> Result<(), GlError> {
        match self.targets.get(&target.0) {
            Some(TargetSlot::Offscreen { framebuffer, .. }) => {
                let framebuffer = *framebuffer;
                self.make_context_current()?;
                unsafe {
                    self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
                }
                Ok(())
            }
            Some(TargetSlot::Window { .. }) => {
                self.bind_window(Some(target.0))?;
                self.make_context_current()?;
                self.bind_context_framebuffer()
            }
            None => Err(GlError::UnknownTarget(target.0)),
        }
    }

    fn swap(&mut self, target: RenderTarget) -> Result<(), GlError> {
        match self.targets.get(&target.0) {
            Some(TargetSlot::Offscreen { .. }) => {
                unsafe { self.gl.flush() };
                Ok(())
            }
            Some(TargetSlot::Window { .. }) => {
                self.bind_window(Some(target.0))?;
                let mut surface = self
                    .device
                    .unbind_surface_from_context(&mut self.context)
                    .map_err(|err| context_error("unbind surface", err))?
                    .ok_or(GlError::Surface("no surface bound".to_string()))?;
                let presented = self.device.present_surface(&self.context, &mut surface);
                if let Err((err, surface)) =
                    self.device.bind_surface_to_context(&mut self.context, surface)
                {
                    self.store_surface(Some(target.0), surface);
                    self.bound_window = None;
                    return Err(context_error("rebind surface", err));
                }
                presented.map_err(|err| context_error("present surface", err))
            }
            None => Err(GlError::UnknownTarget(target.0)),
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        unsafe {
            self.gl
                .viewport(viewport.x, viewport.y, viewport.width, viewport.height);
        }
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        unsafe {
            self.gl.clear_color(rgba[0], rgba[1], rgba[2], rgba[3]);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    fn draw(&mut self, pass: &DrawPass) -> Result<(), GlError> {
        let texture = NonZeroU32::new(pass.texture_id)
            .map(glow::NativeTexture)
            .ok_or(GlError::Unsupported("texture 0 cannot be sampled"))?;
        let quad = self.quad_buffer()?;
        let texture_target = if pass.is_oes {
            TEXTURE_EXTERNAL_OES
        } else {
            glow::TEXTURE_2D
        };

        let program = self.program(pass.effect, pass.is_oes)?;
        let (program_id, u_mvp, u_tex, u_params, u_sampler) = (
            program.program,
            program.u_mvp.clone(),
            program.u_tex_matrix.clone(),
            program.u_params.clone(),
            program.u_sampler.clone(),
        );

        let gl = &self.gl;
        unsafe {
            gl.use_program(Some(program_id));
            gl.uniform_matrix_4_f32_slice(u_mvp.as_ref(), false, &pass.mvp);
            gl.uniform_matrix_4_f32_slice(u_tex.as_ref(), false, &pass.tex_matrix);
            gl.uniform_4_f32_slice(u_params.as_ref(), &pass.params);
            gl.uniform_1_i32(u_sampler.as_ref(), 0);

            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(texture_target, Some(texture));

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(quad));
            gl.enable_vertex_attrib_array(ATTRIB_POSITION);
            gl.vertex_attrib_pointer_f32(ATTRIB_POSITION, 2, glow::FLOAT, false, 16, 0);
            gl.enable_vertex_attrib_array(ATTRIB_TEXTURE_COORD);
            gl.vertex_attrib_pointer_f32(ATTRIB_TEXTURE_COORD, 2, glow::FLOAT, false, 16, 8);

            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);

            gl.disable_vertex_attrib_array(ATTRIB_POSITION);
            gl.disable_vertex_attrib_array(ATTRIB_TEXTURE_COORD);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_texture(texture_target, None);
            gl.use_program(None);
        }
        Ok(())
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>, GlError> {
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        unsafe {
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.read_pixels(
                0,
                0,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(&mut pixels)),
            );
            let error = self.gl.get_error();
            if error != glow::NO_ERROR {
                return Err(GlError::Readback(format!("glReadPixels error 0x{error:x}")));
            }
        }
        Ok(pixels)
    }
}

impl Drop for SurfmanGlContext {
    /// ### English
    /// Releases every target, program and surface, then the context itself.
    ///
    /// ### 中文
    /// 释放所有目标、程序与 surface，最后销毁上下文本身。
    fn drop(&mut self) {
        let _ = self.make_context_current();
        unsafe {
            for (_, program) in self.programs.drain() {
                self.gl.delete_program(program.program);
            }
            if let Some(quad) = self.quad.take() {
                self.gl.delete_buffer(quad);
            }
        }
        let ids: Vec<u32> = self.targets.keys().copied().collect();
        for id in ids {
            if let Some(slot) = self.targets.remove(&id) {
                self.destroy_slot(id, slot);
            }
        }
        if let Ok(Some(mut surface)) = self.device.unbind_surface_from_context(&mut self.context) {
            let _ = self.device.destroy_surface(&mut self.context, &mut surface);
        }
        if let Some(mut surface) = self.base_surface.take() {
            let _ = self.device.destroy_surface(&mut self.context, &mut surface);
        }
        let _ = self.device.destroy_context(&mut self.context);
    }
}
