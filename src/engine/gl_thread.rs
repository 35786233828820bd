//! ### English
//! Dedicated GL thread: owns one GL context and runs posted tasks serially.
//!
//! ### 中文
//! 独立 GL 线程：持有一个 GL 上下文并串行执行投递的任务。

mod handle;
mod scheduler;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{self as channel, RecvTimeoutError};
use tracing::{debug, trace, warn};

use crate::engine::config::GlThreadConfig;
use crate::engine::error::{GlError, PipelineError, Result};
use crate::engine::gl::GlContext;

pub use handle::{CallbackExecutor, GlThreadHandle};

use handle::Shared;
use scheduler::{DelayedQueue, Job, Message};

/// ### English
/// Work item executed on the GL thread with exclusive access to its context.
///
/// ### 中文
/// 在 GL 线程上执行、独占访问其上下文的工作项。
pub type GlTask = Box<dyn FnOnce(&mut dyn GlContext) + Send + 'static>;

/// ### English
/// Owner of the GL thread. Dropping it shuts the thread down and joins it.
///
/// ### 中文
/// GL 线程的所有者。drop 时关闭并 join 该线程。
pub struct GlThread {
    handle: GlThreadHandle,
    join: Option<thread::JoinHandle<()>>,
}

impl GlThread {
    /// ### English
    /// Spawns the GL thread and creates its context there.
    ///
    /// `factory` runs on the new thread (GL contexts are bound to the thread that creates
    /// them). This function blocks until the factory returns or `init_timeout_ms` elapses.
    ///
    /// #### Parameters
    /// - `config`: Thread name, init timeout and requested GL version.
    /// - `factory`: Creates the context on the GL thread.
    ///
    /// ### 中文
    /// 创建 GL 线程并在其中创建上下文。
    ///
    /// `factory` 在新线程上运行（GL 上下文绑定到创建它的线程）。该函数会阻塞，直到工厂返回
    /// 或超过 `init_timeout_ms`。
    ///
    /// #### 参数
    /// - `config`：线程名、初始化超时与请求的 GL 版本。
    /// - `factory`：在 GL 线程上创建上下文。
    pub fn spawn<F>(config: &GlThreadConfig, factory: F) -> Result<Self>
    where
        F: FnOnce() -> std::result::Result<Box<dyn GlContext>, GlError> + Send + 'static,
    {
        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(Shared::new(sender));
        let shared_for_thread = shared.clone();
        let (init_tx, init_rx) = channel::bounded(1);

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                let _ = shared_for_thread.thread_id.set(thread::current().id());
                match factory() {
                    Ok(gl) => {
                        let _ = init_tx.send(Ok(()));
                        run_gl_thread(gl, receiver, shared_for_thread);
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                    }
                }
            })
            .map_err(|err| GlError::Context(format!("failed to spawn GL thread: {err}")))?;

        let handle = GlThreadHandle { shared };
        match init_rx.recv_timeout(config.init_timeout()) {
            Ok(Ok(())) => {
                debug!(name = %config.name, "GL thread started");
                Ok(Self {
                    handle,
                    join: Some(join),
                })
            }
            Ok(Err(err)) => {
                let _ = join.join();
                Err(err.into())
            }
            Err(_) => {
                /*
                ### English
                The factory may be stuck inside the driver; ask the thread to stop once it gets
                there and detach instead of joining.

                ### 中文
                工厂可能卡在驱动内部；请求线程在之后退出，并直接 detach 而不是 join。
                */
                handle.shared.stopped.store(true, Ordering::Release);
                let _ = handle.shared.sender.send(Message::Shutdown);
                warn!(name = %config.name, "timed out initializing GL thread");
                Err(PipelineError::InitTimeout)
            }
        }
    }

    pub fn handle(&self) -> GlThreadHandle {
        self.handle.clone()
    }

    /// ### English
    /// Stops accepting tasks, drops the context on the GL thread and joins it.
    /// Tasks still queued are discarded.
    ///
    /// ### 中文
    /// 停止接收任务，在 GL 线程上释放上下文并 join。
    /// 仍在队列中的任务会被丢弃。
    pub fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.handle.shared.stopped.store(true, Ordering::Release);
        let _ = self.handle.shared.sender.send(Message::Shutdown);
        if join.thread().id() != thread::current().id() {
            let _ = join.join();
        }
        debug!("GL thread stopped");
    }
}

impl Drop for GlThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// ### English
/// GL thread main loop.
///
/// #### Parameters
/// - `gl`: The context owned by this thread; dropped here on exit.
/// - `receiver`: Message queue into the GL thread.
/// - `shared`: Epoch and shutdown state shared with the handles.
///
/// ### 中文
/// GL 线程主循环。
///
/// #### 参数
/// - `gl`：本线程持有的上下文；退出时在此处释放。
/// - `receiver`：发送到 GL 线程的消息队列。
/// - `shared`：与句柄共享的 epoch 与关闭状态。
fn run_gl_thread(
    mut gl: Box<dyn GlContext>,
    receiver: channel::Receiver<Message>,
    shared: Arc<Shared>,
) {
    let mut delayed = DelayedQueue::default();

    loop {
        let message = match delayed.next_deadline() {
            Some(deadline) => {
                match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match receiver.recv() {
                Ok(message) => Some(message),
                Err(_) => return,
            },
        };

        match message {
            Some(Message::Run(job)) => run_job(gl.as_mut(), &shared, job),
            Some(Message::Delayed(task)) => delayed.push(task),
            Some(Message::Shutdown) => return,
            None => {}
        }

        let now = Instant::now();
        while let Some(job) = delayed.pop_due(now) {
            run_job(gl.as_mut(), &shared, job);
        }
    }
}

fn run_job(gl: &mut dyn GlContext, shared: &Shared, job: Job) {
    if !shared.is_current_epoch(&job) {
        trace!(epoch = job.epoch, "dropping removed GL task");
        return;
    }
    (job.task)(gl);
}
