//! ### English
//! Thread-safe handle used to post work onto the GL thread.
//!
//! ### 中文
//! 用于向 GL 线程投递任务的线程安全句柄。

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use tracing::debug;

use crate::engine::error::{PipelineError, Result};
use crate::engine::gl::GlContext;

use super::GlTask;
use super::scheduler::{Job, Message, ScheduledTask};

/// ### English
/// Runs plain callbacks somewhere (the GL thread, a UI thread, ...). Used to deliver results such
/// as captured bitmaps.
///
/// ### 中文
/// 在某处（GL 线程、UI 线程等）执行普通回调，用于投递截帧位图等结果。
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// ### English
/// State shared between every handle clone and the GL thread.
///
/// ### 中文
/// 所有句柄克隆与 GL 线程共享的状态。
pub(super) struct Shared {
    pub(super) sender: channel::Sender<Message>,
    /// ### English
    /// Bumped by `remove_all_callbacks`; jobs from older epochs are dropped unexecuted.
    ///
    /// ### 中文
    /// 由 `remove_all_callbacks` 递增；旧 epoch 的任务不会被执行而直接丢弃。
    pub(super) epoch: AtomicU64,
    pub(super) next_seq: AtomicU64,
    pub(super) stopped: AtomicBool,
    pub(super) thread_id: OnceLock<ThreadId>,
}

impl Shared {
    pub(super) fn new(sender: channel::Sender<Message>) -> Self {
        Self {
            sender,
            epoch: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            thread_id: OnceLock::new(),
        }
    }

    pub(super) fn is_current_epoch(&self, job: &Job) -> bool {
        job.epoch == self.epoch.load(Ordering::Acquire)
    }
}

/// ### English
/// Cheap, cloneable handle to a [`GlThread`](super::GlThread).
///
/// ### 中文
/// 指向 [`GlThread`](super::GlThread) 的轻量可克隆句柄。
#[derive(Clone)]
pub struct GlThreadHandle {
    pub(super) shared: Arc<Shared>,
}

impl GlThreadHandle {
    fn job(&self, task: GlTask) -> Job {
        Job {
            epoch: self.shared.epoch.load(Ordering::Acquire),
            task,
        }
    }

    fn send(&self, message: Message) -> Result<()> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(PipelineError::ThreadStopped);
        }
        self.shared
            .sender
            .send(message)
            .map_err(|_| PipelineError::ThreadStopped)
    }

    /// ### English
    /// Enqueues a task; tasks run strictly in post order.
    ///
    /// #### Parameters
    /// - `task`: Closure executed on the GL thread with the thread's context.
    ///
    /// ### 中文
    /// 投递一个任务；任务严格按投递顺序执行。
    ///
    /// #### 参数
    /// - `task`：在 GL 线程上以该线程上下文执行的闭包。
    pub fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&mut dyn GlContext) + Send + 'static,
    {
        let job = self.job(Box::new(task));
        self.send(Message::Run(job))
    }

    /// ### English
    /// Enqueues a task to run after `delay`. Delayed tasks run in deadline order, ties in post
    /// order.
    ///
    /// #### Parameters
    /// - `delay`: Delay before the task becomes runnable.
    /// - `task`: Closure executed on the GL thread.
    ///
    /// ### 中文
    /// 投递一个在 `delay` 之后执行的任务。延迟任务按 deadline 顺序执行，相同则按投递顺序。
    ///
    /// #### 参数
    /// - `delay`：任务可执行前的延迟。
    /// - `task`：在 GL 线程执行的闭包。
    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> Result<()>
    where
        F: FnOnce(&mut dyn GlContext) + Send + 'static,
    {
        let scheduled = ScheduledTask {
            deadline: Instant::now() + delay,
            seq: self.shared.next_seq.fetch_add(1, Ordering::Relaxed),
            job: self.job(Box::new(task)),
        };
        self.send(Message::Delayed(scheduled))
    }

    /// ### English
    /// Drops every task (immediate and delayed) posted before this call. Tasks posted afterwards
    /// run normally.
    ///
    /// ### 中文
    /// 丢弃本次调用之前投递的全部任务（包括立即与延迟任务）；之后投递的任务正常执行。
    pub fn remove_all_callbacks(&self) {
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(epoch, "GL thread callbacks removed");
    }

    /// ### English
    /// Whether the caller is running on the GL thread.
    ///
    /// ### 中文
    /// 调用方是否运行在 GL 线程上。
    pub fn is_gl_thread(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    /// ### English
    /// Runs `f` on the GL thread and waits for its result.
    ///
    /// Fails with [`PipelineError::WouldDeadlock`] when called from the GL thread itself and
    /// [`PipelineError::ThreadStopped`] when the thread is gone (or the task was removed).
    ///
    /// #### Parameters
    /// - `f`: Closure executed on the GL thread.
    ///
    /// ### 中文
    /// 在 GL 线程执行 `f` 并等待其结果。
    ///
    /// 若在 GL 线程自身调用则返回 [`PipelineError::WouldDeadlock`]；线程已退出（或任务被移除）
    /// 时返回 [`PipelineError::ThreadStopped`]。
    ///
    /// #### 参数
    /// - `f`：在 GL 线程执行的闭包。
    pub fn invoke<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn GlContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_gl_thread() {
            return Err(PipelineError::WouldDeadlock);
        }
        let (tx, rx) = channel::bounded(1);
        self.post(move |gl| {
            let _ = tx.send(f(gl));
        })?;
        rx.recv().map_err(|_| PipelineError::ThreadStopped)
    }
}

impl CallbackExecutor for GlThreadHandle {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        if self.post(move |_| job()).is_err() {
            debug!("callback dropped: GL thread stopped");
        }
    }
}
