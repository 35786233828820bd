//! ### English
//! Arena-backed stage chain. Links are ids into the arena rather than references, so a chain can
//! be edited from any thread and walked without ownership cycles.
//!
//! ### 中文
//! 基于 arena 的阶段链。链接是指向 arena 的 id 而不是引用，因此可以在任意线程编辑链，
//! 遍历时也不存在所有权环。

use std::fmt;

use tracing::{debug, trace};

use crate::engine::error::{PipelineError, Result};
use crate::engine::frame::Frame;
use crate::engine::gl::GlContext;

use super::{Flow, Stage, StageKind};

/// ### English
/// Handle of a stage in a [`PipelineChain`]. Stale handles (of removed stages) never alias a
/// newer stage stored in the same slot.
///
/// ### 中文
/// [`PipelineChain`] 中阶段的句柄。过期句柄（已移除的阶段）不会与复用同一槽位的新阶段混淆。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageId({}v{})", self.index, self.generation)
    }
}

struct Node {
    stage: Box<dyn Stage>,
    upstream: Option<StageId>,
    downstream: Option<StageId>,
    enabled: bool,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// ### English
/// Doubly linked chain of stages stored in an arena.
///
/// ### 中文
/// 存放在 arena 中的双向阶段链。
#[derive(Default)]
pub struct PipelineChain {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl PipelineChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, id: StageId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: StageId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn existing(&self, id: StageId) -> Result<&Node> {
        self.node(id).ok_or(PipelineError::UnknownStage(id))
    }

    /// ### English
    /// Upper bound on any walk; a well-formed chain is never longer than the arena.
    ///
    /// ### 中文
    /// 任何遍历的步数上限；结构正确的链长度不会超过 arena 大小。
    fn walk_bound(&self) -> usize {
        self.slots.len()
    }

    /// ### English
    /// Stores a detached stage (no upstream, no downstream, enabled).
    ///
    /// ### 中文
    /// 存入一个游离阶段（无上游、无下游、启用状态）。
    pub fn add(&mut self, stage: Box<dyn Stage>) -> StageId {
        let node = Node {
            stage,
            upstream: None,
            downstream: None,
            enabled: true,
        };
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return StageId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        StageId {
            index,
            generation: 0,
        }
    }

    /// ### English
    /// Removes a stage, splicing its upstream and downstream neighbours together.
    /// The returned stage still owns its GL resources; release it on the GL thread.
    ///
    /// ### 中文
    /// 移除一个阶段，并把它的上下游邻居直接连接起来。
    /// 返回的阶段仍持有其 GL 资源，需要在 GL 线程上释放。
    pub fn remove(&mut self, id: StageId) -> Option<Box<dyn Stage>> {
        self.node(id)?;
        let slot = &mut self.slots[id.index as usize];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;

        if let Some(up) = node.upstream.and_then(|up| self.node_mut(up)) {
            up.downstream = node.downstream;
        }
        if let Some(down) = node.downstream.and_then(|down| self.node_mut(down)) {
            down.upstream = node.upstream;
        }
        debug!(stage = ?id, kind = ?node.stage.kind(), "stage removed");
        Some(node.stage)
    }

    pub fn upstream(&self, id: StageId) -> Option<StageId> {
        self.node(id)?.upstream
    }

    pub fn downstream(&self, id: StageId) -> Option<StageId> {
        self.node(id)?.downstream
    }

    /// ### English
    /// Head of the chain containing `from` (walks upstream).
    ///
    /// ### 中文
    /// 包含 `from` 的链的头部（向上游遍历）。
    pub fn find_first(&self, from: StageId) -> Option<StageId> {
        self.walk(from, |node| node.upstream)
    }

    /// ### English
    /// Tail of the chain containing `from` (walks downstream).
    ///
    /// ### 中文
    /// 包含 `from` 的链的尾部（向下游遍历）。
    pub fn find_last(&self, from: StageId) -> Option<StageId> {
        self.walk(from, |node| node.downstream)
    }

    fn walk(&self, from: StageId, next: impl Fn(&Node) -> Option<StageId>) -> Option<StageId> {
        let mut current = from;
        let mut node = self.node(from)?;
        for _ in 0..self.walk_bound() {
            match next(node).and_then(|id| self.node(id).map(|n| (id, n))) {
                Some((id, n)) => {
                    current = id;
                    node = n;
                }
                None => break,
            }
        }
        Some(current)
    }

    /// ### English
    /// Ids of the chain containing `from`, head to tail.
    ///
    /// ### 中文
    /// 包含 `from` 的链中所有阶段的 id，从头到尾。
    pub fn iter(&self, from: StageId) -> impl Iterator<Item = StageId> + '_ {
        std::iter::successors(self.find_first(from), move |id| self.downstream(*id))
            .take(self.walk_bound())
    }

    /// ### English
    /// First stage of `kind` in the chain containing `from`.
    ///
    /// ### 中文
    /// 包含 `from` 的链中第一个类型为 `kind` 的阶段。
    pub fn find(&self, from: StageId, kind: StageKind) -> Option<StageId> {
        self.iter(from)
            .find(|id| self.node(*id).is_some_and(|node| node.stage.kind() == kind))
    }

    pub fn stage<T: Stage>(&self, id: StageId) -> Option<&T> {
        self.node(id)?.stage.as_any().downcast_ref()
    }

    pub fn stage_mut<T: Stage>(&mut self, id: StageId) -> Option<&mut T> {
        self.node_mut(id)?.stage.as_any_mut().downcast_mut()
    }

    fn ensure_detached(&self, node: StageId) -> Result<()> {
        let linked = self.existing(node)?;
        if linked.upstream.is_some() || linked.downstream.is_some() {
            return Err(PipelineError::AlreadyLinked(node));
        }
        Ok(())
    }

    /// ### English
    /// Links `node` after the tail of the chain containing `from`.
    ///
    /// Appending the current tail again is a no-op. `node` must otherwise be detached.
    ///
    /// #### Parameters
    /// - `from`: Any stage of the target chain.
    /// - `node`: Detached stage to append.
    ///
    /// ### 中文
    /// 将 `node` 链接到包含 `from` 的链尾之后。
    ///
    /// 再次追加当前尾部不做任何事；否则 `node` 必须处于游离状态。
    ///
    /// #### 参数
    /// - `from`：目标链中的任一阶段。
    /// - `node`：要追加的游离阶段。
    pub fn append(&mut self, from: StageId, node: StageId) -> Result<()> {
        self.existing(from)?;
        self.existing(node)?;
        let tail = self.find_last(from).ok_or(PipelineError::UnknownStage(from))?;
        if tail == node {
            return Ok(());
        }
        if from == node {
            return Err(PipelineError::SelfLink(node));
        }
        self.ensure_detached(node)?;

        if let Some(tail_node) = self.node_mut(tail) {
            tail_node.downstream = Some(node);
        }
        if let Some(new_tail) = self.node_mut(node) {
            new_tail.upstream = Some(tail);
        }
        debug!(after = ?tail, stage = ?node, "stage appended");
        Ok(())
    }

    /// ### English
    /// Splices `node` directly after `after`; the old downstream of `after` follows `node`.
    ///
    /// #### Parameters
    /// - `after`: Stage that becomes `node`'s upstream.
    /// - `node`: Detached stage to insert.
    ///
    /// ### 中文
    /// 将 `node` 直接插入到 `after` 之后；`after` 原来的下游接到 `node` 之后。
    ///
    /// #### 参数
    /// - `after`：将成为 `node` 上游的阶段。
    /// - `node`：要插入的游离阶段。
    pub fn insert(&mut self, after: StageId, node: StageId) -> Result<()> {
        self.existing(after)?;
        if after == node {
            return Err(PipelineError::SelfLink(node));
        }
        self.ensure_detached(node)?;

        let old_downstream = self.downstream(after);
        if let Some(prev) = self.node_mut(after) {
            prev.downstream = Some(node);
        }
        if let Some(inserted) = self.node_mut(node) {
            inserted.upstream = Some(after);
            inserted.downstream = old_downstream;
        }
        if let Some(next) = old_downstream.and_then(|id| self.node_mut(id)) {
            next.upstream = Some(node);
        }
        debug!(after = ?after, stage = ?node, "stage inserted");
        Ok(())
    }

    /// ### English
    /// Disabled stages forward frames unchanged.
    ///
    /// ### 中文
    /// 被禁用的阶段原样转发帧。
    pub fn set_enabled(&mut self, id: StageId, enabled: bool) -> Result<()> {
        let node = self.node_mut(id).ok_or(PipelineError::UnknownStage(id))?;
        node.enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self, id: StageId) -> Option<bool> {
        self.node(id).map(|node| node.enabled)
    }

    /// ### English
    /// Dispatches `frame` through `from` and its downstream stages, then runs the
    /// `after_forward` hooks tail to head. A stage error stops the walk; the hooks of the
    /// stages that already forwarded still run before the error is returned.
    ///
    /// #### Parameters
    /// - `from`: First stage to receive the frame.
    /// - `gl`: The GL thread's context.
    /// - `frame`: Incoming frame.
    ///
    /// ### 中文
    /// 让 `frame` 依次经过 `from` 及其下游阶段，然后从尾到头执行 `after_forward` 钩子。
    /// 某个阶段出错时停止遍历；已转发过的阶段的钩子仍会执行，之后再返回该错误。
    ///
    /// #### 参数
    /// - `from`：首个接收该帧的阶段。
    /// - `gl`：GL 线程的上下文。
    /// - `frame`：输入帧。
    pub fn on_frame_available(
        &mut self,
        from: StageId,
        gl: &mut dyn GlContext,
        frame: &Frame,
    ) -> Result<()> {
        self.existing(from)?;
        let bound = self.walk_bound();
        let mut forwarded: Vec<(StageId, Frame)> = Vec::new();
        let mut current = Some(from);
        let mut frame = *frame;
        let mut outcome = Ok(());

        while let Some(id) = current {
            if forwarded.len() >= bound {
                break;
            }
            let Some(node) = self.node_mut(id) else {
                break;
            };
            let flow = if node.enabled {
                match node.stage.on_frame(gl, &frame) {
                    Ok(flow) => flow,
                    Err(err) => {
                        outcome = Err(err);
                        break;
                    }
                }
            } else {
                Flow::Forward(frame)
            };
            trace!(stage = ?id, ?flow, "stage handled frame");
            match flow {
                Flow::Forward(next) => {
                    forwarded.push((id, next));
                    frame = next;
                    current = node.downstream;
                }
                Flow::Consumed => break,
            }
        }

        for (id, frame) in forwarded.iter().rev() {
            if let Some(node) = self.node_mut(*id)
                && node.enabled
            {
                node.stage.after_forward(frame);
            }
        }
        outcome
    }

    /// ### English
    /// Releases the GL resources of every stage in the arena.
    ///
    /// ### 中文
    /// 释放 arena 中所有阶段的 GL 资源。
    pub fn release_all(&mut self, gl: &mut dyn GlContext) {
        for node in self.slots.iter_mut().filter_map(|slot| slot.node.as_mut()) {
            node.stage.release(gl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::GlError;
    use crate::engine::pipeline::{OnFrameStage, ProxyStage};
    use std::any::Any;
    use crate::engine::test_support::RecordingGl;
    use dpi::PhysicalSize;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    fn chain_of(n: usize) -> (PipelineChain, Vec<StageId>) {
        let mut chain = PipelineChain::new();
        let ids: Vec<StageId> = (0..n)
            .map(|_| chain.add(Box::new(ProxyStage::new())))
            .collect();
        for pair in ids.windows(2) {
            chain.append(pair[0], pair[1]).expect("append");
        }
        (chain, ids)
    }

    proptest! {
        #[test]
        fn head_and_tail_are_unique_from_any_node(n in 1usize..24, pick in any::<prop::sample::Index>()) {
            let (chain, ids) = chain_of(n);
            let from = ids[pick.index(n)];
            prop_assert_eq!(chain.find_first(from), Some(ids[0]));
            prop_assert_eq!(chain.find_last(from), Some(ids[n - 1]));
            prop_assert_eq!(chain.iter(from).collect::<Vec<_>>(), ids);
        }

        #[test]
        fn append_makes_node_the_tail(n in 1usize..24, pick in any::<prop::sample::Index>()) {
            let (mut chain, ids) = chain_of(n);
            let extra = chain.add(Box::new(ProxyStage::new()));
            chain.append(ids[pick.index(n)], extra).expect("append");
            prop_assert_eq!(chain.find_last(ids[0]), Some(extra));
            prop_assert_eq!(chain.find_first(extra), Some(ids[0]));
        }
    }

    #[test]
    fn insert_splices_between_neighbours() {
        let mut chain = PipelineChain::new();
        let a = chain.add(Box::new(ProxyStage::new()));
        let c = chain.add(Box::new(ProxyStage::new()));
        chain.append(a, c).expect("append");

        let b = chain.add(Box::new(ProxyStage::new()));
        chain.insert(a, b).expect("insert");

        assert_eq!(chain.iter(c).collect::<Vec<_>>(), vec![a, b, c]);
        assert_eq!(chain.upstream(c), Some(b));
        assert_eq!(chain.downstream(a), Some(b));
    }

    #[test]
    fn append_rejects_linked_and_self_links() {
        let (mut chain, ids) = chain_of(3);
        assert!(chain.append(ids[0], ids[2]).is_ok(), "tail again is a no-op");
        assert!(matches!(
            chain.append(ids[2], ids[1]),
            Err(PipelineError::AlreadyLinked(id)) if id == ids[1]
        ));
        assert!(matches!(
            chain.append(ids[0], ids[0]),
            Err(PipelineError::SelfLink(_))
        ));

        let lone = chain.add(Box::new(ProxyStage::new()));
        assert!(matches!(
            chain.insert(lone, lone),
            Err(PipelineError::SelfLink(_))
        ));
        assert_eq!(chain.iter(ids[0]).count(), 3);
    }

    #[test]
    fn remove_splices_and_invalidates_id() {
        let (mut chain, ids) = chain_of(3);
        assert!(chain.remove(ids[1]).is_some());
        assert_eq!(chain.downstream(ids[0]), Some(ids[2]));
        assert_eq!(chain.upstream(ids[2]), Some(ids[0]));

        let reused = chain.add(Box::new(ProxyStage::new()));
        assert_ne!(reused, ids[1]);
        assert!(chain.remove(ids[1]).is_none());
        assert!(matches!(
            chain.append(ids[1], reused),
            Err(PipelineError::UnknownStage(_))
        ));
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn find_by_kind_searches_whole_chain() {
        let (mut chain, ids) = chain_of(2);
        let observer = chain.add(Box::new(OnFrameStage::new(|_: &Frame| {})));
        chain.append(ids[0], observer).expect("append");

        assert_eq!(chain.find(observer, StageKind::Proxy), Some(ids[0]));
        assert_eq!(chain.find(ids[0], StageKind::OnFrame), Some(observer));
        assert_eq!(chain.find(ids[0], StageKind::MediaEffect), None);
        assert!(chain.stage::<OnFrameStage>(observer).is_some());
        assert!(chain.stage::<ProxyStage>(observer).is_none());
    }

    #[test]
    fn observers_run_after_downstream_and_disabled_stages_pass_through() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PipelineChain::new();
        let outer_log = seen.clone();
        let outer = chain.add(Box::new(OnFrameStage::new(move |frame: &Frame| {
            outer_log.lock().expect("lock").push(("outer", frame.texture_id));
        })));
        let inner_log = seen.clone();
        let inner = chain.add(Box::new(OnFrameStage::new(move |frame: &Frame| {
            inner_log.lock().expect("lock").push(("inner", frame.texture_id));
        })));
        let disabled_log = seen.clone();
        let disabled = chain.add(Box::new(OnFrameStage::new(move |frame: &Frame| {
            disabled_log.lock().expect("lock").push(("disabled", frame.texture_id));
        })));
        chain.append(outer, inner).expect("append");
        chain.append(outer, disabled).expect("append");
        chain.set_enabled(disabled, false).expect("disable");

        let mut gl = RecordingGl::new();
        chain
            .on_frame_available(outer, &mut gl, &Frame::new(5, PhysicalSize::new(1, 1)))
            .expect("dispatch");

        assert_eq!(*seen.lock().expect("lock"), vec![("inner", 5), ("outer", 5)]);
    }

    struct FailingStage;

    impl Stage for FailingStage {
        fn kind(&self) -> StageKind {
            StageKind::Proxy
        }

        fn on_frame(&mut self, _gl: &mut dyn GlContext, _frame: &Frame) -> Result<Flow> {
            Err(GlError::Unsupported("always fails").into())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn upstream_observers_still_run_when_a_stage_fails() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PipelineChain::new();
        let log = seen.clone();
        let observer = chain.add(Box::new(OnFrameStage::new(move |frame: &Frame| {
            log.lock().expect("lock").push(frame.texture_id);
        })));
        let failing = chain.add(Box::new(FailingStage));
        let after = chain.add(Box::new(ProxyStage::new()));
        chain.append(observer, failing).expect("append");
        chain.append(observer, after).expect("append");

        let mut gl = RecordingGl::new();
        let err = chain
            .on_frame_available(observer, &mut gl, &Frame::new(9, PhysicalSize::new(1, 1)))
            .expect_err("stage error is returned");
        assert!(matches!(err, PipelineError::Gl(GlError::Unsupported(_))));
        assert_eq!(*seen.lock().expect("lock"), vec![9]);
    }
}
