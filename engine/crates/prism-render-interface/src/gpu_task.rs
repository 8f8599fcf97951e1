use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::sync::WaitGroup;
use prism_gfx::sync::fence::GfxFence;

/// 等待 GPU 完成后在 worker 上执行的 CPU 任务
pub struct GpuTask {
    name: String,
    job: Box<dyn FnOnce() + Send + 'static>,
}
impl GpuTask {
    /// 包装一个闭包，返回任务本身和用于取回结果的句柄
    pub fn new<T, F>(name: impl Into<String>, f: F) -> (Self, GpuTaskHandle<T>)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded::<T>(1);
        let task = Self {
            name: name.into(),
            job: Box::new(move || {
                // 句柄已经被丢弃时，结果直接丢弃
                let _ = result_tx.send(f());
            }),
        };
        (task, GpuTaskHandle { result_receiver: result_rx })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 任务结果的接收端
pub struct GpuTaskHandle<T> {
    result_receiver: Receiver<T>,
}
impl<T> GpuTaskHandle<T> {
    /// 不阻塞地尝试取回结果
    pub fn try_take(&self) -> Option<T> {
        self.result_receiver.try_recv().ok()
    }

    /// 阻塞等待结果；任务在执行前被丢弃时返回 `None`
    pub fn wait(self) -> Option<T> {
        self.result_receiver.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        self.result_receiver.recv_timeout(timeout).ok()
    }
}

/// 以 timeline fence 值为 key 的 continuation 调度器
///
/// ## 架构设计
/// - `schedule` 登记任务以及它等待的 fence 值
/// - `poll` 查询 fence，把所有已到达的任务交给 rayon worker 线程池
/// - 任务结果通过 crossbeam channel 返回给 `GpuTaskHandle`
/// - 任务在哪个 worker 上执行是不确定的
pub struct GpuTaskScheduler {
    /// fence value -> 等待该值的任务
    pending: BTreeMap<u64, Vec<GpuTask>>,
    pool: rayon::ThreadPool,
    /// 每个正在执行的任务持有一个 clone
    wait_group: WaitGroup,
    /// worker 执行完任务后回报名称
    finished_sender: Sender<String>,
    finished_receiver: Receiver<String>,
}

// new & init
impl GpuTaskScheduler {
    pub fn new(worker_count: usize) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|index| format!("Gpu-Task-{}", index))
            .build()
            .context("Failed to create gpu task thread pool")?;
        let (finished_sender, finished_receiver) = crossbeam_channel::unbounded();

        Ok(Self {
            pending: BTreeMap::new(),
            pool,
            wait_group: WaitGroup::new(),
            finished_sender,
            finished_receiver,
        })
    }
}

// getters
impl GpuTaskScheduler {
    /// 尚未到达 fence 值的任务数量
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }
}

impl GpuTaskScheduler {
    /// 登记一个在 fence 到达 `fence_value` 之后执行的任务
    pub fn schedule(&mut self, fence_value: u64, task: GpuTask) {
        log::trace!("gpu task {} waits for fence value {fence_value}", task.name);
        self.pending.entry(fence_value).or_default().push(task);
    }

    /// 便捷方法：包装闭包并登记
    pub fn schedule_fn<T, F>(&mut self, name: impl Into<String>, fence_value: u64, f: F) -> GpuTaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (task, handle) = GpuTask::new(name, f);
        self.schedule(fence_value, task);
        handle
    }

    /// 把所有 fence 已到达的任务派发到 worker，返回派发的数量
    pub fn poll(&mut self, fence: &dyn GfxFence) -> usize {
        let completed = fence.completed_value();
        let still_pending = match completed.checked_add(1) {
            Some(next) => self.pending.split_off(&next),
            None => BTreeMap::new(),
        };
        let ready = std::mem::replace(&mut self.pending, still_pending);

        let mut dispatched = 0;
        for task in ready.into_values().flatten() {
            let wg_task = self.wait_group.clone();
            let finished_sender = self.finished_sender.clone();
            self.pool.spawn(move || {
                let GpuTask { name, job } = task;
                job();
                let _ = finished_sender.send(name);

                // wg_task 在这里自动 drop
                drop(wg_task);
            });
            dispatched += 1;
        }
        dispatched
    }

    /// 已经执行完毕的任务名称
    pub fn drain_finished(&self) -> Vec<String> {
        self.finished_receiver.try_iter().collect()
    }

    /// 阻塞直到所有已派发的任务执行完毕
    pub fn wait_idle(&mut self) {
        let wait_group = std::mem::replace(&mut self.wait_group, WaitGroup::new());
        wait_group.wait();
    }
}

impl Drop for GpuTaskScheduler {
    fn drop(&mut self) {
        let abandoned = self.pending_count();
        if abandoned > 0 {
            log::warn!("GpuTaskScheduler dropped with {abandoned} tasks still waiting for the GPU");
        }
        self.wait_idle();
    }
}
