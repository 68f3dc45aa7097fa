//! Scheduling of value node evaluations.
//!
//! Every evaluation-bearing request is funneled through [`EvaluationManager::submit`]:
//!
//! - requests are keyed by the owning runtime and executed in FIFO order by a dedicated
//!   evaluation worker for that runtime, so the paused debuggee is never inspected by two
//!   requests at once while separate runtimes proceed in parallel;
//! - completions are delivered either directly from the worker (blocking and `async`
//!   callers, which wait on a oneshot channel) or on the callback pool (callback callers);
//! - each request completes exactly once, including when its worker is released.

use std::{
    any::Any,
    cell::Cell,
    collections::HashMap,
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rayon::ThreadPool;
use tokio::sync::{mpsc, oneshot};

use crate::config::EvaluationConfig;
use crate::error::{ValueNodeError, ValueNodeResult};
use crate::hierarchy::{DbgThread, RuntimeKey};
use crate::language::{EvalContext, LanguageEvaluator};
use crate::node::{NodeId, NodeInfo, ValueNode};

thread_local! {
    static ON_EVAL_WORKER: Cell<bool> = const { Cell::new(false) };
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

type Work<T> = Box<dyn FnOnce(&EvalContext, &ValueNode) -> ValueNodeResult<T> + Send>;

/// What a request needs: either its answer is already known, or it must be evaluated
/// against the debuggee.
pub(crate) enum Plan<T> {
    Ready(ValueNodeResult<T>),
    Evaluate(Work<T>),
}

impl<T> Plan<T> {
    pub(crate) fn evaluate<W>(work: W) -> Self
    where
        W: FnOnce(&EvalContext, &ValueNode) -> ValueNodeResult<T> + Send + 'static,
    {
        Plan::Evaluate(Box::new(work))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
    /// Complete on whichever thread finished the work.
    Direct,
    /// Complete on the callback pool.
    Callback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobState {
    Run,
    Abandoned,
}

/// A queued request. Dropping a job that never ran completes it as abandoned.
struct Job(Option<Box<dyn FnOnce(JobState) + Send>>);

impl Job {
    fn new<F>(f: F) -> Self
    where
        F: FnOnce(JobState) + Send + 'static,
    {
        Self(Some(Box::new(f)))
    }

    fn run(mut self, state: JobState) {
        if let Some(f) = self.0.take() {
            f(state);
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f(JobState::Abandoned);
        }
    }
}

#[derive(Clone)]
enum Worker {
    Thread {
        tx: mpsc::UnboundedSender<Job>,
        released: Arc<AtomicBool>,
    },
    Inline,
}

impl Worker {
    fn spawn(key: RuntimeKey) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let released = Arc::new(AtomicBool::new(false));
        let released_for_worker = Arc::clone(&released);

        let spawned = std::thread::Builder::new()
            .name(format!("nova-eval-{key}"))
            .spawn(move || {
                ON_EVAL_WORKER.with(|flag| flag.set(true));
                tracing::debug!(target: "nova.value_tree", runtime = %key, "evaluation worker started");
                while let Some(job) = rx.blocking_recv() {
                    let state = if released_for_worker.load(Ordering::SeqCst) {
                        JobState::Abandoned
                    } else {
                        JobState::Run
                    };
                    job.run(state);
                }
                tracing::debug!(target: "nova.value_tree", runtime = %key, "evaluation worker stopped");
            });

        match spawned {
            Ok(_) => Worker::Thread { tx, released },
            Err(err) => {
                // Thread creation can fail under tight process limits. Evaluating on the
                // caller keeps results correct, at the cost of blocking callback callers.
                tracing::warn!(
                    target: "nova.value_tree",
                    runtime = %key,
                    error = %err,
                    "failed to spawn evaluation worker; evaluating inline"
                );
                Worker::Inline
            }
        }
    }

    fn send(&self, job: Job) {
        match self {
            // A closed channel hands the job back, and dropping it completes it as abandoned.
            Worker::Thread { tx, .. } => drop(tx.send(job)),
            Worker::Inline => {
                let prev = ON_EVAL_WORKER.with(|flag| flag.replace(true));
                job.run(JobState::Run);
                ON_EVAL_WORKER.with(|flag| flag.set(prev));
            }
        }
    }

    fn release(&self) {
        if let Worker::Thread { released, .. } = self {
            released.store(true, Ordering::SeqCst);
        }
    }
}

enum CallbackPool {
    Rayon(ThreadPool),
    Inline,
}

impl CallbackPool {
    fn new(threads: usize) -> Self {
        let mut threads = threads.max(1);
        loop {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|idx| format!("nova-eval-callback-{idx}"))
                .build()
            {
                Ok(pool) => return CallbackPool::Rayon(pool),
                Err(_) if threads > 1 => {
                    threads = (threads / 2).max(1);
                }
                Err(err) => {
                    tracing::warn!(
                        target: "nova.value_tree",
                        error = %err,
                        "failed to build callback pool; delivering callbacks inline"
                    );
                    return CallbackPool::Inline;
                }
            }
        }
    }

    fn deliver<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job = move || {
            let prev = IN_CALLBACK.with(|flag| flag.replace(true));
            if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
                tracing::error!(
                    target: "nova.value_tree",
                    panic = %panic_message(&*panic),
                    "evaluation callback panicked"
                );
            }
            IN_CALLBACK.with(|flag| flag.set(prev));
        };
        match self {
            CallbackPool::Rayon(pool) => pool.spawn(job),
            CallbackPool::Inline => job(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

/// Blocking on an evaluation from an evaluation worker or from inside a completion callback
/// would wait on the very context that has to produce the result. Threads driving a tokio
/// runtime must use the `async` forms instead.
fn ensure_blocking_allowed() -> ValueNodeResult<()> {
    let on_worker = ON_EVAL_WORKER.with(Cell::get);
    let in_callback = IN_CALLBACK.with(Cell::get);
    let in_runtime = tokio::runtime::Handle::try_current().is_ok();
    if on_worker || in_callback || in_runtime {
        tracing::warn!(
            target: "nova.value_tree",
            on_worker,
            in_callback,
            in_runtime,
            "rejected reentrant blocking evaluation"
        );
        return Err(ValueNodeError::Reentrancy);
    }
    Ok(())
}

fn run_work<T>(
    node: &ValueNode,
    submitted: Instant,
    budget: Duration,
    work: Work<T>,
) -> ValueNodeResult<T> {
    if node.is_closed() {
        return Err(ValueNodeError::unavailable(format!(
            "value node {} is closed",
            node.id()
        )));
    }
    let thread = node
        .thread()
        .ok_or_else(|| ValueNodeError::unavailable("thread has exited"))?;
    let key = thread.check_inspectable()?;
    let ctx = EvalContext::new(thread, key, submitted, budget);
    ctx.check_deadline()?;

    match catch_unwind(AssertUnwindSafe(|| work(&ctx, node))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(&*panic);
            tracing::error!(
                target: "nova.value_tree",
                node = %node.id(),
                language = node.language().name(),
                panic = %message,
                "language evaluator panicked"
            );
            Err(ValueNodeError::EvaluationFailed(format!(
                "evaluator panicked: {message}"
            )))
        }
    }
}

/// Result of a request submitted without a callback. Resolves exactly once.
pub struct Pending<T> {
    rx: oneshot::Receiver<ValueNodeResult<T>>,
}

impl<T> Pending<T> {
    fn dropped() -> ValueNodeError {
        ValueNodeError::unavailable("evaluation request was dropped")
    }

    pub(crate) fn wait(self) -> ValueNodeResult<T> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(Self::dropped()))
    }
}

impl<T> Future for Pending<T> {
    type Output = ValueNodeResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(Self::dropped())))
    }
}

/// Owns the evaluation workers and creates value nodes.
#[derive(Clone)]
pub struct EvaluationManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: EvaluationConfig,
    workers: Mutex<HashMap<RuntimeKey, Worker>>,
    callbacks: Arc<CallbackPool>,
    next_node_id: AtomicU64,
}

impl std::fmt::Debug for EvaluationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationManager")
            .field("config", &self.inner.config)
            .field("runtimes", &self.active_runtimes())
            .finish()
    }
}

impl Default for EvaluationManager {
    fn default() -> Self {
        Self::new(EvaluationConfig::default())
    }
}

impl EvaluationManager {
    pub fn new(config: EvaluationConfig) -> Self {
        let callbacks = Arc::new(CallbackPool::new(config.callback_threads));
        Self {
            inner: Arc::new(ManagerInner {
                config,
                workers: Mutex::new(HashMap::new()),
                callbacks,
                next_node_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.inner.config
    }

    /// Creates a root node (e.g. the result of evaluating a watch expression) anchored to
    /// `thread`. The node does not keep the thread alive.
    pub fn create_node(
        &self,
        thread: &Arc<DbgThread>,
        evaluator: Arc<dyn LanguageEvaluator>,
        info: NodeInfo,
    ) -> ValueNode {
        ValueNode::new(
            self.next_node_id(),
            self.clone(),
            evaluator,
            Arc::downgrade(thread),
            info,
        )
    }

    /// Runtimes that currently have an evaluation worker.
    pub fn active_runtimes(&self) -> Vec<RuntimeKey> {
        let mut keys: Vec<_> = self.inner.workers.lock().keys().copied().collect();
        keys.sort();
        keys
    }

    /// Stops the evaluation worker of a runtime that is being torn down. Requests still queued
    /// for it complete with [`ValueNodeError::EvaluationUnavailable`].
    ///
    /// Closing or dropping the runtime does this automatically.
    pub fn release_runtime(&self, key: RuntimeKey) -> bool {
        let Some(worker) = self.inner.workers.lock().remove(&key) else {
            return false;
        };
        worker.release();
        tracing::debug!(target: "nova.value_tree", runtime = %key, "released evaluation worker");
        true
    }

    fn next_node_id(&self) -> NodeId {
        NodeId::new(self.inner.next_node_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The worker for `thread`'s runtime, spawning it on first use. A new worker is released
    /// again as soon as its runtime is closed or dropped.
    fn worker(&self, thread: &DbgThread, key: RuntimeKey) -> Worker {
        let worker = {
            let mut workers = self.inner.workers.lock();
            if let Some(worker) = workers.get(&key) {
                return worker.clone();
            }
            let worker = Worker::spawn(key);
            workers.insert(key, worker.clone());
            worker
        };

        match thread.runtime() {
            Some(runtime) => {
                let manager = Arc::downgrade(&self.inner);
                runtime.on_close(move || {
                    if let Some(inner) = manager.upgrade() {
                        EvaluationManager { inner }.release_runtime(key);
                    }
                });
            }
            None => {
                self.release_runtime(key);
            }
        }
        worker
    }

    fn submit<T, C>(&self, node: &ValueNode, plan: Plan<T>, delivery: Delivery, complete: C)
    where
        T: Send + 'static,
        C: FnOnce(ValueNodeResult<T>) + Send + 'static,
    {
        let callbacks = Arc::clone(&self.inner.callbacks);
        let finish = move |result: ValueNodeResult<T>| match delivery {
            Delivery::Direct => complete(result),
            Delivery::Callback => callbacks.deliver(move || complete(result)),
        };

        let work = match plan {
            Plan::Ready(result) => return finish(result),
            Plan::Evaluate(work) => work,
        };

        let inspectable = node
            .thread()
            .ok_or_else(|| ValueNodeError::unavailable("thread has exited"))
            .and_then(|thread| thread.check_inspectable().map(|key| (key, thread)));
        let (key, thread) = match inspectable {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!(target: "nova.value_tree", node = %node.id(), error = %err, "request rejected");
                return finish(Err(err));
            }
        };

        tracing::trace!(target: "nova.value_tree", node = %node.id(), runtime = %key, ?delivery, "request queued");
        let submitted = Instant::now();
        let budget = self.inner.config.timeout();
        let node = node.clone();
        let job = Job::new(move |state| {
            let result = match state {
                JobState::Run => run_work(&node, submitted, budget, work),
                JobState::Abandoned => Err(ValueNodeError::unavailable(
                    "evaluation worker was released",
                )),
            };
            finish(result);
        });
        self.worker(&thread, key).send(job);
    }

    pub(crate) fn blocking<T>(&self, node: &ValueNode, plan: Plan<T>) -> ValueNodeResult<T>
    where
        T: Send + 'static,
    {
        ensure_blocking_allowed()?;
        self.pending(node, plan).wait()
    }

    pub(crate) fn with_callback<T, C>(&self, node: &ValueNode, plan: Plan<T>, callback: C)
    where
        T: Send + 'static,
        C: FnOnce(ValueNodeResult<T>) + Send + 'static,
    {
        self.submit(node, plan, Delivery::Callback, callback);
    }

    pub(crate) fn pending<T>(&self, node: &ValueNode, plan: Plan<T>) -> Pending<T>
    where
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(node, plan, Delivery::Direct, move |result| {
            let _ = tx.send(result);
        });
        Pending { rx }
    }

    /// Materializes children `[index, index + count)` clamped to the children count, asking
    /// the evaluator for at most `children_batch_size` children per call.
    pub(crate) fn fetch_children(
        &self,
        ctx: &EvalContext,
        node: &ValueNode,
        index: u64,
        count: usize,
    ) -> ValueNodeResult<Vec<ValueNode>> {
        let total = node.load_children_count(ctx)?;
        if index >= total {
            return Ok(Vec::new());
        }
        let end = total.min(index.saturating_add(count as u64));
        let batch = self.inner.config.children_batch_size.max(1);

        let mut children = Vec::with_capacity(((end - index) as usize).min(batch));
        let mut start = index;
        while start < end {
            ctx.check_deadline()?;
            let want = usize::try_from(end - start).map_or(batch, |left| left.min(batch));
            let mut infos = node.evaluator().children(ctx, node, start, want)?;
            if infos.len() > want {
                tracing::warn!(
                    target: "nova.value_tree",
                    node = %node.id(),
                    requested = want,
                    returned = infos.len(),
                    "evaluator returned more children than requested"
                );
                infos.truncate(want);
            }
            let got = infos.len();
            children.extend(infos.into_iter().map(|info| self.child_node(node, info)));
            if got < want {
                // The evaluator ran out before the reported count; return what exists.
                break;
            }
            start += got as u64;
        }

        tracing::debug!(
            target: "nova.value_tree",
            node = %node.id(),
            index,
            requested = count,
            returned = children.len(),
            "children materialized"
        );
        Ok(children)
    }

    fn child_node(&self, parent: &ValueNode, info: NodeInfo) -> ValueNode {
        ValueNode::new(
            self.next_node_id(),
            self.clone(),
            Arc::clone(parent.evaluator()),
            parent.weak_thread(),
            info,
        )
    }
}
