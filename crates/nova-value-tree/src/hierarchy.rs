//! Process → runtime → thread ownership hierarchy.
//!
//! Ownership flows strictly downward: a process owns its runtimes and a runtime owns its
//! threads. Back-references (thread → runtime → process) are weak, and value nodes only hold
//! weak references to their thread, so tearing down a process or runtime invalidates every
//! node anchored below it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;

use crate::error::{ValueNodeError, ValueNodeResult};

pub type ProcessId = u64;
pub type RuntimeId = u64;
pub type ThreadId = u64;

/// Identifies a runtime across all processes; one evaluation worker exists per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeKey {
    pub process: ProcessId,
    pub runtime: RuntimeId,
}

impl std::fmt::Display for RuntimeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.process, self.runtime)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Paused,
    Terminated,
}

#[derive(Debug)]
pub struct DbgProcess {
    id: ProcessId,
    name: String,
    state: Mutex<ProcessState>,
    runtimes: Mutex<Vec<Arc<DbgRuntime>>>,
}

impl DbgProcess {
    /// New processes start paused, ready for inspection.
    pub fn new(id: ProcessId, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            state: Mutex::new(ProcessState::Paused),
            runtimes: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        if *state != ProcessState::Terminated {
            *state = ProcessState::Paused;
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state != ProcessState::Terminated {
            *state = ProcessState::Running;
        }
    }

    /// Marks the process as exited and tears down all of its runtimes.
    pub fn exit(&self) {
        *self.state.lock() = ProcessState::Terminated;
        let runtimes = std::mem::take(&mut *self.runtimes.lock());
        for runtime in runtimes {
            runtime.close();
        }
    }

    pub fn add_runtime(self: &Arc<Self>, id: RuntimeId, name: impl Into<String>) -> Arc<DbgRuntime> {
        let runtime = Arc::new(DbgRuntime {
            id,
            name: name.into(),
            process: Arc::downgrade(self),
            threads: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_hooks: Mutex::new(Vec::new()),
        });
        self.runtimes.lock().push(Arc::clone(&runtime));
        runtime
    }

    pub fn runtimes(&self) -> Vec<Arc<DbgRuntime>> {
        self.runtimes.lock().clone()
    }

    pub fn remove_runtime(&self, id: RuntimeId) -> Option<Arc<DbgRuntime>> {
        let mut runtimes = self.runtimes.lock();
        let idx = runtimes.iter().position(|r| r.id == id)?;
        let runtime = runtimes.remove(idx);
        drop(runtimes);
        runtime.close();
        Some(runtime)
    }
}

type CloseHook = Box<dyn FnOnce() + Send>;

pub struct DbgRuntime {
    id: RuntimeId,
    name: String,
    process: Weak<DbgProcess>,
    threads: Mutex<Vec<Arc<DbgThread>>>,
    closed: AtomicBool,
    close_hooks: Mutex<Vec<CloseHook>>,
}

impl std::fmt::Debug for DbgRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbgRuntime")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("threads", &self.threads)
            .field("closed", &self.is_closed())
            .field("close_hooks", &self.close_hooks.lock().len())
            .finish()
    }
}

impl DbgRuntime {
    pub fn id(&self) -> RuntimeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> Option<Arc<DbgProcess>> {
        self.process.upgrade()
    }

    pub fn key(&self) -> Option<RuntimeKey> {
        let process = self.process()?;
        Some(RuntimeKey {
            process: process.id(),
            runtime: self.id,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn add_thread(self: &Arc<Self>, id: ThreadId, name: impl Into<String>) -> Arc<DbgThread> {
        let thread = Arc::new(DbgThread {
            id,
            name: name.into(),
            runtime: Arc::downgrade(self),
            closed: AtomicBool::new(false),
        });
        self.threads.lock().push(Arc::clone(&thread));
        thread
    }

    pub fn threads(&self) -> Vec<Arc<DbgThread>> {
        self.threads.lock().clone()
    }

    pub fn remove_thread(&self, id: ThreadId) -> Option<Arc<DbgThread>> {
        let mut threads = self.threads.lock();
        let idx = threads.iter().position(|t| t.id == id)?;
        let thread = threads.remove(idx);
        thread.close();
        Some(thread)
    }

    /// Runs `hook` once when the runtime is closed or dropped. Runs it right away if the
    /// runtime is already closed.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.close_hooks.lock();
        if self.is_closed() {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(Box::new(hook));
    }

    pub fn close(&self) {
        let hooks = {
            let mut hooks = self.close_hooks.lock();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *hooks)
        };
        let threads = std::mem::take(&mut *self.threads.lock());
        for thread in threads {
            thread.close();
        }
        for hook in hooks {
            hook();
        }
    }
}

impl Drop for DbgRuntime {
    fn drop(&mut self) {
        for hook in std::mem::take(self.close_hooks.get_mut()) {
            hook();
        }
    }
}

#[derive(Debug)]
pub struct DbgThread {
    id: ThreadId,
    name: String,
    runtime: Weak<DbgRuntime>,
    closed: AtomicBool,
}

impl DbgThread {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> Option<Arc<DbgRuntime>> {
        self.runtime.upgrade()
    }

    pub fn process(&self) -> Option<Arc<DbgProcess>> {
        self.runtime()?.process()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Checks that the debuggee can be inspected through this thread right now.
    pub fn check_inspectable(&self) -> ValueNodeResult<RuntimeKey> {
        if self.is_closed() {
            return Err(ValueNodeError::unavailable(format!(
                "thread {} has exited",
                self.id
            )));
        }
        let runtime = self
            .runtime()
            .filter(|r| !r.is_closed())
            .ok_or_else(|| ValueNodeError::unavailable("runtime was torn down"))?;
        let process = runtime
            .process()
            .ok_or_else(|| ValueNodeError::unavailable("process was detached"))?;
        match process.state() {
            ProcessState::Paused => Ok(RuntimeKey {
                process: process.id(),
                runtime: runtime.id(),
            }),
            ProcessState::Running => Err(ValueNodeError::unavailable(format!(
                "process {} is running",
                process.id()
            ))),
            ProcessState::Terminated => Err(ValueNodeError::unavailable(format!(
                "process {} has exited",
                process.id()
            ))),
        }
    }
}
