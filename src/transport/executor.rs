use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use fabric_error::StateError;
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{trace, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Ограниченный пул исполнителей одного канала.
///
/// Очередь задач не ограничена: задача либо выполняется, либо явно
/// отклоняется после `shutdown`. Число одновременно работающих задач равно
/// числу воркеров; при одном воркере порядок задач сохраняется.
pub struct Executor {
    name: Arc<str>,
    workers: usize,
    sender: Mutex<ExecutorState>,
    pending: Arc<AtomicUsize>,
}

enum ExecutorState {
    Idle,
    Running(mpsc::UnboundedSender<Job>),
    Shutdown,
}

impl Executor {
    pub fn new(
        name: impl Into<Arc<str>>,
        workers: usize,
    ) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            sender: Mutex::new(ExecutorState::Idle),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ставит задачу в очередь. Воркеры запускаются при первом вызове.
    pub fn execute<F>(
        &self,
        job: F,
    ) -> Result<(), StateError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.sender.lock();
        if matches!(*state, ExecutorState::Idle) {
            *state = ExecutorState::Running(self.start_workers()?);
        }
        let ExecutorState::Running(tx) = &*state else {
            return Err(StateError::ExecutorShutdown);
        };

        self.pending.fetch_add(1, Ordering::AcqRel);
        if tx.send(Box::pin(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(StateError::ExecutorShutdown);
        }
        Ok(())
    }

    /// Ставит задачи пакетом: принимаются либо все, либо ни одна.
    pub fn execute_all<I, F>(
        &self,
        jobs: I,
    ) -> Result<usize, StateError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.sender.lock();
        if matches!(*state, ExecutorState::Idle) {
            *state = ExecutorState::Running(self.start_workers()?);
        }
        let ExecutorState::Running(tx) = &*state else {
            return Err(StateError::ExecutorShutdown);
        };

        let mut queued = 0;
        for job in jobs {
            self.pending.fetch_add(1, Ordering::AcqRel);
            // отказ отправки значит, что воркеров нет и очередь уже сброшена
            if tx.send(Box::pin(job)).is_err() {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                return Err(StateError::ExecutorShutdown);
            }
            queued += 1;
        }
        Ok(queued)
    }

    /// Прекращает приём задач. Уже поставленные задачи будут выполнены.
    pub fn shutdown(&self) {
        let mut state = self.sender.lock();
        *state = ExecutorState::Shutdown;
        trace!(executor = %self.name, "executor shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(*self.sender.lock(), ExecutorState::Shutdown)
    }

    /// Задачи в очереди и в работе.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn start_workers(&self) -> Result<mpsc::UnboundedSender<Job>, StateError> {
        let handle = Handle::try_current().map_err(|_| StateError::NoRuntime)?;
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker in 0..self.workers {
            let rx = Arc::clone(&rx);
            let pending = Arc::clone(&self.pending);
            let name = Arc::clone(&self.name);
            let spawner = handle.clone();
            handle.spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some(job) = job else { break };
                    // отдельная задача, чтобы паника callback'а не убила воркер
                    if let Err(e) = spawner.spawn(job).await {
                        warn!(executor = %name, worker, error = %e, "channel task panicked");
                    }
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
            });
        }
        Ok(tx)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
