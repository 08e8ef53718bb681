use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing_appender::non_blocking::WorkerGuard;

/// Счётчики жизненного цикла логирования.
#[derive(Debug, Default)]
pub struct LoggingMetrics {
    pub flush_count: AtomicU64,
    pub shutdown_in_progress: AtomicBool,
}

/// Снимок [`LoggingMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingStats {
    pub flush_count: u64,
    pub shutdown_in_progress: bool,
}

/// Держит `WorkerGuard` файлового вывода. Буферы сбрасываются при
/// `shutdown` или drop.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    pub metrics: Arc<LoggingMetrics>,
    flush_timeout: Duration,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            metrics: Arc::new(LoggingMetrics::default()),
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    pub fn flush(&self) {
        self.metrics.flush_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            flush_count = self.metrics.flush_count.load(Ordering::Relaxed),
            "logging flush requested"
        );
    }

    /// Останавливает файловый writer, дожидаясь сброса не дольше
    /// `flush_timeout`.
    pub async fn shutdown(mut self) {
        self.metrics
            .shutdown_in_progress
            .store(true, Ordering::Release);
        let Some(guard) = self.file_guard.take() else {
            return;
        };

        match tokio::time::timeout(
            self.flush_timeout,
            tokio::task::spawn_blocking(move || drop(guard)),
        )
        .await
        {
            Ok(Ok(())) => tracing::debug!("logging shutdown completed"),
            Ok(Err(e)) => eprintln!("Logging shutdown task panicked: {e}"),
            Err(_) => eprintln!(
                "WARNING: Logging shutdown exceeded timeout of {}ms",
                self.flush_timeout.as_millis()
            ),
        }
    }

    pub fn stats(&self) -> LoggingStats {
        LoggingStats {
            flush_count: self.metrics.flush_count.load(Ordering::Relaxed),
            shutdown_in_progress: self.metrics.shutdown_in_progress.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет счётчик flush и флаг завершения.
    #[tokio::test]
    async fn test_flush_and_shutdown_without_file() {
        let handle = LoggingHandle::new(None).with_flush_timeout(Duration::from_millis(100));
        handle.flush();
        handle.flush();
        assert_eq!(handle.stats().flush_count, 2);
        assert!(!handle.has_file_sink());

        let metrics = Arc::clone(&handle.metrics);
        handle.shutdown().await;
        assert!(metrics.shutdown_in_progress.load(Ordering::Acquire));
    }
}
