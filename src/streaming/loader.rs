//! Background loader threads
//!
//! Each worker blocks on the need queue, decodes one page into a pooled
//! buffer with no lock held, and posts the result to the load queue. Workers
//! never touch GPU state. A failed or panicking decode is posted as a failed
//! task; the worker carries on.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::catalog::TileSource;
use crate::streaming::pool::BufferPool;
use crate::streaming::queue::{LoadQueue, LoadedTask, NeedQueue};

/// Fixed set of loader threads sharing one need queue
pub struct LoaderPool {
    workers: Vec<JoinHandle<()>>,
}

impl LoaderPool {
    /// Start `workers` threads named `thumb-loader-N`
    pub fn spawn(
        workers: usize,
        need: Arc<NeedQueue>,
        load: Arc<LoadQueue>,
        source: Arc<dyn TileSource>,
        buffers: Arc<BufferPool>,
    ) -> Result<Self> {
        if workers < 1 {
            return Err(Error::Config("loader worker count must be at least 1".into()));
        }

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let need = Arc::clone(&need);
            let load = Arc::clone(&load);
            let source = Arc::clone(&source);
            let buffers = Arc::clone(&buffers);
            let handle = thread::Builder::new()
                .name(format!("thumb-loader-{}", index))
                .spawn(move || worker_loop(index, &need, &load, source.as_ref(), &buffers))?;
            handles.push(handle);
        }

        log::info!("Started {} loader threads", workers);
        Ok(Self { workers: handles })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker to exit. The need queue must be stopped first.
    pub fn join(&mut self) {
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("loader").to_string();
            if handle.join().is_err() {
                log::error!("{} panicked", name);
            }
        }
    }
}

fn worker_loop(
    index: usize,
    need: &NeedQueue,
    load: &LoadQueue,
    source: &dyn TileSource,
    buffers: &BufferPool,
) {
    while let Some(task) = need.pop() {
        let mut buffer = buffers.get();
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| source.decode(task.key, &mut buffer)));
        let result = match decoded {
            Ok(Ok(())) => {
                log::trace!("Loader {} decoded page {}", index, task.key);
                LoadedTask::decoded(task.key, buffer)
            }
            Ok(Err(e)) => {
                buffers.put(buffer);
                LoadedTask::failed(task.key, e.to_string())
            }
            Err(payload) => {
                // Contents are undefined; let the buffer go
                let reason = format!("decode panicked: {}", panic_message(payload.as_ref()));
                log::error!("Loader {}: page {} {}", index, task.key, reason);
                LoadedTask::failed(task.key, reason)
            }
        };
        load.push(result);
    }
    log::debug!("Loader {} exiting", index);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::streaming::page::{PageId, PageKey};
    use crate::streaming::pool::{PixelBuffer, PixelFormat};
    use crate::streaming::queue::{LoadOutcome, NeedTask};

    /// Fills each page with its column; odd columns fail
    struct ColumnSource;

    impl TileSource for ColumnSource {
        fn decode(&self, key: PageKey, buffer: &mut PixelBuffer) -> Result<()> {
            if key.page.col % 2 == 1 {
                return Err(Error::Decode(format!("odd page {}", key)));
            }
            buffer.as_bytes_mut().fill(key.page.col as u8);
            Ok(())
        }
    }

    /// Panics on the first column, decodes everything else
    struct PanickySource;

    impl TileSource for PanickySource {
        fn decode(&self, key: PageKey, buffer: &mut PixelBuffer) -> Result<()> {
            if key.page.col == 0 {
                panic!("corrupt page {}", key);
            }
            buffer.as_bytes_mut().fill(7);
            Ok(())
        }
    }

    fn wait_for(load: &LoadQueue, count: usize) -> Vec<LoadedTask> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut done = Vec::new();
        while done.len() < count && Instant::now() < deadline {
            done.extend(load.drain());
            thread::sleep(Duration::from_millis(1));
        }
        done
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = LoaderPool::spawn(
            0,
            Arc::new(NeedQueue::new()),
            Arc::new(LoadQueue::new()),
            Arc::new(ColumnSource),
            Arc::new(BufferPool::new(2, 2, PixelFormat::RGBA8, 4)),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_workers_decode_and_report_failures() {
        let need = Arc::new(NeedQueue::new());
        let load = Arc::new(LoadQueue::new());
        let buffers = Arc::new(BufferPool::new(2, 2, PixelFormat::RGBA8, 4));
        let mut pool = LoaderPool::spawn(
            3,
            Arc::clone(&need),
            Arc::clone(&load),
            Arc::new(ColumnSource),
            Arc::clone(&buffers),
        )
        .unwrap();
        assert_eq!(pool.len(), 3);

        for col in 0..10 {
            need.push(NeedTask { key: PageKey::new(0, PageId::new(4, 0, col)), priority: 0 });
        }
        let done = wait_for(&load, 10);
        assert_eq!(done.len(), 10);

        for task in &done {
            match &task.outcome {
                LoadOutcome::Decoded(pixels) => {
                    assert_eq!(task.key.page.col % 2, 0);
                    assert!(pixels.as_bytes().iter().all(|&b| b == task.key.page.col as u8));
                }
                LoadOutcome::Failed(reason) => {
                    assert_eq!(task.key.page.col % 2, 1);
                    assert!(reason.contains("odd page"));
                }
            }
        }

        need.stop();
        pool.join();
        assert!(pool.is_empty());
        // Buffers of failed decodes went back to the pool
        assert!(buffers.idle_count() > 0);
    }

    #[test]
    fn test_panicking_decode_reports_failure() {
        let need = Arc::new(NeedQueue::new());
        let load = Arc::new(LoadQueue::new());
        let buffers = Arc::new(BufferPool::new(2, 2, PixelFormat::RGBA8, 4));
        let mut pool = LoaderPool::spawn(
            1,
            Arc::clone(&need),
            Arc::clone(&load),
            Arc::new(PanickySource),
            buffers,
        )
        .unwrap();

        for col in 0..3 {
            need.push(NeedTask { key: PageKey::new(0, PageId::new(2, 0, col)), priority: 0 });
        }
        // The single worker survives the panic and decodes the rest
        let done = wait_for(&load, 3);
        assert_eq!(done.len(), 3);
        for task in &done {
            match &task.outcome {
                LoadOutcome::Failed(reason) => {
                    assert_eq!(task.key.page.col, 0);
                    assert!(reason.contains("corrupt page"));
                }
                LoadOutcome::Decoded(_) => assert_ne!(task.key.page.col, 0),
            }
        }

        need.stop();
        pool.join();
    }
}
