use std::thread;

use crossbeam_channel::Sender;

use crate::traits::callback_queue::{CallbackQueue, Task};

/// Single-worker, in-order job queue backed by one dedicated named thread.
///
/// Every job runs on the same thread, strictly in submission order. The
/// recorder funnels all asset-writer I/O through one of these, so the
/// engine's single-writer-thread requirement is structural rather than a
/// matter of caller discipline.
///
/// Dropping the queue closes the channel and joins the worker once the jobs
/// already submitted have drained.
pub struct SerialQueue {
    tx: Option<Sender<Task>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SerialQueue {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Task>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })
            .expect("failed to spawn queue worker");

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Submit a job for execution after all previously submitted jobs.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        self.dispatch_boxed(Box::new(job));
    }

    fn dispatch_boxed(&self, job: Task) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(job).is_err() {
            log::warn!("serial queue worker is gone, dropping job");
        }
    }
}

impl CallbackQueue for SerialQueue {
    fn dispatch(&self, task: Task) {
        self.dispatch_boxed(task);
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            // A queued job may own the final handle to this queue's owner,
            // in which case the drop runs on the worker itself; joining
            // there would hang forever.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
