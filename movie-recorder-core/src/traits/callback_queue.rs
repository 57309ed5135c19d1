/// A unit of work dispatched onto a queue.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executor abstraction for delegate callbacks.
///
/// The client picks where notifications run: an event loop, a UI thread, or
/// a dedicated worker such as `SerialQueue`. `dispatch` must be a
/// non-blocking enqueue; the recorder calls it from its own worker threads
/// with no locks held.
pub trait CallbackQueue: Send + Sync {
    fn dispatch(&self, task: Task);
}
