/// Completion-callback adapter
///
/// Any store operation can be awaited directly or handed a callback. The
/// callback receives exactly what awaiting would have produced.

use dstore_core::Result;
use std::future::Future;
use tokio::task::JoinHandle;

pub trait CompletionExt<T>: Future<Output = Result<T>> + Send + Sized + 'static
where
    T: Send + 'static,
{
    /// Drive the operation on the runtime and report its outcome to `callback`.
    ///
    /// Must be called from within a tokio runtime.
    fn on_complete<F>(self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        tokio::spawn(async move { callback(self.await) })
    }
}

impl<T, Fut> CompletionExt<T> for Fut
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
}
