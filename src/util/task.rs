use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Run `future`, turning a panic into `Err(message)`.
///
/// Spawned fetch tasks own in-flight flags; a panic that escaped into the
/// runtime would leave those flags set forever.
pub async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(panic_message)
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = panic.downcast_ref::<Box<dyn std::error::Error + Send>>() {
        e.to_string()
    } else {
        format!("Unknown panic: {:?}", (*panic).type_id())
    }
}
