use std::time::Duration;

/// Sleep for one polling interval. A zero interval only yields to the runtime
/// so tests can drive the scheduler without wall-clock delays.
pub(crate) async fn pause(interval: Duration) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}
