/// Sleep for a duration.
pub async fn sleep_compat(timedelta: chrono::TimeDelta) {
    tokio::time::sleep(timedelta.to_std().unwrap_or_default()).await;
}
