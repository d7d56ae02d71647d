use async_trait::async_trait;
use tracing::info;

use crate::ids::UserId;

/// One-way push notification sender. The real sender lives outside the
/// financial core; callers fire and forget and must never fail an operation
/// over a notification.
#[async_trait]
pub trait PushNotifier: Send + Sync + 'static {
    async fn send_push_notification(
        &self,
        user_id: UserId,
        title: &str,
        message: &str,
    );
}

/// Logs instead of sending. Used by tests and dev deployments.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl PushNotifier for LogNotifier {
    async fn send_push_notification(
        &self,
        user_id: UserId,
        title: &str,
        message: &str,
    ) {
        info!("Push to {user_id}: {title} - {message}");
    }
}
