//! Background sender for queued opt-out confirmations.
//!
//! Suppression takes effect when the ledger row is written; this loop only
//! delivers the courtesy message. A failed send stays unsent and is picked up
//! on the next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::gateway::{GatewayCredential, MessageGateway};
use crate::optout::OptOutLedger;

/// Shortest poll period; `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the confirmation ticker.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop the loop.
pub fn spawn_confirmation_task(
    ledger: OptOutLedger,
    gateway: Arc<dyn MessageGateway>,
    credential: GatewayCredential,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let interval = interval.max(MIN_POLL_INTERVAL);
    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Confirmation dispatcher started");
        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Confirmation dispatcher shutting down");
                return;
            }

            send_due_confirmations(&ledger, gateway.as_ref(), &credential).await;
        }
    });

    (handle, shutdown_flag)
}

/// Send every due confirmation once. Returns how many were delivered.
pub async fn send_due_confirmations(
    ledger: &OptOutLedger,
    gateway: &dyn MessageGateway,
    credential: &GatewayCredential,
) -> usize {
    let due = match ledger.due_confirmations(Utc::now()).await {
        Ok(due) => due,
        Err(e) => {
            error!(error = %e, "Failed to load due confirmations");
            return 0;
        }
    };

    if due.is_empty() {
        return 0;
    }
    debug!(count = due.len(), "Sending opt-out confirmations");

    let mut sent = 0;
    for task in due {
        match gateway.send(&task.phone_number, &task.message, credential).await {
            Ok(receipt) => match ledger.mark_confirmation_sent(task.id).await {
                Ok(_) => {
                    sent += 1;
                    debug!(task_id = task.id, sid = %receipt.provider_id, "Confirmation sent");
                }
                Err(e) => error!(task_id = task.id, error = %e, "Failed to mark confirmation sent"),
            },
            Err(e) => {
                warn!(task_id = task.id, phone = %task.phone_number, error = %e, "Confirmation send failed");
            }
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use secrecy::SecretString;

    use crate::error::{GatewayError, GatewayErrorKind};
    use crate::gateway::SendReceipt;
    use crate::phone::NumberingPlan;
    use crate::store::{Database, LibSqlBackend};

    /// Fails sends to numbers listed in `reject`.
    #[derive(Default)]
    struct StubGateway {
        reject: Vec<String>,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessageGateway for StubGateway {
        async fn send(
            &self,
            to: &str,
            body: &str,
            _credential: &GatewayCredential,
        ) -> Result<SendReceipt, GatewayError> {
            if self.reject.iter().any(|r| r == to) {
                return Err(GatewayError::new("stub", GatewayErrorKind::Transient, "timeout"));
            }
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok(SendReceipt {
                provider_id: format!("SM{}", self.sent.lock().unwrap().len()),
                status: "queued".into(),
            })
        }
    }

    fn credential() -> GatewayCredential {
        GatewayCredential {
            account_sid: "AC1".into(),
            auth_token: SecretString::from("t"),
            from: "+14155238886".into(),
        }
    }

    async fn ledger() -> OptOutLedger {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        OptOutLedger::new(db, NumberingPlan::default(), "Acme")
    }

    #[tokio::test]
    async fn due_confirmations_sent_once() {
        let ledger = ledger().await;
        ledger
            .schedule_confirmation("0712345678", Some("Alice"), Duration::ZERO)
            .await
            .unwrap();
        ledger
            .schedule_confirmation("0722222222", None, Duration::from_secs(3600))
            .await
            .unwrap();
        let gateway = StubGateway::default();

        assert_eq!(send_due_confirmations(&ledger, &gateway, &credential()).await, 1);
        assert_eq!(send_due_confirmations(&ledger, &gateway, &credential()).await, 0);

        let sent = gateway.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+254712345678");
        assert!(sent[0].1.contains("removed from our messaging list"));
    }

    #[tokio::test]
    async fn failed_send_stays_queued() {
        let ledger = ledger().await;
        ledger
            .schedule_confirmation("0712345678", None, Duration::ZERO)
            .await
            .unwrap();
        let gateway = StubGateway {
            reject: vec!["+254712345678".into()],
            ..Default::default()
        };

        assert_eq!(send_due_confirmations(&ledger, &gateway, &credential()).await, 0);
        assert_eq!(ledger.due_confirmations(Utc::now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_interval_is_clamped() {
        let ledger = ledger().await;
        ledger
            .schedule_confirmation("0712345678", None, Duration::ZERO)
            .await
            .unwrap();
        let gateway = Arc::new(StubGateway::default());
        let (handle, shutdown) = spawn_confirmation_task(
            ledger.clone(),
            gateway.clone(),
            credential(),
            Duration::ZERO,
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.sent.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("confirmation not delivered");
        assert!(!handle.is_finished());

        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn ticker_stops_on_shutdown_flag() {
        let ledger = ledger().await;
        let (handle, shutdown) = spawn_confirmation_task(
            ledger,
            Arc::new(StubGateway::default()),
            credential(),
            Duration::from_millis(10),
        );
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
