//! HTTP integration tests.
//!
//! Each test spins up the Axum router on a random port and drives it with
//! reqwest, the same way Twilio and the dashboard would.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;

use bulk_sender::campaigns::DispatchEngine;
use bulk_sender::classifier::ReplyClassifier;
use bulk_sender::config::{ClassifierConfig, DispatchConfig};
use bulk_sender::optout::{OptOutLedger, OptOutSource};
use bulk_sender::phone::NumberingPlan;
use bulk_sender::replies::{AutoResponder, ReplyPipeline};
use bulk_sender::retry::RecordingSleeper;
use bulk_sender::server::{AppState, router};
use bulk_sender::store::{Database, LibSqlBackend};

use common::{ScriptedGateway, credential};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    base: String,
    ledger: OptOutLedger,
    gateway: Arc<ScriptedGateway>,
    client: reqwest::Client,
}

/// Start the router on a random port.
async fn start_server() -> TestServer {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let plan = NumberingPlan::default();
    let gateway = Arc::new(ScriptedGateway::new());
    let ledger = OptOutLedger::new(Arc::clone(&db), plan.clone(), "Acme");
    let engine = DispatchEngine::new(
        Arc::clone(&db),
        gateway.clone(),
        Arc::new(RecordingSleeper::new()),
        plan,
        DispatchConfig::default(),
    );
    let pipeline = Arc::new(ReplyPipeline::new(
        Arc::clone(&db),
        Arc::new(ReplyClassifier::fallback_only(ClassifierConfig::default())),
        ledger.clone(),
        AutoResponder::new("Acme"),
    ));
    let app = router(AppState {
        engine,
        ledger: ledger.clone(),
        pipeline,
        credential: Some(credential()),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        ledger,
        gateway,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn get_json(&self, path: &str) -> Value {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn webhook(&self, from: &str, body: &str) -> (u16, String) {
        let response = self
            .client
            .post(format!("{}/webhook/whatsapp", self.base))
            .form(&[("From", from), ("Body", body), ("NumMedia", "0")])
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    /// Poll campaign stats until it leaves `pending`/`running`.
    async fn wait_for_campaign(&self, id: &str) -> Value {
        loop {
            let stats = self.get_json(&format!("/api/campaigns/{id}")).await;
            let status = stats["campaign"]["status"].as_str().unwrap_or_default().to_string();
            if status == "completed" || status == "failed" {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_ok() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let json = server.get_json("/health").await;
        assert_eq!(json["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn campaign_created_swept_and_dispatched() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server
            .ledger
            .mark_opted_out("0722222222", None, None, OptOutSource::Manual)
            .await
            .unwrap();

        let response = server
            .client
            .post(format!("{}/api/campaigns", server.base))
            .json(&serde_json::json!({
                "name": "Weekend sale",
                "template": "Hi {name}, {discount} off this weekend!",
                "delay_secs": 0,
                "contacts": [
                    {"phone": "0711111111", "name": "Alice", "discount": "10%"},
                    {"phone": "+254722222222", "name": "Bob", "discount": "15%"},
                    {"phone": "733333333", "name": "Carol", "discount": "20%"}
                ]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 202);
        let created: Value = response.json().await.unwrap();
        assert_eq!(created["total_contacts"], 3);
        assert_eq!(created["suppressed"], 1);

        let id = created["campaign_id"].as_str().unwrap().to_string();
        let stats = server.wait_for_campaign(&id).await;
        assert_eq!(stats["campaign"]["status"], "completed");
        assert_eq!(stats["counts"]["sent"], 2);
        assert_eq!(stats["counts"]["pending"], 0);

        let bodies: Vec<String> = server.gateway.sent().into_iter().map(|(_, b)| b).collect();
        assert_eq!(
            bodies,
            vec![
                "Hi Alice, 10% off this weekend!".to_string(),
                "Hi Carol, 20% off this weekend!".to_string(),
            ]
        );

        let list = server.get_json("/api/campaigns").await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stop_via_webhook_then_operator_removal() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (status, body) = server.webhook("whatsapp:+254712345678", "STOP").await;
        assert_eq!(status, 200);
        assert!(body.contains("<Response><Message>"));
        assert!(body.contains("removed from our messaging list"));

        let analytics = server.get_json("/api/opt-outs/analytics").await;
        assert!(analytics["total_opt_outs"].as_i64().unwrap() > 0);
        assert_eq!(analytics["recent_opt_outs_24h"], analytics["total_opt_outs"]);
        assert_eq!(analytics["pending_confirmations"], 1);

        let entries = server.get_json("/api/opt-outs").await;
        assert!(
            entries
                .as_array()
                .unwrap()
                .iter()
                .any(|e| e["phone_number"] == "+254712345678")
        );

        let replies = server.get_json("/api/replies?limit=5").await;
        let replies = replies.as_array().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["is_opt_out"], true);
        assert_eq!(replies[0]["sentiment"], "opt_out_desired");

        let removed: Value = server
            .client
            .delete(format!("{}/api/opt-outs/0712345678", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(removed["removed"].as_u64().unwrap() > 0);
        assert!(!server.ledger.is_opted_out("0712345678").await.unwrap());

        let analytics = server.get_json("/api/opt-outs/analytics").await;
        assert_eq!(analytics["total_opt_outs"], 0);
        assert_eq!(analytics["pending_confirmations"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ordinary_reply_gets_footer() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (status, body) = server
            .webhook("whatsapp:+254700000000", "Do you have size 8?")
            .await;
        assert_eq!(status, 200);
        assert!(body.contains("Reply STOP to opt out."));
        assert!(!body.contains("removed from our messaging list"));
    })
    .await
    .expect("test timed out");
}
