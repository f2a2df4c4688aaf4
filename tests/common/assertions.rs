//! Custom assertions for integration tests

use serde_json::json;

use super::test_server::TestClient;

/// Assert the server closes the connection
pub async fn assert_closed(client: &mut TestClient) {
    while let Some(batch) = client.next_batch().await {
        assert!(
            batch.iter().all(|r| r.cmd != "rcvdata"),
            "Expected close, got data: {:?}",
            batch
        );
    }
}

/// Send a `cmd` request and assert nothing was delivered ahead of its reply.
///
/// Deliveries are queued before the sender's ack, so anything routed to this
/// client earlier would show up first.
pub async fn assert_no_rcvdata_before(client: &mut TestClient, cmd: &str) {
    client
        .send_batch(json!([{"cmd": cmd, "seq": 99, "immed": true}]))
        .await;
    let seen = client.collect_until(cmd).await;
    assert!(
        seen.iter().all(|r| r.cmd != "rcvdata"),
        "Unexpected delivery: {:?}",
        seen
    );
}
