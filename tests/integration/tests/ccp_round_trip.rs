//! Integration test: route exchange between two peered connectors.
//!
//! Neither connector is configured with a route to the other; everything
//! they know about each other arrives over CCP.

use std::time::Duration;

use ilpc_core::{Fulfill, Plugin};
use ilpc_integration_tests::{eventually, fulfilling, link, prepare, Node, NodeBuilder, FULFILLMENT};

const CONVERGENCE: Duration = Duration::from_secs(120);

fn peered() -> (Node, Node) {
    let (a_to_b, b_to_a) = link();
    let a = NodeBuilder::new("test.a")
        .child("alice", 2)
        .peer("b", 4, a_to_b)
        .build()
        .expect("node a");
    let b = NodeBuilder::new("test.b")
        .peer("a", 4, b_to_a)
        .child("bob", 6)
        .build()
        .expect("node b");
    (a, b)
}

fn knows(node: &Node, prefix: &str, next_hop: &str) -> bool {
    node.connector
        .broadcaster()
        .routing_table()
        .get(prefix)
        .is_some_and(|route| route.next_hop == next_hop)
}

// The first route control from test.a fails because test.b is not up yet;
// paused time lets the retry fire without waiting for it.
#[tokio::test(start_paused = true)]
async fn test_peers_learn_each_others_address() {
    let (a, b) = peered();
    let _alice = fulfilling(a.remote("alice")).await.unwrap();
    let _bob = fulfilling(b.remote("bob")).await.unwrap();
    a.connector.listen().await.unwrap();
    b.connector.listen().await.unwrap();

    assert!(eventually(|| knows(&b, "test.a", "a"), CONVERGENCE).await);
    assert!(eventually(|| knows(&a, "test.b", "b"), CONVERGENCE).await);

    let learned = a.connector.broadcaster().routing_table().get("test.b").unwrap();
    assert_eq!(learned.path, vec!["test.b".to_string()]);

    // children are covered by their parent's address and never advertised
    assert!(a.connector.broadcaster().routing_table().get("test.b.bob").is_none());
    assert!(b.connector.broadcaster().routing_table().get("test.a.alice").is_none());

    let status = serde_json::to_value(a.connector.status()).unwrap();
    assert_eq!(status["routing"]["local_routing_table"]["test.b"]["next_hop"], "b");
    assert!(status["routing"]["peers"].get("b").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_payment_follows_learned_route() {
    let (a, b) = peered();
    let _alice = fulfilling(a.remote("alice")).await.unwrap();
    let mut bob = fulfilling(b.remote("bob")).await.unwrap();
    a.connector.listen().await.unwrap();
    b.connector.listen().await.unwrap();
    assert!(eventually(|| knows(&a, "test.b", "b"), CONVERGENCE).await);

    let response = a
        .remote("alice")
        .send_data(prepare("test.b.bob.wallet", 7).to_bytes())
        .await
        .unwrap();
    assert_eq!(Fulfill::from_bytes(&response).unwrap().fulfillment, FULFILLMENT);
    assert_eq!(bob.recv().await.unwrap().amount, 70_000);
}

#[tokio::test(start_paused = true)]
async fn test_removing_peer_forgets_its_routes() {
    let (a, b) = peered();
    let _alice = fulfilling(a.remote("alice")).await.unwrap();
    let _bob = fulfilling(b.remote("bob")).await.unwrap();
    a.connector.listen().await.unwrap();
    b.connector.listen().await.unwrap();
    assert!(eventually(|| knows(&a, "test.b", "b"), CONVERGENCE).await);

    a.connector.remove_account("b").await.unwrap();
    assert!(a.connector.broadcaster().routing_table().get("test.b").is_none());
    assert!(!a.connector.broadcaster().peer_ids().contains(&"b".to_string()));
}
