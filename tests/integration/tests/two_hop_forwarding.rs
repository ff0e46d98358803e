//! Integration test: a payment crossing two connectors.
//!
//! alice (scale 2) -> test.a -> peer link (scale 4) -> test.b -> bob (scale 6)

use ilpc_core::{ErrorCode, Fulfill, Plugin, Reject};
use ilpc_integration_tests::{fulfilling, link, prepare, rejecting, Node, NodeBuilder, FULFILLMENT};

fn topology() -> (Node, Node) {
    let (a_to_b, b_to_a) = link();
    let a = NodeBuilder::new("test.a")
        .child("alice", 2)
        .peer("b", 4, a_to_b)
        .route("test.b", "b")
        .build()
        .expect("node a");
    let b = NodeBuilder::new("test.b")
        .peer("a", 4, b_to_a)
        .child("bob", 6)
        .build()
        .expect("node b");
    (a, b)
}

#[tokio::test]
async fn test_payment_is_exchanged_at_each_hop() {
    let (a, b) = topology();
    let _alice = fulfilling(a.remote("alice")).await.unwrap();
    let mut bob = fulfilling(b.remote("bob")).await.unwrap();
    a.connector.listen().await.unwrap();
    b.connector.listen().await.unwrap();

    let sent = prepare("test.b.bob.wallet", 5);
    let response = a.remote("alice").send_data(sent.to_bytes()).await.unwrap();
    assert_eq!(Fulfill::from_bytes(&response).unwrap().fulfillment, FULFILLMENT);

    let delivered = bob.recv().await.unwrap();
    assert_eq!(delivered.amount, 50_000);
    assert_eq!(delivered.destination, "test.b.bob.wallet");
    assert_eq!(delivered.data, sent.data);
    assert_eq!(delivered.execution_condition, sent.execution_condition);
    // each hop keeps a message window for itself
    assert!(delivered.expires_at <= sent.expires_at - chrono::Duration::seconds(2));
}

#[tokio::test]
async fn test_fulfilled_payment_moves_balances_on_both_connectors() {
    let (a, b) = topology();
    let _alice = fulfilling(a.remote("alice")).await.unwrap();
    let _bob = fulfilling(b.remote("bob")).await.unwrap();
    a.connector.listen().await.unwrap();
    b.connector.listen().await.unwrap();

    for _ in 0..3 {
        let response = a
            .remote("alice")
            .send_data(prepare("test.b.bob.wallet", 5).to_bytes())
            .await
            .unwrap();
        assert!(Fulfill::from_bytes(&response).is_ok());
    }

    // alice owes test.a, test.a owes test.b, test.b owes bob
    assert_eq!(a.balance("alice"), Some(15));
    assert_eq!(a.balance("b"), Some(-1_500));
    assert_eq!(b.balance("a"), Some(1_500));
    assert_eq!(b.balance("bob"), Some(-150_000));
}

#[tokio::test]
async fn test_reject_from_receiver_travels_back_and_restores_balances() {
    let (a, b) = topology();
    let _alice = fulfilling(a.remote("alice")).await.unwrap();
    rejecting(b.remote("bob"), "test.b.bob", ErrorCode::F99ApplicationError)
        .await
        .unwrap();
    a.connector.listen().await.unwrap();
    b.connector.listen().await.unwrap();

    let response = a
        .remote("alice")
        .send_data(prepare("test.b.bob.wallet", 5).to_bytes())
        .await
        .unwrap();
    let reject = Reject::from_bytes(&response).unwrap();
    assert_eq!(reject.code, ErrorCode::F99ApplicationError);
    assert_eq!(reject.triggered_by, "test.b.bob");

    assert_eq!(a.balance("alice"), Some(0));
    assert_eq!(a.balance("b"), Some(0));
    assert_eq!(b.balance("a"), Some(0));
    assert_eq!(b.balance("bob"), Some(0));
}

#[tokio::test]
async fn test_unknown_destination_is_rejected_by_the_far_connector() {
    let (a, b) = topology();
    let _alice = fulfilling(a.remote("alice")).await.unwrap();
    let _bob = fulfilling(b.remote("bob")).await.unwrap();
    a.connector.listen().await.unwrap();
    b.connector.listen().await.unwrap();

    let response = a
        .remote("alice")
        .send_data(prepare("test.c.carl", 5).to_bytes())
        .await
        .unwrap();
    let reject = Reject::from_bytes(&response).unwrap();
    assert_eq!(reject.code, ErrorCode::F02Unreachable);
    assert_eq!(reject.triggered_by, "test.a");

    // test.b knows no route either once the packet reaches it
    let response = a
        .remote("alice")
        .send_data(prepare("test.b.carl", 5).to_bytes())
        .await
        .unwrap();
    let reject = Reject::from_bytes(&response).unwrap();
    assert_eq!(reject.code, ErrorCode::F02Unreachable);
    assert_eq!(reject.triggered_by, "test.b");
}
