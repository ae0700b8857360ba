//! DKG and signing between three nodes through a live relay service

use msg_relay::MessageStore;
use msg_relay_client::RelayClient;
use msg_relay_svc::{router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tfrost_core::session::{Coordinator, ProtocolConfig};
use tfrost_core::{session_id_from_label, verify, ParticipantId};

async fn start_relay() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(AppState {
        store: MessageStore::new(600),
    }));
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{}", addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dkg_and_signing_over_http() {
    let url = start_relay().await;
    let ids: [ParticipantId; 3] = [1, 2, 3];
    let config = ProtocolConfig {
        round_timeout: Duration::from_secs(20),
        ..ProtocolConfig::default()
    };

    let nodes: Vec<Arc<Coordinator<RelayClient>>> = ids
        .iter()
        .map(|&id| {
            let client = RelayClient::new(&url).with_poll_interval(Duration::from_millis(20));
            Arc::new(Coordinator::new(id, client, config))
        })
        .collect();

    let dkg_session = session_id_from_label("http-dkg");
    let handles: Vec<_> = nodes
        .iter()
        .map(|node| {
            let node = Arc::clone(node);
            tokio::spawn(async move { node.start_dkg(dkg_session, &ids, 2).await })
        })
        .collect();
    let mut shares = Vec::new();
    for handle in handles {
        shares.push(handle.await.unwrap().unwrap().key_share);
    }
    let group_key = shares[0].group_public_key;
    assert!(shares.iter().all(|s| s.group_public_key == group_key));

    let sign_session = session_id_from_label("http-sign");
    let handles: Vec<_> = [0usize, 2]
        .iter()
        .map(|&i| {
            let node = Arc::clone(&nodes[i]);
            let share = shares[i].clone();
            tokio::spawn(async move {
                node.start_signing(sign_session, &share, &[1, 3], b"over http")
                    .await
            })
        })
        .collect();
    for handle in handles {
        let signature = handle.await.unwrap().unwrap();
        assert!(verify(&group_key, b"over http", &signature));
    }
}
