//! End-to-end tests: real disco engines exchanging encrypted probes over
//! loopback UDP.

use burrow_disco::{EncryptedPacket, Header, PathState, PeerStatus, Priority};
use burrow_integration_tests::fixtures::{Endpoint, TwoEngineFixture, fast_config};
use burrow_integration_tests::test_helpers::wait_until;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// A bound socket that never answers, standing in for an unreachable candidate.
async fn silent_endpoint() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

#[tokio::test]
async fn test_engines_connect_over_loopback() {
    let fixture = TwoEngineFixture::new().await.unwrap();
    fixture.introduce().unwrap();

    assert!(
        wait_until(Duration::from_secs(3), || fixture.alice_sees_bob()
            && fixture.bob_sees_alice())
        .await,
        "engines never connected"
    );

    let status = fixture.alice.status_of(&fixture.bob.public_key()).unwrap();
    let active = status.active.unwrap();
    assert_eq!(active.addr, fixture.bob.addr);
    assert!(active.rtt > Duration::ZERO);
    assert!(active.rtt < Duration::from_secs(1));

    let stats = fixture.alice.disco.transport_stats();
    assert!(stats.packets_sent > 0);
    assert!(stats.packets_received > 0);

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_one_sided_endpoints_still_get_answers() {
    let fixture = TwoEngineFixture::new().await.unwrap();
    let alice_key = fixture.alice.public_key();
    let bob_key = fixture.bob.public_key();

    // Bob knows Alice but has no address for her.
    fixture.alice.disco.add_peer(bob_key).unwrap();
    fixture.bob.disco.add_peer(alice_key).unwrap();
    fixture
        .alice
        .disco
        .set_endpoints(&bob_key, &[fixture.bob.addr])
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || fixture.alice_sees_bob()).await);

    // Pongs go back to the observed source, but Bob has no path of his own.
    assert!(wait_until(Duration::from_secs(1), || fixture.bob.status_of(&alice_key).is_some()).await);
    let bob_view = fixture.bob.status_of(&alice_key).unwrap();
    assert_eq!(bob_view, PeerStatus::default());
    assert!(fixture.bob.disco.peer(&alice_key).unwrap().paths().is_empty());

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_unknown_sender_is_ignored() {
    let fixture = TwoEngineFixture::new().await.unwrap();

    // Alice pings Bob, but Bob has never heard of Alice.
    let bob_key = fixture.bob.public_key();
    fixture.alice.disco.add_peer(bob_key).unwrap();
    fixture
        .alice
        .disco
        .set_endpoints(&bob_key, &[fixture.bob.addr])
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!fixture.alice_sees_bob());
    assert!(fixture.bob.link.take_sent().is_empty());

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_reconnects_after_partition() {
    let fixture = TwoEngineFixture::new().await.unwrap();
    fixture.introduce().unwrap();
    let bob_key = fixture.bob.public_key();

    assert!(wait_until(Duration::from_secs(3), || fixture.alice_sees_bob()).await);

    fixture.partition();
    assert!(
        wait_until(Duration::from_secs(3), || !fixture.alice_sees_bob()
            && !fixture.bob_sees_alice())
        .await,
        "loss was never detected"
    );

    // Losing every path publishes an explicit empty status.
    assert_eq!(
        fixture.alice.status_of(&bob_key),
        Some(PeerStatus { active: None })
    );
    let session = fixture.alice.disco.peer(&bob_key).unwrap();
    for (_, _, status, priority) in session.paths() {
        assert_eq!(status.state, PathState::Connecting);
        assert_eq!(status.rtt, Duration::ZERO);
        assert_eq!(priority, Priority::Primary);
    }

    fixture.heal();
    assert!(
        wait_until(Duration::from_secs(3), || fixture.alice_sees_bob()
            && fixture.bob_sees_alice())
        .await,
        "engines never reconnected"
    );

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_live_path_wins_over_silent_candidate() {
    let fixture = TwoEngineFixture::new().await.unwrap();
    let (_silent, silent_addr) = silent_endpoint().await;
    let bob_key = fixture.bob.public_key();

    fixture.introduce().unwrap();
    fixture
        .alice
        .disco
        .set_endpoints(&bob_key, &[silent_addr, fixture.bob.addr])
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || fixture.alice_sees_bob()).await);

    let active = fixture.alice.status_of(&bob_key).unwrap().active.unwrap();
    assert_eq!(active.addr, fixture.bob.addr);

    let session = fixture.alice.disco.peer(&bob_key).unwrap();
    let paths = session.paths();
    assert_eq!(paths.len(), 2);
    for (_, addr, status, priority) in paths {
        if addr == fixture.bob.addr {
            assert_eq!(status.state, PathState::Connected);
            assert_eq!(priority, Priority::Primary);
        } else {
            assert_eq!(addr, silent_addr);
            assert_eq!(status.state, PathState::Connecting);
            assert_eq!(priority, Priority::Sub);
        }
    }

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_endpoint_churn_stops_probing_removed_path() {
    let fixture = TwoEngineFixture::new().await.unwrap();
    let (_silent, silent_addr) = silent_endpoint().await;
    let bob_key = fixture.bob.public_key();

    fixture.introduce().unwrap();
    fixture
        .alice
        .disco
        .set_endpoints(&bob_key, &[silent_addr, fixture.bob.addr])
        .unwrap();
    assert!(wait_until(Duration::from_secs(3), || fixture.alice_sees_bob()).await);

    let session = fixture.alice.disco.peer(&bob_key).unwrap();
    let live_id = session
        .paths()
        .into_iter()
        .find(|(_, addr, _, _)| *addr == fixture.bob.addr)
        .map(|(id, _, _, _)| id)
        .unwrap();

    fixture
        .alice
        .disco
        .set_endpoints(&bob_key, &[fixture.bob.addr])
        .unwrap();
    assert_eq!(session.endpoints(), vec![fixture.bob.addr]);

    // Let in-flight sends drain, then watch a full probe cycle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    fixture.alice.link.take_sent();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let key = fixture.bob.key.shared_key(&fixture.alice.public_key()).unwrap();

    let sent = fixture.alice.link.take_sent();
    assert!(sent.iter().all(|(_, to)| *to != silent_addr));

    let pings: Vec<_> = sent
        .iter()
        .filter_map(|(bytes, to)| EncryptedPacket::parse(bytes, *to))
        .filter(|packet| packet.header == Header::Ping)
        .filter_map(|packet| packet.open(&key))
        .collect();
    assert!(!pings.is_empty(), "surviving path stopped probing");
    assert!(pings.iter().all(|ping| ping.path_id == live_id));

    // The surviving path kept its id and stayed up.
    assert!(fixture.alice_sees_bob());

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_removed_peer_stops_answering() {
    let fixture = TwoEngineFixture::new().await.unwrap();
    fixture.introduce().unwrap();
    let bob_key = fixture.bob.public_key();

    assert!(
        wait_until(Duration::from_secs(3), || fixture.alice_sees_bob()
            && fixture.bob_sees_alice())
        .await
    );

    assert!(fixture.alice.disco.remove_peer(&bob_key));
    assert!(fixture.alice.status_of(&bob_key).is_none());
    assert!(fixture.alice.disco.peer(&bob_key).is_none());

    // Alice now drops Bob's pings, so Bob loses his path.
    assert!(wait_until(Duration::from_secs(3), || !fixture.bob_sees_alice()).await);

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_closed_engine_looks_lost_to_peer() {
    let fixture = TwoEngineFixture::new().await.unwrap();
    fixture.introduce().unwrap();

    assert!(wait_until(Duration::from_secs(3), || fixture.bob_sees_alice()).await);

    fixture.alice.disco.close().await;
    assert!(fixture.alice.disco.is_closed());
    assert!(fixture.alice.disco.peers().is_empty());

    assert!(wait_until(Duration::from_secs(3), || !fixture.bob_sees_alice()).await);

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_notify_statuses_reports_transitions() {
    let fixture = TwoEngineFixture::new().await.unwrap();
    let bob_key = fixture.bob.public_key();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _watcher = fixture.alice.disco.notify_statuses(move |statuses| {
        let _ = tx.send(statuses.get(&bob_key).copied());
    });

    // Initial delivery before Bob is known.
    assert_eq!(rx.recv().await, Some(None));

    fixture.introduce().unwrap();

    let connected = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(update) = rx.recv().await {
            if let Some(status) = update.filter(PeerStatus::is_connected) {
                return status;
            }
        }
        panic!("status stream ended");
    })
    .await
    .unwrap();
    assert_eq!(connected.active.unwrap().addr, fixture.bob.addr);

    fixture.alice.disco.close().await;

    // Closing ends the subscription.
    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok());

    fixture.bob.disco.close().await;
}

#[tokio::test]
async fn test_many_peers_share_one_engine() {
    let hub = Endpoint::start(fast_config()).await.unwrap();
    let mut spokes = Vec::new();

    for _ in 0..4 {
        let spoke = Endpoint::start(fast_config()).await.unwrap();
        spoke.disco.add_peer(hub.public_key()).unwrap();
        spoke
            .disco
            .set_endpoints(&hub.public_key(), &[hub.addr])
            .unwrap();

        hub.disco.add_peer(spoke.public_key()).unwrap();
        hub.disco
            .set_endpoints(&spoke.public_key(), &[spoke.addr])
            .unwrap();
        spokes.push(spoke);
    }

    assert!(
        wait_until(Duration::from_secs(3), || spokes
            .iter()
            .all(|spoke| hub.sees(&spoke.public_key()) && spoke.sees(&hub.public_key())))
        .await
    );
    assert_eq!(hub.disco.statuses().len(), 4);

    hub.disco.close().await;
    for spoke in &spokes {
        spoke.disco.close().await;
    }
}
