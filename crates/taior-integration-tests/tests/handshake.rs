//! Handshake ordering: no onion frame before both `0xBB` frames, and the
//! handshake-wait barrier on `send`.

use std::sync::Arc;
use std::time::Duration;

use taior_core::{CoreConfig, SendOptions, TaiorError};
use taior_integration_tests::{
    capture_deliveries, connect_mesh, quiet_config, spawn_node, LoopbackNetwork,
};
use taior_wire::{MAGIC_AORP, MAGIC_HANDSHAKE};

fn hold_towards(net: &LoopbackNetwork, to: &str, from: &[&str]) {
    for peer in from {
        net.hold(peer, to);
    }
}

fn release_towards(net: &LoopbackNetwork, to: &str, from: &[&str]) {
    for peer in from {
        net.release(peer, to);
    }
}

#[tokio::test]
async fn send_blocks_until_handshakes_complete() {
    let net = LoopbackNetwork::new();
    let a = spawn_node(&net, "a", quiet_config());
    let b = spawn_node(&net, "b", quiet_config());
    let c = spawn_node(&net, "c", quiet_config());
    let d = spawn_node(&net, "d", quiet_config());

    let mut deliveries = capture_deliveries(&b);
    let mut more = capture_deliveries(&c);
    let mut yet_more = capture_deliveries(&d);

    // Withhold the peers' handshake frames from a.
    hold_towards(&net, "a", &["b", "c", "d"]);
    connect_mesh(&net, &["a", "b", "c", "d"]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sender = {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.send(b"patient", SendOptions::adaptive()).await })
    };

    // While the handshakes are withheld the send must neither complete nor
    // leak an onion frame.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!sender.is_finished(), "send completed without handshakes");
    for record in net.frames_from("a") {
        assert_eq!(
            record.frame.first(),
            Some(&MAGIC_HANDSHAKE),
            "only handshake frames may precede handshake completion"
        );
    }

    // Release the handshakes; the barrier opens and the send goes through.
    release_towards(&net, "a", &["b", "c", "d"]);
    let result = tokio::time::timeout(Duration::from_secs(3), sender)
        .await
        .expect("send finishes after handshakes")
        .expect("task not aborted");
    result.expect("send succeeds");

    let onion_count = net
        .frames_from("a")
        .iter()
        .filter(|r| r.frame.first() == Some(&MAGIC_AORP))
        .count();
    assert_eq!(onion_count, 1);

    // The payload surfaced at exactly one exit.
    let mut total = 0;
    for rx in [&mut deliveries, &mut more, &mut yet_more] {
        if tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .is_ok()
        {
            total += 1;
        }
    }
    assert_eq!(total, 1);

    a.disconnect().await;
    b.disconnect().await;
    c.disconnect().await;
    d.disconnect().await;
}

#[tokio::test]
async fn send_fails_fast_when_handshakes_never_arrive() {
    let net = LoopbackNetwork::new();
    let config = CoreConfig {
        handshake_timeout_ms: 300,
        ..quiet_config()
    };
    let a = spawn_node(&net, "a", config.clone());
    let b = spawn_node(&net, "b", config.clone());
    let c = spawn_node(&net, "c", config.clone());
    let d = spawn_node(&net, "d", config);

    hold_towards(&net, "a", &["b", "c", "d"]);
    connect_mesh(&net, &["a", "b", "c", "d"]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = tokio::time::Instant::now();
    let result = a.send(b"impatient", SendOptions::adaptive()).await;
    let elapsed = started.elapsed();

    assert!(
        matches!(result, Err(TaiorError::InsufficientAnonymity { .. })),
        "got {result:?}"
    );
    assert!(
        elapsed >= Duration::from_millis(250),
        "barrier returned too early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(1_500),
        "barrier did not respect the timeout: {elapsed:?}"
    );

    // The refused payload never reached the substrate in any form.
    for record in net.frames_from("a") {
        assert_eq!(record.frame.first(), Some(&MAGIC_HANDSHAKE));
    }

    a.disconnect().await;
    b.disconnect().await;
    c.disconnect().await;
    d.disconnect().await;
}
