//! Cover-traffic indistinguishability.
//!
//! With cover enabled at 10 packets/s, one real 40-byte payload leaves the
//! node among dozens of dummies. Every outbound onion packet must sit in one
//! of the shared 512-byte size buckets, and the real packet's size must not
//! single it out.

use std::collections::HashSet;
use std::time::Duration;

use taior_core::{CoreConfig, SendOptions};
use taior_integration_tests::{
    capture_deliveries, connect_mesh, spawn_node, LoopbackNetwork, EXIT_LAYER_OVERHEAD,
    ROUTING_LAYER_OVERHEAD,
};
use taior_wire::{MAGIC_AORP, PAD_BOUNDARY};

fn cover_config() -> CoreConfig {
    CoreConfig {
        cover_enabled: false, // enabled per node below
        cover_rate: 10.0,
        jitter_max_ms: 2,
        handshake_timeout_ms: 2_000,
        ..CoreConfig::default()
    }
}

#[tokio::test]
async fn real_payload_hides_among_cover() {
    let net = LoopbackNetwork::new();
    let a = spawn_node(&net, "a", cover_config());
    let b = spawn_node(&net, "b", cover_config());
    let c = spawn_node(&net, "c", cover_config());
    let d = spawn_node(&net, "d", cover_config());

    let mut deliveries_b = capture_deliveries(&b);
    let mut deliveries_c = capture_deliveries(&c);
    let mut deliveries_d = capture_deliveries(&d);

    connect_mesh(&net, &["a", "b", "c", "d"]);
    tokio::time::sleep(Duration::from_millis(300)).await;

    a.enable_cover_traffic(true, 10.0);

    // One real payload somewhere inside a 5-second cover window.
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    let real_packet = a
        .send(&[0x42u8; 40], SendOptions::adaptive())
        .await
        .expect("send");
    tokio::time::sleep(Duration::from_millis(3_000)).await;
    a.enable_cover_traffic(false, 10.0);

    let outbound: Vec<Vec<u8>> = net
        .frames_from("a")
        .into_iter()
        .map(|r| r.frame)
        .filter(|f| f.first() == Some(&MAGIC_AORP))
        .collect();

    // A healthy slice of the 10/s schedule actually fired.
    assert!(
        outbound.len() >= 10,
        "expected at least 10 onion frames, saw {}",
        outbound.len()
    );

    // All outbound onion packets for a 3-hop circuit occupy the same four
    // size buckets: padded inner frame + fixed per-hop overhead.
    let allowed: HashSet<usize> = (1..=4)
        .map(|k| k * PAD_BOUNDARY + EXIT_LAYER_OVERHEAD + 2 * ROUTING_LAYER_OVERHEAD)
        .collect();
    for frame in &outbound {
        assert!(
            allowed.contains(&frame.len()),
            "outbound frame of {} bytes is outside the cover buckets",
            frame.len()
        );
    }

    // The real packet shares its bucket with at least one cover packet, so
    // size alone cannot identify it.
    let same_size = outbound
        .iter()
        .filter(|f| f.len() == real_packet.size())
        .count();
    assert!(
        same_size >= 2,
        "real packet is uniquely identifiable by size ({} bytes)",
        real_packet.size()
    );

    // Cover packets never surface upward; only the real payload does,
    // at exactly one exit.
    let mut real_deliveries = 0;
    for rx in [&mut deliveries_b, &mut deliveries_c, &mut deliveries_d] {
        while let Ok((payload, tag)) = rx.try_recv() {
            assert_eq!(payload, vec![0x42u8; 40]);
            assert_eq!(tag, "anonymous");
            real_deliveries += 1;
        }
    }
    assert_eq!(real_deliveries, 1, "exactly one node delivers the payload");

    a.disconnect().await;
    b.disconnect().await;
    c.disconnect().await;
    d.disconnect().await;
}
