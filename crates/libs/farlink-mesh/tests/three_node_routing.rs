//! Node 1 and node 3 are out of range of each other; node 2 sits
//! between them. A reliable send from 1 to 3 has no direct path, so it
//! must flow through AODV route discovery (RREQ flood, RREP unicast
//! back) before the data frame itself is relayed through node 2.

mod common;

use common::{make_node, step_all, Ether};
use farlink_mesh::MeshEvent;

#[test]
fn unreachable_node_is_reached_via_aodv_relay() {
    let ether = Ether::new(3);
    ether.borrow_mut().disconnect(0, 2); // node 1 <-> node 3: no direct link
    let mut nodes = vec![make_node(&ether, 0, 1), make_node(&ether, 1, 2), make_node(&ether, 2, 3)];
    let mut now_ms = 0u64;

    // let Hello beacons settle the neighbor tables first
    for _ in 0..3 {
        step_all(&mut nodes, now_ms, 0);
        now_ms += 100;
    }
    assert!(nodes[1].neighbors().contains(1));
    assert!(nodes[1].neighbors().contains(3));
    assert!(!nodes[0].neighbors().contains(3));

    nodes[0].send(3, b"relay this", true, now_ms, 0).unwrap();

    let mut delivered = false;
    for _ in 0..40 {
        let events = step_all(&mut nodes, now_ms, 0);
        now_ms += 100;
        if events[2]
            .iter()
            .any(|e| matches!(e, MeshEvent::Message { src, payload, .. } if *src == 1 && payload == b"relay this"))
        {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "node 3 never received the relayed message from node 1");
    assert!(nodes[0].routing().route_for(3).is_some(), "node 1 should have learned a route to node 3");
}
