// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The rendezvous handshake at the send/receive boundary.

use std::rc::Rc;

use mainline_collectives::topology::{TopologyKind, TopologyMap};
use mainline_engine::events::EventQueue;
use mainline_engine::types::NodeId;
use mainline_system::cluster::SysEvent;
use mainline_system::config::SystemConfig;
use mainline_system::net::{AnalyticalNetwork, LogGpParams};
use mainline_system::node::Node;
use mainline_system::sendrecv::{RENDEZVOUS_CONTROL_BYTES, RENDEZVOUS_TAG_OFFSET};
use mainline_track::entity::toplevel;
use mainline_track::tracker::dev_null_tracker;

fn pair() -> (Node, Node, AnalyticalNetwork, EventQueue<SysEvent>) {
    let tracker = dev_null_tracker();
    let top = toplevel(&tracker, "top");
    let cfg = Rc::new(SystemConfig::default());
    let topo = TopologyMap::new(vec![2], TopologyKind::Ring).unwrap();
    let sender = Node::new(&top, NodeId(0), topo.clone(), cfg.clone());
    let receiver = Node::new(&top, NodeId(1), topo, cfg);
    let net = AnalyticalNetwork::new(vec![2], Vec::new(), LogGpParams::default());
    (sender, receiver, net, EventQueue::new())
}

#[test]
fn below_threshold_goes_direct() {
    let (mut sender, _, mut net, mut queue) = pair();
    // One byte below the threshold: straight to the backend.
    sender
        .sim_send(NodeId(1), 8191, 7, &mut net, &mut queue)
        .unwrap();
    assert!(sender.pending_sends().is_inflight(NodeId(1), 7));
}

#[test]
fn at_threshold_waits_for_the_control_message() {
    let (mut sender, mut receiver, mut net, mut queue) = pair();

    sender
        .sim_send(NodeId(1), 1 << 20, 8, &mut net, &mut queue)
        .unwrap();
    // The payload is held back.
    assert!(!sender.pending_sends().is_inflight(NodeId(1), 8));

    // The receiver posts its receive: the control message goes out first,
    // on the distinguished tag.
    receiver
        .sim_recv(NodeId(0), 1 << 20, 8, &mut net, &mut queue)
        .unwrap();
    assert!(
        receiver
            .pending_sends()
            .is_inflight(NodeId(0), 8 + RENDEZVOUS_TAG_OFFSET)
    );

    // The control message arriving at the sender releases the payload.
    sender
        .on_packet_received(
            NodeId(1),
            8 + RENDEZVOUS_TAG_OFFSET,
            RENDEZVOUS_CONTROL_BYTES,
            &mut net,
            &mut queue,
        )
        .unwrap();
    assert!(sender.pending_sends().is_inflight(NodeId(1), 8));
}

#[test]
fn early_control_message_banks_a_credit() {
    let (mut sender, _, mut net, mut queue) = pair();

    // Control arrives before the sender reaches its send.
    sender
        .on_packet_received(
            NodeId(1),
            9 + RENDEZVOUS_TAG_OFFSET,
            RENDEZVOUS_CONTROL_BYTES,
            &mut net,
            &mut queue,
        )
        .unwrap();

    sender
        .sim_send(NodeId(1), 1 << 20, 9, &mut net, &mut queue)
        .unwrap();
    assert!(sender.pending_sends().is_inflight(NodeId(1), 9));

    // The credit was consumed: the next large send waits again.
    sender
        .sim_send(NodeId(1), 1 << 20, 9, &mut net, &mut queue)
        .unwrap();
    assert_eq!(sender.pending_sends().queued_len(NodeId(1), 9), 0);
}
