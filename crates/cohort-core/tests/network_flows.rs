//! End-to-end flows through the event-loop network.

use cohort_core::{
    ClockKind, CollectorStrategy, GcError, InitialClock, MutexStrategy, Network, NetworkConfig,
    NetworkError, NodeError, SystemEnv, Topology,
};

fn network(node_count: usize, topology: Topology, config: NetworkConfig) -> Network {
    Network::with_config(node_count, topology, config, SystemEnv::new()).expect("valid network")
}

/// Grant and release the critical section until nobody is waiting. Returns
/// the entry order.
fn drain_mutex(net: &mut Network, requests: usize) -> Vec<u32> {
    let mut order = Vec::new();
    for _ in 0..requests {
        net.run_until(|n| n.holder().is_some()).expect("someone is granted");
        let holder = net.holder().expect("holder");
        order.push(holder);
        net.release_mutex(holder).expect("holder can release");
    }
    net.run_until_quiescent().expect("quiesces");
    order
}

#[test]
fn permission_voting_serves_equal_stamps_by_id() {
    let config = NetworkConfig { initial_clock: InitialClock::Fixed(1), ..NetworkConfig::default() };
    let mut net = network(3, Topology::Complete, config);
    assert!(net.nodes().iter().all(|n| n.own_time() == 1));

    for node in [2, 0, 1] {
        net.request_mutex(node).expect("idle");
    }
    assert_eq!(drain_mutex(&mut net, 3), vec![0, 1, 2]);

    let entries = net.entries();
    for pair in entries.windows(2) {
        let left = pair[0].left_at.expect("released");
        assert!(left <= pair[1].entered_at, "intervals overlap: {pair:?}");
    }
}

#[test]
fn token_tree_grants_every_requester_once() {
    let config = NetworkConfig {
        mutex: MutexStrategy::TokenTree { root: 0 },
        clock: ClockKind::Vector,
        ..NetworkConfig::default()
    };
    let mut net = network(6, Topology::Ring, config);
    for node in [5, 3, 1, 4, 0, 2] {
        net.request_mutex(node).expect("idle");
    }

    let mut order = drain_mutex(&mut net, 6);
    order.sort_unstable();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    assert!(net.stall_report().mutex_waiting.is_empty());
}

#[test]
fn termination_is_detected_once_after_all_finish() {
    let mut net = network(4, Topology::Complete, NetworkConfig::default());
    net.start().expect("first start");
    net.run_until_quiescent().expect("activations delivered");

    // Node 1 engages node 3, which already has a parent.
    net.activate(1, 3).expect("node 1 is active");
    net.run_until_quiescent().expect("acknowledged");

    for node in [3, 0, 1] {
        net.finish_process(node).expect("known node");
        net.run_until_quiescent().expect("quiesces");
        assert!(net.termination().is_none(), "terminated before node 2 finished");
    }

    net.finish_process(2).expect("known node");
    net.run_until_quiescent().expect("quiesces");

    let record = net.termination().expect("detected");
    assert_eq!(record.node, 0);
    assert_eq!(record.signals, 1);
    assert!(net.stall_report().engaged.is_empty());
}

#[test]
fn snapshot_records_in_flight_data() {
    let mut net = network(3, Topology::Line, NetworkConfig::default());
    net.send_data(1, 2, b"early".to_vec()).expect("neighbors");
    net.run_until_quiescent().expect("delivered");

    net.send_data(0, 1, b"a".to_vec()).expect("neighbors");
    let round = net.take_snapshot(0).expect("idle");
    net.send_data(1, 0, b"b".to_vec()).expect("neighbors");
    net.run_until(|n| n.snapshot_complete(round)).expect("completes");
    net.run_until_quiescent().expect("quiesces");

    let snapshot = net.global_snapshot().expect("complete");
    assert_eq!(snapshot.verify(), Ok(()));
    assert_eq!(snapshot.states[&2].received_from(1), 1);
    assert_eq!(snapshot.states[&1].received_from(0), 1);
}

#[test]
fn copying_collector_through_the_network() {
    let config =
        NetworkConfig { collector: CollectorStrategy::Copying { capacity: 4 }, ..NetworkConfig::default() };
    let mut net = network(2, Topology::Complete, config);

    let addrs: Vec<usize> =
        (0..4).map(|i| net.allocate(1, format!("task{i}")).expect("room")).collect();
    net.release_object(1, addrs[1]).expect("live");
    net.allocate(1, "task4").expect("collection frees a slot");

    let collector = net.node(1).expect("node").collector();
    assert_eq!(collector.collections(), 1);
    let live: Vec<usize> = collector.live_objects().iter().map(|o| o.address).collect();
    assert_eq!(live, vec![0, 1, 2, 3]);

    let err = net.allocate(1, "task5").unwrap_err();
    assert_eq!(err, NetworkError::Node {
        node: 1,
        source: NodeError::Gc(GcError::OutOfMemory { capacity: 4, live: 4 }),
    });
}

#[test]
fn data_to_non_neighbor_is_rejected() {
    let mut net = network(3, Topology::Line, NetworkConfig::default());
    let err = net.send_data(0, 2, b"x".to_vec()).unwrap_err();
    assert_eq!(err, NetworkError::Node { node: 0, source: NodeError::NotNeighbor { node: 0, peer: 2 } });
    assert!(net.bus().is_idle());
}
