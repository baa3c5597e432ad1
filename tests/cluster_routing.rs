//! End-to-end cluster routing: slot table built from a `CLUSTER NODES`
//! reply, feeding a dispatcher that classifies and routes real commands.

use bytes::Bytes;
use slotwire::cluster::{Dispatcher, Execution};
use slotwire::error::RoutingError;

fn argv(words: &[&str]) -> Vec<Bytes> {
    words.iter().map(|w| Bytes::copy_from_slice(w.as_bytes())).collect()
}

fn two_master_dispatcher() -> Dispatcher<String> {
    let nodes = "\
node-a 127.0.0.1:7000@17000 master - 0 0 1 connected 0-8191\n\
node-b 127.0.0.1:7001@17001 master - 0 0 2 connected 8192-16383";
    let slots =
        slotwire::cluster::SlotTable::from_cluster_nodes(nodes, |addr| addr.to_string()).unwrap();
    Dispatcher::new(slots)
}

#[test]
fn single_key_command_routes_to_the_owning_shard() {
    let d = two_master_dispatcher();
    // "abcde" hashes to slot 16097, owned by node-b's 8192-16383 range.
    let target = d.route(&argv(&["get", "abcde"])).unwrap();
    assert_eq!(target, "127.0.0.1:7001");
}

#[test]
fn destination_pinned_command_routes_when_keys_share_a_slot() {
    let d = two_master_dispatcher();
    // Both keys hash to the same slot under the shared {tag}.
    let target = d.route(&argv(&["rename", "{tag}a", "{tag}b"])).unwrap();
    assert!(target == "127.0.0.1:7000" || target == "127.0.0.1:7001");
}

#[test]
fn cross_slot_destination_pinned_command_fails_locally() {
    let d = two_master_dispatcher();
    let err = d.route(&argv(&["rename", "a", "b"])).unwrap_err();
    assert_eq!(err, RoutingError::NotInSameSlot);
}

#[test]
fn mget_is_rejected_without_touching_the_network() {
    let d = two_master_dispatcher();
    assert_eq!(
        d.route(&argv(&["mget", "a", "b"])),
        Err(RoutingError::ClusterNotSupported)
    );
}

#[test]
fn fan_out_commands_are_not_routed_to_a_single_connection() {
    let d = two_master_dispatcher();
    assert!(matches!(
        slotwire::cluster::classify(&argv(&["keys", "*"])),
        Execution::FanOut(_)
    ));
    assert_eq!(
        d.route(&argv(&["keys", "*"])),
        Err(RoutingError::ClusterNotSupported)
    );
}

#[test]
fn fan_out_aggregates_across_both_shards() {
    let d = two_master_dispatcher();
    let result = slotwire::cluster::fan_out(
        &d,
        slotwire::cluster::FanOutKind::Keys,
        &argv(&["keys", "*"]),
        |handle, _argv| {
            let key = format!("key-on-{handle}");
            Ok(slotwire::Packet::Array(Some(vec![slotwire::Packet::bulk(key)])))
        },
    )
    .unwrap();
    match result {
        slotwire::Packet::Array(Some(items)) => assert_eq!(items.len(), 2),
        other => panic!("unexpected {other:?}"),
    }
}
