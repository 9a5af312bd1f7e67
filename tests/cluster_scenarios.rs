use std::collections::BTreeSet;
use std::process::Command;
use std::time::Duration;

use raftsim::raft::RaftMessage;
use raftsim::{Cluster, NodeId, NodeRole, RaftError, SimConfig};

const BIN: &str = env!("CARGO_BIN_EXE_raftsim");
const STEP: Duration = Duration::from_millis(50);

fn cluster(seed: u64, nodes: usize) -> Cluster {
    let mut config = SimConfig::default();
    config.seed = Some(seed);
    config.cluster.initial_nodes = nodes;
    Cluster::new(config)
}

/// Advances in small steps until `done` holds or `limit` of simulated time
/// has passed. Returns whether the condition was met.
fn run_until(cluster: &mut Cluster, limit: Duration, mut done: impl FnMut(&Cluster) -> bool) -> bool {
    let mut elapsed = Duration::ZERO;
    while elapsed < limit {
        cluster.advance(STEP);
        elapsed += STEP;
        if done(&*cluster) {
            return true;
        }
    }
    false
}

fn run_for(cluster: &mut Cluster, span: Duration) {
    let mut elapsed = Duration::ZERO;
    while elapsed < span {
        cluster.advance(STEP);
        elapsed += STEP;
    }
}

fn wait_for_leader(cluster: &mut Cluster) -> NodeId {
    assert!(
        run_until(cluster, Duration::from_secs(120), |c| c.current_leader().is_some()),
        "no leader elected: {}",
        cluster.statistics()
    );
    cluster.current_leader().map(|n| n.id()).unwrap()
}

/// One leader, and every alive node agrees on its term.
fn converged(cluster: &Cluster) -> bool {
    let terms: BTreeSet<u64> = cluster
        .nodes()
        .filter(|n| n.is_alive())
        .map(|n| n.current_term())
        .collect();
    cluster.leaders().len() == 1 && terms.len() == 1
}

#[test]
fn healthy_cluster_elects_one_leader_that_stays() {
    let mut c = cluster(1, 5);
    wait_for_leader(&mut c);
    run_for(&mut c, Duration::from_secs(5));
    let leader = c.current_leader().map(|n| n.id()).unwrap();
    let term = c.current_term();

    run_for(&mut c, Duration::from_secs(20));
    assert_eq!(c.leaders(), vec![leader]);
    assert_eq!(c.current_term(), term);

    for node in c.nodes() {
        if node.id() != leader {
            assert_eq!(node.role(), NodeRole::Follower);
            assert_eq!(node.leader_id(), Some(leader));
        }
    }
}

#[test]
fn single_node_elects_itself() {
    let mut c = cluster(2, 1);
    let leader = wait_for_leader(&mut c);
    assert_eq!(leader, 0);
    assert_eq!(c.current_term(), 1);
}

#[test]
fn no_election_starts_while_a_partition_stands() {
    let mut c = cluster(3, 5);
    c.partition(&[0, 1], &[2, 3, 4]).unwrap();
    assert!(c.nodes().all(|n| n.is_partitioned()));

    run_for(&mut c, Duration::from_secs(30));
    assert!(c.leaders().is_empty());
    assert_eq!(c.current_term(), 0);
    assert!(c.nodes().all(|n| n.role() == NodeRole::Follower));

    c.heal_partition();
    assert!(
        run_until(&mut c, Duration::from_secs(120), converged),
        "cluster did not converge after heal: {}",
        c.statistics()
    );
    let term = c.current_term();
    assert!(term >= 1);
    assert!(c.nodes().all(|n| n.current_term() == term));
}

#[test]
fn isolated_followers_rejoin_a_led_majority() {
    let mut c = cluster(13, 5);
    wait_for_leader(&mut c);
    assert!(run_until(&mut c, Duration::from_secs(30), converged));
    let leader = c.current_leader().map(|n| n.id()).unwrap();
    let (minority, majority): (Vec<NodeId>, Vec<NodeId>) =
        c.node_ids().into_iter().partition(|id| *id != leader);
    let (minority, rest) = minority.split_at(2);
    let majority: Vec<NodeId> = majority.into_iter().chain(rest.iter().copied()).collect();
    c.partition(minority, &majority).unwrap();
    let leader_term = c.node(leader).unwrap().current_term();

    run_for(&mut c, Duration::from_secs(30));
    // Neither side may hold an election, so the minority cannot outrun the
    // leader's term.
    assert!(c.node(leader).unwrap().is_leader());
    assert_eq!(c.node(leader).unwrap().current_term(), leader_term);
    for id in minority {
        let node = c.node(*id).unwrap();
        assert!(!node.is_leader());
        assert!(node.current_term() <= leader_term);
    }

    c.heal_partition();
    assert!(run_until(&mut c, Duration::from_secs(30), |c| {
        minority
            .iter()
            .all(|id| c.node(*id).unwrap().current_term() == leader_term)
    }));
    run_for(&mut c, Duration::from_secs(10));
    assert!(converged(&c));
    assert_eq!(c.leaders(), vec![leader]);
    assert_eq!(c.current_term(), leader_term);
    for id in minority {
        let node = c.node(*id).unwrap();
        assert_eq!(node.current_term(), leader_term);
        assert_eq!(node.leader_id(), Some(leader));
    }
}

#[test]
fn total_message_loss_prevents_election_but_terms_grow() {
    let mut c = cluster(4, 5);
    c.set_drop_rate(1.0);
    run_for(&mut c, Duration::from_secs(30));

    let stats = c.statistics();
    assert_eq!(stats.leader, None);
    assert!(stats.current_term >= 2);
    assert_eq!(stats.total_messages, 0);
    assert_eq!(stats.delivered_messages, 0);
    assert!(stats.dropped_messages > 0);
    assert_eq!(stats.active_messages, 0);
}

#[test]
fn killing_the_leader_triggers_a_new_election() {
    let mut c = cluster(5, 5);
    let old = wait_for_leader(&mut c);
    let old_term = c.node(old).unwrap().current_term();
    c.kill_node(old).unwrap();
    assert_eq!(c.node(old).unwrap().role(), NodeRole::Dead);

    let new = wait_for_leader(&mut c);
    assert_ne!(new, old);
    assert!(c.node(new).unwrap().current_term() > old_term);

    // The returning node keeps its stale term until it hears from the leader.
    c.revive_node(old).unwrap();
    assert_eq!(c.node(old).unwrap().current_term(), old_term);
    assert!(run_until(&mut c, Duration::from_secs(60), converged));
    assert_eq!(c.node(old).unwrap().role(), NodeRole::Follower);
}

#[test]
fn dead_nodes_ignore_traffic_and_keep_no_inbox() {
    let mut c = cluster(6, 3);
    wait_for_leader(&mut c);
    c.kill_node(2).unwrap();
    run_for(&mut c, Duration::from_secs(5));

    let node = c.node(2).unwrap();
    assert!(!node.is_alive());
    assert_eq!(node.pending_messages(), 0);
    assert_eq!(c.alive_count(), 2);
}

#[test]
fn send_succeeds_again_after_heal() {
    let mut c = cluster(7, 3);
    let msg = RaftMessage::AppendEntriesResponse { term: 0, success: true };
    c.partition(&[0], &[1, 2]).unwrap();
    assert!(!c.send(0, 1, msg.clone()));

    c.heal_partition();
    c.advance(STEP);
    assert!(c.send(0, 1, msg));
}

#[test]
fn partition_created_mid_flight_blocks_delivery() {
    let mut c = cluster(8, 3);
    let msg = RaftMessage::AppendEntriesResponse { term: 0, success: true };
    assert!(c.send(0, 1, msg));
    c.partition(&[0], &[1, 2]).unwrap();

    let before = c.statistics().blocked_messages;
    run_for(&mut c, Duration::from_secs(1));
    let stats = c.statistics();
    assert!(stats.blocked_messages > before);
    assert_eq!(c.node(1).unwrap().info().messages_received, 0);
}

#[test]
fn latency_slows_delivery() {
    let mut c = cluster(9, 3);
    c.set_latency(2000);
    let msg = RaftMessage::AppendEntriesResponse { term: 0, success: true };
    assert!(c.send(0, 1, msg));

    run_for(&mut c, Duration::from_millis(1000));
    assert!(c
        .messages()
        .iter()
        .any(|m| m.id == 0 && m.progress > 0.0 && m.progress < 1.0));

    run_for(&mut c, Duration::from_millis(2000));
    assert!(c.messages().iter().all(|m| m.id != 0));
    assert!(c.statistics().delivered_messages >= 1);
}

#[test]
fn client_commands_need_a_leader() {
    let mut c = cluster(10, 5);
    assert_eq!(c.submit_client_command("SET x"), Err(RaftError::NoLeader));

    let leader = wait_for_leader(&mut c);
    let entry = c.submit_client_command("SET x").unwrap();
    let log = c.node(leader).unwrap().log();
    assert_eq!(entry.index as usize, log.len() - 1);
    assert_eq!(entry.term, c.node(leader).unwrap().current_term());
    assert!(!entry.committed);
}

#[test]
fn submitted_entries_stay_on_the_leader() {
    // Heartbeats carry no entries, so followers never see client commands.
    let mut c = cluster(11, 3);
    let leader = wait_for_leader(&mut c);
    c.submit_burst(3);
    run_for(&mut c, Duration::from_secs(5));

    assert_eq!(c.node(leader).unwrap().log().len(), 3);
    for node in c.nodes().filter(|n| n.id() != leader) {
        assert!(node.log().is_empty());
    }
}

#[test]
fn same_seed_gives_identical_runs() {
    let mut a = cluster(12, 5);
    let mut b = cluster(12, 5);
    a.set_drop_rate(0.2);
    b.set_drop_rate(0.2);
    run_for(&mut a, Duration::from_secs(40));
    run_for(&mut b, Duration::from_secs(40));

    assert_eq!(a.statistics(), b.statistics());
    assert_eq!(a.node_infos(), b.node_infos());
}

#[test]
fn cli_prints_default_config() {
    let output = Command::new(BIN).arg("config").output().expect("failed to run raftsim");
    assert!(output.status.success());

    let config: SimConfig = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config, SimConfig::default());
}

#[test]
fn cli_batch_run_reports_final_statistics() {
    let output = Command::new(BIN)
        .args(["run", "--seed", "5", "--duration-ms", "20000", "--nodes", "3"])
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run raftsim");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let json_start = stdout.find('{').expect("no statistics JSON");
    let stats: serde_json::Value = serde_json::from_str(&stdout[json_start..]).unwrap();
    assert_eq!(stats["total_nodes"], 3);
    assert_eq!(stats["elapsed_ms"], 20000);
    assert_eq!(stdout[..json_start].lines().count(), 20);
}

#[test]
fn cli_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"{"cluster": {"initial_nodes": 20}}"#).unwrap();

    let output = Command::new(BIN)
        .args(["run", "--config"])
        .arg(&path)
        .output()
        .expect("failed to run raftsim");
    assert!(!output.status.success());
}
