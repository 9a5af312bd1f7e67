use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;
use raftsim::{Cluster, NodeId, SimConfig};

#[derive(Debug, Clone)]
enum Op {
    Advance { ms: u64 },
    Kill { id: NodeId },
    Revive { id: NodeId },
    Partition { split: usize },
    Heal,
    Drop { rate: f64 },
    Latency { ms: u64 },
}

const NODES: usize = 5;

fn network_op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (10u64..2_000).prop_map(|ms| Op::Advance { ms }),
        1 => (1usize..NODES).prop_map(|split| Op::Partition { split }),
        1 => Just(Op::Heal),
        1 => (0.0f64..0.6).prop_map(|rate| Op::Drop { rate }),
        1 => (0u64..1_500).prop_map(|ms| Op::Latency { ms }),
    ]
}

fn fault_op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => network_op_strategy(),
        1 => (0..NODES as u64).prop_map(|id| Op::Kill { id }),
        1 => (0..NODES as u64).prop_map(|id| Op::Revive { id }),
    ]
}

fn new_cluster(seed: u64) -> Cluster {
    let mut config = SimConfig::default();
    config.seed = Some(seed);
    config.cluster.initial_nodes = NODES;
    Cluster::new(config)
}

/// Applies one operation in steps small enough that every intermediate
/// state gets checked.
fn apply(cluster: &mut Cluster, op: &Op, mut check: impl FnMut(&Cluster)) {
    match *op {
        Op::Advance { ms } => {
            let mut left = ms;
            while left > 0 {
                let step = left.min(50);
                cluster.advance(Duration::from_millis(step));
                left -= step;
                check(&*cluster);
            }
            return;
        }
        Op::Kill { id } => {
            let _ = cluster.kill_node(id);
        }
        Op::Revive { id } => {
            let _ = cluster.revive_node(id);
        }
        Op::Partition { split } => {
            let ids = cluster.node_ids();
            let (a, b) = ids.split_at(split.min(ids.len()));
            let _ = cluster.partition(a, b);
        }
        Op::Heal => cluster.heal_partition(),
        Op::Drop { rate } => cluster.set_drop_rate(rate),
        Op::Latency { ms } => cluster.set_latency(ms),
    }
    check(&*cluster);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn terms_never_decrease(
        seed in any::<u64>(),
        ops in proptest::collection::vec(fault_op_strategy(), 1..60),
    ) {
        let mut cluster = new_cluster(seed);
        let mut last_term: BTreeMap<NodeId, u64> = BTreeMap::new();
        let mut violation = None;

        for op in &ops {
            apply(&mut cluster, op, |c| {
                for node in c.nodes() {
                    let seen = last_term.entry(node.id()).or_insert(0);
                    if node.current_term() < *seen && violation.is_none() {
                        violation = Some((node.id(), *seen, node.current_term()));
                    }
                    *seen = (*seen).max(node.current_term());
                }
            });
        }

        prop_assert_eq!(violation, None);
    }

    #[test]
    fn at_most_one_leader_and_one_vote_per_term(
        seed in any::<u64>(),
        ops in proptest::collection::vec(network_op_strategy(), 1..60),
    ) {
        let mut cluster = new_cluster(seed);
        let mut leader_of_term: BTreeMap<u64, NodeId> = BTreeMap::new();
        let mut vote_of: BTreeMap<(NodeId, u64), NodeId> = BTreeMap::new();
        let mut violations = Vec::new();

        for op in &ops {
            apply(&mut cluster, op, |c| {
                for node in c.nodes() {
                    let term = node.current_term();
                    if node.is_leader() {
                        let leader = *leader_of_term.entry(term).or_insert(node.id());
                        if leader != node.id() {
                            violations.push(format!("term {term} led by {leader} and {}", node.id()));
                        }
                    }
                    if let Some(candidate) = node.voted_for() {
                        let vote = *vote_of.entry((node.id(), term)).or_insert(candidate);
                        if vote != candidate {
                            violations.push(format!(
                                "node {} voted for {vote} and {candidate} in term {term}",
                                node.id()
                            ));
                        }
                    }
                }
            });
        }

        prop_assert!(violations.is_empty(), "{:?}", violations);
    }

    #[test]
    fn terms_hold_still_while_partitioned(
        seed in any::<u64>(),
        ops in proptest::collection::vec(network_op_strategy(), 1..60),
    ) {
        let mut cluster = new_cluster(seed);
        let mut partitioned_max: Option<u64> = None;
        let mut violation = None;

        for op in &ops {
            apply(&mut cluster, op, |c| {
                let max = c.nodes().map(|n| n.current_term()).max().unwrap_or(0);
                if !c.statistics().partitions_active {
                    partitioned_max = None;
                    return;
                }
                match partitioned_max {
                    Some(before) if max > before && violation.is_none() => {
                        violation = Some((before, max));
                    }
                    None => partitioned_max = Some(max),
                    _ => {}
                }
            });
        }

        prop_assert_eq!(violation, None);
    }
}
