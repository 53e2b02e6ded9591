//! Cluster-wide safety checks and the workload helpers built on them.

use anyhow::{anyhow, bail, ensure, Context};
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use zab_core::{NodeId, ZxId};

use crate::fault_injection::ClusterHarness;

/// Every node applies zxids in strictly increasing order, so no proposal is
/// delivered twice.
pub fn check_no_duplicate_applies(harness: &ClusterHarness) -> anyhow::Result<()> {
    for node in harness.nodes() {
        let zxids = node.learner().applied_zxids();
        for pair in zxids.windows(2) {
            ensure!(
                pair[0] < pair[1],
                "node {} applied {} after {}",
                node.id(),
                pair[1],
                pair[0]
            );
        }
    }
    Ok(())
}

/// No two nodes delivered different payloads for the same zxid.
pub fn check_agreement(harness: &ClusterHarness) -> anyhow::Result<()> {
    let mut seen: BTreeMap<ZxId, (NodeId, Bytes)> = BTreeMap::new();
    for node in harness.nodes() {
        for (zxid, payload) in node.learner().applied() {
            match seen.get(&zxid) {
                Some((first, expected)) if *expected != payload => {
                    bail!(
                        "nodes {} and {} disagree on the payload of {}",
                        first,
                        node.id(),
                        zxid
                    );
                }
                Some(_) => {}
                None => {
                    seen.insert(zxid, (node.id(), payload));
                }
            }
        }
    }
    Ok(())
}

/// Every node's delivery sequence is a prefix of the longest one.
pub fn check_total_order(harness: &ClusterHarness) -> anyhow::Result<()> {
    let sequences: Vec<_> = harness
        .nodes()
        .map(|node| (node.id(), node.learner().applied_zxids()))
        .collect();
    let Some((longest_node, longest)) = sequences.iter().max_by_key(|(_, seq)| seq.len()) else {
        return Ok(());
    };

    for (node, sequence) in &sequences {
        ensure!(
            longest.starts_with(sequence),
            "node {} delivered {:?}, which is not a prefix of node {}'s {:?}",
            node,
            sequence,
            longest_node,
            longest
        );
    }
    Ok(())
}

pub fn check_epochs_monotonic(harness: &ClusterHarness) -> anyhow::Result<()> {
    if let Some(first) = harness.epoch_regressions().first() {
        bail!(
            "{} epoch regressions, first: {}",
            harness.epoch_regressions().len(),
            first
        );
    }
    Ok(())
}

pub fn check_safety(harness: &ClusterHarness) -> anyhow::Result<()> {
    check_no_duplicate_applies(harness)?;
    check_agreement(harness)?;
    check_total_order(harness)?;
    check_epochs_monotonic(harness)
}

/// Ticks until one leader has established an epoch with every live node.
pub async fn establish(harness: &mut ClusterHarness, max_rounds: u64) -> anyhow::Result<NodeId> {
    harness
        .run_until(max_rounds, |h| h.established_leader().is_some())
        .await;
    let leader = harness
        .established_leader()
        .ok_or_else(|| anyhow!("no epoch established within {} rounds", max_rounds))?;
    info!("Node {} leads an established epoch", leader);
    Ok(leader)
}

/// Submits `payloads` through `writer`'s learner and waits for every live
/// node to deliver all of them.
pub async fn write_and_wait(
    harness: &mut ClusterHarness,
    writer: u32,
    payloads: &[&str],
    max_rounds: u64,
) -> anyhow::Result<()> {
    let wanted: HashSet<Bytes> = payloads
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect();
    for payload in &wanted {
        harness.learner(writer).submit(payload.clone());
    }

    let delivered_everywhere = |h: &ClusterHarness| {
        h.live_nodes().all(|node| {
            let applied: HashSet<Bytes> = node.learner().applied_payloads().into_iter().collect();
            wanted.is_subset(&applied)
        })
    };
    let done = harness.run_until(max_rounds, delivered_everywhere).await;
    ensure!(
        done,
        "{} writes through node {} not delivered everywhere",
        payloads.len(),
        writer
    );
    check_safety(harness).context("after writes")
}
