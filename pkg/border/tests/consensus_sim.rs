//! Whole-cluster scenarios for the three-phase ordering protocol, with the
//! broadcast fan-out and self-delivery simulated in-process. Messages flow in
//! submission order, so every run is deterministic.

use std::collections::VecDeque;

use border::chain::compute_hash;
use border::consensus::ConsensusModule;
use border::protos::*;
use cluster::config::ClusterConfig;

struct Cluster {
	nodes: Vec<ConsensusModule>,
}

impl Cluster {
	/// node1 is the primary, everyone else a replica
	fn new(n: usize) -> Cluster {
		let addrs: Vec<String> = (1..=n).map(|i| format!("localhost:{}", 6000 + i)).collect();

		let nodes = (1..=n)
			.map(|i| {
				let config = ClusterConfig::from_addrs(&format!("node{}", i), 0, &addrs).unwrap();
				ConsensusModule::new(config, i == 1)
			})
			.collect();

		Cluster { nodes }
	}

	fn submit(&mut self, data: &str) -> ClientSubmitBlockResponse {
		let (resp, broadcasts) = self.nodes[0].client_submit(data.to_string());
		self.run_broadcasts(0, broadcasts);
		resp
	}

	/// Delivers broadcasts the way the node workers do: pre-prepares to peers
	/// only, prepares and commits to peers and then back to the sender itself.
	/// Follow-up broadcasts requested by any handler join the back of the
	/// queue.
	fn run_broadcasts(&mut self, from: usize, broadcasts: Vec<Broadcast>) {
		let mut queue: VecDeque<(usize, Broadcast)> =
			broadcasts.into_iter().map(|b| (from, b)).collect();

		while let Some((src, broadcast)) = queue.pop_front() {
			match broadcast {
				Broadcast::PrePrepare(req) => {
					for j in 0..self.nodes.len() {
						if j == src {
							continue;
						}
						let (_, follow) = self.nodes[j].pre_prepare(req.clone());
						queue.extend(follow.into_iter().map(|b| (j, b)));
					}
				}

				Broadcast::Prepare(req) => {
					for j in 0..self.nodes.len() {
						if j == src {
							continue;
						}
						let (_, follow) = self.nodes[j].prepare(req.clone());
						queue.extend(follow.into_iter().map(|b| (j, b)));
					}

					let (_, follow) = self.nodes[src].prepare(req);
					queue.extend(follow.into_iter().map(|b| (src, b)));
				}

				Broadcast::Commit(req) => {
					for j in 0..self.nodes.len() {
						if j == src {
							continue;
						}
						let (_, follow) = self.nodes[j].commit(req.clone());
						queue.extend(follow.into_iter().map(|b| (j, b)));
					}

					let (_, follow) = self.nodes[src].commit(req);
					queue.extend(follow.into_iter().map(|b| (src, b)));
				}
			}
		}
	}

	fn chain_lengths(&self) -> Vec<usize> {
		self.nodes.iter().map(|n| n.chain().len()).collect()
	}

	fn set_malicious(&mut self, index: usize, kind: &str) {
		assert!(self.nodes[index].set_malicious(true, kind).success);
	}

	/// Every chain must be internally consistent: heights count up, links
	/// point at the previous block, hashes bind their content.
	fn assert_chain_integrity(&self) {
		for node in &self.nodes {
			let blocks = node.chain().blocks();

			for (i, block) in blocks.iter().enumerate() {
				assert_eq!(block.block_height as usize, i);

				if i > 0 {
					assert_eq!(block.previous_hash, blocks[i - 1].block_hash);
					assert_eq!(
						block.block_hash,
						compute_hash(&block.data, &block.previous_hash, block.block_height)
					);
				}
			}
		}
	}

	/// No two nodes may hold different blocks at the same height
	fn assert_agreement(&self) {
		for a in 0..self.nodes.len() {
			for b in (a + 1)..self.nodes.len() {
				let (ca, cb) = (self.nodes[a].chain().blocks(), self.nodes[b].chain().blocks());
				let common = ca.len().min(cb.len());

				for i in 0..common {
					assert_eq!(
						ca[i].block_hash, cb[i].block_hash,
						"nodes disagree at height {}", i
					);
				}
			}
		}
	}
}

#[test]
fn all_honest_nodes_commit_the_block() {
	let mut c = Cluster::new(5);

	let resp = c.submit("Tx-1");
	assert!(resp.success);
	assert_eq!(resp.block_height, 1);

	assert_eq!(c.chain_lengths(), vec![2; 5]);
	for node in &c.nodes {
		assert_eq!(node.chain().last().data, "Tx-1");
		assert_eq!(node.current_sequence(), 1);
	}

	c.assert_chain_integrity();
	c.assert_agreement();
}

#[test]
fn consecutive_submissions_extend_the_chain() {
	let mut c = Cluster::new(5);

	assert!(c.submit("Tx-1").success);
	assert!(c.submit("Tx-2").success);
	assert!(c.submit("Tx-3").success);

	assert_eq!(c.chain_lengths(), vec![4; 5]);
	for node in &c.nodes {
		let blocks = node.chain().blocks();
		assert_eq!(blocks[1].data, "Tx-1");
		assert_eq!(blocks[2].data, "Tx-2");
		assert_eq!(blocks[3].data, "Tx-3");
	}

	c.assert_chain_integrity();
	c.assert_agreement();
}

#[test]
fn one_silent_replica_is_tolerated() {
	let mut c = Cluster::new(5);
	c.set_malicious(2, "silent");

	assert!(c.submit("Tx-1").success);

	// Everyone honest commits; the silent node never leaves the old height
	assert_eq!(c.chain_lengths(), vec![2, 2, 1, 2, 2]);
	assert_eq!(c.nodes[2].current_sequence(), 0);

	c.assert_chain_integrity();
	c.assert_agreement();
}

#[test]
fn wrong_hash_replica_cannot_derail_consensus() {
	let mut c = Cluster::new(5);
	c.set_malicious(1, "wrong_hash");

	assert!(c.submit("Tx-1").success);

	// The forged prepare votes land in their own bucket and never reach
	// quorum; the real hash does, on every node including the liar (its
	// pending block is still the real one).
	assert_eq!(c.chain_lengths(), vec![2; 5]);
	for node in &c.nodes {
		assert_eq!(node.chain().last().data, "Tx-1");
	}

	c.assert_chain_integrity();
	c.assert_agreement();
}

#[test]
fn byzantine_primary_stalls_the_cluster() {
	let mut c = Cluster::new(5);
	c.set_malicious(0, "wrong_hash");

	// The submission itself is acknowledged; consensus then goes nowhere
	// because every replica rejects the corrupted block. With no view change
	// this is a permanent stall.
	let resp = c.submit("Tx-1");
	assert!(resp.success);

	assert_eq!(c.chain_lengths(), vec![1; 5]);
	for i in 1..5 {
		assert_eq!(c.nodes[i].current_sequence(), 0);
	}
}

#[test]
fn too_many_silent_nodes_stall_the_cluster() {
	let mut c = Cluster::new(5);
	c.set_malicious(1, "silent");
	c.set_malicious(2, "silent");
	c.set_malicious(3, "silent");

	// Two participants can't assemble a quorum of three
	assert!(c.submit("Tx-1").success);

	assert_eq!(c.chain_lengths(), vec![1; 5]);
	c.assert_agreement();
}

#[test]
fn minimal_cluster_stalls_beyond_its_threshold() {
	// For n=4, f=1 and the quorum is 3: two silent replicas leave only two
	// participants, so nothing can commit.
	let mut c = Cluster::new(4);
	c.set_malicious(1, "silent");
	c.set_malicious(2, "silent");

	assert!(c.submit("Tx-1").success);
	assert_eq!(c.chain_lengths(), vec![1; 4]);

	// The same cluster with a single fault still makes progress
	let mut c = Cluster::new(4);
	c.set_malicious(1, "silent");

	assert!(c.submit("Tx-1").success);
	assert_eq!(c.chain_lengths(), vec![2, 1, 2, 2]);

	c.assert_chain_integrity();
	c.assert_agreement();
}
