//! Multi-node scenarios driven entirely through the consensus modules, with
//! messages shuttled between them by hand. No sockets and no timers, so every
//! run is deterministic.

use std::time::{Duration, Instant};

use cluster::config::ClusterConfig;
use rlog::consensus::{ClientError, ConsensusModule};
use rlog::protos::*;

struct Cluster {
	nodes: Vec<ConsensusModule>,
	down: Vec<bool>,
	start: Instant,
}

impl Cluster {
	fn new(n: usize) -> Cluster {
		let addrs: Vec<String> = (1..=n).map(|i| format!("localhost:{}", 5000 + i)).collect();
		let start = Instant::now();

		let nodes = (1..=n)
			.map(|i| {
				let config = ClusterConfig::from_addrs(&format!("node{}", i), 0, &addrs).unwrap();
				ConsensusModule::new(config, start)
			})
			.collect();

		Cluster { nodes, down: vec![false; n], start }
	}

	fn at(&self, secs: u64) -> Instant {
		self.start + Duration::from_secs(secs)
	}

	fn addr(&self, i: usize) -> String {
		format!("localhost:{}", 5000 + i + 1)
	}

	fn index_of(id: &str) -> usize {
		id.trim_start_matches("node").parse::<usize>().unwrap() - 1
	}

	/// Delivers a batch of messages emitted by `from`, feeding every response
	/// straight back into its callbacks and then delivering whatever those
	/// produce in turn (a won election's first heartbeats, for example).
	fn deliver_from(&mut self, from: usize, mut batch: Vec<Message>, now: Instant) {
		while let Some(msg) = batch.pop() {
			match msg.body {
				MessageBody::RequestVote(req) => {
					for to in &msg.to {
						let j = Self::index_of(to);
						if self.down[j] {
							continue;
						}

						let resp = self.nodes[j].request_vote(req.clone(), now);
						batch.extend(self.nodes[from].request_vote_callback(to.clone(), resp));
					}
				}
				MessageBody::AppendEntries(req, last_index) => {
					for to in &msg.to {
						let j = Self::index_of(to);
						if self.down[j] {
							continue;
						}

						let resp = self.nodes[j].append_entries(req.clone(), now);
						self.nodes[from].append_entries_callback(to.clone(), last_index, resp);
					}
				}
			}
		}
	}

	fn tick(&mut self, i: usize, now: Instant) {
		if self.down[i] {
			return;
		}

		let batch = self.nodes[i].tick_election(now);
		self.deliver_from(i, batch, now);
	}

	fn heartbeat(&mut self, i: usize, now: Instant) {
		if self.down[i] {
			return;
		}

		let batch = self.nodes[i].heartbeat_tick();
		self.deliver_from(i, batch, now);
	}

	fn client_set(&mut self, i: usize, key: &str, value: &str, now: Instant) -> bool {
		let (resp, batch) = self.nodes[i].client_set(key.into(), value.into());
		self.deliver_from(i, batch, now);
		resp.success
	}

	fn leaders(&self) -> Vec<usize> {
		self.nodes
			.iter()
			.enumerate()
			.filter(|(i, n)| !self.down[*i] && n.is_leader())
			.map(|(i, _)| i)
			.collect()
	}

	/// Logs of any two nodes must agree entry-for-entry wherever both have an
	/// entry of the same term at the same index, all the way down.
	fn assert_log_matching(&self) {
		for a in 0..self.nodes.len() {
			for b in (a + 1)..self.nodes.len() {
				let (la, lb) = (self.nodes[a].log(), self.nodes[b].log());
				let common = std::cmp::min(la.last_index(), lb.last_index());

				let mut verified_from = common + 1;
				for i in (0..=common).rev() {
					if la.term(i) == lb.term(i) {
						verified_from = i;
					} else {
						break;
					}
				}

				for i in verified_from..=common {
					assert_eq!(la.entry(i), lb.entry(i), "logs diverge at index {}", i);
				}
			}
		}
	}
}

#[test]
fn single_leader_emerges() {
	let mut c = Cluster::new(5);
	let t = c.at(30);

	c.tick(0, t);
	assert_eq!(c.leaders(), vec![0]);
	assert_eq!(c.nodes[0].current_term(), 1);

	// Everyone else heard the new leader's heartbeats during the election
	// round and stays quiet on its own timer check shortly after.
	for i in 1..5 {
		c.tick(i, c.at(31));
	}
	assert_eq!(c.leaders(), vec![0]);

	for node in &c.nodes {
		assert_eq!(node.get_leader().leader_id, "node1");
	}
}

#[test]
fn set_then_get_through_the_leader() {
	let mut c = Cluster::new(5);
	let t = c.at(30);
	c.tick(0, t);

	assert!(c.client_set(0, "x", "1", t));

	// Majority acks arrived inline, so the leader has committed and applied
	let resp = c.nodes[0].client_get("x").unwrap();
	assert!(resp.found);
	assert_eq!(resp.value, "1");

	// A non-leader refuses reads with a redirect cue
	match c.nodes[1].client_get("x") {
		Err(ClientError::NotLeader { leader_hint }) => {
			assert_eq!(leader_hint, Some("node1".to_string()));
		}
		_ => panic!("expected a not-leader rejection"),
	}

	// The next heartbeat carries the commit point to the followers
	c.heartbeat(0, t);
	for i in 1..5 {
		assert_eq!(c.nodes[i].state_machine().get("x"), Some(&"1".to_string()));
	}

	c.assert_log_matching();
}

#[test]
fn committed_entries_survive_leader_failover() {
	let mut c = Cluster::new(5);
	c.tick(0, c.at(30));

	assert!(c.client_set(0, "x", "1", c.at(30)));
	c.heartbeat(0, c.at(31));

	// The leader dies; someone else times out and takes over with a term bump
	c.down[0] = true;
	c.tick(1, c.at(70));

	assert_eq!(c.leaders(), vec![1]);
	assert!(c.nodes[1].current_term() >= 2);

	// The committed entry is already present and applied on the new leader
	let resp = c.nodes[1].client_get("x").unwrap();
	assert!(resp.found);
	assert_eq!(resp.value, "1");

	// And the new leader keeps accepting writes
	assert!(c.client_set(1, "y", "2", c.at(70)));
	assert_eq!(c.nodes[1].client_get("y").unwrap().value, "2");

	c.assert_log_matching();
}

#[test]
fn partitioned_leader_stalls_and_steps_down_on_heal() {
	let mut c = Cluster::new(5);
	c.tick(0, c.at(30));

	// Cut node1 off from everyone (its own filter blocks both directions)
	let blocked: Vec<String> = (1..5).map(|i| c.addr(i)).collect();
	c.nodes[0].set_partition(blocked);

	// It still thinks it leads and accepts writes, but nothing can commit
	assert!(c.client_set(0, "stale", "1", c.at(31)));
	c.heartbeat(0, c.at(31));
	assert_eq!(c.nodes[0].commit_index(), -1);
	assert!(c.nodes[0].is_leader());

	// The majority side elects a replacement in a higher term
	c.tick(1, c.at(70));
	assert!(c.nodes[1].is_leader());
	let new_term = c.nodes[1].current_term();
	assert!(new_term > c.nodes[0].current_term());

	// Two leaders exist, but never in the same term
	assert_eq!(c.leaders().len(), 2);

	assert!(c.client_set(1, "z", "3", c.at(70)));

	// Healing the partition demotes the old leader on first contact and
	// reconciles its uncommitted tail away.
	c.nodes[0].set_partition(vec![]);
	c.heartbeat(1, c.at(71));

	assert!(!c.nodes[0].is_leader());
	assert_eq!(c.leaders(), vec![1]);
	assert_eq!(c.nodes[0].current_term(), new_term);

	assert_eq!(c.nodes[0].state_machine().get("stale"), None);
	assert_eq!(c.nodes[0].state_machine().get("z"), Some(&"3".to_string()));

	c.assert_log_matching();
}

#[test]
fn applied_state_is_identical_across_nodes() {
	let mut c = Cluster::new(5);
	let t = c.at(30);
	c.tick(0, t);

	for (k, v) in [("a", "1"), ("b", "2"), ("a", "3"), ("c", "4")] {
		assert!(c.client_set(0, k, v, t));
	}
	c.heartbeat(0, t);

	for i in 1..5 {
		assert_eq!(c.nodes[i].last_applied(), c.nodes[0].last_applied());
		for (k, v) in [("a", "3"), ("b", "2"), ("c", "4")] {
			assert_eq!(c.nodes[i].state_machine().get(k), Some(&v.to_string()));
		}
	}

	c.assert_log_matching();
}
