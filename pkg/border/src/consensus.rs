use super::chain::*;
use super::protos::*;

use std::collections::{HashMap, HashSet};

use cluster::config::ClusterConfig;
use tracing::{debug, info, warn};

/// The three-phase ordering state machine for a single node. Pure in the same
/// sense as the rlog module: no I/O, no blocking, short lock-held calls.
/// Handlers hand back the broadcasts they want performed; the node's workers
/// fan those out and post them back to self afterwards.
///
/// For a cluster of n nodes, f = (n - 1) / 3 faults are tolerated and every
/// phase transition needs 2f + 1 matching votes. There is no view change: a
/// faulty primary stalls the cluster and that is the expected failure mode.
pub struct ConsensusModule {
	config: ClusterConfig,

	view_number: u64,
	sequence_number: u64,

	is_primary: bool,

	/// Configured on the primary itself, learned from the first accepted
	/// pre-prepare everywhere else
	primary_id: Option<NodeId>,

	chain: BlockChain,

	/// The one block currently between pre-prepare and execution
	pending_block: Option<Block>,

	pre_prepare_log: HashMap<u64, Block>,
	prepare_log: HashMap<(u64, String), HashSet<NodeId>>,
	commit_log: HashMap<(u64, String), HashSet<NodeId>>,

	is_malicious: bool,
	malicious_type: Option<MaliciousType>,

	f: usize,
}

impl ConsensusModule {
	pub fn new(config: ClusterConfig, is_primary: bool) -> ConsensusModule {
		let f = (config.cluster_size() - 1) / 3;
		let primary_id = if is_primary { Some(config.id.clone()) } else { None };

		info!(id = %config.id, is_primary, f, quorum = 2 * f + 1,
			"border node initialized");

		ConsensusModule {
			config,
			view_number: 0,
			sequence_number: 0,
			is_primary,
			primary_id,
			chain: BlockChain::new(unix_timestamp()),
			pending_block: None,
			pre_prepare_log: HashMap::new(),
			prepare_log: HashMap::new(),
			commit_log: HashMap::new(),
			is_malicious: false,
			malicious_type: None,
			f,
		}
	}

	pub fn id(&self) -> &NodeId {
		&self.config.id
	}

	pub fn is_primary(&self) -> bool {
		self.is_primary
	}

	pub fn current_sequence(&self) -> u64 {
		self.sequence_number
	}

	pub fn chain(&self) -> &BlockChain {
		&self.chain
	}

	fn quorum(&self) -> usize {
		2 * self.f + 1
	}

	fn wrong_hash_mode(&self) -> bool {
		self.is_malicious && self.malicious_type == Some(MaliciousType::WrongHash)
	}

	fn silent_mode(&self) -> bool {
		self.is_malicious && self.malicious_type == Some(MaliciousType::Silent)
	}

	// ============================ Client API =============================

	/// Builds the next block and kicks off consensus for it. Replies before
	/// consensus completes; clients poll the chain to observe the outcome.
	pub fn client_submit(&mut self, data: String) -> (ClientSubmitBlockResponse, Vec<Broadcast>) {
		if !self.is_primary {
			let primary = self.primary_id.clone().unwrap_or_else(|| "unknown".to_string());
			return (
				ClientSubmitBlockResponse {
					success: false,
					message: format!("Not primary. Primary is {}", primary),
					block_height: -1,
				},
				vec![],
			);
		}

		let (height, previous_hash) = {
			let last = self.chain.last();
			(last.block_height + 1, last.block_hash.clone())
		};

		let mut block_hash = compute_hash(&data, &previous_hash, height);

		// A wrong_hash primary circulates a visibly corrupted binding, which
		// every honest replica rejects at validation.
		if self.wrong_hash_mode() {
			block_hash = format!("malicious_hash_{}", &block_hash[..40]);
			warn!(id = %self.config.id, "malicious: forging the block hash");
		}

		let block = Block {
			block_height: height,
			previous_hash,
			block_hash,
			timestamp: unix_timestamp(),
			data,
			view_number: self.view_number,
			sequence_number: self.sequence_number + 1,
		};

		self.sequence_number += 1;
		self.pending_block = Some(block.clone());

		info!(id = %self.config.id, height, seq = block.sequence_number,
			"initiating consensus");

		let pre_prepare = PrePrepareRequest {
			view_number: self.view_number,
			sequence_number: block.sequence_number,
			block: block.clone(),
			primary_id: self.config.id.clone(),
			signature: self.config.id.clone(),
		};

		// The primary never delivers the pre-prepare to itself; it enters the
		// prepare phase directly after the fan-out.
		let prepare = self.own_prepare(&block);

		(
			ClientSubmitBlockResponse {
				success: true,
				message: "Consensus initiated".to_string(),
				block_height: height as i64,
			},
			vec![Broadcast::PrePrepare(pre_prepare), Broadcast::Prepare(prepare)],
		)
	}

	pub fn get_blockchain(&self) -> GetBlockchainResponse {
		GetBlockchainResponse {
			blocks: self.chain.blocks().to_vec(),
			chain_length: self.chain.len() as u64,
		}
	}

	pub fn get_status(&self) -> GetNodeStatusResponse {
		GetNodeStatusResponse {
			node_id: self.config.id.clone(),
			is_primary: self.is_primary,
			view_number: self.view_number,
			current_sequence: self.sequence_number,
			blockchain_height: self.chain.height(),
			is_malicious: self.is_malicious,
			malicious_type: match self.malicious_type {
				Some(t) => t.as_str().to_string(),
				None => "none".to_string(),
			},
		}
	}

	pub fn set_malicious(&mut self, enable: bool, type_name: &str) -> SetMaliciousBehaviorResponse {
		if !enable {
			self.is_malicious = false;
			self.malicious_type = None;

			info!(id = %self.config.id, "malicious behavior disabled");
			return SetMaliciousBehaviorResponse {
				success: true,
				message: "Malicious behavior DISABLED".to_string(),
			};
		}

		let t = match MaliciousType::parse(type_name) {
			Some(t) => t,
			None => {
				return SetMaliciousBehaviorResponse {
					success: false,
					message: format!("Unknown malicious type '{}'", type_name),
				}
			}
		};

		self.is_malicious = true;
		self.malicious_type = Some(t);

		info!(id = %self.config.id, kind = t.as_str(), "malicious behavior enabled");
		SetMaliciousBehaviorResponse {
			success: true,
			message: format!("Malicious behavior ENABLED (type: {})", t.as_str()),
		}
	}

	// ========================== Consensus phases =========================

	/// Replica receives the primary's proposal for the next slot
	pub fn pre_prepare(&mut self, req: PrePrepareRequest) -> (PrePrepareResponse, Vec<Broadcast>) {
		if self.silent_mode() {
			info!(id = %self.config.id, "malicious: ignoring pre-prepare");
			return (self.reject_pre_prepare("Silent node"), vec![]);
		}

		if req.view_number != self.view_number {
			return (
				self.reject_pre_prepare(&format!(
					"View mismatch: expected {}, got {}",
					self.view_number, req.view_number
				)),
				vec![],
			);
		}

		if req.sequence_number != self.sequence_number + 1 {
			return (
				self.reject_pre_prepare(&format!(
					"Sequence mismatch: expected {}, got {}",
					self.sequence_number + 1,
					req.sequence_number
				)),
				vec![],
			);
		}

		if let Err(reason) = self.chain.validate_next(&req.block) {
			warn!(id = %self.config.id, %reason, "rejecting pre-prepare");
			return (self.reject_pre_prepare(&reason), vec![]);
		}

		self.pre_prepare_log.insert(req.sequence_number, req.block.clone());
		self.pending_block = Some(req.block.clone());
		self.sequence_number = req.sequence_number;

		if self.primary_id.is_none() {
			self.primary_id = Some(req.primary_id.clone());
		}

		info!(id = %self.config.id, seq = req.sequence_number,
			hash = %&req.block.block_hash[..8], "pre-prepare accepted");

		let prepare = self.own_prepare(&req.block);

		(
			PrePrepareResponse {
				accepted: true,
				node_id: self.config.id.clone(),
				reason: "Accepted".to_string(),
			},
			vec![Broadcast::Prepare(prepare)],
		)
	}

	/// Counts a prepare vote; at quorum for our pending block, moves to commit
	pub fn prepare(&mut self, req: PrepareRequest) -> (PrepareResponse, Vec<Broadcast>) {
		if req.view_number != self.view_number || req.sequence_number != self.sequence_number {
			return (
				PrepareResponse { accepted: false, node_id: self.config.id.clone() },
				vec![],
			);
		}

		let senders = self
			.prepare_log
			.entry((req.sequence_number, req.block_hash.clone()))
			.or_insert_with(HashSet::new);
		senders.insert(req.node_id.clone());
		let count = senders.len();

		debug!(id = %self.config.id, from = %req.node_id, count,
			quorum = 2 * self.f + 1, "prepare received");

		let mut broadcasts = vec![];
		if count >= self.quorum() {
			if let Some(ref block) = self.pending_block {
				if block.block_hash == req.block_hash {
					broadcasts.push(Broadcast::Commit(CommitRequest {
						view_number: self.view_number,
						sequence_number: block.sequence_number,
						block_hash: block.block_hash.clone(),
						node_id: self.config.id.clone(),
						signature: self.config.id.clone(),
					}));
				}
			}
		}

		(
			PrepareResponse { accepted: true, node_id: self.config.id.clone() },
			broadcasts,
		)
	}

	/// Counts a commit vote; at quorum for our pending block, executes it
	pub fn commit(&mut self, req: CommitRequest) -> (CommitResponse, Vec<Broadcast>) {
		if req.view_number != self.view_number || req.sequence_number != self.sequence_number {
			return (
				CommitResponse { accepted: false, node_id: self.config.id.clone() },
				vec![],
			);
		}

		let senders = self
			.commit_log
			.entry((req.sequence_number, req.block_hash.clone()))
			.or_insert_with(HashSet::new);
		senders.insert(req.node_id.clone());
		let count = senders.len();

		debug!(id = %self.config.id, from = %req.node_id, count,
			quorum = 2 * self.f + 1, "commit received");

		if count >= self.quorum() {
			let executable = match self.pending_block {
				Some(ref block) => block.block_hash == req.block_hash,
				None => false,
			};

			if executable {
				let block = self.pending_block.take().unwrap();
				self.execute_block(block);
			}
		}

		(CommitResponse { accepted: true, node_id: self.config.id.clone() }, vec![])
	}

	// ============================= Internals =============================

	/// Our own prepare vote for a block we just accepted (or proposed). A
	/// wrong_hash node votes for the all-zeros hash instead, which no honest
	/// node's pending block ever matches.
	fn own_prepare(&self, block: &Block) -> PrepareRequest {
		let block_hash = if self.wrong_hash_mode() {
			warn!(id = %self.config.id, "malicious: preparing the zero hash");
			ZERO_HASH.to_string()
		} else {
			block.block_hash.clone()
		};

		PrepareRequest {
			view_number: self.view_number,
			sequence_number: block.sequence_number,
			block_hash,
			node_id: self.config.id.clone(),
			signature: self.config.id.clone(),
		}
	}

	fn reject_pre_prepare(&self, reason: &str) -> PrePrepareResponse {
		PrePrepareResponse {
			accepted: false,
			node_id: self.config.id.clone(),
			reason: reason.to_string(),
		}
	}

	fn execute_block(&mut self, block: Block) {
		// Quorums overlap, so a second delivery of the same block is normal
		if self.chain.contains_hash(&block.block_hash) {
			return;
		}

		info!(id = %self.config.id, height = block.block_height,
			hash = %&block.block_hash[..8], data = %block.data, "block committed");

		self.chain.push(block);
	}
}
