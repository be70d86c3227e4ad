use super::log::*;
use super::protos::*;
use super::state::*;
use super::state_machine::*;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use cluster::config::ClusterConfig;
use rand::Rng;
use tracing::{debug, info};

/// A node with no word from a leader for a duration drawn uniformly from this
/// range of milliseconds starts an election. Redrawn on every idle check; the
/// upper bound staying at least twice the lower keeps two awakening followers
/// from splitting the vote forever.
const ELECTION_TIMEOUT: (u64, u64) = (5000, 10000);

/// Elections are suppressed this long after process start so that the whole
/// cluster has a chance to come up before the first term begins.
const STARTUP_GRACE: Duration = Duration::from_secs(10);

/// Client-visible failure for operations only the leader can serve. The hint
/// is our best guess at who the leader currently is.
#[derive(Debug)]
pub enum ClientError {
	NotLeader { leader_hint: Option<NodeId> },
}

/// The replicated-log state machine for a single node. All methods are plain
/// read-modify-write: the module never performs I/O and never blocks, so the
/// caller holds its lock only for the duration of one call. Requests that need
/// to go out to peers come back to the caller as `Message`s; replies from
/// peers are fed back in through the `*_callback` methods.
pub struct ConsensusModule {
	config: ClusterConfig,

	// Would be persistent if durability were wired up: term, vote and log
	// need to hit disk before replying to anyone.
	current_term: Term,
	voted_for: Option<NodeId>,
	log: Box<dyn LogStorage>,

	commit_index: LogIndex,
	last_applied: LogIndex,

	state: ServerState,

	/// Who we believe the leader is, learned from valid AppendEntries
	leader_id: Option<NodeId>,

	kv: MemoryKvStateMachine,

	/// Peer addresses currently simulated as unreachable, in both directions
	blocked_peers: HashSet<String>,

	/// Last valid contact from a leader, or last vote we granted
	last_heartbeat: Instant,

	started_at: Instant,
	heartbeat_count: u64,
}

impl ConsensusModule {
	pub fn new(config: ClusterConfig, now: Instant) -> ConsensusModule {
		ConsensusModule {
			config,
			current_term: 0,
			voted_for: None,
			log: Box::new(MemoryLog::new()),
			commit_index: -1,
			last_applied: -1,
			state: ServerState::Follower,
			leader_id: None,
			kv: MemoryKvStateMachine::new(),
			blocked_peers: HashSet::new(),
			last_heartbeat: now,
			started_at: now,
			heartbeat_count: 0,
		}
	}

	pub fn id(&self) -> &NodeId {
		&self.config.id
	}

	pub fn current_term(&self) -> Term {
		self.current_term
	}

	pub fn is_leader(&self) -> bool {
		matches!(self.state, ServerState::Leader(_))
	}

	pub fn commit_index(&self) -> LogIndex {
		self.commit_index
	}

	pub fn last_applied(&self) -> LogIndex {
		self.last_applied
	}

	pub fn log(&self) -> &dyn LogStorage {
		&*self.log
	}

	pub fn state_machine(&self) -> &MemoryKvStateMachine {
		&self.kv
	}

	// =========================== Election side ===========================

	/// Runs one idle check of the election timer. Returns vote requests to
	/// send if the timer expired and a new election began.
	pub fn tick_election(&mut self, now: Instant) -> Vec<Message> {
		if now.duration_since(self.started_at) < STARTUP_GRACE {
			return vec![];
		}

		let due = match self.state {
			ServerState::Leader(_) => false,
			ServerState::Follower => {
				now.duration_since(self.last_heartbeat) >= Self::new_election_timeout()
			}
			ServerState::Candidate(ref s) => {
				now.duration_since(s.election_start) >= s.election_timeout
			}
		};

		if !due {
			return vec![];
		}

		self.start_election(now)
	}

	fn start_election(&mut self, now: Instant) -> Vec<Message> {
		self.current_term += 1;
		self.voted_for = Some(self.config.id.clone());

		let mut votes = HashSet::new();
		votes.insert(self.config.id.clone());

		self.state = ServerState::Candidate(ServerCandidateState {
			election_start: now,
			election_timeout: Self::new_election_timeout(),
			votes_received: votes,
		});

		info!(id = %self.config.id, term = self.current_term, "starting election");

		let req = RequestVoteRequest {
			term: self.current_term,
			candidate_id: self.config.id.clone(),
			last_log_index: self.last_log_index(),
			last_log_term: self.last_log_term(),
		};

		let to: Vec<NodeId> = self.config.peers.iter()
			.filter(|(_, addr)| !self.blocked_peers.contains(*addr))
			.map(|(id, _)| id.clone())
			.collect();

		let mut messages = vec![];
		if !to.is_empty() {
			messages.push(Message { to, body: MessageBody::RequestVote(req) });
		}

		// A cluster of one needs no votes beyond its own
		messages.extend(self.maybe_become_leader());
		messages
	}

	/// Called when another node asks us to vote for it
	pub fn request_vote(&mut self, req: RequestVoteRequest, now: Instant) -> RequestVoteResponse {
		if self.is_blocked_peer(&req.candidate_id) {
			return RequestVoteResponse { term: self.current_term, vote_granted: false };
		}

		self.observe_term(req.term);

		if req.term < self.current_term {
			debug!(id = %self.config.id, candidate = %req.candidate_id,
				"denying vote: stale term");
			return RequestVoteResponse { term: self.current_term, vote_granted: false };
		}

		// A candidate whose log is behind ours could drop committed entries
		// if it won, so it doesn't get our vote.
		let up_to_date = req.last_log_term > self.last_log_term()
			|| (req.last_log_term == self.last_log_term()
				&& req.last_log_index >= self.last_log_index());

		let may_vote = match self.voted_for {
			Some(ref id) => *id == req.candidate_id,
			None => true,
		};

		if !up_to_date || !may_vote {
			debug!(id = %self.config.id, candidate = %req.candidate_id,
				up_to_date, "denying vote");
			return RequestVoteResponse { term: self.current_term, vote_granted: false };
		}

		self.voted_for = Some(req.candidate_id.clone());
		self.last_heartbeat = now;

		info!(id = %self.config.id, candidate = %req.candidate_id,
			term = self.current_term, "vote granted");

		RequestVoteResponse { term: self.current_term, vote_granted: true }
	}

	/// Feeds back one peer's answer to a vote request we sent. Returns the
	/// first round of heartbeats if this vote made us the leader.
	pub fn request_vote_callback(&mut self, from: NodeId, resp: RequestVoteResponse) -> Vec<Message> {
		if resp.term > self.current_term {
			self.observe_term(resp.term);
			return vec![];
		}

		if resp.term < self.current_term || !resp.vote_granted {
			return vec![];
		}

		if let ServerState::Candidate(ref mut s) = self.state {
			s.votes_received.insert(from);
		}
		else {
			return vec![];
		}

		self.maybe_become_leader()
	}

	fn maybe_become_leader(&mut self) -> Vec<Message> {
		let majority = self.majority();

		let won = match self.state {
			ServerState::Candidate(ref s) => s.votes_received.len() >= majority,
			_ => false,
		};

		if !won {
			return vec![];
		}

		let last_log_index = self.last_log_index();
		let servers = self.config.peers.keys()
			.map(|id| (id.clone(), ServerProgress::new(last_log_index)))
			.collect();

		self.state = ServerState::Leader(ServerLeaderState { servers });
		self.leader_id = Some(self.config.id.clone());

		info!(id = %self.config.id, term = self.current_term, "won election, now the leader");

		// Assert leadership right away instead of waiting out a full tick
		self.build_append_entries()
	}

	// ========================= Replication side ==========================

	/// One round of leader heartbeats. Produces an AppendEntries per
	/// reachable peer carrying whatever that peer still misses.
	pub fn heartbeat_tick(&mut self) -> Vec<Message> {
		if !self.is_leader() {
			return vec![];
		}

		self.heartbeat_count += 1;
		debug!(id = %self.config.id, n = self.heartbeat_count, "heartbeat");

		self.build_append_entries()
	}

	fn build_append_entries(&self) -> Vec<Message> {
		let state = match self.state {
			ServerState::Leader(ref s) => s,
			_ => return vec![],
		};

		let mut messages = vec![];

		for (peer, progress) in state.servers.iter() {
			let addr = match self.config.peer_addr(peer) {
				Some(a) => a,
				None => continue,
			};
			if self.blocked_peers.contains(addr) {
				continue;
			}

			let prev_log_index = progress.next_index - 1;
			let prev_log_term = if prev_log_index >= 0 {
				self.log.term(prev_log_index).unwrap_or(0)
			} else {
				0
			};

			let entries = self.log.entries_from(progress.next_index);
			let last_index = prev_log_index + entries.len() as LogIndex;

			let req = AppendEntriesRequest {
				term: self.current_term,
				leader_id: self.config.id.clone(),
				prev_log_index,
				prev_log_term,
				entries,
				leader_commit: self.commit_index,
			};

			messages.push(Message {
				to: vec![peer.clone()],
				body: MessageBody::AppendEntries(req, last_index),
			});
		}

		messages
	}

	/// Called when a leader (or something claiming to be one) replicates to us
	pub fn append_entries(&mut self, req: AppendEntriesRequest, now: Instant) -> AppendEntriesResponse {
		if self.is_blocked_peer(&req.leader_id) {
			return AppendEntriesResponse { term: self.current_term, success: false };
		}

		if req.term < self.current_term {
			return AppendEntriesResponse { term: self.current_term, success: false };
		}

		if req.term > self.current_term {
			self.current_term = req.term;
			self.voted_for = None;
		}

		// Whatever we were before, there is a live leader for this term now
		self.state = ServerState::Follower;
		self.leader_id = Some(req.leader_id.clone());
		self.last_heartbeat = now;

		if req.prev_log_index >= 0 {
			match self.log.term(req.prev_log_index) {
				Some(term) if term == req.prev_log_term => {}
				// Our log is too short or disagrees at the probe point; the
				// leader backs next_index up and retries next tick.
				_ => return AppendEntriesResponse { term: self.current_term, success: false },
			}
		}

		let mut index = req.prev_log_index + 1;
		for entry in req.entries.iter() {
			match self.log.term(index) {
				// Already present from an earlier delivery
				Some(term) if term == entry.term => {}

				// Conflicting uncommitted suffix loses to the leader's version
				Some(_) => {
					debug_assert!(index > self.commit_index);
					self.log.truncate_suffix(index);
					self.log.append(entry.clone());
				}

				None => self.log.append(entry.clone()),
			}
			index += 1;
		}

		if req.leader_commit > self.commit_index {
			self.commit_index = std::cmp::min(req.leader_commit, self.log.last_index());
			self.apply_committed();
		}

		AppendEntriesResponse { term: self.current_term, success: true }
	}

	/// Feeds back one peer's answer to an AppendEntries we sent as leader.
	/// `last_index` must be the last log index the request covered.
	pub fn append_entries_callback(&mut self, from: NodeId, last_index: LogIndex, resp: AppendEntriesResponse) {
		if resp.term > self.current_term {
			self.observe_term(resp.term);
			return;
		}

		if resp.term < self.current_term {
			return;
		}

		let replicated = match self.state {
			ServerState::Leader(ref mut s) => match s.servers.get_mut(&from) {
				Some(progress) => {
					if resp.success {
						if last_index > progress.match_index {
							progress.match_index = last_index;
							progress.next_index = last_index + 1;
						}
						true
					}
					else {
						// Walk backwards one entry per tick until the logs meet
						progress.next_index = std::cmp::max(0, progress.next_index - 1);
						false
					}
				}
				None => false,
			},
			_ => false,
		};

		if replicated {
			self.advance_commit_index();
		}
	}

	/// Called when a peer RPC produced no usable response. Nothing to record;
	/// the next heartbeat tick retries from the same next_index.
	pub fn append_entries_noresponse(&mut self, _from: &str) {}

	fn advance_commit_index(&mut self) {
		let majority = self.majority();

		let match_indexes: Vec<LogIndex> = match self.state {
			ServerState::Leader(ref s) => s.servers.values().map(|p| p.match_index).collect(),
			_ => return,
		};

		let mut i = self.log.last_index();
		while i > self.commit_index {
			let term = match self.log.term(i) {
				Some(t) => t,
				None => break,
			};

			// Terms in the log are monotone, so once we pass below the current
			// term there is nothing further down we are allowed to commit.
			if term < self.current_term {
				break;
			}

			// Count ourselves plus every peer known to hold index i
			let replicated = 1 + match_indexes.iter().filter(|m| **m >= i).count();

			if term == self.current_term && replicated >= majority {
				self.commit_index = i;
				info!(id = %self.config.id, index = i, "commit index advanced");
				self.apply_committed();
				break;
			}

			i -= 1;
		}
	}

	fn apply_committed(&mut self) {
		while self.last_applied < self.commit_index {
			self.last_applied += 1;

			let entry = match self.log.entry(self.last_applied) {
				Some(e) => e.clone(),
				None => break,
			};

			info!(id = %self.config.id, index = self.last_applied,
				key = %entry.key, value = %entry.value, "applied entry");
			self.kv.apply(&entry);
		}
	}

	// ============================ Client API =============================

	/// Appends a client command if we are the leader. The success reply means
	/// accepted-and-replicating; it becomes readable once applied.
	pub fn client_set(&mut self, key: String, value: String) -> (ClientSetResponse, Vec<Message>) {
		if !self.is_leader() {
			return (ClientSetResponse { success: false }, vec![]);
		}

		info!(id = %self.config.id, %key, %value, "client set accepted");

		self.log.append(LogEntry { term: self.current_term, key, value });

		// In a cluster of one there is nobody to wait for
		self.advance_commit_index();

		(ClientSetResponse { success: true }, self.build_append_entries())
	}

	pub fn client_get(&self, key: &str) -> std::result::Result<ClientGetResponse, ClientError> {
		if !self.is_leader() {
			return Err(ClientError::NotLeader { leader_hint: self.leader_id.clone() });
		}

		Ok(match self.kv.get(key) {
			Some(value) => ClientGetResponse { found: true, value: value.clone() },
			None => ClientGetResponse { found: false, value: String::new() },
		})
	}

	pub fn get_leader(&self) -> GetLeaderResponse {
		GetLeaderResponse {
			is_leader: self.is_leader(),
			leader_id: self.leader_id.clone().unwrap_or_else(|| self.config.id.clone()),
		}
	}

	/// Replaces the set of addresses this node pretends it cannot reach. The
	/// filter is symmetric locally but each side of a partition must be told
	/// separately.
	pub fn set_partition(&mut self, blocked_addresses: Vec<String>) -> SetPartitionResponse {
		info!(id = %self.config.id, blocked = ?blocked_addresses, "partition updated");
		self.blocked_peers = blocked_addresses.into_iter().collect();
		SetPartitionResponse { success: true }
	}

	// ============================= Internals =============================

	/// Run against every term seen in a request or response. A higher term
	/// than ours always demotes us.
	fn observe_term(&mut self, term: Term) {
		if term > self.current_term {
			if !matches!(self.state, ServerState::Follower) {
				info!(id = %self.config.id, term, "seen higher term, reverting to follower");
			}

			self.current_term = term;
			self.voted_for = None;
			self.state = ServerState::Follower;
		}
	}

	fn is_blocked_peer(&self, id: &str) -> bool {
		match self.config.peer_addr(id) {
			Some(addr) => self.blocked_peers.contains(addr),
			None => false,
		}
	}

	fn majority(&self) -> usize {
		self.config.cluster_size() / 2 + 1
	}

	fn last_log_index(&self) -> LogIndex {
		self.log.last_index()
	}

	fn last_log_term(&self) -> Term {
		let last = self.log.last_index();
		if last >= 0 {
			self.log.term(last).unwrap_or(0)
		} else {
			0
		}
	}

	fn new_election_timeout() -> Duration {
		let ms = rand::thread_rng().gen_range(ELECTION_TIMEOUT.0..=ELECTION_TIMEOUT.1);
		Duration::from_millis(ms)
	}
}
