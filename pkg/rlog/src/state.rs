use super::protos::*;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

pub enum ServerState {
	Follower,
	Candidate(ServerCandidateState),
	Leader(ServerLeaderState),
}

pub struct ServerCandidateState {
	/// When we started this election attempt
	pub election_start: Instant,

	/// How long we wait on this attempt before starting a fresh one
	pub election_timeout: Duration,

	/// Everyone who granted us a vote in this term, ourselves included
	pub votes_received: HashSet<NodeId>,
}

pub struct ServerLeaderState {
	pub servers: HashMap<NodeId, ServerProgress>,
}

/// Replication bookkeeping a leader holds for one peer. Reset every time a
/// node wins an election.
pub struct ServerProgress {
	/// Index of the next entry to send to this peer
	pub next_index: LogIndex,

	/// Highest index known to be replicated on this peer, -1 when unknown
	pub match_index: LogIndex,
}

impl ServerProgress {
	pub fn new(last_log_index: LogIndex) -> ServerProgress {
		ServerProgress {
			next_index: last_log_index + 1,
			match_index: -1,
		}
	}
}
