use serde::{Deserialize, Serialize};

pub use cluster::config::NodeId;

pub type Term = u64;

/// Index into the replicated log. Signed because -1 ("nothing yet") is a legal
/// value for commit_index, last_applied, prev_log_index and match_index, and
/// travels over the wire as such.
pub type LogIndex = i64;

/// One replicated command. Entries are appended by the leader of `term` and
/// are never re-ordered; a follower may only drop them from the tail while
/// reconciling, and only before they are committed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
	pub term: Term,
	pub key: String,
	pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestVoteRequest {
	pub term: Term,
	pub candidate_id: NodeId,
	pub last_log_index: LogIndex,
	pub last_log_term: Term,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestVoteResponse {
	pub term: Term,
	pub vote_granted: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppendEntriesRequest {
	pub term: Term,
	pub leader_id: NodeId,
	pub prev_log_index: LogIndex,
	pub prev_log_term: Term,
	pub entries: Vec<LogEntry>,
	pub leader_commit: LogIndex,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppendEntriesResponse {
	pub term: Term,
	pub success: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientSetRequest {
	pub key: String,
	pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientSetResponse {
	pub success: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientGetRequest {
	pub key: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientGetResponse {
	pub found: bool,
	pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetLeaderRequest {}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetLeaderResponse {
	pub is_leader: bool,
	pub leader_id: NodeId,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetPartitionRequest {
	pub blocked_addresses: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetPartitionResponse {
	pub success: bool,
}

/// Everything a node or client may send to a node, as one wire enum.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RpcRequest {
	RequestVote(RequestVoteRequest),
	AppendEntries(AppendEntriesRequest),
	ClientSet(ClientSetRequest),
	ClientGet(ClientGetRequest),
	GetLeader(GetLeaderRequest),
	SetPartition(SetPartitionRequest),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RpcResponse {
	RequestVote(RequestVoteResponse),
	AppendEntries(AppendEntriesResponse),
	ClientSet(ClientSetResponse),
	ClientGet(ClientGetResponse),
	GetLeader(GetLeaderResponse),
	SetPartition(SetPartitionResponse),

	/// Rejection carrying a redirect cue, e.g. a ClientGet sent to a non-leader.
	FailedPrecondition { message: String },
}

pub enum MessageBody {
	RequestVote(RequestVoteRequest),

	/// The index is the last log index covered by the request, which the
	/// sender needs back when interpreting a success response.
	AppendEntries(AppendEntriesRequest, LogIndex),
}

/// An outbound request produced by the consensus module for the node's fan-out
/// workers to deliver. Targets already exclude blocked peers.
pub struct Message {
	pub to: Vec<NodeId>,
	pub body: MessageBody,
}
