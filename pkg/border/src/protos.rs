use serde::{Deserialize, Serialize};

pub use cluster::config::NodeId;

/// One element of the hash-linked chain. The hash binds (data, previous_hash,
/// height); view and sequence describe the consensus slot it was ordered in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
	pub block_height: u64,
	pub previous_hash: String,
	pub block_hash: String,
	pub timestamp: u64,
	pub data: String,
	pub view_number: u64,
	pub sequence_number: u64,
}

/// The fault-injection modes a node can be switched into. Only `silent` and
/// `wrong_hash` change behavior; the other two names are accepted but
/// currently act honest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaliciousType {
	Silent,
	WrongHash,
	DoubleSend,
	Random,
}

impl MaliciousType {
	pub fn parse(name: &str) -> Option<MaliciousType> {
		match name {
			"silent" => Some(MaliciousType::Silent),
			"wrong_hash" => Some(MaliciousType::WrongHash),
			"double_send" => Some(MaliciousType::DoubleSend),
			"random" => Some(MaliciousType::Random),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			MaliciousType::Silent => "silent",
			MaliciousType::WrongHash => "wrong_hash",
			MaliciousType::DoubleSend => "double_send",
			MaliciousType::Random => "random",
		}
	}
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PrePrepareRequest {
	pub view_number: u64,
	pub sequence_number: u64,
	pub block: Block,
	pub primary_id: NodeId,

	/// Placeholder for a real signature; carries the bare node id
	pub signature: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PrePrepareResponse {
	pub accepted: bool,
	pub node_id: NodeId,
	pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PrepareRequest {
	pub view_number: u64,
	pub sequence_number: u64,
	pub block_hash: String,
	pub node_id: NodeId,
	pub signature: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PrepareResponse {
	pub accepted: bool,
	pub node_id: NodeId,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CommitRequest {
	pub view_number: u64,
	pub sequence_number: u64,
	pub block_hash: String,
	pub node_id: NodeId,
	pub signature: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CommitResponse {
	pub accepted: bool,
	pub node_id: NodeId,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientSubmitBlockRequest {
	pub data: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientSubmitBlockResponse {
	pub success: bool,
	pub message: String,

	/// Height the block will land at, or -1 when rejected
	pub block_height: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetBlockchainRequest {}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetBlockchainResponse {
	pub blocks: Vec<Block>,
	pub chain_length: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetNodeStatusRequest {}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetNodeStatusResponse {
	pub node_id: NodeId,
	pub is_primary: bool,
	pub view_number: u64,
	pub current_sequence: u64,
	pub blockchain_height: u64,
	pub is_malicious: bool,
	pub malicious_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetMaliciousBehaviorRequest {
	pub enable_malicious: bool,
	pub malicious_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetMaliciousBehaviorResponse {
	pub success: bool,
	pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RpcRequest {
	PrePrepare(PrePrepareRequest),
	Prepare(PrepareRequest),
	Commit(CommitRequest),
	ClientSubmitBlock(ClientSubmitBlockRequest),
	GetBlockchain(GetBlockchainRequest),
	GetNodeStatus(GetNodeStatusRequest),
	SetMaliciousBehavior(SetMaliciousBehaviorRequest),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RpcResponse {
	PrePrepare(PrePrepareResponse),
	Prepare(PrepareResponse),
	Commit(CommitResponse),
	ClientSubmitBlock(ClientSubmitBlockResponse),
	GetBlockchain(GetBlockchainResponse),
	GetNodeStatus(GetNodeStatusResponse),
	SetMaliciousBehavior(SetMaliciousBehaviorResponse),
}

/// A phase transition the consensus module wants fanned out to the cluster.
/// Pre-prepares go to peers only; prepares and commits are also posted back to
/// the local node through the normal inbound entry point, never by recursing
/// into the handler while its state is borrowed.
pub enum Broadcast {
	PrePrepare(PrePrepareRequest),
	Prepare(PrepareRequest),
	Commit(CommitRequest),
}
