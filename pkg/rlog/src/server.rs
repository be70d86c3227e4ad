use super::consensus::*;
use super::errors::*;
use super::protos::*;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cluster::config::ClusterConfig;
use cluster::rpc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, info, warn};

/// How often the election timer is checked
const ELECTION_POLL_PERIOD: Duration = Duration::from_millis(100);

/// How often a leader replicates to its followers
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

const CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// One running rlog node: the consensus module behind its lock, the listener,
/// and the two timer loops. The lock is only ever held for a single module
/// call; all network I/O happens with it released.
pub struct Node {
	shared: Arc<NodeShared>,
}

struct NodeShared {
	config: ClusterConfig,
	module: Mutex<ConsensusModule>,
}

impl Node {
	pub fn new(config: ClusterConfig) -> Node {
		let module = ConsensusModule::new(config.clone(), Instant::now());

		Node {
			shared: Arc::new(NodeShared {
				config,
				module: Mutex::new(module),
			}),
		}
	}

	/// Serves until the listener fails. Binding the port is the only fatal
	/// error a node can hit.
	pub async fn run(self) -> Result<()> {
		info!(id = %self.shared.config.id, port = self.shared.config.listen_port,
			peers = self.shared.config.peers.len(), "rlog node starting");

		let shared = self.shared.clone();
		tokio::spawn(async move {
			election_loop(shared).await;
		});

		let shared = self.shared.clone();
		tokio::spawn(async move {
			heartbeat_loop(shared).await;
		});

		let port = self.shared.config.listen_port;
		rpc::serve(port, Arc::new(NodeService { shared: self.shared })).await?;
		Ok(())
	}
}

struct NodeService {
	shared: Arc<NodeShared>,
}

impl rpc::Service for NodeService {
	type Request = RpcRequest;
	type Response = RpcResponse;

	fn handle(&self, req: RpcRequest) -> RpcResponse {
		match req {
			RpcRequest::RequestVote(req) => {
				let resp = self.shared.module.lock().unwrap().request_vote(req, Instant::now());
				RpcResponse::RequestVote(resp)
			}

			RpcRequest::AppendEntries(req) => {
				let resp = self.shared.module.lock().unwrap().append_entries(req, Instant::now());
				RpcResponse::AppendEntries(resp)
			}

			RpcRequest::ClientSet(req) => {
				let (resp, messages) = self.shared.module.lock().unwrap()
					.client_set(req.key, req.value);

				// Push the new entry out right away; the heartbeat loop is
				// only the retry path.
				if !messages.is_empty() {
					let shared = self.shared.clone();
					tokio::spawn(async move {
						dispatch(&shared, messages).await;
					});
				}

				RpcResponse::ClientSet(resp)
			}

			RpcRequest::ClientGet(req) => {
				let result = self.shared.module.lock().unwrap().client_get(&req.key);

				match result {
					Ok(resp) => RpcResponse::ClientGet(resp),
					Err(ClientError::NotLeader { leader_hint }) => {
						RpcResponse::FailedPrecondition {
							message: match leader_hint {
								Some(id) => format!("not leader; try {}", id),
								None => "not leader".to_string(),
							},
						}
					}
				}
			}

			RpcRequest::GetLeader(_) => {
				RpcResponse::GetLeader(self.shared.module.lock().unwrap().get_leader())
			}

			RpcRequest::SetPartition(req) => {
				let resp = self.shared.module.lock().unwrap()
					.set_partition(req.blocked_addresses);
				RpcResponse::SetPartition(resp)
			}
		}
	}
}

async fn election_loop(shared: Arc<NodeShared>) {
	loop {
		tokio::time::sleep(ELECTION_POLL_PERIOD).await;

		let messages = shared.module.lock().unwrap().tick_election(Instant::now());
		dispatch(&shared, messages).await;
	}
}

async fn heartbeat_loop(shared: Arc<NodeShared>) {
	loop {
		tokio::time::sleep(HEARTBEAT_PERIOD).await;

		let messages = shared.module.lock().unwrap().heartbeat_tick();
		dispatch(&shared, messages).await;
	}
}

/// Delivers a batch of module messages to their targets concurrently and
/// feeds the replies back in. Keeps going while callbacks produce follow-up
/// messages, e.g. the first heartbeats of a freshly won election.
async fn dispatch(shared: &Arc<NodeShared>, mut pending: Vec<Message>) {
	while !pending.is_empty() {
		let mut calls: Vec<BoxFuture<'static, Vec<Message>>> = vec![];

		for msg in pending.drain(..) {
			match msg.body {
				MessageBody::RequestVote(req) => {
					for to in msg.to {
						calls.push(send_request_vote(shared.clone(), to, req.clone()).boxed());
					}
				}
				MessageBody::AppendEntries(req, last_index) => {
					for to in msg.to {
						calls.push(
							send_append_entries(shared.clone(), to, req.clone(), last_index).boxed(),
						);
					}
				}
			}
		}

		let results = join_all(calls).await;
		pending = results.into_iter().flatten().collect();
	}
}

async fn send_request_vote(shared: Arc<NodeShared>, to: NodeId, req: RequestVoteRequest) -> Vec<Message> {
	let addr = match shared.config.peer_addr(&to) {
		Some(a) => a.clone(),
		None => return vec![],
	};

	match rpc::call::<RpcRequest, RpcResponse>(&addr, &RpcRequest::RequestVote(req), CALL_TIMEOUT).await {
		Ok(RpcResponse::RequestVote(resp)) => {
			shared.module.lock().unwrap().request_vote_callback(to, resp)
		}
		Ok(_) => {
			warn!(peer = %to, "unexpected response to a vote request");
			vec![]
		}
		Err(e) => {
			// Unreachable candidates simply don't contribute a vote
			debug!(peer = %to, error = %e, "vote request failed");
			vec![]
		}
	}
}

async fn send_append_entries(
	shared: Arc<NodeShared>, to: NodeId, req: AppendEntriesRequest, last_index: LogIndex,
) -> Vec<Message> {
	let addr = match shared.config.peer_addr(&to) {
		Some(a) => a.clone(),
		None => return vec![],
	};

	match rpc::call::<RpcRequest, RpcResponse>(&addr, &RpcRequest::AppendEntries(req), CALL_TIMEOUT).await {
		Ok(RpcResponse::AppendEntries(resp)) => {
			shared.module.lock().unwrap().append_entries_callback(to, last_index, resp);
		}
		Ok(_) => warn!(peer = %to, "unexpected response to append entries"),
		Err(e) => {
			debug!(peer = %to, error = %e, "append entries failed");
			shared.module.lock().unwrap().append_entries_noresponse(&to);
		}
	}

	vec![]
}
