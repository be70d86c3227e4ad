use super::consensus::*;
use super::errors::*;
use super::protos::*;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cluster::config::ClusterConfig;
use cluster::rpc;
use futures::future::join_all;
use tracing::{debug, info, warn};

/// Short pause before each fan-out; keeps interleaved node traces readable
/// without affecting the protocol.
const BROADCAST_DELAY: Duration = Duration::from_millis(100);

/// Pre-prepares carry whole blocks, so they get a little longer
const PRE_PREPARE_TIMEOUT: Duration = Duration::from_secs(2);
const PHASE_TIMEOUT: Duration = Duration::from_secs(1);

/// One running border node. Unlike rlog there are no timers: everything is
/// driven by inbound requests, and the only background work is the broadcast
/// worker a handler spawns for each phase transition.
pub struct Node {
	shared: Arc<NodeShared>,
}

struct NodeShared {
	config: ClusterConfig,
	module: Mutex<ConsensusModule>,
}

impl Node {
	pub fn new(config: ClusterConfig, is_primary: bool) -> Node {
		let module = ConsensusModule::new(config.clone(), is_primary);

		Node {
			shared: Arc::new(NodeShared {
				config,
				module: Mutex::new(module),
			}),
		}
	}

	pub async fn run(self) -> Result<()> {
		info!(id = %self.shared.config.id, port = self.shared.config.listen_port,
			peers = self.shared.config.peers.len(), "border node starting");

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
			RpcRequest::PrePrepare(req) => {
				let (resp, broadcasts) = self.shared.module.lock().unwrap().pre_prepare(req);
				spawn_broadcasts(&self.shared, broadcasts);
				RpcResponse::PrePrepare(resp)
			}

			RpcRequest::Prepare(req) => {
				let (resp, broadcasts) = self.shared.module.lock().unwrap().prepare(req);
				spawn_broadcasts(&self.shared, broadcasts);
				RpcResponse::Prepare(resp)
			}

			RpcRequest::Commit(req) => {
				let (resp, broadcasts) = self.shared.module.lock().unwrap().commit(req);
				spawn_broadcasts(&self.shared, broadcasts);
				RpcResponse::Commit(resp)
			}

			RpcRequest::ClientSubmitBlock(req) => {
				let (resp, broadcasts) =
					self.shared.module.lock().unwrap().client_submit(req.data);

				// The client hears back before consensus runs; it observes the
				// outcome by polling the chain.
				spawn_broadcasts(&self.shared, broadcasts);
				RpcResponse::ClientSubmitBlock(resp)
			}

			RpcRequest::GetBlockchain(_) => {
				RpcResponse::GetBlockchain(self.shared.module.lock().unwrap().get_blockchain())
			}

			RpcRequest::GetNodeStatus(_) => {
				RpcResponse::GetNodeStatus(self.shared.module.lock().unwrap().get_status())
			}

			RpcRequest::SetMaliciousBehavior(req) => {
				let resp = self.shared.module.lock().unwrap()
					.set_malicious(req.enable_malicious, &req.malicious_type);
				RpcResponse::SetMaliciousBehavior(resp)
			}
		}
	}
}

fn spawn_broadcasts(shared: &Arc<NodeShared>, broadcasts: Vec<Broadcast>) {
	if broadcasts.is_empty() {
		return;
	}

	let shared = shared.clone();
	tokio::spawn(async move {
		run_broadcasts(&shared, broadcasts).await;
	});
}

/// Performs each requested broadcast: best-effort fan-out to every peer, then
/// self-delivery through the same handler a peer would hit. Self-delivery can
/// request follow-up broadcasts (a prepare quorum producing our commit), which
/// are queued behind the current batch; the module's lock is never held across
/// any of the I/O.
async fn run_broadcasts(shared: &Arc<NodeShared>, mut pending: Vec<Broadcast>) {
	while !pending.is_empty() {
		let mut follow_ups = vec![];

		for broadcast in pending.drain(..) {
			tokio::time::sleep(BROADCAST_DELAY).await;

			match broadcast {
				// The proposer never re-delivers a pre-prepare to itself; its
				// own prepare vote is already queued behind this.
				Broadcast::PrePrepare(req) => {
					fan_out(shared, RpcRequest::PrePrepare(req), PRE_PREPARE_TIMEOUT).await;
				}

				Broadcast::Prepare(req) => {
					fan_out(shared, RpcRequest::Prepare(req.clone()), PHASE_TIMEOUT).await;

					let (_, next) = shared.module.lock().unwrap().prepare(req);
					follow_ups.extend(next);
				}

				Broadcast::Commit(req) => {
					fan_out(shared, RpcRequest::Commit(req.clone()), PHASE_TIMEOUT).await;

					let (_, next) = shared.module.lock().unwrap().commit(req);
					follow_ups.extend(next);
				}
			}
		}

		pending = follow_ups;
	}
}

/// Sends one request to every peer concurrently. Failures and rejections are
/// logged and otherwise ignored; quorum counting decides what mattered.
async fn fan_out(shared: &Arc<NodeShared>, req: RpcRequest, timeout: Duration) {
	let calls: Vec<_> = shared.config.peers.iter()
		.map(|(peer, addr)| {
			let req = req.clone();
			let peer = peer.clone();
			let addr = addr.clone();

			async move {
				match rpc::call::<RpcRequest, RpcResponse>(&addr, &req, timeout).await {
					Ok(RpcResponse::PrePrepare(resp)) => {
						if resp.accepted {
							debug!(peer = %peer, "pre-prepare accepted");
						} else {
							warn!(peer = %peer, reason = %resp.reason, "pre-prepare rejected");
						}
					}
					Ok(_) => {}
					Err(e) => debug!(peer = %peer, error = %e, "broadcast delivery failed"),
				}
			}
		})
		.collect();

	join_all(calls).await;
}
