use super::errors::*;

use std::collections::HashMap;

/// Type used to identify each node in a cluster. Ids are assigned positionally
/// from the startup address list ("node1", "node2", ...) and every node must be
/// given the same list in the same order.
pub type NodeId = String;

/// Produces the id of the i'th address in the startup list (1-based)
pub fn node_name(index: usize) -> NodeId {
	format!("node{}", index)
}

/// Fixed membership of a single cluster as known to one node. There is no
/// reconfiguration; this is parsed once from the command line and then only read.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
	/// Id of the node we are running as
	pub id: NodeId,

	/// Port this node's listener binds
	pub listen_port: u16,

	/// Every other node in the cluster, id -> "host:port". Self is excluded.
	pub peers: HashMap<NodeId, String>,
}

impl ClusterConfig {
	/// Builds a config from the full cluster address list. The entry whose
	/// generated name equals `id` is ours and is dropped from the peer set.
	pub fn from_addrs(id: &str, listen_port: u16, addrs: &[String]) -> Result<ClusterConfig> {
		let mut peers = HashMap::new();
		let mut found_self = false;

		for (i, addr) in addrs.iter().enumerate() {
			let name = node_name(i + 1);
			if name == id {
				found_self = true;
			}
			else {
				peers.insert(name, addr.clone());
			}
		}

		// A node that isn't in its own membership list is misconfigured and
		// would otherwise wait forever for a quorum that can't include it.
		if !addrs.is_empty() && !found_self {
			return Err(format!(
				"node id '{}' does not name any of the {} configured addresses", id, addrs.len()
			).into());
		}

		Ok(ClusterConfig {
			id: id.to_string(),
			listen_port,
			peers,
		})
	}

	/// Total number of nodes in the cluster including ourselves
	pub fn cluster_size(&self) -> usize {
		self.peers.len() + 1
	}

	pub fn peer_addr(&self, id: &str) -> Option<&String> {
		self.peers.get(id)
	}
}
