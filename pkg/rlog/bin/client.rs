use std::io::{self, BufRead, Write};
use std::time::Duration;

use clap::{Arg, Command};
use cluster::rpc;
use rlog::errors::*;
use rlog::protos::*;

const CALL_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
	let matches = Command::new("rlog-client")
		.about("Interactive client for an rlog cluster")
		.arg(Arg::new("nodes")
			.long("nodes")
			.num_args(1..)
			.required(true)
			.help("Addresses of every node, e.g. localhost:5001 localhost:5002"))
		.get_matches();

	let nodes: Vec<String> = matches.get_many::<String>("nodes").unwrap().cloned().collect();

	let runtime = tokio::runtime::Runtime::new().chain_err(|| "failed to start runtime")?;

	print_help();

	let stdin = io::stdin();
	loop {
		print!("> ");
		io::stdout().flush().ok();

		let mut line = String::new();
		if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
			break;
		}

		let parts: Vec<&str> = line.split_whitespace().collect();
		if parts.is_empty() {
			continue;
		}

		match parts[0] {
			"exit" => break,
			"help" => print_help(),
			"getleader" => runtime.block_on(cmd_get_leader(&nodes)),
			"set" if parts.len() == 3 => runtime.block_on(cmd_set(&nodes, parts[1], parts[2])),
			"get" if parts.len() == 2 => runtime.block_on(cmd_get(&nodes, parts[1])),
			"partition" if parts.len() >= 3 => {
				runtime.block_on(cmd_partition(&nodes, parts[1], &parts[2..]))
			}
			"clear_partition" if parts.len() == 2 => {
				runtime.block_on(cmd_partition(&nodes, parts[1], &[]))
			}
			_ => println!("unrecognized command; type 'help'"),
		}
	}

	Ok(())
}

fn print_help() {
	println!("commands:");
	println!("  getleader                                  ask every node who leads");
	println!("  set <key> <value>                          write through the leader");
	println!("  get <key>                                  read from the leader");
	println!("  partition <target_port> <blocked_port...>  block peers on one node");
	println!("  clear_partition <target_port>              unblock all peers on one node");
	println!("  exit");
}

async fn call_node(addr: &str, req: RpcRequest) -> Result<RpcResponse> {
	Ok(rpc::call(addr, &req, CALL_TIMEOUT).await?)
}

/// Probes every node and returns the address of the first self-declared leader
async fn find_leader(nodes: &[String]) -> Option<String> {
	for addr in nodes {
		if let Ok(RpcResponse::GetLeader(resp)) =
			call_node(addr, RpcRequest::GetLeader(GetLeaderRequest {})).await
		{
			if resp.is_leader {
				return Some(addr.clone());
			}
		}
	}

	None
}

async fn cmd_get_leader(nodes: &[String]) {
	for addr in nodes {
		match call_node(addr, RpcRequest::GetLeader(GetLeaderRequest {})).await {
			Ok(RpcResponse::GetLeader(resp)) => {
				println!("{}: is_leader={} leader_id={}", addr, resp.is_leader, resp.leader_id);
			}
			Ok(_) => println!("{}: unexpected response", addr),
			Err(e) => println!("{}: unreachable ({})", addr, e),
		}
	}
}

async fn cmd_set(nodes: &[String], key: &str, value: &str) {
	let leader = match find_leader(nodes).await {
		Some(addr) => addr,
		None => {
			println!("no leader found");
			return;
		}
	};

	let req = RpcRequest::ClientSet(ClientSetRequest { key: key.into(), value: value.into() });
	match call_node(&leader, req).await {
		Ok(RpcResponse::ClientSet(resp)) if resp.success => println!("OK (via {})", leader),
		Ok(_) => println!("rejected; leadership may have just moved"),
		Err(e) => println!("set failed: {}", e),
	}
}

async fn cmd_get(nodes: &[String], key: &str) {
	let leader = match find_leader(nodes).await {
		Some(addr) => addr,
		None => {
			println!("no leader found");
			return;
		}
	};

	match call_node(&leader, RpcRequest::ClientGet(ClientGetRequest { key: key.into() })).await {
		Ok(RpcResponse::ClientGet(resp)) => {
			if resp.found {
				println!("{} = {}", key, resp.value);
			} else {
				println!("{} not found", key);
			}
		}
		Ok(RpcResponse::FailedPrecondition { message }) => println!("rejected: {}", message),
		Ok(_) => println!("unexpected response"),
		Err(e) => println!("get failed: {}", e),
	}
}

fn addr_with_port<'a>(nodes: &'a [String], port: &str) -> Option<&'a String> {
	let suffix = format!(":{}", port);
	nodes.iter().find(|addr| addr.ends_with(&suffix))
}

async fn cmd_partition(nodes: &[String], target_port: &str, blocked_ports: &[&str]) {
	let target = match addr_with_port(nodes, target_port) {
		Some(addr) => addr.clone(),
		None => {
			println!("no node listens on port {}", target_port);
			return;
		}
	};

	let mut blocked = vec![];
	for port in blocked_ports {
		match addr_with_port(nodes, port) {
			Some(addr) => blocked.push(addr.clone()),
			None => {
				println!("no node listens on port {}", port);
				return;
			}
		}
	}

	let req = RpcRequest::SetPartition(SetPartitionRequest { blocked_addresses: blocked });
	match call_node(&target, req).await {
		Ok(RpcResponse::SetPartition(resp)) if resp.success => {
			println!("partition updated on {}", target)
		}
		Ok(_) => println!("partition rejected"),
		Err(e) => println!("partition failed: {}", e),
	}
}
