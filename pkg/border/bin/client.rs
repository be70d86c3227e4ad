use std::io::{self, BufRead, Write};
use std::time::Duration;

use border::errors::*;
use border::protos::*;
use clap::{Arg, Command};
use cluster::rpc;

const CALL_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
	let matches = Command::new("border-client")
		.about("Interactive client for a border cluster")
		.arg(Arg::new("nodes")
			.long("nodes")
			.num_args(1..)
			.required(true)
			.help("Addresses of every node, e.g. localhost:6001 localhost:6002"))
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
			"primary" => runtime.block_on(cmd_primary(&nodes)),
			"status" => runtime.block_on(cmd_status(&nodes)),
			"submit" if parts.len() >= 2 => {
				runtime.block_on(cmd_submit(&nodes, &parts[1..].join(" ")))
			}
			"blockchain" => {
				let which = parts.get(1).and_then(|s| s.parse::<usize>().ok());
				runtime.block_on(cmd_blockchain(&nodes, which))
			}
			"malicious" if parts.len() == 3 => {
				runtime.block_on(cmd_malicious(&nodes, parts[1], true, parts[2]))
			}
			"honest" if parts.len() == 2 => {
				runtime.block_on(cmd_malicious(&nodes, parts[1], false, ""))
			}
			_ => println!("unrecognized command; type 'help'"),
		}
	}

	Ok(())
}

fn print_help() {
	println!("commands:");
	println!("  primary                  find the primary node");
	println!("  submit <data>            submit a block through the primary");
	println!("  blockchain [node_num]    print one node's chain (default: node 1)");
	println!("  status                   print every node's status");
	println!("  malicious <n> <type>     make node n malicious (silent | wrong_hash)");
	println!("  honest <n>               restore node n to honest behavior");
	println!("  exit");
}

async fn call_node(addr: &str, req: RpcRequest) -> Result<RpcResponse> {
	Ok(rpc::call(addr, &req, CALL_TIMEOUT).await?)
}

fn node_addr<'a>(nodes: &'a [String], num: usize) -> Option<&'a String> {
	if num == 0 {
		return None;
	}
	nodes.get(num - 1)
}

async fn find_primary(nodes: &[String]) -> Option<String> {
	for addr in nodes {
		if let Ok(RpcResponse::GetNodeStatus(status)) =
			call_node(addr, RpcRequest::GetNodeStatus(GetNodeStatusRequest {})).await
		{
			if status.is_primary {
				return Some(addr.clone());
			}
		}
	}

	None
}

async fn cmd_primary(nodes: &[String]) {
	match find_primary(nodes).await {
		Some(addr) => println!("primary is at {}", addr),
		None => println!("no reachable primary"),
	}
}

async fn cmd_submit(nodes: &[String], data: &str) {
	let primary = match find_primary(nodes).await {
		Some(addr) => addr,
		None => {
			println!("no reachable primary");
			return;
		}
	};

	let req = RpcRequest::ClientSubmitBlock(ClientSubmitBlockRequest { data: data.to_string() });
	match call_node(&primary, req).await {
		Ok(RpcResponse::ClientSubmitBlock(resp)) => {
			if resp.success {
				println!("{} (block height {})", resp.message, resp.block_height);
				println!("poll 'blockchain' to watch it commit");
			} else {
				println!("rejected: {}", resp.message);
			}
		}
		Ok(_) => println!("unexpected response"),
		Err(e) => println!("submit failed: {}", e),
	}
}

async fn cmd_blockchain(nodes: &[String], which: Option<usize>) {
	let num = which.unwrap_or(1);
	let addr = match node_addr(nodes, num) {
		Some(addr) => addr,
		None => {
			println!("no node {}", num);
			return;
		}
	};

	match call_node(addr, RpcRequest::GetBlockchain(GetBlockchainRequest {})).await {
		Ok(RpcResponse::GetBlockchain(resp)) => {
			println!("node{} chain ({} blocks):", num, resp.chain_length);
			for block in &resp.blocks {
				println!(
					"  [{}] {}... data='{}' (seq={})",
					block.block_height,
					&block.block_hash[..16.min(block.block_hash.len())],
					block.data,
					block.sequence_number
				);
			}
		}
		Ok(_) => println!("unexpected response"),
		Err(e) => println!("blockchain query failed: {}", e),
	}
}

async fn cmd_status(nodes: &[String]) {
	for (i, addr) in nodes.iter().enumerate() {
		match call_node(addr, RpcRequest::GetNodeStatus(GetNodeStatusRequest {})).await {
			Ok(RpcResponse::GetNodeStatus(s)) => {
				println!(
					"node{} ({}): primary={} view={} seq={} height={} malicious={} ({})",
					i + 1, s.node_id, s.is_primary, s.view_number, s.current_sequence,
					s.blockchain_height, s.is_malicious, s.malicious_type
				);
			}
			Ok(_) => println!("node{} ({}): unexpected response", i + 1, addr),
			Err(e) => println!("node{} ({}): unreachable ({})", i + 1, addr, e),
		}
	}
}

async fn cmd_malicious(nodes: &[String], num: &str, enable: bool, kind: &str) {
	let num: usize = match num.parse() {
		Ok(n) => n,
		Err(_) => {
			println!("node number must be an integer");
			return;
		}
	};

	let addr = match node_addr(nodes, num) {
		Some(addr) => addr,
		None => {
			println!("no node {}", num);
			return;
		}
	};

	let req = RpcRequest::SetMaliciousBehavior(SetMaliciousBehaviorRequest {
		enable_malicious: enable,
		malicious_type: kind.to_string(),
	});

	match call_node(addr, req).await {
		Ok(RpcResponse::SetMaliciousBehavior(resp)) => println!("{}", resp.message),
		Ok(_) => println!("unexpected response"),
		Err(e) => println!("request failed: {}", e),
	}
}
