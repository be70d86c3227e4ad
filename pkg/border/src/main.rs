use clap::{Arg, ArgAction, Command};
use border::errors::*;
use border::server::Node;
use cluster::config::ClusterConfig;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	let matches = Command::new("border-server")
		.about("Byzantine block-ordering node")
		.arg(Arg::new("id")
			.long("id")
			.required(true)
			.help("Node id, e.g. node1"))
		.arg(Arg::new("port")
			.long("port")
			.required(true)
			.value_parser(clap::value_parser!(u16))
			.help("Port to listen on"))
		.arg(Arg::new("peers")
			.long("peers")
			.num_args(1..)
			.required(true)
			.help("Every cluster address in node order, e.g. localhost:6001 localhost:6002"))
		.arg(Arg::new("primary")
			.long("primary")
			.action(ArgAction::SetTrue)
			.help("Run this node as the primary"))
		.get_matches();

	let id = matches.get_one::<String>("id").unwrap().clone();
	let port = *matches.get_one::<u16>("port").unwrap();
	let addrs: Vec<String> = matches.get_many::<String>("peers").unwrap().cloned().collect();
	let is_primary = matches.get_flag("primary");

	let config = ClusterConfig::from_addrs(&id, port, &addrs)
		.chain_err(|| "invalid cluster configuration")?;

	Node::new(config, is_primary).run().await
}
