use clap::{Arg, Command};
use cluster::config::ClusterConfig;
use rlog::errors::*;
use rlog::server::Node;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	let matches = Command::new("rlog-server")
		.about("Replicated key/value store node")
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
			.help("Every cluster address in node order, e.g. localhost:5001 localhost:5002"))
		.get_matches();

	let id = matches.get_one::<String>("id").unwrap().clone();
	let port = *matches.get_one::<u16>("port").unwrap();
	let addrs: Vec<String> = matches.get_many::<String>("peers").unwrap().cloned().collect();

	let config = ClusterConfig::from_addrs(&id, port, &addrs)
		.chain_err(|| "invalid cluster configuration")?;

	Node::new(config).run().await
}
