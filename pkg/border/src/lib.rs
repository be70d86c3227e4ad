#[macro_use] extern crate error_chain;

pub mod errors {
	error_chain! {
		links {
			Cluster(::cluster::errors::Error, ::cluster::errors::ErrorKind);
		}
	}
}

pub mod protos;
pub mod chain;
pub mod consensus;
pub mod server;
