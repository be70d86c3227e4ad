#[macro_use] extern crate error_chain;

pub mod errors {
	error_chain! {
		links {
			Cluster(::cluster::errors::Error, ::cluster::errors::ErrorKind);
		}
	}
}

pub mod protos;
pub mod log;
mod state;
pub mod state_machine;
pub mod consensus;
pub mod server;
