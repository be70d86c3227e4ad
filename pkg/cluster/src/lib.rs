#[macro_use] extern crate error_chain;

pub mod errors {
	error_chain! {
		foreign_links {
			Io(::std::io::Error);
			Encode(::rmp_serde::encode::Error);
			Decode(::rmp_serde::decode::Error);
		}

		errors {
			CallTimeout(addr: String) {
				description("rpc call timed out")
				display("rpc call to {} timed out", addr)
			}
		}
	}
}

pub mod config;
pub mod rpc;
