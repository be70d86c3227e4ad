use super::errors::*;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

// The wire format is a length-prefixed MessagePack frame per message. A call is
// one connection carrying exactly one request frame and one response frame; the
// caller closes the connection afterwards. Connections are never pooled or
// retried here: every retry policy lives in the protocol layer above.

pub fn marshal<T: Serialize>(value: &T) -> Result<Vec<u8>> {
	Ok(rmp_serde::to_vec(value)?)
}

pub fn unmarshal<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
	Ok(rmp_serde::from_slice(data)?)
}

/// Sends a single request to the given peer address and waits for its reply.
/// The timeout covers the entire exchange including the connect.
pub async fn call<Req, Resp>(addr: &str, req: &Req, timeout: Duration) -> Result<Resp>
	where Req: Serialize,
		  Resp: DeserializeOwned {

	let data = marshal(req)?;
	let addr = addr.to_string();
	let target = addr.clone();

	let exchange = async move {
		let stream = TcpStream::connect(target.as_str()).await?;
		let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

		framed.send(Bytes::from(data)).await?;

		match framed.next().await {
			Some(frame) => unmarshal(&frame?),
			None => Err("connection closed before reply".into()),
		}
	};

	let result = tokio::time::timeout(timeout, exchange).await;
	match result {
		Ok(res) => res,
		Err(_) => Err(ErrorKind::CallTimeout(addr).into()),
	}
}

/// Inbound dispatch implemented by each node. The handler runs on the
/// connection task and must not block on network I/O; anything long-running is
/// spawned by the implementation and the reply returned immediately.
pub trait Service: Send + Sync + 'static {
	type Request: DeserializeOwned + Send + 'static;
	type Response: Serialize + Send + 'static;

	fn handle(&self, req: Self::Request) -> Self::Response;
}

/// Accept loop for a node's listening socket. Failing to bind is the only
/// fatal error; per-connection failures are logged and dropped.
pub async fn serve<S: Service>(port: u16, service: Arc<S>) -> Result<()> {
	let listener = TcpListener::bind(("127.0.0.1", port)).await?;

	loop {
		let (stream, remote) = listener.accept().await?;
		let service = service.clone();

		tokio::spawn(async move {
			if let Err(e) = handle_connection(stream, service).await {
				debug!("connection from {} failed: {}", remote, e);
			}
		});
	}
}

async fn handle_connection<S: Service>(stream: TcpStream, service: Arc<S>) -> Result<()> {
	let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

	// Tolerates clients that pipeline several exchanges on one connection even
	// though the bundled client never does.
	while let Some(frame) = framed.next().await {
		let req: S::Request = unmarshal(&frame?)?;
		let resp = service.handle(req);
		framed.send(Bytes::from(marshal(&resp)?)).await?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde::Deserialize;

	#[derive(Serialize, Deserialize, Debug, PartialEq)]
	enum Ping {
		Hello { from: String, seq: u64 },
		Bye,
	}

	#[test]
	fn marshal_round_trip() {
		let msg = Ping::Hello { from: "node1".into(), seq: 42 };
		let data = marshal(&msg).unwrap();
		let back: Ping = unmarshal(&data).unwrap();
		assert_eq!(back, msg);

		let data = marshal(&Ping::Bye).unwrap();
		let back: Ping = unmarshal(&data).unwrap();
		assert_eq!(back, Ping::Bye);
	}

	#[test]
	fn unmarshal_rejects_garbage() {
		let res: Result<Ping> = unmarshal(&[0xc1, 0xff, 0x00]);
		assert!(res.is_err());
	}
}
