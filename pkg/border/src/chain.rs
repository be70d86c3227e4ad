use super::protos::Block;

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// The previous_hash of the genesis block and the hash a wrong_hash node
/// substitutes into its prepare messages.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash binding a block to its content and position: SHA-256 over the UTF-8
/// concatenation data || previous_hash || decimal(height), lowercase hex.
pub fn compute_hash(data: &str, previous_hash: &str, height: u64) -> String {
	let mut hasher = Sha256::new();
	hasher.update(data.as_bytes());
	hasher.update(previous_hash.as_bytes());
	hasher.update(height.to_string().as_bytes());
	hex::encode(hasher.finalize())
}

pub fn unix_timestamp() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// The committed chain of one node. Only block execution appends here; every
/// candidate goes through validate_next first.
pub struct BlockChain {
	blocks: Vec<Block>,
}

impl BlockChain {
	/// Starts a chain at the well-known genesis block, identical on every node
	pub fn new(genesis_timestamp: u64) -> BlockChain {
		let genesis = Block {
			block_height: 0,
			previous_hash: ZERO_HASH.to_string(),
			block_hash: compute_hash("genesis", ZERO_HASH, 0),
			timestamp: genesis_timestamp,
			data: "Genesis Block".to_string(),
			view_number: 0,
			sequence_number: 0,
		};

		BlockChain { blocks: vec![genesis] }
	}

	pub fn len(&self) -> usize {
		self.blocks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.blocks.is_empty()
	}

	/// Height of the chain tip
	pub fn height(&self) -> u64 {
		self.last().block_height
	}

	pub fn last(&self) -> &Block {
		// The genesis block guarantees this is never empty
		self.blocks.last().unwrap()
	}

	pub fn blocks(&self) -> &[Block] {
		&self.blocks
	}

	pub fn contains_hash(&self, block_hash: &str) -> bool {
		self.blocks.iter().any(|b| b.block_hash == block_hash)
	}

	/// Checks that a block is a well-formed successor of the current tip.
	/// Returns the rejection reason otherwise.
	pub fn validate_next(&self, block: &Block) -> std::result::Result<(), String> {
		let last = self.last();

		if block.block_height != last.block_height + 1 {
			return Err(format!(
				"Invalid height: expected {}, got {}",
				last.block_height + 1,
				block.block_height
			));
		}

		if block.previous_hash != last.block_hash {
			return Err("Invalid previous hash".to_string());
		}

		let expected = compute_hash(&block.data, &block.previous_hash, block.block_height);
		if block.block_hash != expected {
			return Err("Invalid block hash".to_string());
		}

		Ok(())
	}

	pub fn push(&mut self, block: Block) {
		self.blocks.push(block);
	}
}
