use super::protos::*;

/// Reader/writer for the local replicated log. Only the consensus module may
/// mutate it. The implementation here is purely in-memory; a durable one would
/// flush in append() and truncate_suffix() before returning, which is the
/// reason this is a trait and not a bare Vec.
pub trait LogStorage: Send {
	/// Number of entries currently in the log
	fn len(&self) -> usize;

	/// Index of the last entry, or -1 when the log is empty
	fn last_index(&self) -> LogIndex;

	/// Term of the entry at the given index, if one exists
	fn term(&self, index: LogIndex) -> Option<Term>;

	fn entry(&self, index: LogIndex) -> Option<&LogEntry>;

	/// All entries at indices >= index, cloned for sending
	fn entries_from(&self, index: LogIndex) -> Vec<LogEntry>;

	fn append(&mut self, entry: LogEntry);

	/// Drops every entry at indices >= start. Callers must never truncate
	/// below the commit index.
	fn truncate_suffix(&mut self, start: LogIndex);
}

pub struct MemoryLog {
	entries: Vec<LogEntry>,
}

impl MemoryLog {
	pub fn new() -> MemoryLog {
		MemoryLog { entries: vec![] }
	}
}

impl Default for MemoryLog {
	fn default() -> Self {
		Self::new()
	}
}

impl LogStorage for MemoryLog {
	fn len(&self) -> usize {
		self.entries.len()
	}

	fn last_index(&self) -> LogIndex {
		self.entries.len() as LogIndex - 1
	}

	fn term(&self, index: LogIndex) -> Option<Term> {
		if index < 0 {
			return None;
		}

		self.entries.get(index as usize).map(|e| e.term)
	}

	fn entry(&self, index: LogIndex) -> Option<&LogEntry> {
		if index < 0 {
			return None;
		}

		self.entries.get(index as usize)
	}

	fn entries_from(&self, index: LogIndex) -> Vec<LogEntry> {
		let start = if index < 0 { 0 } else { index as usize };
		if start >= self.entries.len() {
			return vec![];
		}

		self.entries[start..].to_vec()
	}

	fn append(&mut self, entry: LogEntry) {
		self.entries.push(entry);
	}

	fn truncate_suffix(&mut self, start: LogIndex) {
		let start = if start < 0 { 0 } else { start as usize };
		self.entries.truncate(start);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(term: Term, key: &str) -> LogEntry {
		LogEntry { term, key: key.into(), value: "v".into() }
	}

	#[test]
	fn empty_log() {
		let log = MemoryLog::new();
		assert_eq!(log.len(), 0);
		assert_eq!(log.last_index(), -1);
		assert_eq!(log.term(-1), None);
		assert_eq!(log.term(0), None);
		assert!(log.entries_from(0).is_empty());
	}

	#[test]
	fn append_and_lookup() {
		let mut log = MemoryLog::new();
		log.append(entry(1, "a"));
		log.append(entry(1, "b"));
		log.append(entry(2, "c"));

		assert_eq!(log.last_index(), 2);
		assert_eq!(log.term(0), Some(1));
		assert_eq!(log.term(2), Some(2));
		assert_eq!(log.entry(1).unwrap().key, "b");

		let tail = log.entries_from(1);
		assert_eq!(tail.len(), 2);
		assert_eq!(tail[0].key, "b");
	}

	#[test]
	fn truncate_drops_tail_only() {
		let mut log = MemoryLog::new();
		log.append(entry(1, "a"));
		log.append(entry(1, "b"));
		log.append(entry(2, "c"));

		log.truncate_suffix(1);
		assert_eq!(log.len(), 1);
		assert_eq!(log.entry(0).unwrap().key, "a");
		assert_eq!(log.term(1), None);
	}
}
