//! Journal of local transactions: an append-only on-disk log replayed at
//! startup so locally submitted transactions survive node restarts.
//!
//! The format is a sequence of records, each a 4 byte big-endian length prefix
//! followed by the RLP encoding of one transaction. Records that fail to
//! decode or that the pool rejects on replay are skipped individually; a
//! truncated trailing record only ends the replay of that file.

use crate::traits::PoolTransaction;
use alloy_primitives::Address;
use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, BufReader, Read, Write},
    marker::PhantomData,
    path::PathBuf,
    sync::Arc,
};
use tracing::{info, warn};

/// Records are replayed into the pool in batches of this many.
const LOAD_BATCH: usize = 1024;

/// Errors from journal I/O.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// No active journal to write to; the journal only accepts inserts after
    /// its first rotation.
    #[error("no active journal")]
    NoActiveJournal,
    /// An underlying file operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Rotating log of the local transactions the pool currently holds.
pub(crate) struct TxJournal<T> {
    path: PathBuf,
    writer: Option<File>,
    _marker: PhantomData<T>,
}

impl<T: PoolTransaction> TxJournal<T> {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), writer: None, _marker: PhantomData }
    }

    /// Parses the journal and replays each decodable record through `add`,
    /// which reports how many of the handed transactions the pool rejected.
    pub(crate) fn load<F>(&mut self, mut add: F) -> Result<(), JournalError>
    where
        F: FnMut(Vec<T>) -> usize,
    {
        // Skip the parsing if the journal file doesn't exist at all
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let mut reader = BufReader::new(file);

        let mut total = 0usize;
        let mut dropped = 0usize;
        let mut batch: Vec<T> = Vec::with_capacity(LOAD_BATCH);
        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            if let Err(err) = reader.read_exact(&mut payload) {
                warn!(target: "txpool::journal", %err, "Truncated journal record, ending replay");
                break
            }
            total += 1;
            match T::decode(&mut payload.as_slice()) {
                Ok(tx) => {
                    batch.push(tx);
                    if batch.len() >= LOAD_BATCH {
                        dropped += add(std::mem::take(&mut batch));
                    }
                }
                Err(err) => {
                    dropped += 1;
                    warn!(target: "txpool::journal", %err, "Failed to decode journaled transaction");
                }
            }
        }
        if !batch.is_empty() {
            dropped += add(batch);
        }
        info!(target: "txpool::journal", transactions = total, dropped, "Loaded local transaction journal");
        Ok(())
    }

    /// Appends the transaction to the active journal.
    pub(crate) fn insert(&mut self, tx: &T) -> Result<(), JournalError> {
        let writer = self.writer.as_mut().ok_or(JournalError::NoActiveJournal)?;
        writer.write_all(&encode_record(tx))?;
        Ok(())
    }

    /// Atomically rewrites the journal to contain exactly the given
    /// transactions, then resumes appending to the fresh file.
    pub(crate) fn rotate(&mut self, all: HashMap<Address, Vec<Arc<T>>>) -> Result<(), JournalError> {
        // Close the current journal (if any is open)
        self.writer = None;

        let mut replacement = self.path.clone().into_os_string();
        replacement.push(".new");
        let replacement = PathBuf::from(replacement);

        let mut file = File::create(&replacement)?;
        let mut journaled = 0usize;
        for txs in all.values() {
            for tx in txs {
                file.write_all(&encode_record(&**tx))?;
            }
            journaled += txs.len();
        }
        file.sync_all()?;
        drop(file);

        fs::rename(&replacement, &self.path)?;
        let sink = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = Some(sink);
        info!(target: "txpool::journal", transactions = journaled, accounts = all.len(), "Regenerated local transaction journal");
        Ok(())
    }

    /// Flushes the journal contents to disk and closes the file.
    pub(crate) fn close(&mut self) {
        self.writer = None;
    }
}

fn encode_record<T: PoolTransaction>(tx: &T) -> Vec<u8> {
    let mut payload = Vec::with_capacity(tx.size() + 4);
    payload.extend_from_slice(&[0u8; 4]);
    tx.encode(&mut payload);
    let len = (payload.len() - 4) as u32;
    payload[..4].copy_from_slice(&len.to_be_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransaction;

    fn journal_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("transactions.encoded")
    }

    #[test]
    fn insert_requires_rotation_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal: TxJournal<MockTransaction> = TxJournal::new(journal_path(&dir));
        let tx = MockTransaction::new(Address::random(), 0);
        assert!(matches!(journal.insert(&tx), Err(JournalError::NoActiveJournal)));
    }

    #[test]
    fn rotate_insert_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let sender = Address::random();

        let mut journal: TxJournal<MockTransaction> = TxJournal::new(&path);
        journal.load(|_| 0).unwrap();

        let seeded = Arc::new(MockTransaction::new(sender, 0));
        let mut all = HashMap::new();
        all.insert(sender, vec![seeded.clone()]);
        journal.rotate(all).unwrap();

        let appended = MockTransaction::new(sender, 1);
        journal.insert(&appended).unwrap();
        journal.close();

        let mut journal: TxJournal<MockTransaction> = TxJournal::new(&path);
        let mut replayed = Vec::new();
        journal
            .load(|txs| {
                replayed.extend(txs);
                0
            })
            .unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].hash(), seeded.hash());
        assert_eq!(replayed[1].hash(), appended.hash());
    }

    #[test]
    fn load_skips_undecodable_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);

        let good = MockTransaction::new(Address::random(), 3);
        let mut raw = Vec::new();
        raw.extend_from_slice(&encode_record(&good));
        // a record of garbage bytes with a valid length prefix
        raw.extend_from_slice(&5u32.to_be_bytes());
        raw.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x00]);
        // a truncated trailing record
        raw.extend_from_slice(&100u32.to_be_bytes());
        raw.extend_from_slice(&[0x01, 0x02]);
        fs::write(&path, raw).unwrap();

        let mut journal: TxJournal<MockTransaction> = TxJournal::new(&path);
        let mut replayed = Vec::new();
        journal
            .load(|txs| {
                replayed.extend(txs);
                0
            })
            .unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].hash(), good.hash());
    }

    #[test]
    fn rotate_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let sender = Address::random();

        let mut journal: TxJournal<MockTransaction> = TxJournal::new(&path);
        let mut all = HashMap::new();
        all.insert(
            sender,
            vec![Arc::new(MockTransaction::new(sender, 0)), Arc::new(MockTransaction::new(sender, 1))],
        );
        journal.rotate(all).unwrap();

        // second rotation with a single survivor
        let survivor = Arc::new(MockTransaction::new(sender, 1));
        let mut all = HashMap::new();
        all.insert(sender, vec![survivor.clone()]);
        journal.rotate(all).unwrap();

        let mut journal: TxJournal<MockTransaction> = TxJournal::new(&path);
        let mut replayed = Vec::new();
        journal
            .load(|txs| {
                replayed.extend(txs);
                0
            })
            .unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].hash(), survivor.hash());
    }
}
