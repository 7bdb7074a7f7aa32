//! CovenantSQL proof-of-work miner
//!
//! Searches for a `Uint256` nonce whose SHA-256 over `data || nonce` carries
//! at least `difficulty` leading zero bits. Used both for deriving node
//! identities and for generating database ids.
//!
//! Workers partition the nonce space by stride: worker `w` probes
//! `start + w, start + w + workers, ...`. Candidates stream on the returned
//! channel until the caller signals stop; callers must stop after taking a
//! result so workers are released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::debug;

use cql_core::{Hash, Uint256};

/// An accepted proof-of-work candidate
#[derive(Debug, Clone)]
pub struct NonceInfo {
    pub nonce: Uint256,
    pub difficulty: usize,
    pub hash: Hash,
}

/// Handle over a running nonce search. Dropping without `stop()` leaves
/// workers running until their send fails, so always stop explicitly.
pub struct MinerHandle {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl MinerHandle {
    /// Signal all workers to stop and wait for them to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn advance(nonce: &mut Uint256, by: u64) {
    for _ in 0..by {
        nonce.inc();
    }
}

/// Start a streaming nonce search over `data`.
///
/// Returns the candidate channel and the stop handle. The first candidate to
/// reach the channel wins; later candidates from other workers may still
/// arrive until stop is signalled.
pub fn compute_block_nonce(
    data: Vec<u8>,
    start: Uint256,
    difficulty: usize,
    workers: u64,
) -> (Receiver<NonceInfo>, MinerHandle) {
    let workers = workers.max(1);
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let mut handles = Vec::with_capacity(workers as usize);
    for w in 0..workers {
        let data = data.clone();
        let stop = stop.clone();
        let tx = tx.clone();
        let mut nonce = start;
        advance(&mut nonce, w);

        handles.push(std::thread::spawn(move || {
            let mut input = data;
            let data_len = input.len();
            input.extend_from_slice(&[0u8; 32]);

            while !stop.load(Ordering::Relaxed) {
                input[data_len..].copy_from_slice(&nonce.to_bytes());
                let hash = Hash::compute(&input);

                if hash.leading_zero_bits() >= difficulty {
                    debug!(worker = w, difficulty, "nonce accepted");
                    let accepted = NonceInfo {
                        nonce,
                        difficulty,
                        hash,
                    };
                    if tx.send(accepted).is_err() {
                        // receiver gone, nothing left to report to
                        return;
                    }
                }

                advance(&mut nonce, workers);
            }
        }));
    }

    (
        rx,
        MinerHandle {
            stop,
            workers: handles,
        },
    )
}

/// Run a search, take the first accepted candidate and release the workers.
pub fn mine_once(data: Vec<u8>, start: Uint256, difficulty: usize, workers: u64) -> NonceInfo {
    let (rx, handle) = compute_block_nonce(data, start, difficulty, workers);
    let accepted = rx.recv().expect("miner workers exited without a candidate");
    handle.stop();
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use cql_core::derive_node_id;

    #[test]
    fn test_mined_nonce_meets_difficulty() {
        let data = vec![1u8, 2, 3];
        let info = mine_once(data.clone(), Uint256::default(), 8, 2);

        assert!(info.hash.leading_zero_bits() >= 8);

        // recomputing over data || nonce reproduces the hash
        let mut input = data;
        input.extend_from_slice(&info.nonce.to_bytes());
        assert_eq!(Hash::compute(&input), info.hash);
    }

    #[test]
    fn test_zero_difficulty_accepts_immediately() {
        let info = mine_once(vec![9u8; 32], Uint256::default(), 0, 1);
        assert_eq!(info.difficulty, 0);
    }

    #[test]
    fn test_search_resumes_from_start_nonce() {
        let data = vec![7u8; 16];
        let first = mine_once(data.clone(), Uint256::default(), 4, 1);

        let mut next_start = first.nonce;
        next_start.inc();
        let second = mine_once(data, next_start, 4, 1);

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.hash, second.hash);
    }

    #[test]
    fn test_identity_mining_matches_verifier() {
        let public_key = [3u8; 32];
        let info = mine_once(public_key.to_vec(), Uint256::default(), 8, 2);
        assert_eq!(derive_node_id(&public_key, &info.nonce), info.hash);
    }

    #[test]
    fn test_stop_releases_workers() {
        // high difficulty so no candidate is found before stop
        let (rx, handle) = compute_block_nonce(vec![1u8], Uint256::default(), 200, 2);
        handle.stop();
        // channel ends once workers exit
        assert!(rx.recv().is_err());
    }
}
