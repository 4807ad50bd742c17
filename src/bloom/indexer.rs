//! The background bloom-bits indexer.
//!
//! Indexing: every time a section of consecutive blocks is finalized, the
//! keeper hands the section's blooms over and a background task rotates
//! them into 2048 compressed per-bit rows keyed by
//! `(bit, section, section head hash)`. A section is processed at most once
//! concurrently, guarded by an in-progress flag; processing is idempotent,
//! so an abandoned run is simply retried.
//!
//! Retrieval: a fixed pool of workers drains a shared request channel,
//! resolving requested sections' rows by head-hash lookup and decompressing
//! them onto per-request response channels. A second, smaller pool
//! multiplexes filter-session sub-requests onto the shared channel,
//! coalescing them into batches for up to a configured wait.

use crate::{
    bloom::{
        bloom_bit_indexes, compress_bytes, decompress_bytes, BloomError, Generator,
        BLOOM_BIT_LENGTH,
    },
    keys,
    store::BloomStore,
};
use alloy::primitives::{Address, Bloom, B256};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex};

/// Default number of blocks per bloom-bits section.
pub const BLOOM_BITS_BLOCKS: u64 = 4096;
/// Default number of workers serving bloom-bits lookups.
pub const BLOOM_SERVICE_THREADS: usize = 16;
/// Default number of workers multiplexing filter-session requests.
pub const BLOOM_FILTER_THREADS: usize = 3;
/// Default maximum number of retrievals served in one batch.
pub const BLOOM_RETRIEVAL_BATCH: usize = 16;
/// Default wait for coalescing retrieval requests; zero dispatches
/// immediately.
pub const BLOOM_RETRIEVAL_WAIT: Duration = Duration::ZERO;

/// Bloom indexer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Blocks per section. Must be a multiple of 8.
    pub section_size: u64,
    /// Number of retrieval workers.
    pub service_threads: usize,
    /// Number of filter-session multiplexing workers.
    pub filter_threads: usize,
    /// Maximum sections per forwarded batch.
    pub retrieval_batch: usize,
    /// Wait for coalescing session requests into one batch.
    pub retrieval_wait: Duration,
    /// Pause between row-chunk writes while processing a section.
    pub throttling: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            section_size: BLOOM_BITS_BLOCKS,
            service_threads: BLOOM_SERVICE_THREADS,
            filter_threads: BLOOM_FILTER_THREADS,
            retrieval_batch: BLOOM_RETRIEVAL_BATCH,
            retrieval_wait: BLOOM_RETRIEVAL_WAIT,
            throttling: Duration::from_millis(100),
        }
    }
}

/// Errors from the indexer's retrieval path.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum IndexerError {
    /// The requested row is not indexed.
    #[error("bloom bits for bit {bit} in section {section} are not indexed")]
    Missing {
        /// The requested bit.
        bit: u32,
        /// The requested section.
        section: u64,
    },

    /// The section's head hash is not recorded.
    #[error("head hash for section {section} is not recorded")]
    MissingHead {
        /// The requested section.
        section: u64,
    },

    /// The requested bit index is out of range.
    #[error("bloom bit index {bit} out of bounds")]
    BitOutOfBounds {
        /// The offending bit.
        bit: u32,
    },

    /// The indexer was shut down.
    #[error("bloom indexer is closed")]
    Closed,

    /// Row decompression failed.
    #[error(transparent)]
    Bloom(#[from] BloomError),
}

/// One retrieval request: a bit and the sections to resolve it for.
#[derive(Debug)]
pub struct BitsRequest {
    /// The bloom bit to resolve.
    pub bit: u32,
    /// The sections to resolve it for.
    pub sections: Vec<u64>,
    /// Where the decompressed rows are delivered.
    pub resp: oneshot::Sender<Result<Vec<Vec<u8>>, IndexerError>>,
}

/// The background bloom-bits indexer.
#[derive(Debug)]
pub struct BloomIndexer {
    db: Arc<dyn BloomStore>,
    config: IndexerConfig,
    handle: tokio::runtime::Handle,
    processing: Arc<AtomicBool>,
    valid_sections: Arc<AtomicU64>,
    request_tx: mpsc::Sender<BitsRequest>,
    shutdown_tx: watch::Sender<bool>,
}

impl BloomIndexer {
    /// Start the indexer and its retrieval worker pool on `handle`.
    pub fn new(db: Arc<dyn BloomStore>, config: IndexerConfig, handle: tokio::runtime::Handle) -> Self {
        let valid = db
            .get(keys::BLOOM_VALID_SECTIONS_KEY)
            .and_then(|raw| raw.try_into().ok().map(u64::from_be_bytes))
            .unwrap_or(0);

        let (request_tx, request_rx) = mpsc::channel(config.service_threads.max(1) * 4);
        let request_rx = Arc::new(Mutex::new(request_rx));
        let (shutdown_tx, _) = watch::channel(false);

        let section_bytes = (config.section_size / 8) as usize;
        for _ in 0..config.service_threads.max(1) {
            handle.spawn(serve_requests(
                db.clone(),
                section_bytes,
                request_rx.clone(),
                shutdown_tx.subscribe(),
            ));
        }

        Self {
            db,
            config,
            handle,
            processing: Arc::new(AtomicBool::new(false)),
            valid_sections: Arc::new(AtomicU64::new(valid)),
            request_tx,
            shutdown_tx,
        }
    }

    /// The configured section size.
    pub const fn section_size(&self) -> u64 {
        self.config.section_size
    }

    /// Number of fully indexed sections.
    pub fn valid_sections(&self) -> u64 {
        self.valid_sections.load(Ordering::SeqCst)
    }

    /// True while a section is being processed.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Signal every worker to terminate. In-flight section processing is
    /// not preempted; it is idempotent and safe to abandon.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Process one finalized section in the background: rotate `blooms`
    /// into per-bit rows and persist them under `(bit, section, head)`.
    ///
    /// Returns false without scheduling anything if another section is
    /// already in flight or the input does not cover the section.
    pub fn process_section(&self, section: u64, head: B256, blooms: Vec<Bloom>) -> bool {
        if blooms.len() as u64 != self.config.section_size {
            tracing::warn!(
                section,
                got = blooms.len(),
                expected = self.config.section_size,
                "refusing to index incomplete section",
            );
            return false;
        }
        if self.processing.swap(true, Ordering::SeqCst) {
            return false;
        }

        let db = self.db.clone();
        let processing = self.processing.clone();
        let valid_sections = self.valid_sections.clone();
        let section_size = self.config.section_size;
        let throttling = self.config.throttling;

        self.handle.spawn(async move {
            let result =
                index_section(&*db, section, head, &blooms, section_size, throttling).await;
            match result {
                Ok(()) => {
                    if valid_sections.load(Ordering::SeqCst) == section {
                        valid_sections.store(section + 1, Ordering::SeqCst);
                        db.put(
                            keys::BLOOM_VALID_SECTIONS_KEY.to_vec(),
                            (section + 1).to_be_bytes().to_vec(),
                        );
                    }
                    tracing::info!(section, "indexed bloom section");
                }
                Err(err) => {
                    tracing::error!(section, %err, "bloom section indexing failed");
                }
            }
            processing.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Resolve the row of `bit` for each of `sections` through the worker
    /// pool.
    pub async fn query_bits(&self, bit: u32, sections: Vec<u64>) -> Result<Vec<Vec<u8>>, IndexerError> {
        if bit as usize >= BLOOM_BIT_LENGTH {
            return Err(IndexerError::BitOutOfBounds { bit });
        }
        if *self.shutdown_tx.borrow() {
            return Err(IndexerError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.request_tx
            .send(BitsRequest { bit, sections, resp: tx })
            .await
            .map_err(|_| IndexerError::Closed)?;
        rx.await.map_err(|_| IndexerError::Closed)?
    }

    /// Open a filter session backed by the multiplexing pool.
    pub fn start_session(&self) -> FilterSession {
        let (sub_tx, sub_rx) = mpsc::channel(self.config.filter_threads.max(1) * 4);
        let sub_rx = Arc::new(Mutex::new(sub_rx));
        for _ in 0..self.config.filter_threads.max(1) {
            self.handle.spawn(forward_requests(
                sub_rx.clone(),
                self.request_tx.clone(),
                self.config.retrieval_batch.max(1),
                self.config.retrieval_wait,
            ));
        }
        FilterSession { sub_tx }
    }

    /// Find the heights in `[from, to]` whose block blooms may match the
    /// given address and topic filters. Topics are alternative lists:
    /// every outer entry must match, any inner entry may.
    ///
    /// Only fully indexed sections are consulted; candidate heights carry
    /// the bloom filter's usual false-positive rate.
    pub async fn filter_heights(
        &self,
        address: Option<Address>,
        topics: &[Vec<B256>],
        from: u64,
        to: u64,
    ) -> Result<Vec<u64>, IndexerError> {
        let size = self.config.section_size;
        let valid = self.valid_sections();
        if from > to || valid == 0 {
            return Ok(Vec::new());
        }

        let mut terms: Vec<Vec<[u32; 3]>> = Vec::new();
        if let Some(address) = address {
            terms.push(vec![bloom_bit_indexes(address.as_slice())]);
        }
        for alternatives in topics {
            if !alternatives.is_empty() {
                terms.push(alternatives.iter().map(|t| bloom_bit_indexes(t.as_slice())).collect());
            }
        }

        let first_section = from.saturating_sub(1) / size;
        let last_section = to.saturating_sub(1) / size;
        let session = self.start_session();
        let section_bytes = (size / 8) as usize;
        let mut heights = Vec::new();

        for section in first_section..=last_section.min(valid.saturating_sub(1)) {
            let mut section_match = vec![0xffu8; section_bytes];

            for term in &terms {
                let mut term_match = vec![0u8; section_bytes];
                for alternative in term {
                    let mut alt_match = vec![0xffu8; section_bytes];
                    for &bit in alternative {
                        let rows = session.query(bit, vec![section]).await?;
                        for (acc, row) in alt_match.iter_mut().zip(&rows[0]) {
                            *acc &= row;
                        }
                    }
                    for (acc, byte) in term_match.iter_mut().zip(&alt_match) {
                        *acc |= byte;
                    }
                }
                for (acc, byte) in section_match.iter_mut().zip(&term_match) {
                    *acc &= byte;
                }
            }

            for slot in 0..size {
                if section_match[(slot / 8) as usize] & (1 << (7 - slot % 8)) != 0 {
                    let height = section * size + slot + 1;
                    if height >= from && height <= to {
                        heights.push(height);
                    }
                }
            }
        }

        Ok(heights)
    }
}

/// A filter session multiplexing its requests onto the shared retrieval
/// channel. Dropping the session terminates its forwarders.
#[derive(Debug)]
pub struct FilterSession {
    sub_tx: mpsc::Sender<BitsRequest>,
}

impl FilterSession {
    /// Resolve the row of `bit` for each of `sections`.
    pub async fn query(&self, bit: u32, sections: Vec<u64>) -> Result<Vec<Vec<u8>>, IndexerError> {
        let (tx, rx) = oneshot::channel();
        self.sub_tx
            .send(BitsRequest { bit, sections, resp: tx })
            .await
            .map_err(|_| IndexerError::Closed)?;
        rx.await.map_err(|_| IndexerError::Closed)?
    }
}

async fn index_section(
    db: &dyn BloomStore,
    section: u64,
    head: B256,
    blooms: &[Bloom],
    section_size: u64,
    throttling: Duration,
) -> Result<(), BloomError> {
    let mut generator = Generator::new(section_size)?;
    for (i, bloom) in blooms.iter().enumerate() {
        generator.add_bloom(i as u64, bloom)?;
    }

    for bit in 0..BLOOM_BIT_LENGTH as u32 {
        let row = generator.bitset(bit)?;
        db.put(keys::bloom_bits_key(bit, section, head), compress_bytes(row));
        if !throttling.is_zero() && bit % 256 == 255 {
            tokio::time::sleep(throttling).await;
        }
    }

    db.put(keys::bloom_section_head_key(section), head.to_vec());
    Ok(())
}

async fn serve_requests(
    db: Arc<dyn BloomStore>,
    section_bytes: usize,
    requests: Arc<Mutex<mpsc::Receiver<BitsRequest>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            request = async { requests.lock().await.recv().await } => match request {
                Some(request) => request,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let result = serve_one(&*db, section_bytes, &request);
        let _ = request.resp.send(result);
    }
}

fn serve_one(
    db: &dyn BloomStore,
    section_bytes: usize,
    request: &BitsRequest,
) -> Result<Vec<Vec<u8>>, IndexerError> {
    request
        .sections
        .iter()
        .map(|&section| {
            let head = db
                .get(&keys::bloom_section_head_key(section))
                .ok_or(IndexerError::MissingHead { section })?;
            let head = B256::from_slice(&head);
            let raw = db
                .get(&keys::bloom_bits_key(request.bit, section, head))
                .ok_or(IndexerError::Missing { bit: request.bit, section })?;
            Ok(decompress_bytes(&raw, section_bytes)?)
        })
        .collect()
}

async fn forward_requests(
    sub_requests: Arc<Mutex<mpsc::Receiver<BitsRequest>>>,
    request_tx: mpsc::Sender<BitsRequest>,
    batch: usize,
    wait: Duration,
) {
    loop {
        let Some(first) = ({ sub_requests.lock().await.recv().await }) else { break };

        // coalesce whatever else arrives within the wait window
        let mut pending = vec![first];
        if !wait.is_zero() {
            while let Ok(Some(request)) =
                tokio::time::timeout(wait, async { sub_requests.lock().await.recv().await }).await
            {
                pending.push(request);
                if pending.len() >= batch {
                    break;
                }
            }
        }

        for request in pending {
            let mut rows = Vec::with_capacity(request.sections.len());
            let mut failure = None;

            'chunks: for chunk in request.sections.chunks(batch) {
                let (tx, rx) = oneshot::channel();
                let forwarded =
                    BitsRequest { bit: request.bit, sections: chunk.to_vec(), resp: tx };
                if request_tx.send(forwarded).await.is_err() {
                    failure = Some(IndexerError::Closed);
                    break 'chunks;
                }
                match rx.await {
                    Ok(Ok(chunk_rows)) => rows.extend(chunk_rows),
                    Ok(Err(err)) => {
                        failure = Some(err);
                        break 'chunks;
                    }
                    Err(_) => {
                        failure = Some(IndexerError::Closed);
                        break 'chunks;
                    }
                }
            }

            let _ = request.resp.send(match failure {
                Some(err) => Err(err),
                None => Ok(rows),
            });
        }
    }
}
