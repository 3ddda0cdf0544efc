//! Snowflake-style distributed id generator (spec §3 "DistributedId",
//! §4.B).
//!
//! A 64-bit id is `{relative_timestamp_ms}{worker_id}{sequence}`,
//! minted by compare-and-swap on a single packed `AtomicU64` state word
//! of `{lastTimestamp, sequence}` — no mutex, no allocation on the
//! batch-with-caller-buffer path. This mirrors the teacher's
//! `TsidGenerator` (`fc-platform/src/shared/tsid.rs`) in spirit — a
//! packed-bitfield id built from a monotonic clock plus a counter — but
//! implements the CAS/backoff contract spec §4.B actually requires
//! (the teacher's TSID instead adds a random field and a plain atomic
//! counter, which doesn't give the "two ids from the same worker are
//! ordered" guarantee this component's contract demands).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnowflakeError {
    #[error("system clock regressed by {regressed_ms}ms, exceeding tolerance of {tolerance_ms}ms")]
    ClockRegression { regressed_ms: u64, tolerance_ms: u64 },
    #[error("worker id {worker_id} exceeds the {bits}-bit worker field")]
    WorkerIdOutOfRange { worker_id: u64, bits: u32 },
}

pub type Result<T> = std::result::Result<T, SnowflakeError>;

/// Bit-width layout of the 63 usable bits (a `i64` id is kept
/// non-negative, so the sign bit is never used).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdLayout {
    pub timestamp_bits: u32,
    pub worker_bits: u32,
    pub sequence_bits: u32,
}

impl IdLayout {
    /// Default layout: 41+10+12 — 69-year range, 1024 workers, 4096
    /// ids/ms/worker (spec §3).
    pub const fn standard() -> Self {
        Self { timestamp_bits: 41, worker_bits: 10, sequence_bits: 12 }
    }

    /// High-concurrency layout: trades worker-address-space for
    /// sequence headroom — 64 workers, 32768 ids/ms/worker (spec §3
    /// "alternative 'high-concurrency' layout increases sequence
    /// bits").
    pub const fn high_concurrency() -> Self {
        Self { timestamp_bits: 41, worker_bits: 6, sequence_bits: 16 }
    }

    fn max_worker_id(&self) -> u64 {
        (1u64 << self.worker_bits) - 1
    }

    fn sequence_mask(&self) -> u64 {
        (1u64 << self.sequence_bits) - 1
    }

    fn max_timestamp(&self) -> u64 {
        (1u64 << self.timestamp_bits) - 1
    }
}

#[derive(Debug, Clone)]
pub struct SnowflakeConfig {
    pub worker_id: u64,
    pub layout: IdLayout,
    /// Unix epoch (ms) subtracted from wall-clock time before encoding,
    /// so the 41-bit timestamp field has a fresh 69-year budget.
    pub epoch_ms: u64,
    /// How far the wall clock is allowed to regress before `next_id`
    /// fails with `ClockRegression` instead of waiting it out.
    pub clock_regression_tolerance: Duration,
}

impl SnowflakeConfig {
    pub fn new(worker_id: u64) -> Self {
        Self {
            worker_id,
            layout: IdLayout::standard(),
            epoch_ms: 1_700_000_000_000, // 2023-11-14, arbitrary recent epoch
            clock_regression_tolerance: Duration::from_millis(50),
        }
    }

    pub fn with_layout(mut self, layout: IdLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_epoch_ms(mut self, epoch_ms: u64) -> Self {
        self.epoch_ms = epoch_ms;
        self
    }

    pub fn with_clock_regression_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_regression_tolerance = tolerance;
        self
    }
}

/// Packs/unpacks the `{lastTimestamp, sequence}` CAS state word.
struct StateWord {
    sequence_bits: u32,
}

impl StateWord {
    fn pack(&self, timestamp: u64, sequence: u64) -> u64 {
        (timestamp << self.sequence_bits) | sequence
    }

    fn unpack(&self, word: u64) -> (u64, u64) {
        let seq_mask = (1u64 << self.sequence_bits) - 1;
        (word >> self.sequence_bits, word & seq_mask)
    }
}

pub struct SnowflakeGenerator {
    config: SnowflakeConfig,
    state: AtomicU64,
    word: StateWord,
}

fn now_unix_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

impl SnowflakeGenerator {
    pub fn new(config: SnowflakeConfig) -> Result<Self> {
        if config.worker_id > config.layout.max_worker_id() {
            return Err(SnowflakeError::WorkerIdOutOfRange {
                worker_id: config.worker_id,
                bits: config.layout.worker_bits,
            });
        }
        let word = StateWord { sequence_bits: config.layout.sequence_bits };
        Ok(Self { config, state: AtomicU64::new(0), word })
    }

    fn relative_now(&self) -> u64 {
        now_unix_ms().saturating_sub(self.config.epoch_ms)
    }

    fn compose(&self, relative_ts: u64, sequence: u64) -> i64 {
        let l = &self.config.layout;
        let id = (relative_ts << (l.worker_bits + l.sequence_bits))
            | (self.config.worker_id << l.sequence_bits)
            | sequence;
        id as i64
    }

    /// Reserve the next `{timestamp, sequence}` pair via CAS, spinning
    /// (bounded by sequence exhaustion, never sleeping the scheduler)
    /// across millisecond boundaries on same-ms overflow, and waiting
    /// out clock regressions within tolerance.
    fn reserve_one(&self) -> Result<(u64, u64)> {
        loop {
            let now = self.relative_now();
            let old = self.state.load(Ordering::Acquire);
            let (last_ts, last_seq) = self.word.unpack(old);

            if now < last_ts {
                let regressed_ms = last_ts - now;
                if regressed_ms > self.config.clock_regression_tolerance.as_millis() as u64 {
                    return Err(SnowflakeError::ClockRegression {
                        regressed_ms,
                        tolerance_ms: self.config.clock_regression_tolerance.as_millis() as u64,
                    });
                }
                // Within tolerance: wait for the clock to catch back up,
                // then retry the whole reservation.
                std::thread::sleep(Duration::from_millis(regressed_ms.max(1)));
                continue;
            }

            let seq_mask = self.word_sequence_mask();
            let (new_ts, new_seq) = if now == last_ts {
                let candidate = last_seq + 1;
                if candidate > seq_mask {
                    // Sequence space exhausted this millisecond: bounded
                    // busy-spin to the next tick, no scheduler sleep.
                    let mut spun = now;
                    while spun <= last_ts {
                        std::hint::spin_loop();
                        spun = self.relative_now();
                    }
                    continue;
                }
                (last_ts, candidate)
            } else {
                (now, 0)
            };

            if new_ts > self.config.layout.max_timestamp() {
                // 69-year budget exhausted relative to the configured
                // epoch; this is not a recoverable condition, but it's
                // surfaced the same way a clock regression is since both
                // mean "the timestamp field cannot represent `now`".
                return Err(SnowflakeError::ClockRegression { regressed_ms: 0, tolerance_ms: 0 });
            }

            let packed = self.word.pack(new_ts, new_seq);
            if self
                .state
                .compare_exchange(old, packed, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok((new_ts, new_seq));
            }
            // Lost the race to another thread; retry with fresh state.
        }
    }

    fn word_sequence_mask(&self) -> u64 {
        self.config.layout.sequence_mask()
    }

    /// Mint a single id.
    pub fn next_id(&self) -> Result<i64> {
        let (ts, seq) = self.reserve_one()?;
        Ok(self.compose(ts, seq))
    }

    /// Mint `n` ids, reserving a contiguous sequence range in a single
    /// CAS when they all fit within the remaining sequence budget for
    /// the current millisecond; otherwise falls back to per-id
    /// reservation across millisecond boundaries. Ids are returned in
    /// ascending order.
    pub fn next_ids(&self, n: usize) -> Result<Vec<i64>> {
        let mut out = Vec::with_capacity(n);
        out.resize(n, 0i64);
        self.next_ids_into(&mut out)?;
        Ok(out)
    }

    /// Zero-allocation batch path: fills a caller-provided span.
    pub fn next_ids_into(&self, span: &mut [i64]) -> Result<()> {
        let n = span.len();
        if n == 0 {
            return Ok(());
        }
        let seq_mask = self.word_sequence_mask();

        let mut filled = 0;
        while filled < n {
            let now = self.relative_now();
            let old = self.state.load(Ordering::Acquire);
            let (last_ts, last_seq) = self.word.unpack(old);

            if now < last_ts {
                let regressed_ms = last_ts - now;
                if regressed_ms > self.config.clock_regression_tolerance.as_millis() as u64 {
                    return Err(SnowflakeError::ClockRegression {
                        regressed_ms,
                        tolerance_ms: self.config.clock_regression_tolerance.as_millis() as u64,
                    });
                }
                std::thread::sleep(Duration::from_millis(regressed_ms.max(1)));
                continue;
            }

            let base_ts = if now == last_ts { last_ts } else { now };
            let base_seq = if now == last_ts { last_seq + 1 } else { 0 };

            let remaining_in_ms = seq_mask.saturating_sub(base_seq).saturating_add(1);
            let take = remaining_in_ms.min((n - filled) as u64) as usize;

            if take == 0 {
                // Current ms exhausted: spin to the next tick and retry.
                let mut spun = now;
                while spun <= last_ts {
                    std::hint::spin_loop();
                    spun = self.relative_now();
                }
                continue;
            }

            let new_seq = base_seq + take as u64 - 1;
            let packed = self.word.pack(base_ts, new_seq);

            if self
                .state
                .compare_exchange(old, packed, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                for i in 0..take {
                    span[filled + i] = self.compose(base_ts, base_seq + i as u64);
                }
                filled += take;
            }
            // else lost the CAS race, retry from the top with fresh state.
        }
        Ok(())
    }

    pub fn worker_id(&self) -> u64 {
        self.config.worker_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ids_strictly_increase_single_threaded() {
        let gen = SnowflakeGenerator::new(SnowflakeConfig::new(1)).unwrap();
        let mut prev = gen.next_id().unwrap();
        for _ in 0..10_000 {
            let id = gen.next_id().unwrap();
            assert!(id > prev, "{id} should be > {prev}");
            prev = id;
        }
    }

    #[test]
    fn batch_ids_are_ascending_and_unique() {
        let gen = SnowflakeGenerator::new(SnowflakeConfig::new(2)).unwrap();
        let ids = gen.next_ids(5000).unwrap();
        for w in ids.windows(2) {
            assert!(w[1] > w[0]);
        }
        let set: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(set.len(), ids.len());
    }

    #[test]
    fn next_ids_into_fills_without_reallocating_span() {
        let gen = SnowflakeGenerator::new(SnowflakeConfig::new(3)).unwrap();
        let mut span = vec![0i64; 16];
        gen.next_ids_into(&mut span).unwrap();
        assert!(span.iter().all(|&id| id != 0));
    }

    #[test]
    fn worker_id_out_of_range_is_rejected() {
        let layout = IdLayout::standard();
        let bad_worker = (1u64 << layout.worker_bits) + 1;
        let err = SnowflakeGenerator::new(SnowflakeConfig::new(bad_worker)).unwrap_err();
        assert!(matches!(err, SnowflakeError::WorkerIdOutOfRange { .. }));
    }

    #[test]
    fn no_duplicates_under_parallel_generation() {
        let gen = Arc::new(SnowflakeGenerator::new(SnowflakeConfig::new(4)).unwrap());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let g = gen.clone();
            handles.push(std::thread::spawn(move || {
                (0..2000).map(|_| g.next_id().unwrap()).collect::<Vec<_>>()
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let set: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(set.len(), all.len(), "no duplicate ids under 32-way parallelism");
    }

    #[test]
    fn high_concurrency_layout_has_more_sequence_headroom() {
        let standard = IdLayout::standard();
        let hc = IdLayout::high_concurrency();
        assert!(hc.sequence_bits > standard.sequence_bits);
        assert!(hc.worker_bits < standard.worker_bits);
    }
}
