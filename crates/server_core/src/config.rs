/// The control-rate block size, in samples.
///
/// One call through the worker pool's `drain` delivers exactly this many samples per
/// synth. For efficiency and simplicity the internals use this block size only;
/// callers that need a different hardware buffer size are expected to accumulate or
/// split at the edges.
pub const BLOCK_SIZE: usize = 64;

/// The assumed sample rate, in Hz, used only to compute the soft real-time deadline
/// for one block (see [`block_period`]). An embedding host running at a different
/// rate isn't made incorrect by this constant — the deadline is advisory, feeding
/// only the glitch counter and log line — but a host with unusual timing needs should
/// track actual block period itself rather than rely on this default.
pub const SAMPLE_RATE: u32 = 44100;

/// The wall-clock duration one control-rate block is expected to take: the "implicit
/// soft deadline" a block should finish inside of before a glitch is logged.
pub fn block_period() -> std::time::Duration {
    std::time::Duration::from_secs_f64(BLOCK_SIZE as f64 / SAMPLE_RATE as f64)
}

/// Default number of DSP worker threads spawned alongside the single helper thread,
/// used when the embedding host does not request a specific count.
///
/// `cores - 1` leaves one core for the helper thread and whatever else the host is
/// doing; this is clamped to at least 1 so the pool always has somewhere to run work.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

/// Default capacity of the queue-item pool: the maximum number of work-queue items a
/// single rebuild may allocate.
pub const DEFAULT_ITEM_POOL_CAPACITY: u16 = 4096;

/// Default capacity of the successor-array pool.
///
/// Every item has exactly one successor array, so this tracks the item pool capacity.
pub const DEFAULT_SUCCESSOR_POOL_CAPACITY: u16 = 4096;

/// Default capacity of the scratch-buffer pool used while packing sequential synth
/// runs during generation.
pub const DEFAULT_SCRATCH_POOL_CAPACITY: u16 = 256;

/// The number of indexed (as opposed to named) parameter slots a synth exposes.
///
/// Named slots are an open namespace; indexed slots are bounds-checked against this
/// so that `node_set` with an out-of-range index reports `Error::InvalidSlot` rather
/// than silently growing a map entry nothing will ever read.
pub const MAX_INDEXED_SLOTS: u32 = 16;
