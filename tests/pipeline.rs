use anyhow::{Result, bail};
use ironshard::io::VecRowSource;
use ironshard::testing::{CollectingObserver, ScriptedSink};
use ironshard::{
    ByteRange, CancellationToken, Chunk, ChunkSource, PipelineConfig, PipelineDriver, Progress,
    RunOutcome, SourceCursor,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn random_latencies(seed: u64, n: usize, max_ms: u64) -> Vec<Duration> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| Duration::from_millis(rng.gen_range(0..=max_ms)))
        .collect()
}

fn latency_from(table: Vec<Duration>) -> impl Fn(u64) -> Duration + Send + Sync + 'static {
    move |index| table.get(index as usize).copied().unwrap_or_default()
}

#[test]
fn chunk_count_is_ceil_n_over_c() -> Result<()> {
    init_tracing();
    for (n, c) in [(0u64, 7u64), (1, 7), (7, 7), (8, 7), (100, 10), (101, 10), (999, 64)] {
        let driver = PipelineDriver::new(PipelineConfig::new(c).with_workers(3))?;
        let source = VecRowSource::new((0..n).collect::<Vec<u64>>(), c as usize)?;
        let result = driver.run(source, Arc::new(ScriptedSink::new()))?;

        assert_eq!(result.chunks_produced, n.div_ceil(c), "n={n} c={c}");
        let total: u64 = result.successes.values().map(|m| m.units).sum();
        assert_eq!(total, n);
        assert_eq!(result.units_completed, n);
        assert!(result.is_complete_success());
    }
    Ok(())
}

#[test]
fn inflight_and_running_stay_bounded_under_random_latency() -> Result<()> {
    init_tracing();
    let chunks = 40;
    let latencies = random_latencies(7, chunks, 10)
        .into_iter()
        .map(|d| d + Duration::from_millis(2))
        .collect();
    let sink = Arc::new(ScriptedSink::new().with_latency(latency_from(latencies)));
    let cfg = PipelineConfig::new(5).with_workers(2).with_max_inflight(5);
    let driver = PipelineDriver::new(cfg)?;
    let source = VecRowSource::new(vec![0u8; chunks * 5], 5)?;
    let result = driver.run(source, Arc::clone(&sink))?;

    assert_eq!(result.chunks_produced, chunks as u64);
    let unfinished = sink.peak_unfinished();
    assert!(unfinished <= 5, "{unfinished} chunks submitted and unfinished at once");
    assert!(unfinished > 2, "queue never filled past the worker count: {unfinished}");
    assert!(result.peak_in_flight <= 5, "peak in flight {}", result.peak_in_flight);
    assert!(result.peak_running <= 2, "peak running {}", result.peak_running);
    assert!(sink.probe().peak() <= 2);
    assert_eq!(sink.probe().current(), 0);
    Ok(())
}

#[test]
fn submission_is_ordered_but_completion_is_not() -> Result<()> {
    let chunks = 24;
    let sink = Arc::new(
        ScriptedSink::new().with_latency(latency_from(random_latencies(42, chunks, 15))),
    );
    let driver = PipelineDriver::new(PipelineConfig::new(1).with_workers(4).with_max_inflight(8))?;
    let source = VecRowSource::new((0..chunks as u32).collect::<Vec<_>>(), 1)?;
    driver.run(source, Arc::clone(&sink))?;

    let submitted = sink.submitted();
    assert_eq!(submitted, (0..chunks as u64).collect::<Vec<_>>());

    let completed = sink.completed();
    assert_eq!(completed.len(), chunks);
    assert!(
        completed.windows(2).any(|w| w[0] > w[1]),
        "expected at least one out-of-order completion: {completed:?}"
    );
    Ok(())
}

#[test]
fn one_failure_leaves_the_rest_untouched() -> Result<()> {
    let sink = Arc::new(ScriptedSink::new().fail_at([5]));
    let driver = PipelineDriver::new(PipelineConfig::new(10).with_workers(4))?;
    let result = driver.run(VecRowSource::new(vec![1u16; 120], 10)?, sink)?;

    assert_eq!(result.chunks_produced, 12);
    assert_eq!(result.failed_indices(), vec![5]);
    assert_eq!(result.successes.len(), 11);
    assert!(result.failures[&5].reason.contains("scripted failure at chunk 5"));
    assert_eq!(result.outcome, RunOutcome::Completed);
    assert!(!result.is_complete_success());
    Ok(())
}

#[test]
fn quarter_million_rows_with_a_failed_middle_chunk() -> Result<()> {
    init_tracing();
    let cfg = PipelineConfig::new(100_000).with_workers(4).with_max_inflight(8);
    let driver = PipelineDriver::new(cfg)?;
    let source = VecRowSource::new((0..250_000u64).collect(), 100_000)?;
    let result = driver.run(source, Arc::new(ScriptedSink::new().fail_at([1])))?;

    assert_eq!(result.chunks_produced, 3);
    assert_eq!(result.succeeded_indices(), vec![0, 2]);
    assert_eq!(result.failed_indices(), vec![1]);
    assert_eq!(result.successes[&0].units, 100_000);
    assert_eq!(result.successes[&2].units, 50_000);
    assert_eq!(result.units_completed, 150_000);
    Ok(())
}

#[test]
fn single_inflight_slot_serializes_execution() -> Result<()> {
    let sink = Arc::new(ScriptedSink::new().with_fixed_latency(Duration::from_millis(2)));
    let cfg = PipelineConfig::new(4).with_workers(4).with_max_inflight(1);
    let driver = PipelineDriver::new(cfg)?;
    let result = driver.run(VecRowSource::new(vec![0i32; 40], 4)?, Arc::clone(&sink))?;

    assert_eq!(result.chunks_produced, 10);
    assert_eq!(sink.probe().peak(), 1);
    assert!(result.peak_running <= 1);
    assert_eq!(result.peak_in_flight, 1);
    assert_eq!(sink.completed(), (0..10).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn panicking_sink_is_a_chunk_failure() -> Result<()> {
    let driver = PipelineDriver::new(PipelineConfig::new(2).with_workers(2))?;
    let result = driver.run(
        VecRowSource::new(vec!['x'; 8], 2)?,
        Arc::new(ScriptedSink::new().panic_at([1])),
    )?;
    assert_eq!(result.failed_indices(), vec![1]);
    assert!(result.failures[&1].reason.contains("panicked"));
    assert_eq!(result.succeeded_indices(), vec![0, 2, 3]);
    Ok(())
}

#[test]
fn fail_fast_stops_production_and_drains() -> Result<()> {
    let sink = Arc::new(ScriptedSink::new().fail_at([2]));
    let cfg = PipelineConfig::new(1)
        .with_workers(1)
        .with_max_inflight(1)
        .with_fail_fast(true);
    let driver = PipelineDriver::new(cfg)?;
    let result = driver.run(VecRowSource::new((0..50u32).collect(), 1)?, Arc::clone(&sink))?;

    assert_eq!(result.outcome, RunOutcome::FailedFast);
    assert!(result.chunks_produced < 50);
    assert_eq!(result.failed_indices(), vec![2]);
    assert_eq!(result.chunks_completed(), result.chunks_produced);
    assert_eq!(sink.completed().len() as u64, result.chunks_produced);
    Ok(())
}

#[test]
fn cancellation_awaits_submitted_jobs() -> Result<()> {
    let token = CancellationToken::new();
    let cancel_on_first = {
        let token = token.clone();
        move |p: &Progress| {
            if p.chunks_completed >= 1 {
                token.cancel();
            }
        }
    };
    let sink = Arc::new(ScriptedSink::new().with_fixed_latency(Duration::from_millis(5)));
    let driver = PipelineDriver::new(PipelineConfig::new(1).with_workers(2).with_max_inflight(2))?
        .with_cancellation(token.clone())
        .with_observer(Arc::new(cancel_on_first));
    let result = driver.run(VecRowSource::new((0..100u32).collect(), 1)?, Arc::clone(&sink))?;

    assert!(token.is_cancelled());
    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert!(result.chunks_produced < 100);
    assert_eq!(result.chunks_completed(), result.chunks_produced);
    assert_eq!(sink.completed().len() as u64, result.chunks_produced);
    assert_eq!(sink.probe().current(), 0);
    Ok(())
}

/// Yields `good` windows, then fails.
struct BrokenAfter {
    cursor: SourceCursor,
    good: u64,
}

impl ChunkSource for BrokenAfter {
    type Payload = ByteRange;

    fn next_chunk(&mut self) -> Result<Option<Chunk<ByteRange>>> {
        self.cursor.check_open()?;
        if self.cursor.next_index() == self.good {
            bail!("upstream connection reset");
        }
        let offset = self.cursor.offset();
        Ok(Some(self.cursor.emit(ByteRange { offset, len: 4 })))
    }
}

#[test]
fn source_failure_drains_then_surfaces() -> Result<()> {
    let sink = Arc::new(ScriptedSink::new().with_fixed_latency(Duration::from_millis(10)));
    let driver = PipelineDriver::new(PipelineConfig::new(4).with_workers(2).with_max_inflight(4))?;
    let source = BrokenAfter {
        cursor: SourceCursor::new(),
        good: 3,
    };
    let err = driver.run(source, Arc::clone(&sink)).unwrap_err();

    assert!(err.is_source_fatal());
    assert!(err.to_string().contains("chunk 3"), "{err}");
    assert!(err.to_string().contains("upstream connection reset"), "{err}");
    let mut done = sink.completed();
    done.sort_unstable();
    assert_eq!(done, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn progress_is_reported_once_per_completion_and_never_shrinks() -> Result<()> {
    let observer = Arc::new(CollectingObserver::new());
    let sink = Arc::new(
        ScriptedSink::new()
            .with_latency(latency_from(random_latencies(3, 10, 6)))
            .fail_at([4]),
    );
    let driver = PipelineDriver::new(PipelineConfig::new(10).with_workers(3))?
        .with_observer(Arc::clone(&observer) as Arc<dyn ironshard::ProgressObserver>);
    let result = driver.run(VecRowSource::new(vec![0u8; 95], 10)?, sink)?;

    let snaps = observer.snapshots();
    assert_eq!(snaps.len() as u64, result.chunks_produced);
    for (i, w) in snaps.windows(2).enumerate() {
        assert_eq!(w[1].chunks_completed, i as u64 + 2);
        assert!(w[1].units_completed >= w[0].units_completed);
    }
    let last = snaps.last().copied().unwrap_or_default();
    assert_eq!(last.total_estimate, Some(95));
    assert_eq!(last.chunks_failed, 1);
    assert_eq!(last.units_completed, result.units_completed);
    assert_eq!(result.units_completed, 85);
    Ok(())
}

#[test]
fn drain_reports_each_straggler_as_it_finishes() -> Result<()> {
    let started = Instant::now();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = {
        let seen = Arc::clone(&seen);
        move |p: &Progress| {
            seen.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((p.chunks_completed, started.elapsed()));
        }
    };
    let sink = Arc::new(ScriptedSink::new().with_latency(|index| {
        Duration::from_millis(if index == 0 { 10 } else { 400 })
    }));
    let driver = PipelineDriver::new(PipelineConfig::new(1).with_workers(2).with_max_inflight(2))?
        .with_observer(Arc::new(record));
    let result = driver.run(VecRowSource::new(vec![0u8; 2], 1)?, sink)?;
    assert_eq!(result.chunks_completed(), 2);

    let seen = seen.lock().unwrap_or_else(|e| e.into_inner()).clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, 1);
    assert!(
        seen[0].1 < Duration::from_millis(300),
        "fast chunk reported at {:?}, after the slow one finished",
        seen[0].1
    );
    assert!(seen[1].1 >= Duration::from_millis(400));
    Ok(())
}

#[test]
fn zero_workers_is_rejected_up_front() {
    let err = PipelineDriver::new(PipelineConfig::new(10).with_workers(0))
        .err()
        .map(|e| e.is_config());
    assert_eq!(err, Some(true));
}
