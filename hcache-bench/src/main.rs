//! # Cache Benchmark Harness
//!
//! Purpose: Drive a configured cache store through batch writes and reads in
//! both sequential and parallel mode, then print throughput and the metrics
//! the diagnostics channel collected.
//!
//! Options come from `hcache.toml` (or the file named by `HCACHE_CONFIG`) and
//! `HCACHE_*` variables. Positional args: `[key_count] [value_size] [rounds]`.

use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use hcache_common::{MetricsListener, MetricsSnapshot, OptionsLoader};
use hcache_store::{CacheContext, CacheStore};

const DEFAULT_KEY_COUNT: usize = 10_000;
const DEFAULT_VALUE_SIZE: usize = 128;
const DEFAULT_ROUNDS: usize = 3;
const DEFAULT_CONFIG_PATH: &str = "hcache.toml";

struct BenchConfig {
    key_count: usize,
    value_size: usize,
    rounds: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        BenchConfig {
            key_count: parse_usize(args.next(), DEFAULT_KEY_COUNT).max(1),
            value_size: parse_usize(args.next(), DEFAULT_VALUE_SIZE),
            rounds: parse_usize(args.next(), DEFAULT_ROUNDS).max(1),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops as f64);
    println!("{label}: {ops} keys in {secs:.3}s ({ops_per_sec:.0} keys/s, {micros_per_op:.1} us/key)");
}

fn print_snapshot(snapshot: &MetricsSnapshot) {
    println!(
        "metrics: get={} set={} delete={} hits={} misses={} errors={} inflight={}",
        snapshot.get_count,
        snapshot.set_count,
        snapshot.delete_count,
        snapshot.hits,
        snapshot.misses,
        snapshot.exceptions,
        snapshot.inflight
    );
    let latency = &snapshot.latency;
    if latency.samples > 0 {
        println!(
            "latency: {} activities, mean {} us",
            latency.samples,
            latency.sum_us / latency.samples
        );
    }
    for (bound, count) in latency.bounds_us.iter().zip(&latency.buckets) {
        if *count > 0 {
            println!("  <= {bound:>7} us: {count}");
        }
    }
    if let Some(overflow) = latency.buckets.get(latency.bounds_us.len()).filter(|count| **count > 0) {
        println!("  >  {:>7} us: {overflow}", latency.bounds_us.last().copied().unwrap_or(0));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = BenchConfig::from_args();
    let config_path = env::var("HCACHE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let options = OptionsLoader::new()
        .with_config_path(&config_path)
        .load()
        .context("loading cache options")?;

    let metrics = Arc::new(MetricsListener::new());
    let context = CacheContext::build_with_listener(options, metrics.clone())
        .await
        .context("building cache context")?;
    let store = context.store();

    println!(
        "store={:?} serializer={:?} keys={} value_size={} rounds={} dop={}",
        context.options().backing_store,
        context.options().serializer,
        config.key_count,
        config.value_size,
        config.rounds,
        context.options().degree_of_parallelism
    );

    let keys: Vec<String> = (0..config.key_count).map(|i| format!("bench:{i:08}")).collect();
    let entries: Vec<(String, Vec<u8>)> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let mut value = vec![0u8; config.value_size];
            let seed = (i as u64).to_le_bytes();
            let len = value.len().min(seed.len());
            value[..len].copy_from_slice(&seed[..len]);
            (key.clone(), value)
        })
        .collect();

    for parallel in [false, true] {
        let mode = if parallel { "parallel" } else { "sequential" };
        for round in 0..config.rounds {
            let start = Instant::now();
            store.set_many(&entries, parallel).await?;
            report(&format!("set_many {mode} #{round}"), keys.len(), start.elapsed());

            let start = Instant::now();
            let values: Vec<Option<Vec<u8>>> = store.get_many(&keys, parallel).await?;
            report(&format!("get_many {mode} #{round}"), keys.len(), start.elapsed());

            let found = values.iter().filter(|value| value.is_some()).count();
            if found != keys.len() {
                tracing::warn!(found, expected = keys.len(), "read back fewer keys than written");
            }
        }
    }

    store.delete_many(&keys).await?;
    print_snapshot(&metrics.snapshot());
    Ok(())
}
