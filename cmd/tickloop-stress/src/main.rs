//! Stress test - many actions across a looper pool
//!
//! Registers a large number of actions from several threads, each running
//! for a fixed number of frames, and checks that no invocation is lost.
//!
//! Usage: `stress [actions] [loopers] [frames]`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tickloop::prelude::*;
use tickloop::{tracker, RoundRobinBalancer};

const REGISTER_THREADS: usize = 8;

fn arg(n: usize, default: usize) -> usize {
    std::env::args()
        .nth(n)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn main() -> LooperResult<()> {
    println!("=== tickloop Stress Test ===\n");

    let num_actions = arg(1, 100_000);
    let num_loopers = arg(2, 4);
    let frames = arg(3, 10) as u64;

    println!(
        "{} actions x {} frames on {} loopers ({} registering threads)",
        num_actions, frames, num_loopers, REGISTER_THREADS
    );

    let pool = Arc::new(LooperPool::new(60.0, num_loopers, RoundRobinBalancer::shared())?);
    let invocations = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..REGISTER_THREADS)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let invocations = Arc::clone(&invocations);
            let share = num_actions / REGISTER_THREADS
                + usize::from(t < num_actions % REGISTER_THREADS);
            thread::spawn(move || -> LooperResult<Vec<Completion<bool>>> {
                (0..share)
                    .map(|_| {
                        let invocations = Arc::clone(&invocations);
                        pool.register_with_state(0u64, move |_: &ActionContext, n: &mut u64| {
                            invocations.fetch_add(1, Ordering::Relaxed);
                            *n += 1;
                            *n < frames
                        })
                    })
                    .collect()
            })
        })
        .collect();

    let mut completions = Vec::with_capacity(num_actions);
    for h in handles {
        match h.join() {
            Ok(registered) => completions.extend(registered?),
            Err(_) => return Err(LooperError::SpawnFailed),
        }
    }

    let register_time = start.elapsed();
    println!("\nRegister time: {:?}", register_time);
    println!(
        "Register rate: {:.0} actions/sec",
        num_actions as f64 / register_time.as_secs_f64()
    );

    println!("\nWaiting for completion...");
    let all = Completion::when_all(completions);
    let run_start = Instant::now();
    while !all.is_completed() {
        if run_start.elapsed() > Duration::from_secs(60) {
            println!("Timeout!");
            break;
        }
        let stats = pool.stats();
        print!(
            "\rRunning: {:>8}  invocations: {:>10}",
            stats.total_running_actions,
            invocations.load(Ordering::Relaxed)
        );
        thread::sleep(Duration::from_millis(100));
    }

    let total_time = start.elapsed();
    let expected = num_actions as u64 * frames;
    let done = invocations.load(Ordering::Relaxed);

    println!("\n\n=== Results ===");
    println!("Actions:         {}", num_actions);
    println!("Invocations:     {} / {}", done, expected);
    println!("Running loopers: {}", tracker::running_count());
    for s in tracker::snapshot() {
        println!(
            "  looper {:>3}: {:>6} frames, last frame {:?}",
            s.id, s.current_frame, s.last_processing_duration
        );
    }
    println!("Total time:      {:?}", total_time);
    println!(
        "Throughput:      {:.0} invocations/sec",
        done as f64 / total_time.as_secs_f64()
    );

    pool.shutdown_and_wait(Duration::ZERO)?;

    if done != expected {
        println!("\n=== Stress Test FAILED ===");
        std::process::exit(1);
    }
    println!("\n=== Stress Test Complete ===");
    Ok(())
}
