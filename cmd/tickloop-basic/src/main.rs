//! Basic tickloop example
//!
//! Runs a stateful action, a slowed-down action and a coroutine on one
//! looper, then shuts it down.
//!
//! # Environment Variables
//!
//! - `TICKLOOP_FLUSH_EPRINT=1` - Flush debug output immediately
//! - `TICKLOOP_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `TICKLOOP_TARGET_FPS=30` - Looper frame rate

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tickloop::prelude::*;
use tickloop::{init_logging, kdebug, kinfo};
// TICKLOOP_LOG_LEVEL=debug TICKLOOP_FLUSH_EPRINT=1 cargo run -p tickloop-basic
fn main() -> LooperResult<()> {
    println!("=== tickloop Basic Example ===\n");

    init_logging();
    let config = tickloop::LooperConfig::from_env();
    config.print();

    let looper = Looper::with_config(&config)?;
    println!("Started looper {} at {} fps", looper.id(), looper.target_frame_rate());

    // Counts to 10, one step per frame
    let counter = looper.register_with_state(0u32, |ctx: &ActionContext, n: &mut u32| {
        *n += 1;
        kdebug!("[counter] frame {} step {} ({:?})", ctx.current_frame(), n, ctx.elapsed());
        *n < 10
    })?;

    // Same idea at 5 fps
    let slow_runs = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&slow_runs);
    let slow = looper.register_with_options(
        move |ctx: &ActionContext| {
            let n = s.fetch_add(1, Ordering::SeqCst) + 1;
            kdebug!("[slow] run {} at frame {}", n, ctx.current_frame());
            n < 5
        },
        ActionOptions::with_frame_rate(5.0),
    )?;

    // A coroutine started from inside a tick
    let (tx, rx) = std::sync::mpsc::channel();
    looper.register(move |ctx: &ActionContext| {
        let co = ctx.run_coroutine(|co: &CoroutineContext<u64>| {
            let start = co.current_frame();
            kinfo!("[coroutine] started at frame {}", start);
            co.delay_frames(3, move |co| {
                kinfo!("[coroutine] resumed at frame {}", co.current_frame());
                co.delay(Duration::from_millis(100), move |co| co.done(co.current_frame() - start))
            })
        });
        let _ = tx.send(co);
        false
    })?;
    let co = rx.recv().map_err(|_| LooperError::ShutDown)?;

    println!("\nWaiting for actions to complete...\n");
    println!("counter finished: {}", counter.wait()?);
    println!("slow finished:    {} ({} runs)", slow.wait()?, slow_runs.load(Ordering::SeqCst));

    let waited = loop {
        if co.is_completed() {
            break co.result()?;
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    println!("coroutine spanned {} frames ({})", waited, co.status());

    let stats = looper.stats();
    kinfo!("{} frames processed, last frame took {:?}", stats.current_frame, stats.last_processing_duration);

    looper.shutdown_and_wait(Duration::ZERO)?;
    println!("\n=== Example Complete ===");
    Ok(())
}
