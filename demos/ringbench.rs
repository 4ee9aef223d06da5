//! Ring-passing benchmark driver.
//!
//! Creates `cycles` groups of `cycle_len` fibers each, arranged as a ring
//! within their group. Each fiber hands a token to its neighbor and waits
//! for it to come back around, `rounds` times, then exits. Prints the
//! configuration and wall-clock time, matching the reference harness's
//! output line.

use std::time::Instant;

use clap::Parser;
use cofiber::scheduler::{self, FiberId, Scheduler};

/// Ring-passing fiber benchmark for the stack-copying dispatcher.
#[derive(Parser)]
#[command(name = "ringbench", version)]
struct Args {
	/// Cycle length: fibers per ring.
	#[arg(short = 'n', long = "cycle-len")]
	cycle_len: usize,

	/// Number of independent rings (groups).
	#[arg(short = 'r', long = "cycles")]
	cycles: usize,

	/// Wake/wait rounds each fiber performs before exiting.
	#[arg(short = 'm', long = "rounds")]
	rounds: usize,

	/// Extra stack depth (bytes) each fiber consumes via a local array
	/// before entering its ring loop.
	#[arg(short = 'd', long = "stack-depth", default_value_t = 0)]
	stack_depth: usize,

	/// Worker threads.
	#[arg(short = 'p', long = "processors")]
	processors: usize
}

fn ring_loop(ids: &[FiberId], idx: usize, cycle_len: usize, rounds: usize) {
	let next = idx / cycle_len * cycle_len + (idx + 1) % cycle_len;

	for round in 0..rounds {
		if idx % cycle_len == round % cycle_len {
			scheduler::wake(ids[next]);
			scheduler::wait();
		} else {
			scheduler::wait();
			scheduler::wake(ids[next]);
		}
	}
}

fn main() {
	let args = Args::parse();
	let total = args.cycle_len * args.cycles;

	let scheduler = Scheduler::new(args.processors, total.max(1));

	// `fiber_create`/`spawn` assigns a worker per creation sequence, so
	// the ids vector must be fully populated (and therefore readable by
	// every fiber's closure) before any worker thread starts running them.
	let ids = std::sync::Arc::new(std::sync::Mutex::new(vec![None; total]));

	for i in 0..total {
		let ids2 = std::sync::Arc::clone(&ids);
		let cycle_len = args.cycle_len;
		let rounds = args.rounds;
		let stack_depth = args.stack_depth;

		let id = scheduler.spawn(move || {
			// Matches the reference benchmark's extra per-fiber stack
			// depth knob: touch `stack_depth` bytes before the ring loop
			// so a suspend there exercises a larger saved-stack buffer.
			let mut pad = vec![0_u8; stack_depth];
			pad.fill(b'#');
			std::hint::black_box(&pad);

			#[allow(clippy::unwrap_used)]
			let snapshot: Vec<FiberId> = {
				let guard = ids2.lock().unwrap();
				guard.iter().map(|id| id.expect("fiber ids published before start()")).collect()
			};

			ring_loop(&snapshot, i, cycle_len, rounds);
		});

		#[allow(clippy::unwrap_used)]
		{
			ids.lock().unwrap()[i] = Some(id);
		}
	}

	let start = Instant::now();

	scheduler.start().expect("failed to start worker threads");
	scheduler.finish();

	let elapsed = start.elapsed();

	println!(
		"{:6} {:6} {:6} {:.6}",
		args.cycle_len,
		args.cycles,
		args.rounds,
		elapsed.as_secs_f64()
	);
}
