//! End-to-end exercises of the public scheduler API: ping-pong rings
//! across one and several workers, a wake-before-wait race, and a fiber
//! that suspends with a deep stack.

use std::sync::{Arc, Mutex};

use cofiber::scheduler::{self, FiberId, Scheduler};

fn publish_ids<F>(scheduler: &Scheduler, count: usize, mut make: F) -> Vec<FiberId>
where
	F: FnMut(usize, Arc<Mutex<Vec<Option<FiberId>>>>) -> Box<dyn FnOnce() + Send>
{
	let ids = Arc::new(Mutex::new(vec![None; count]));

	for i in 0..count {
		let job = make(i, Arc::clone(&ids));
		let id = scheduler.spawn(job);

		#[allow(clippy::unwrap_used)]
		{
			ids.lock().unwrap()[i] = Some(id);
		}
	}

	#[allow(clippy::unwrap_used)]
	let ids = ids.lock().unwrap().iter().map(|id| id.expect("all ids published")).collect();

	ids
}

#[test]
fn single_fiber_no_block() {
	let scheduler = Scheduler::new(1, 8);
	let ran = Arc::new(Mutex::new(false));
	let ran2 = Arc::clone(&ran);

	scheduler.spawn(move || {
		#[allow(clippy::unwrap_used)]
		{
			*ran2.lock().unwrap() = true;
		}
	});

	scheduler.start().expect("start worker");
	scheduler.finish();

	#[allow(clippy::unwrap_used)]
	assert!(*ran.lock().unwrap());
}

#[test]
fn ping_pong_single_worker() {
	let scheduler = Scheduler::new(1, 8);
	let rounds = Arc::new(Mutex::new(Vec::new()));

	let ids = publish_ids(&scheduler, 2, |i, ids| {
		let rounds = Arc::clone(&rounds);

		Box::new(move || {
			#[allow(clippy::unwrap_used)]
			let other = ids.lock().unwrap()[1 - i].unwrap();

			if i == 0 {
				scheduler::wake(other);
				scheduler::wait();
			} else {
				scheduler::wait();
				scheduler::wake(other);
			}

			#[allow(clippy::unwrap_used)]
			rounds.lock().unwrap().push(i);
		})
	});

	scheduler.start().expect("start worker");
	scheduler.finish();

	#[allow(clippy::unwrap_used)]
	let mut observed = rounds.lock().unwrap().clone();
	observed.sort_unstable();
	assert_eq!(observed, vec![0, 1]);
	assert_eq!(ids.len(), 2);
}

#[test]
fn ring_of_four_completes_ten_rounds() {
	const N: usize = 4;
	const ROUNDS: usize = 10;

	let scheduler = Scheduler::new(1, N);
	let completed = Arc::new(Mutex::new(vec![0_usize; N]));

	publish_ids(&scheduler, N, |i, ids| {
		let completed = Arc::clone(&completed);

		Box::new(move || {
			let next = (i + 1) % N;

			#[allow(clippy::unwrap_used)]
			let snapshot: Vec<FiberId> = ids.lock().unwrap().iter().map(|id| id.unwrap()).collect();

			for round in 0..ROUNDS {
				if i % N == round % N {
					scheduler::wake(snapshot[next]);
					scheduler::wait();
				} else {
					scheduler::wait();
					scheduler::wake(snapshot[next]);
				}
			}

			#[allow(clippy::unwrap_used)]
			{
				completed.lock().unwrap()[i] = ROUNDS;
			}
		})
	});

	scheduler.start().expect("start worker");
	scheduler.finish();

	#[allow(clippy::unwrap_used)]
	let completed = completed.lock().unwrap().clone();
	assert_eq!(completed, vec![ROUNDS; N]);
}

#[test]
fn disjoint_groups_across_workers_never_cross_wake() {
	// 8 groups of 2 fibers, 4 workers. The chunked assignment's 128-wide
	// floor means a run this small still lands every fiber on worker 0 —
	// the property under test (no wake ever crosses a worker boundary)
	// holds either way, and holds trivially here.
	const GROUPS: usize = 8;
	const GROUP_SIZE: usize = 2;
	const TOTAL: usize = GROUPS * GROUP_SIZE;

	let scheduler = Scheduler::new(4, TOTAL);
	let finished = Arc::new(Mutex::new(0_usize));

	publish_ids(&scheduler, TOTAL, |i, ids| {
		let finished = Arc::clone(&finished);
		let group = i / GROUP_SIZE;
		let local = i % GROUP_SIZE;
		let peer_global = group * GROUP_SIZE + (1 - local);

		Box::new(move || {
			#[allow(clippy::unwrap_used)]
			let peer = ids.lock().unwrap()[peer_global].unwrap();

			if local == 0 {
				scheduler::wake(peer);
				scheduler::wait();
			} else {
				scheduler::wait();
				scheduler::wake(peer);
			}

			#[allow(clippy::unwrap_used)]
			{
				*finished.lock().unwrap() += 1;
			}
		})
	});

	scheduler.start().expect("start workers");
	scheduler.finish();

	#[allow(clippy::unwrap_used)]
	assert_eq!(*finished.lock().unwrap(), TOTAL);
}

#[test]
fn wake_before_wait_does_not_suspend() {
	// Single worker, LIFO ready queue: spawning B then A makes A run
	// first, waking B while it is still READY.
	let scheduler = Scheduler::new(1, 4);
	let trace = Arc::new(Mutex::new(Vec::new()));

	let trace_b = Arc::clone(&trace);
	let b = scheduler.spawn(move || {
		#[allow(clippy::unwrap_used)]
		trace_b.lock().unwrap().push("b-before-wait");
		scheduler::wait();
		#[allow(clippy::unwrap_used)]
		trace_b.lock().unwrap().push("b-after-wait");
	});

	let trace_a = Arc::clone(&trace);
	scheduler.spawn(move || {
		scheduler::wake(b);
		#[allow(clippy::unwrap_used)]
		trace_a.lock().unwrap().push("a-woke-b");
	});

	scheduler.start().expect("start worker");
	scheduler.finish();

	#[allow(clippy::unwrap_used)]
	let observed = trace.lock().unwrap().clone();
	assert_eq!(observed, vec!["a-woke-b", "b-before-wait", "b-after-wait"]);
}

#[test]
fn deep_stack_round_trips_through_suspend() {
	const DEPTH: usize = 64 * 1024;

	let scheduler = Scheduler::new(1, 4);
	let ok = Arc::new(Mutex::new(false));

	let ids = publish_ids(&scheduler, 2, |i, ids| {
		let ok = Arc::clone(&ok);

		Box::new(move || {
			#[allow(clippy::unwrap_used)]
			let other = ids.lock().unwrap()[1 - i].unwrap();

			if i == 0 {
				// Deep fiber: fill a large local buffer, suspend, then
				// verify it's untouched after the short fiber ran.
				let mut pad = [0_u8; DEPTH];

				for (idx, byte) in pad.iter_mut().enumerate() {
					#[allow(clippy::cast_possible_truncation)]
					{
						*byte = idx as u8;
					}
				}

				scheduler::wake(other);
				scheduler::wait();

				let intact = pad
					.iter()
					.enumerate()
					.all(|(idx, byte)| *byte == (idx % 256) as u8);

				#[allow(clippy::unwrap_used)]
				{
					*ok.lock().unwrap() = intact;
				}

				scheduler::wake(other);
			} else {
				scheduler::wait();
				scheduler::wake(other);
				scheduler::wait();
			}
		})
	});

	scheduler.start().expect("start worker");
	scheduler.finish();

	#[allow(clippy::unwrap_used)]
	assert!(*ok.lock().unwrap());
	assert_eq!(ids.len(), 2);
}
