//! Round-robin, multi-processor scheduler built on [`crate::fiber`].
//!
//! Each worker owns a native thread, a ready queue, a wait set, and a
//! pending-wake counter per fiber so a wake that arrives before its
//! matching wait is never lost. Workers never share fibers: a fiber is
//! bound to one worker for its whole life, chosen at creation time by a
//! chunked round-robin stride over the creation sequence.

mod lock;

use std::cell::Cell;
use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use self::lock::Lock;
use crate::fiber::{self, Callbacks, Fiber, Handle, Start};
use crate::opt::hint;
use crate::{assert_unsafe_precondition, panic_nounwind};

/// Floor on the chunk size used by the group-assignment stride, matching
/// the reference scheduler's `rr_thread_init`.
const MIN_CHUNK: usize = 128;

/// Source of `Task::generation`. Process-wide rather than per-`Scheduler`
/// so a `FiberId` from one scheduler can never alias a `Task` from
/// another that happens to land on the same freed address.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// A scheduled fiber plus the round-robin bookkeeping it needs. `fiber`
/// must stay the first field: a [`fiber::Handle`] handed back by the
/// dispatcher is reinterpreted as a pointer to this whole struct.
#[repr(C)]
struct Task {
	fiber: Fiber,
	/// Position within whichever of `ready`/`wait` currently holds this
	/// task. Meaningless while the task is RUN.
	idx: Cell<usize>,
	pending_wake: Cell<usize>,
	/// Stamped at [`Scheduler::spawn`] from [`NEXT_GENERATION`], never
	/// mutated afterward. Lets a [`FiberId`] detect that it has outlived
	/// the `Task` it was issued for, even if the allocator has since
	/// handed the same address to an unrelated `Task`.
	generation: u64
}

/* Safety: a Task only ever runs on the one worker thread that owns it;
 * the raw pointer is moved between threads only while idle (creation,
 * wake from a sibling fiber on the same worker) */
unsafe impl Send for Task {}

/// Opaque reference to a scheduled fiber, returned by [`Scheduler::spawn`]
/// and passed to [`wake`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FiberId(NonNull<Task>, u64);

/* Safety: see Task */
unsafe impl Send for FiberId {}
unsafe impl Sync for FiberId {}

struct State {
	ready: Vec<NonNull<Task>>,
	wait: Vec<NonNull<Task>>,
	run: Option<NonNull<Task>>,
	exit: bool
}

struct Worker {
	idx: usize,
	capacity: usize,
	state: Lock<State>
}

/* Safety: all mutable access to a Worker's State goes through its Lock;
 * `idx`/`capacity` are write-once at construction */
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
	fn new(idx: usize, capacity: usize) -> Self {
		Self {
			idx,
			capacity,
			state: Lock::new(State { ready: Vec::new(), wait: Vec::new(), run: None, exit: false })
		}
	}
}

impl Callbacks for Worker {
	fn next(&self) -> Option<Handle> {
		let mut guard = self.state.lock();

		loop {
			if hint::likely(!guard.ready.is_empty()) {
				break;
			}

			if guard.exit && guard.wait.is_empty() {
				return None;
			}

			guard = self.state.wait(guard);
		}

		#[allow(clippy::unwrap_used)]
		let task = guard.ready.pop().unwrap();

		guard.run = Some(task);
		drop(guard);

		/* Safety: `task` is a live Task owned by this worker; no other
		 * reference to its Fiber is held while it's RUN */
		let fiber_ref = unsafe { &mut (*task.as_ptr()).fiber };

		Some(Handle::new(fiber_ref))
	}

	fn alloc(&self, len: usize) -> NonNull<u8> {
		let buf = vec![0_u8; len].into_boxed_slice();

		#[allow(clippy::unwrap_used)]
		NonNull::new(Box::into_raw(buf).cast::<u8>()).unwrap()
	}

	unsafe fn free(&self, ptr: NonNull<u8>, len: usize) {
		/* Safety: guaranteed by caller: `ptr`/`len` came from this `alloc` */
		let _ = unsafe { Box::from_raw(std::slice::from_raw_parts_mut(ptr.as_ptr(), len)) };
	}

	fn release(&self, fiber: Handle) {
		let task_ptr = fiber.as_raw().cast::<Task>();

		/* Safety: every Handle this worker hands out points at the first
		 * field of a Task allocated by `Scheduler::spawn` */
		let task = unsafe { Box::from_raw(task_ptr) };

		drop(task);
	}
}

fn task_of(handle: Handle) -> NonNull<Task> {
	/* Safety: see `Worker::release` */
	unsafe { NonNull::new_unchecked(handle.as_raw().cast::<Task>()) }
}

fn worker_of(task: &Task) -> &Worker {
	let ptr = task.fiber.owner().cast::<Worker>();

	assert_unsafe_precondition!(!ptr.is_null(), "task has no owning worker; was it created by Scheduler::spawn?");

	/* Safety: `owner` is set to a live `&Worker` at spawn time and never
	 * changes afterward (invariant 2) */
	unsafe { &*ptr }
}

unsafe fn run_closure<F: FnOnce()>(arg: *mut ()) {
	/* Safety: `arg` was produced by `Box::into_raw(Box::new(f))` in
	 * `Scheduler::spawn`, for this same `F` */
	let f = unsafe { Box::from_raw(arg.cast::<F>()) };

	f();
	done();
}

/// Owns a fixed set of workers and the native threads running them.
pub struct Scheduler {
	workers: Vec<Arc<Worker>>,
	chunk: usize,
	next_seq: AtomicUsize,
	threads: Mutex<Vec<JoinHandle<()>>>
}

impl Scheduler {
	/// Prepares `processors` workers, each sized to hold up to `capacity`
	/// fibers between its ready queue and wait set combined.
	#[must_use]
	pub fn new(processors: usize, capacity: usize) -> Self {
		assert!(processors > 0, "a scheduler needs at least one worker");

		#[cfg(feature = "single-thread")]
		assert!(processors == 1, "the single-thread build supports exactly one worker");

		let chunk = (capacity / processors).max(MIN_CHUNK);
		let workers = (0..processors).map(|idx| Arc::new(Worker::new(idx, capacity))).collect();

		Self { workers, chunk, next_seq: AtomicUsize::new(0), threads: Mutex::new(Vec::new()) }
	}

	/// Launches one native thread per worker, each entering
	/// [`fiber::dispatch_run`] with itself as the callbacks.
	///
	/// # Errors
	/// Returns an error if spawning any of the underlying OS threads
	/// fails; workers already started are left running.
	pub fn start(&self) -> io::Result<()> {
		#[allow(clippy::unwrap_used)]
		let mut threads = self.threads.lock().unwrap();

		for worker in &self.workers {
			let worker = Arc::clone(worker);
			let idx = worker.idx;

			let handle = thread::Builder::new()
				.name(format!("cofiber-worker-{idx}"))
				.spawn(move || {
					/* Safety: exactly one `dispatch_run` call per thread,
					 * never entered recursively */
					unsafe { fiber::dispatch_run(&*worker) };
				})?;

			threads.push(handle);
		}

		Ok(())
	}

	/// Creates a fiber running `f`, binding it to a worker chosen by the
	/// chunked round-robin stride over the creation sequence.
	pub fn spawn<F>(&self, f: F) -> FiberId
	where
		F: FnOnce() + Send + 'static
	{
		let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
		let worker = &self.workers[(seq / self.chunk) % self.workers.len()];

		let arg = Box::into_raw(Box::new(f)).cast::<()>();

		/* Safety: `run_closure::<F>` matches the `F` erased into `arg` above */
		let start = unsafe { Start::new(run_closure::<F>, arg) };

		let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
		let task = Box::new(Task {
			fiber: Fiber::new(start),
			idx: Cell::new(0),
			pending_wake: Cell::new(0),
			generation
		});

		task.fiber.set_owner(ptr::from_ref(worker.as_ref()).cast::<()>());

		let task_ptr = NonNull::from(Box::leak(task));

		let mut guard = worker.state.lock();

		assert!(
			guard.ready.len() + guard.wait.len() < worker.capacity,
			"worker's ready/wait queues exceeded their configured capacity"
		);

		let was_empty = guard.ready.is_empty();

		guard.ready.push(task_ptr);
		drop(guard);

		if was_empty {
			worker.state.notify();
		}

		FiberId(task_ptr, generation)
	}

	/// Signals every worker to exit once its queues drain, then joins all
	/// worker threads.
	///
	/// # Panics
	/// Panics (via `panic_nounwind!`) if a worker thread panicked instead
	/// of returning normally.
	pub fn finish(&self) {
		for worker in &self.workers {
			let mut guard = worker.state.lock();

			guard.exit = true;
			drop(guard);
			worker.state.notify();
		}

		#[allow(clippy::unwrap_used)]
		let mut threads = self.threads.lock().unwrap();

		for handle in threads.drain(..) {
			if handle.join().is_err() {
				panic_nounwind!("a worker thread panicked instead of returning from dispatch_run");
			}
		}
	}
}

/// Called by the currently running fiber to block until woken. If a wake
/// already arrived (pending-wake counter > 0), returns immediately
/// without suspending and consumes one pending wake.
///
/// # Panics
/// Panics (fatal) if called outside a fiber running under a `Scheduler`,
/// or if the wait set is already at capacity.
pub fn wait() {
	let task = task_of(fiber::fiber_self());

	/* Safety: the currently running fiber's Task is always live */
	let task_ref = unsafe { task.as_ref() };
	let worker = worker_of(task_ref);

	let mut guard = worker.state.lock();

	assert_unsafe_precondition!(
		guard.run == Some(task),
		"wait() called by a fiber that is not this worker's current RUN fiber"
	);

	let pending = task_ref.pending_wake.get();

	if pending > 0 {
		task_ref.pending_wake.set(pending - 1);
		return;
	}

	assert_unsafe_precondition!(guard.wait.len() < worker.capacity, "wait set exceeded its configured capacity");

	task_ref.idx.set(guard.wait.len());
	guard.wait.push(task);
	guard.run = None;
	drop(guard);

	/* Safety: called from within the fiber currently running on this
	 * thread, under `dispatch_run` */
	unsafe { fiber::fiber_suspend() };
}

/// Wakes `target`. If it is currently waiting, moves it to the ready
/// queue and signals its worker; otherwise increments its pending-wake
/// counter so the next `wait()` it performs returns immediately.
///
/// # Panics
/// Panics (fatal) if called from a fiber on a different worker than
/// `target`'s — cross-worker wake is not supported — or if `target` is
/// stale, i.e. its fiber has already terminated and `release` has reclaimed
/// (or the allocator has since reused) the `Task` it named.
pub fn wake(target: FiberId) {
	let FiberId(task, generation) = target;

	/* Safety: `release` frees a Task's storage only after its fiber has
	 * terminated, so a stale `target` may read freed or reused memory here;
	 * the generation check immediately below is what makes that a checked
	 * invariant violation instead of silent corruption */
	let task_ref = unsafe { task.as_ref() };

	assert_unsafe_precondition!(
		task_ref.generation == generation,
		"wake() called with a stale FiberId whose fiber has already terminated"
	);

	let worker = worker_of(task_ref);

	let caller = task_of(fiber::fiber_self());
	/* Safety: the caller's Task is always live */
	let caller_worker = worker_of(unsafe { caller.as_ref() });

	assert_unsafe_precondition!(
		ptr::eq(caller_worker, worker),
		"wake() called across workers, which is not supported"
	);

	let mut guard = worker.state.lock();

	if guard.run == Some(task) {
		task_ref.pending_wake.set(task_ref.pending_wake.get() + 1);
		return;
	}

	let idx = task_ref.idx.get();
	let in_wait = idx < guard.wait.len() && guard.wait[idx] == task;

	if !in_wait {
		task_ref.pending_wake.set(task_ref.pending_wake.get() + 1);
		return;
	}

	let last = guard.wait.len() - 1;

	guard.wait[idx] = guard.wait[last];

	/* Safety: the task moved into slot `idx` is a live Task on this worker */
	unsafe { guard.wait[idx].as_ref() }.idx.set(idx);

	guard.wait.pop();

	let was_empty = guard.ready.is_empty();

	guard.ready.push(task);
	drop(guard);

	if was_empty {
		worker.state.notify();
	}
}

/// Called by a fiber about to return from its entry function: releases
/// its saved-stack buffer. The fiber descriptor itself is reclaimed by
/// the dispatcher once this fiber actually returns (see
/// `Worker::release`).
pub fn done() {
	let task = task_of(fiber::fiber_self());

	/* Safety: the currently running fiber's Task is always live */
	let task_ref = unsafe { task.as_ref() };
	let worker = worker_of(task_ref);

	/* Safety: no other reference to this fiber exists while it runs */
	if let Some((ptr, len)) = unsafe { task_ref.fiber.take_saved() } {
		/* Safety: `ptr`/`len` came from this same worker's `alloc` */
		unsafe { worker.free(ptr, len) };
	}
}
