use std::collections::BTreeSet;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use wirebypass::PollSync;

fn wait_until(mut cond: impl FnMut() -> bool) {
	let deadline = Instant::now() + Duration::from_secs(10);
	while !cond() {
		assert!(Instant::now() < deadline, "condition not reached");
		thread::yield_now();
	}
}

#[test]
fn reclaim_waits_for_poll_acknowledgment() {
	let sync = Arc::new(PollSync::new());
	let guard = sync.poll();

	let (tx, rx) = mpsc::channel();
	let reclaimer = {
		let sync = Arc::clone(&sync);
		thread::spawn(move || {
			let ticket = sync.reclaim_sync();
			tx.send((ticket, sync.reclaim_ack())).unwrap();
		})
	};

	wait_until(|| sync.reclaim_request() == 1);
	assert!(rx.recv_timeout(Duration::from_millis(50)).is_err(), "reclaim returned while poll in progress");

	guard.ack();
	let (ticket, ack_seen) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
	assert_eq!(ticket, 0);
	assert!(ack_seen.wrapping_sub(ticket) as i32 > 0);
	assert!(sync.is_polling(), "ack must not release the poll lock");

	drop(guard);
	assert!(!sync.is_polling());
	reclaimer.join().unwrap();
}

#[test]
fn ending_the_iteration_releases_reclaimers() {
	let sync = Arc::new(PollSync::new());
	let guard = sync.try_poll().unwrap();
	assert!(sync.try_poll().is_none());

	let reclaimer = {
		let sync = Arc::clone(&sync);
		thread::spawn(move || sync.reclaim_sync())
	};
	wait_until(|| sync.reclaim_request() == 1);
	drop(guard);

	assert_eq!(reclaimer.join().unwrap(), 0);
	assert_eq!(sync.reclaim_ack(), 1);
}

#[test]
fn concurrent_reclaimers_get_distinct_tickets() {
	const THREADS: usize = 8;
	const ROUNDS: usize = 100;
	let sync = Arc::new(PollSync::new());
	let barrier = Arc::new(Barrier::new(THREADS));

	let handles: Vec<_> = (0..THREADS)
		.map(|_| {
			let sync = Arc::clone(&sync);
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				barrier.wait();
				(0..ROUNDS).map(|_| sync.reclaim_sync()).collect::<Vec<_>>()
			})
		})
		.collect();

	let mut tickets = BTreeSet::new();
	for h in handles {
		for t in h.join().unwrap() {
			assert!(tickets.insert(t), "ticket {t} handed out twice");
		}
	}
	assert_eq!(tickets.len(), THREADS * ROUNDS);
	assert_eq!(sync.reclaim_request() as usize, THREADS * ROUNDS);
}

#[test]
fn reclaimers_progress_with_a_busy_poller() {
	let sync = Arc::new(PollSync::new());
	let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

	let poller = {
		let sync = Arc::clone(&sync);
		let stop = Arc::clone(&stop);
		thread::spawn(move || {
			let mut iterations = 0u64;
			while !stop.load(std::sync::atomic::Ordering::Relaxed) {
				let _guard = sync.poll();
				iterations += 1;
			}
			iterations
		})
	};

	for _ in 0..200 {
		sync.reclaim_sync();
	}
	stop.store(true, std::sync::atomic::Ordering::Relaxed);
	poller.join().unwrap();
	assert_eq!(sync.reclaim_request(), 200);
}

#[test]
fn second_poller_waits_for_the_current_pass() {
	let sync = Arc::new(PollSync::new());
	let guard = sync.poll();

	let (tx, rx) = mpsc::channel();
	let waiter = {
		let sync = Arc::clone(&sync);
		thread::spawn(move || {
			let pass = sync.poll();
			tx.send(()).unwrap();
			drop(pass);
		})
	};

	// well past the spin budget, so the waiter is yielding by now
	assert!(rx.recv_timeout(Duration::from_millis(50)).is_err(), "poll lock taken twice");
	drop(guard);
	rx.recv_timeout(Duration::from_secs(10)).unwrap();
	waiter.join().unwrap();
	assert!(!sync.is_polling());
}
