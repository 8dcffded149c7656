use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use rstest::rstest;

use super::*;
use crate::TaskError;

fn single_worker(name: &str) -> Arc<WorkerPool> {
	Arc::new(WorkerPool::new(PoolConfig {
		threads: 1,
		thread_name: name.to_string(),
		..PoolConfig::default()
	}))
}

#[test]
fn submitted_tasks_run_on_named_workers() {
	let pool = WorkerPool::new(PoolConfig {
		threads: 2,
		thread_name: "named".to_string(),
		..PoolConfig::default()
	});
	let task = pool.submit("whoami", || std::thread::current().name().map(str::to_string));

	let name = task.get().unwrap().unwrap_or_default();
	assert!(name.starts_with("named-"), "unexpected worker name {name}");
	assert_eq!(pool.stats().threads, 2);
}

#[test]
fn posting_the_same_task_twice_runs_it_once() {
	let pool = WorkerPool::new(PoolConfig::default());
	let counter = Arc::new(AtomicUsize::new(0));
	let task = {
		let counter = Arc::clone(&counter);
		pool.task("once", move || counter.fetch_add(1, Ordering::SeqCst))
	};

	pool.post(&task);
	pool.post(&task);
	let first = task.get();
	let second = task.clone().get();

	assert_eq!(first, Ok(0));
	assert_eq!(second, Ok(0));
	assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[rstest]
#[case::zero_threads(PoolConfig { threads: 0, ..PoolConfig::default() })]
#[case::after_shutdown(PoolConfig { threads: 1, ..PoolConfig::default() })]
fn post_runs_inline_without_live_workers(#[case] config: PoolConfig) {
	let pool = WorkerPool::new(config);
	pool.shutdown();
	let caller = std::thread::current().id();

	let task = pool.submit("inline", move || std::thread::current().id() == caller);

	assert!(task.is_complete());
	assert_eq!(task.get(), Ok(true));
	assert!(pool.stats().shut_down);
}

#[test]
fn nested_task_queued_behind_its_only_worker_completes() {
	let pool = single_worker("nested");
	let inner_pool = Arc::clone(&pool);
	let outer = pool.submit("outer", move || {
		let inner = inner_pool.submit("inner", || std::thread::current().name().map(str::to_string));
		inner.get()
	});

	let started = Instant::now();
	let inner_thread = outer.get().unwrap().unwrap();
	assert_eq!(inner_thread.as_deref(), Some("nested-0"));
	assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn task_waiting_on_itself_on_single_worker_terminates() {
	let pool = single_worker("selfish");
	let slot: Arc<Mutex<Option<TaskHandle<Result<(), TaskError>>>>> = Arc::new(Mutex::new(None));
	let counter = Arc::new(AtomicUsize::new(0));

	let task = {
		let slot = Arc::clone(&slot);
		let counter = Arc::clone(&counter);
		pool.task("selfish", move || {
			counter.fetch_add(1, Ordering::SeqCst);
			let me = slot.lock().clone().expect("handle stored before post");
			me.wait();
			me.get().map(|_| ())
		})
	};
	*slot.lock() = Some(task.clone());
	pool.post(&task);

	assert!(task.wait_for(Duration::from_secs(5)));
	assert_eq!(task.get(), Ok(Err(TaskError::Reentrant)));
	assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn queued_task_abandoned_by_shutdown_runs_for_its_waiter() {
	let pool = single_worker("abandon");
	let (release, gate) = mpsc::channel::<()>();
	let blocker = pool.submit("blocker", move || {
		let _ = gate.recv();
	});
	let counter = Arc::new(AtomicUsize::new(0));
	let queued = {
		let counter = Arc::clone(&counter);
		pool.submit("queued", move || counter.fetch_add(1, Ordering::SeqCst) + 1)
	};

	let stopper = {
		let pool = Arc::clone(&pool);
		std::thread::spawn(move || pool.shutdown())
	};
	release.send(()).unwrap();
	stopper.join().unwrap();

	assert_eq!(blocker.get(), Ok(()));
	assert_eq!(queued.get(), Ok(1));
	assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_task_does_not_kill_the_worker() {
	let pool = single_worker("sturdy");
	let bad: TaskHandle<u8> = pool.submit("bad", || -> u8 { panic!("worker panic") });
	assert!(matches!(bad.get(), Err(TaskError::Panicked(_))));

	let good = pool.submit("good", || std::thread::current().name().map(str::to_string));
	assert_eq!(good.get().unwrap().as_deref(), Some("sturdy-0"));
}
