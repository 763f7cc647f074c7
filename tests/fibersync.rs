use fiberpool::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn bump(sequence: &AtomicUsize) -> usize {
    sequence.fetch_add(1, Ordering::SeqCst) + 1
}

#[test]
fn mutex_basic() {
    let _pool = WorkerPool::new(1, true).unwrap();
    let mutex = FiberMutex::new();
    let _lock = mutex.lock();
    assert!(mutex.is_locked());
}

#[test]
fn mutex_contention_hands_off_in_order() {
    let pool = WorkerPool::new(1, true).unwrap();
    let mutex = Arc::new(FiberMutex::new());
    let sequence = Arc::new(AtomicUsize::new(0));

    let contender = |fiber_no: usize| {
        let mutex = mutex.clone();
        let sequence = sequence.clone();
        let mut fiber = Fiber::empty();
        fiber
            .reset(move || {
                assert_eq!(bump(&sequence), fiber_no);
                let _lock = mutex.lock();
                assert_eq!(bump(&sequence), fiber_no + 3 + 1);
            })
            .unwrap();
        fiber
    };
    let (f1, f2, f3) = (contender(1), contender(2), contender(3));

    {
        let _lock = mutex.lock();
        pool.schedule_fiber(f1);
        pool.schedule_fiber(f2);
        pool.schedule_fiber(f3);
        pool.dispatch();
        assert_eq!(bump(&sequence), 4);
    }
    pool.dispatch();
    assert_eq!(bump(&sequence), 8);
    assert_eq!(pool.stats().failed, 0);
}

#[test]
#[should_panic(expected = "not recursive")]
fn mutex_not_recursive() {
    let _pool = WorkerPool::new(1, true).unwrap();
    let mutex = FiberMutex::new();
    let _lock = mutex.lock();
    let _again = mutex.lock();
}

#[test]
fn condition_signal() {
    let sequence = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::new(1, true).unwrap();
    let condition = Arc::new(FiberCondition::new(Arc::new(FiberMutex::new())));

    let _lock = condition.mutex().lock();
    let (c, s) = (condition.clone(), sequence.clone());
    pool.schedule(move || {
        assert_eq!(bump(&s), 2);
        c.signal();
    });
    assert_eq!(bump(&sequence), 1);
    condition.wait();
    assert_eq!(bump(&sequence), 3);
}

#[test]
fn condition_broadcast() {
    let sequence = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::new(1, true).unwrap();
    let condition = Arc::new(FiberCondition::new(Arc::new(FiberMutex::new())));

    for expected in 1..=3 {
        let (c, s) = (condition.clone(), sequence.clone());
        pool.schedule(move || {
            assert_eq!(bump(&s), expected * 2);
            let _lock = c.mutex().lock();
            assert_eq!(bump(&s), expected * 2 + 1);
            c.wait();
            assert_eq!(bump(&s), expected + 8);
        });
    }
    assert_eq!(bump(&sequence), 1);
    pool.dispatch();
    assert_eq!(bump(&sequence), 8);
    condition.broadcast();
    pool.dispatch();
    assert_eq!(bump(&sequence), 12);
}

#[test]
fn event_auto_reset() {
    let sequence = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::new(1, true).unwrap();
    let event = Arc::new(FiberEvent::default());

    let (e, s) = (event.clone(), sequence.clone());
    pool.schedule(move || {
        assert_eq!(bump(&s), 2);
        e.set();
    });
    assert_eq!(bump(&sequence), 1);
    event.wait();
    assert_eq!(bump(&sequence), 3);
    event.set();
    event.wait();
    assert_eq!(bump(&sequence), 4);
    assert!(!event.is_set());
}

#[test]
fn event_auto_reset_consumes_one_set_per_wait() {
    let pool = WorkerPool::new(1, true).unwrap();
    let event = Arc::new(FiberEvent::auto_reset());
    let first = Arc::new(AtomicBool::new(false));
    let second = Arc::new(AtomicBool::new(false));

    event.set();
    let (e, f, s) = (event.clone(), first.clone(), second.clone());
    pool.schedule(move || {
        e.wait();
        f.store(true, Ordering::SeqCst);
        e.wait();
        s.store(true, Ordering::SeqCst);
    });
    pool.dispatch();
    assert!(first.load(Ordering::SeqCst));
    assert!(!second.load(Ordering::SeqCst));
    assert!(!event.is_set());

    event.set();
    pool.dispatch();
    assert!(second.load(Ordering::SeqCst));
    assert!(!event.is_set());
}

#[test]
fn event_manual_reset() {
    let sequence = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::new(1, true).unwrap();
    let event = Arc::new(FiberEvent::new(false));

    let (e, s) = (event.clone(), sequence.clone());
    pool.schedule(move || {
        assert_eq!(bump(&s), 2);
        e.set();
    });
    assert_eq!(bump(&sequence), 1);
    event.wait();
    assert_eq!(bump(&sequence), 3);
    // Stays signaled until reset.
    event.wait();
    event.wait();
    assert!(event.is_set());
}

#[test]
fn event_manual_reset_multiple() {
    let sequence = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::new(1, true).unwrap();
    let event = Arc::new(FiberEvent::manual_reset());

    for expected in 1..=3 {
        let (e, s) = (event.clone(), sequence.clone());
        pool.schedule(move || {
            assert_eq!(bump(&s), expected + 1);
            e.wait();
            assert_eq!(bump(&s), expected + 5);
        });
    }
    assert_eq!(bump(&sequence), 1);
    pool.dispatch();
    assert_eq!(bump(&sequence), 5);
    event.set();
    pool.dispatch();
    assert_eq!(bump(&sequence), 9);
    event.wait();
    event.wait();
}

struct EventShared {
    event: FiberEvent,
    destroying: AtomicBool,
}

/// Waits for its event before going away, like an object whose teardown
/// must not race a pending `set`.
struct EventOwner {
    shared: Arc<EventShared>,
}

impl EventOwner {
    fn new() -> Self {
        Self {
            shared: Arc::new(EventShared {
                event: FiberEvent::manual_reset(),
                destroying: AtomicBool::new(false),
            }),
        }
    }

    fn set_event(&self) -> impl FnOnce() + Send + 'static {
        let shared = self.shared.clone();
        move || {
            shared.event.set();
            assert!(!shared.destroying.load(Ordering::SeqCst));
        }
    }
}

impl Drop for EventOwner {
    fn drop(&mut self) {
        self.shared.event.wait();
        self.shared.destroying.store(true, Ordering::SeqCst);
    }
}

#[test]
fn event_destroy_after_set() {
    {
        // The second pool is stopped before the owner goes away.
        let _pool = WorkerPool::new(1, true).unwrap();
        let pool2 = WorkerPool::new(1, false).unwrap();
        let owner = EventOwner::new();
        pool2.schedule(owner.set_event());
        pool2.stop();
    }
    {
        // Declaration order stops the second pool first.
        let _pool = WorkerPool::new(1, true).unwrap();
        let owner = EventOwner::new();
        let pool2 = WorkerPool::new(1, false).unwrap();
        pool2.schedule(owner.set_event());
    }
    {
        let pool = WorkerPool::new(1, true).unwrap();
        let owner = EventOwner::new();
        pool.schedule(owner.set_event());
        pool.stop();
    }
    {
        // Dropping the pool drains it before the owner waits.
        let owner = EventOwner::new();
        let pool = WorkerPool::new(1, true).unwrap();
        pool.schedule(owner.set_event());
    }
    {
        // The owner's wait runs the pending set on this thread.
        let pool = WorkerPool::new(1, true).unwrap();
        let owner = EventOwner::new();
        pool.schedule(owner.set_event());
    }
}

#[test]
fn mutex_unlock_unique() {
    let pool = WorkerPool::new(1, true).unwrap();
    let mutex = Arc::new(FiberMutex::new());
    let acquired = Arc::new(AtomicBool::new(false));

    let mut lock = mutex.lock();
    assert!(!lock.unlock_if_not_unique());
    let (m, a) = (mutex.clone(), acquired.clone());
    pool.schedule(move || {
        let _lock = m.lock();
        a.store(true, Ordering::SeqCst);
    });
    yield_now();
    assert!(!acquired.load(Ordering::SeqCst));
    assert!(lock.unlock_if_not_unique());
    pool.dispatch();
    assert!(acquired.load(Ordering::SeqCst));
    assert!(!mutex.is_locked());
}
