//! Cooperative thread manager.
//!
//! A single ready queue feeds one hart. Context switches happen only at
//! explicit suspension points (yield, condition wait, blocking device I/O,
//! exit); interrupt handlers never switch, they only mark threads ready.
//!
//! All scheduling state lives in one [`Scheduler`] behind a spin mutex that
//! is only ever taken with interrupts disabled, so an interrupt handler can
//! safely wake threads from the same hart.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch::riscv::halt_success;
use crate::arch::riscv::irq::{self, IrqGuard};
use crate::arch::riscv::switch::{context_switch, Context};
use crate::error::{Error, Result};

/// Maximum number of threads, including main and idle.
pub const NTHR: usize = 16;

/// Thread identifier: an index into the thread table.
pub type Tid = usize;

const MAIN_TID: Tid = 0;
const IDLE_TID: Tid = NTHR - 1;

const STACK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Blocked on a condition.
    Waiting,
    /// Currently executing; only ever observed by the thread itself.
    Running,
    /// On the ready queue.
    Ready,
    /// Finished, waiting to be reclaimed by its parent.
    Exited,
}

struct Thread {
    ctx: Context,
    name: &'static str,
    state: State,
    parent: Option<Tid>,
    /// Signalled each time one of this thread's children exits.
    child_exit: Condition,
    /// Locks currently held; force-released if the thread exits holding them.
    held_locks: Vec<Lock>,
    /// Startup closure, consumed on first entry.
    entry: Option<Box<dyn FnOnce() + Send>>,
    /// Stack backing store; `None` for the main thread, which runs on the
    /// boot stack. Freed together with the record at reclaim time.
    #[allow(dead_code)]
    stack: Option<Box<[u8]>>,
}

impl Thread {
    fn new(name: &'static str) -> Self {
        Self {
            ctx: Context::new(),
            name,
            state: State::Ready,
            parent: None,
            child_exit: Condition::new("child_exit"),
            held_locks: Vec::new(),
            entry: None,
            stack: None,
        }
    }

    /// Allocates a stack and aims the saved context at the startup
    /// trampoline.
    fn give_stack(&mut self) {
        let stack = vec![0u8; STACK_SIZE].into_boxed_slice();
        let top = (stack.as_ptr() as usize + STACK_SIZE) & !0xf;

        self.ctx.prepare(top);
        self.stack = Some(stack);
    }
}

struct Scheduler {
    threads: [Option<Box<Thread>>; NTHR],
    ready: VecDeque<Tid>,
    current: Tid,
}

impl Scheduler {
    fn new() -> Self {
        let mut threads: [Option<Box<Thread>>; NTHR] = Default::default();

        // The main thread adopts the boot stack it is already running on.
        let mut main = Box::new(Thread::new("main"));
        main.state = State::Running;
        threads[MAIN_TID] = Some(main);

        // The idle thread keeps the ready queue nonempty forever.
        let mut idle = Box::new(Thread::new("idle"));
        idle.state = State::Ready;
        idle.entry = Some(Box::new(idle_loop));
        idle.give_stack();
        threads[IDLE_TID] = Some(idle);

        let mut ready = VecDeque::with_capacity(NTHR);
        ready.push_back(IDLE_TID);

        Self {
            threads,
            ready,
            current: MAIN_TID,
        }
    }
}

lazy_static! {
    static ref SCHED: Mutex<Scheduler> = Mutex::new(Scheduler::new());
}

static INITIALIZED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

/// Brings up the thread manager (main and idle threads).
pub fn init() {
    lazy_static::initialize(&SCHED);
    INITIALIZED.store(true, core::sync::atomic::Ordering::Relaxed);
}

/// Whether the thread manager has been brought up yet.
pub fn initialized() -> bool {
    INITIALIZED.load(core::sync::atomic::Ordering::Relaxed)
}

/// Returns the id of the running thread.
pub fn current() -> Tid {
    irq::with_disabled(|| SCHED.lock().current)
}

/// Returns the name of the running thread.
pub fn current_name() -> &'static str {
    irq::with_disabled(|| {
        let sched = SCHED.lock();
        sched.threads[sched.current].as_ref().unwrap().name
    })
}

/// Creates a new thread running `entry` and queues it behind every thread
/// that is already runnable.
pub fn spawn(name: &'static str, entry: impl FnOnce() + Send + 'static) -> Result<Tid> {
    let mut thread = Box::new(Thread::new(name));
    thread.give_stack();
    thread.entry = Some(Box::new(entry));

    let _guard = IrqGuard::new();
    let mut sched = SCHED.lock();
    let sched = &mut *sched;

    let tid = match (1..NTHR).find(|&i| sched.threads[i].is_none()) {
        Some(tid) => tid,
        None => return Err(Error::OutOfThreads),
    };

    thread.parent = Some(sched.current);
    thread.state = State::Ready;

    sched.threads[tid] = Some(thread);
    sched.ready.push_back(tid);

    Ok(tid)
}

/// Yields the processor to the next ready thread.
pub fn yield_now() {
    suspend();
}

/// Terminates the running thread.
///
/// The main thread exiting means the system is done and shuts down cleanly.
/// Any other thread releases the locks it still holds, signals its parent,
/// and never runs again.
pub fn exit() -> ! {
    let me = current();

    if me == MAIN_TID {
        halt_success();
    }

    release_all_locks(me);

    let parent_cond = irq::with_disabled(|| {
        let mut sched = SCHED.lock();
        let sched = &mut *sched;

        sched.threads[me].as_mut().unwrap().state = State::Exited;

        let parent = sched.threads[me].as_ref().unwrap().parent;
        parent.and_then(|p| sched.threads[p].as_ref().map(|t| t.child_exit.clone()))
    });

    if let Some(cond) = parent_cond {
        cond.broadcast();
    }

    suspend();
    unreachable!("exited thread was rescheduled");
}

/// Waits for a child thread to exit and reclaims it.
///
/// With `Some(tid)`, waits for that specific child; with `None`, waits for
/// any child. Fails with [`Error::Invalid`] if the target is not a child of
/// the calling thread, or if the caller has no children at all.
pub fn join(target: Option<Tid>) -> Result<Tid> {
    let me = current();
    let child_exit = irq::with_disabled(|| {
        let sched = SCHED.lock();
        sched.threads[me].as_ref().unwrap().child_exit.clone()
    });

    match target {
        Some(tid) => {
            if tid == MAIN_TID || tid == IDLE_TID || tid >= NTHR {
                return Err(Error::Invalid);
            }

            loop {
                let exited = irq::with_disabled(|| {
                    let sched = SCHED.lock();
                    match sched.threads[tid].as_ref() {
                        Some(t) if t.parent == Some(me) => Ok(t.state == State::Exited),
                        _ => Err(Error::Invalid),
                    }
                })?;

                if exited {
                    reclaim(tid);
                    return Ok(tid);
                }

                child_exit.wait();
            }
        }
        None => loop {
            let (any, exited) = irq::with_disabled(|| {
                let sched = SCHED.lock();
                let mut any = false;
                let mut exited = None;

                for i in 1..NTHR {
                    if i == IDLE_TID {
                        continue;
                    }
                    if let Some(t) = sched.threads[i].as_ref() {
                        if t.parent == Some(me) {
                            any = true;
                            if t.state == State::Exited {
                                exited = Some(i);
                                break;
                            }
                        }
                    }
                }

                (any, exited)
            });

            if let Some(tid) = exited {
                reclaim(tid);
                return Ok(tid);
            }
            if !any {
                return Err(Error::Invalid);
            }

            child_exit.wait();
        },
    }
}

/// Frees an exited thread's slot, handing its children to their grandparent.
fn reclaim(tid: Tid) {
    let thread = irq::with_disabled(|| {
        let mut sched = SCHED.lock();
        let sched = &mut *sched;

        let dead = sched.threads[tid].take().expect("reclaiming an empty slot");
        assert!(dead.state == State::Exited, "reclaiming a live thread");

        for t in sched.threads.iter_mut().flatten() {
            if t.parent == Some(tid) {
                t.parent = dead.parent;
            }
        }

        dead
    });

    // Stack and thread record are freed outside the critical section.
    drop(thread);
}

fn release_all_locks(me: Tid) {
    let held = irq::with_disabled(|| {
        let mut sched = SCHED.lock();
        core::mem::take(&mut sched.threads[me].as_mut().unwrap().held_locks)
    });

    for lock in held {
        lock.force_release();
    }
}

/// Suspends the running thread and resumes the next ready one.
///
/// A thread that is still `Running` goes to the tail of the ready queue; one
/// that already transitioned itself (waiting or exited) is left alone. The
/// ready queue can never drain because the idle thread is always runnable.
fn suspend() {
    let guard = IrqGuard::new();

    let switch = {
        let mut sched = SCHED.lock();
        let sched = &mut *sched;
        let cur = sched.current;

        if let Some(t) = sched.threads[cur].as_mut() {
            if t.state == State::Running {
                t.state = State::Ready;
                sched.ready.push_back(cur);
            }
        }

        let next = sched
            .ready
            .pop_front()
            .expect("ready queue empty at suspend");
        sched.threads[next].as_mut().unwrap().state = State::Running;
        sched.current = next;

        if next == cur {
            None
        } else {
            let old: *mut Context = &mut sched.threads[cur].as_mut().unwrap().ctx;
            let new: *const Context = &sched.threads[next].as_ref().unwrap().ctx;
            Some((old, new))
        }
    };

    if let Some((old, new)) = switch {
        // The incoming thread resumes with interrupts enabled; our own enable
        // state comes back when the guard drops after we are rescheduled.
        irq::enable();

        // SAFETY: both contexts live in the thread table, whose boxes are
        // never moved or freed while their thread can still run.
        unsafe { context_switch(old, new) };
    }

    drop(guard);
}

/// First Rust code executed by a new thread; runs its startup closure.
#[no_mangle]
extern "C" fn thread_entry() -> ! {
    let entry = irq::with_disabled(|| {
        let mut sched = SCHED.lock();
        let cur = sched.current;
        sched.threads[cur].as_mut().unwrap().entry.take()
    });

    if let Some(entry) = entry {
        entry();
    }

    exit();
}

/// The idle thread: yields while others are runnable, otherwise halts the
/// hart until an interrupt arrives.
fn idle_loop() {
    let ready_empty = || irq::with_disabled(|| SCHED.lock().ready.is_empty());

    loop {
        while !ready_empty() {
            yield_now();
        }

        // Re-check with interrupts disabled so an ISR cannot mark a thread
        // ready between the check and the wfi; a pending interrupt still
        // terminates the wfi and is taken once the guard drops.
        let _guard = IrqGuard::new();
        if SCHED.lock().ready.is_empty() {
            ::riscv::instructions::wfi();
        }
    }
}

/// An ordered queue of threads that wake together on a broadcast.
#[derive(Clone)]
pub struct Condition {
    inner: Arc<CondInner>,
}

struct CondInner {
    name: &'static str,
    waiters: Mutex<VecDeque<Tid>>,
}

impl Condition {
    /// Creates a condition with a diagnostic name.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(CondInner {
                name,
                waiters: Mutex::new(VecDeque::with_capacity(NTHR)),
            }),
        }
    }

    /// Blocks the running thread until the next broadcast.
    pub fn wait(&self) {
        {
            let _guard = IrqGuard::new();
            let mut sched = SCHED.lock();
            let cur = sched.current;
            let t = sched.threads[cur].as_mut().unwrap();

            assert!(
                t.state == State::Running,
                "condition {} waited on by a non-running thread",
                self.inner.name
            );

            t.state = State::Waiting;
            self.inner.waiters.lock().push_back(cur);
        }

        suspend();
    }

    /// Wakes every waiting thread, in the order they queued up.
    ///
    /// Safe to call from interrupt handlers: no memory is allocated and no
    /// suspension happens here.
    pub fn broadcast(&self) {
        let _guard = IrqGuard::new();
        let mut sched = SCHED.lock();
        let sched = &mut *sched;
        let mut waiters = self.inner.waiters.lock();

        while let Some(tid) = waiters.pop_front() {
            let t = sched.threads[tid].as_mut().expect("waiter has no record");
            debug_assert!(t.state == State::Waiting);
            t.state = State::Ready;
            sched.ready.push_back(tid);
        }
    }
}

enum Claim {
    First,
    Again,
    Contended,
}

/// A sleeping mutual-exclusion lock with recursive acquisition.
///
/// Contended acquires block on the lock's release condition; waiters are
/// served in the order they arrived. A thread that exits while holding locks
/// has them force-released with all waiters woken.
#[derive(Clone)]
pub struct Lock {
    inner: Arc<LockInner>,
}

struct LockInner {
    state: Mutex<LockState>,
    released: Condition,
}

struct LockState {
    owner: Option<Tid>,
    count: u32,
}

impl Lock {
    /// Creates a free lock.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LockInner {
                state: Mutex::new(LockState {
                    owner: None,
                    count: 0,
                }),
                released: Condition::new("lock_release"),
            }),
        }
    }

    /// Acquires the lock, sleeping while another thread owns it. Re-acquiring
    /// a lock the caller already owns just bumps the count.
    pub fn acquire(&self) {
        let me = current();

        loop {
            let claim = irq::with_disabled(|| {
                let mut st = self.inner.state.lock();
                match st.owner {
                    None => {
                        st.owner = Some(me);
                        st.count = 1;
                        Claim::First
                    }
                    Some(owner) if owner == me => {
                        st.count += 1;
                        Claim::Again
                    }
                    Some(_) => Claim::Contended,
                }
            });

            match claim {
                Claim::First => {
                    // First acquisition: remember it in the holder's list.
                    irq::with_disabled(|| {
                        let mut sched = SCHED.lock();
                        let cur = sched.current;
                        sched.threads[cur]
                            .as_mut()
                            .unwrap()
                            .held_locks
                            .push(self.clone());
                    });
                    return;
                }
                Claim::Again => return,
                Claim::Contended => self.inner.released.wait(),
            }
        }
    }

    /// Releases one level of ownership; on the last release the lock becomes
    /// free and all waiters are woken.
    pub fn release(&self) {
        let me = current();

        let fully = irq::with_disabled(|| {
            let mut st = self.inner.state.lock();

            assert!(st.owner == Some(me), "lock released by a non-owner");
            assert!(st.count > 0, "lock released while free");

            st.count -= 1;
            if st.count == 0 {
                st.owner = None;
                true
            } else {
                false
            }
        });

        if fully {
            irq::with_disabled(|| {
                let mut sched = SCHED.lock();
                let cur = sched.current;
                let held = &mut sched.threads[cur].as_mut().unwrap().held_locks;
                if let Some(i) = held.iter().position(|l| Arc::ptr_eq(&l.inner, &self.inner)) {
                    held.remove(i);
                }
            });

            self.inner.released.broadcast();
        }
    }

    /// Runs `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        self.acquire();
        let r = f();
        self.release();
        r
    }

    /// Tears the lock away from its (exiting) owner and wakes all waiters.
    fn force_release(&self) {
        irq::with_disabled(|| {
            let mut st = self.inner.state.lock();
            st.owner = None;
            st.count = 0;
        });

        self.inner.released.broadcast();
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}
