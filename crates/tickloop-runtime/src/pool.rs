//! Looper pools
//!
//! A [`LooperPool`] is a fixed set of threaded loopers plus a balancer.
//! Registrations go to whichever looper the balancer picks; callers that
//! need several registrations on one looper (a coroutine tree, a stateful
//! sequence) take a handle with [`LogicLooperPool::get_looper`] and register
//! on it directly. Individual pooled handles refuse `shutdown`; the pool
//! shuts all of its loopers down together.
//!
//! [`ManualLooperPool`] wraps a single [`ManualLooper`] behind the same
//! interface for deterministic tests.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tickloop_core::{
    kdebug, kinfo, ActionOptions, Completion, LooperError, LooperId, LooperResult,
};

use crate::action::{ActionOutcome, LooperAction};
use crate::balancer::{LooperPoolBalancer, RoundRobinBalancer};
use crate::config::{defaults, frame_time_of, LooperConfig};
use crate::context::ActionContext;
use crate::looper::{LogicLooper, Looper, LooperExt};
use crate::manual::ManualLooper;
use crate::tls;
use crate::tracker::PoolStats;

/// A set of loopers sharing one registration surface
pub trait LogicLooperPool: Send + Sync {
    /// Loopers in the pool (pooled handles)
    fn loopers(&self) -> &[Arc<dyn LogicLooper>];

    /// Looper chosen by the pool's balancer
    fn get_looper(&self) -> Arc<dyn LogicLooper>;

    /// Shut every looper down; resolves once all have exited
    fn shutdown(&self, grace: Duration) -> LooperResult<Completion<()>>;

    fn stats(&self) -> PoolStats {
        PoolStats::from_loopers(self.loopers().iter().map(|l| l.stats()).collect())
    }
}

/// Registration helpers for every [`LogicLooperPool`]
///
/// Each call goes to the looper picked by [`LogicLooperPool::get_looper`].
pub trait LooperPoolExt: LogicLooperPool {
    fn register<F, R>(&self, f: F) -> LooperResult<Completion<bool>>
    where
        F: FnMut(&ActionContext) -> R + Send + 'static,
        R: ActionOutcome,
    {
        self.get_looper().register(f)
    }

    fn register_with_options<F, R>(&self, f: F, options: ActionOptions) -> LooperResult<Completion<bool>>
    where
        F: FnMut(&ActionContext) -> R + Send + 'static,
        R: ActionOutcome,
    {
        self.get_looper().register_with_options(f, options)
    }

    fn register_with_state<S, F, R>(&self, state: S, f: F) -> LooperResult<Completion<bool>>
    where
        S: Send + 'static,
        F: FnMut(&ActionContext, &mut S) -> R + Send + 'static,
        R: ActionOutcome,
    {
        self.get_looper().register_with_state(state, f)
    }

    fn register_with_state_options<S, F, R>(
        &self,
        state: S,
        f: F,
        options: ActionOptions,
    ) -> LooperResult<Completion<bool>>
    where
        S: Send + 'static,
        F: FnMut(&ActionContext, &mut S) -> R + Send + 'static,
        R: ActionOutcome,
    {
        self.get_looper().register_with_state_options(state, f, options)
    }

    fn register_async<F, Fut, R>(&self, f: F) -> LooperResult<Completion<bool>>
    where
        F: FnMut(ActionContext) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        self.get_looper().register_async(f)
    }

    fn register_async_with_options<F, Fut, R>(
        &self,
        f: F,
        options: ActionOptions,
    ) -> LooperResult<Completion<bool>>
    where
        F: FnMut(ActionContext) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        self.get_looper().register_async_with_options(f, options)
    }

    fn register_async_with_state<S, F, Fut, R>(&self, state: S, f: F) -> LooperResult<Completion<bool>>
    where
        S: Send + 'static,
        F: FnMut(ActionContext, &mut S) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        self.get_looper().register_async_with_state(state, f)
    }

    fn register_async_with_state_options<S, F, Fut, R>(
        &self,
        state: S,
        f: F,
        options: ActionOptions,
    ) -> LooperResult<Completion<bool>>
    where
        S: Send + 'static,
        F: FnMut(ActionContext, &mut S) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        self.get_looper()
            .register_async_with_state_options(state, f, options)
    }
}

impl<P: LogicLooperPool + ?Sized> LooperPoolExt for P {}

/// Creates the loopers of a pool
pub trait LooperFactory: Send + Sync {
    fn create(&self, frame_time: Duration) -> LooperResult<Arc<dyn LogicLooper>>;
}

/// Creates threaded [`Looper`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLooperFactory;

impl LooperFactory for DefaultLooperFactory {
    fn create(&self, frame_time: Duration) -> LooperResult<Arc<dyn LogicLooper>> {
        let looper: Arc<dyn LogicLooper> = Looper::with_frame_time(frame_time)?;
        Ok(looper)
    }
}

/// Handle to a looper owned by a pool
///
/// Everything but `shutdown` is forwarded to the looper.
pub struct PooledLooper {
    inner: Arc<dyn LogicLooper>,
}

impl PooledLooper {
    pub fn new(inner: Arc<dyn LogicLooper>) -> Self {
        Self { inner }
    }

    /// The looper behind this handle
    pub fn inner(&self) -> &Arc<dyn LogicLooper> {
        &self.inner
    }
}

impl LogicLooper for PooledLooper {
    fn id(&self) -> LooperId {
        self.inner.id()
    }

    fn target_frame_rate(&self) -> f64 {
        self.inner.target_frame_rate()
    }

    fn approximately_running_actions(&self) -> usize {
        self.inner.approximately_running_actions()
    }

    fn last_processing_duration(&self) -> Duration {
        self.inner.last_processing_duration()
    }

    fn current_frame(&self) -> u64 {
        self.inner.current_frame()
    }

    fn submit(&self, action: LooperAction) -> LooperResult<Completion<bool>> {
        self.inner.submit(action)
    }

    fn shutdown(&self, _grace: Duration) -> LooperResult<Completion<()>> {
        Err(LooperError::Unsupported(
            "a pooled looper is shut down through its pool",
        ))
    }
}

impl fmt::Debug for PooledLooper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledLooper").field(&self.inner.id()).finish()
    }
}

/// Fixed-size pool of threaded loopers
pub struct LooperPool {
    /// The loopers themselves
    inner: Vec<Arc<dyn LogicLooper>>,
    /// Pooled handles handed out to callers
    pooled: Vec<Arc<dyn LogicLooper>>,
    balancer: Arc<dyn LooperPoolBalancer>,
}

static SHARED_POOL: OnceLock<LooperPool> = OnceLock::new();

impl LooperPool {
    /// Start `count` loopers at `target_frame_rate`
    pub fn new(
        target_frame_rate: f64,
        count: usize,
        balancer: Arc<dyn LooperPoolBalancer>,
    ) -> LooperResult<Self> {
        if !target_frame_rate.is_finite() || target_frame_rate <= 0.0 {
            return Err(LooperError::InvalidFrameRate);
        }
        Self::with_frame_time(frame_time_of(target_frame_rate), count, balancer)
    }

    /// Start `count` loopers with a target frame period
    pub fn with_frame_time(
        frame_time: Duration,
        count: usize,
        balancer: Arc<dyn LooperPoolBalancer>,
    ) -> LooperResult<Self> {
        Self::with_factory(frame_time, count, balancer, &DefaultLooperFactory)
    }

    /// Build a pool whose loopers come from `factory`
    ///
    /// If any looper fails to start, the ones already started are shut
    /// down and the error is returned.
    pub fn with_factory(
        frame_time: Duration,
        count: usize,
        balancer: Arc<dyn LooperPoolBalancer>,
        factory: &dyn LooperFactory,
    ) -> LooperResult<Self> {
        if count == 0 {
            return Err(LooperError::InvalidLooperCount);
        }
        if count > defaults::MAX_POOL_SIZE {
            return Err(LooperError::InvalidConfig("pool_size must be <= 1024"));
        }

        let mut inner = Vec::with_capacity(count);
        for _ in 0..count {
            match factory.create(frame_time) {
                Ok(looper) => inner.push(looper),
                Err(e) => {
                    for looper in &inner {
                        let _ = looper.shutdown(Duration::ZERO);
                    }
                    return Err(e);
                }
            }
        }

        let pooled = inner
            .iter()
            .map(|l| Arc::new(PooledLooper::new(Arc::clone(l))) as Arc<dyn LogicLooper>)
            .collect();
        kdebug!("looper pool started: {} loopers, frame time {:?}", count, frame_time);

        Ok(Self {
            inner,
            pooled,
            balancer,
        })
    }

    /// Pool sized and paced by `config`, balanced round robin
    pub fn from_config(config: &LooperConfig) -> LooperResult<Self> {
        let rate = config.target_frame_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(LooperError::InvalidFrameRate);
        }
        config.validate()?;
        Self::new(rate, config.pool_size, RoundRobinBalancer::shared())
    }

    /// Initialize the process-wide pool
    ///
    /// `count == 0` means available parallelism minus one (at least one).
    /// Defaults to the shared round-robin balancer and threaded loopers.
    pub fn initialize_shared(
        target_frame_rate: f64,
        count: usize,
        balancer: Option<Arc<dyn LooperPoolBalancer>>,
        factory: Option<&dyn LooperFactory>,
    ) -> LooperResult<&'static LooperPool> {
        if SHARED_POOL.get().is_some() {
            return Err(LooperError::AlreadyInitialized);
        }
        if !target_frame_rate.is_finite() || target_frame_rate <= 0.0 {
            return Err(LooperError::InvalidFrameRate);
        }

        let count = if count == 0 { defaults::pool_size() } else { count };
        let balancer = balancer.unwrap_or_else(|| RoundRobinBalancer::shared() as Arc<dyn LooperPoolBalancer>);
        let pool = Self::with_factory(
            frame_time_of(target_frame_rate),
            count,
            balancer,
            factory.unwrap_or(&DefaultLooperFactory),
        )?;

        // Lost a race with another initializer; dropping `pool` stops its loopers
        SHARED_POOL
            .set(pool)
            .map_err(|_| LooperError::AlreadyInitialized)?;
        kinfo!("shared looper pool initialized: {} loopers at {} fps", count, target_frame_rate);
        Self::shared()
    }

    /// The process-wide pool
    pub fn shared() -> LooperResult<&'static LooperPool> {
        SHARED_POOL.get().ok_or(LooperError::NotInitialized)
    }

    /// Number of loopers
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Request shutdown of every looper and wait for all of them to exit
    ///
    /// Fails with `Unsupported` when called from one of the pool's own loopers.
    pub fn shutdown_and_wait(&self, grace: Duration) -> LooperResult<()> {
        let current = tls::current_looper_id();
        if self.inner.iter().any(|l| l.id() == current) {
            return Err(LooperError::Unsupported(
                "waiting for a pool from one of its own loopers",
            ));
        }
        self.shutdown(grace)?.wait()
    }
}

impl LogicLooperPool for LooperPool {
    fn loopers(&self) -> &[Arc<dyn LogicLooper>] {
        &self.pooled
    }

    fn get_looper(&self) -> Arc<dyn LogicLooper> {
        // Never empty: construction requires at least one looper
        match self.balancer.select(&self.pooled) {
            Some(looper) => Arc::clone(looper),
            None => Arc::clone(&self.pooled[0]),
        }
    }

    fn shutdown(&self, grace: Duration) -> LooperResult<Completion<()>> {
        kdebug!("looper pool shutdown requested (grace {:?})", grace);
        let exits = self
            .inner
            .iter()
            .map(|l| l.shutdown(grace))
            .collect::<LooperResult<Vec<_>>>()?;
        Ok(Completion::when_all(exits))
    }
}

impl Drop for LooperPool {
    fn drop(&mut self) {
        for looper in &self.inner {
            let _ = looper.shutdown(Duration::ZERO);
        }
    }
}

impl fmt::Debug for LooperPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LooperPool")
            .field("loopers", &self.inner.iter().map(|l| l.id()).collect::<Vec<_>>())
            .finish()
    }
}

/// Single manual looper behind the pool interface
pub struct ManualLooperPool {
    looper: Arc<ManualLooper>,
    loopers: Vec<Arc<dyn LogicLooper>>,
}

impl ManualLooperPool {
    pub fn new(target_frame_rate: f64) -> LooperResult<Self> {
        let looper = ManualLooper::new(target_frame_rate)?;
        let loopers = vec![Arc::clone(&looper) as Arc<dyn LogicLooper>];
        Ok(Self { looper, loopers })
    }

    /// The manual looper every registration lands on
    pub fn looper(&self) -> &Arc<ManualLooper> {
        &self.looper
    }

    pub fn tick(&self) -> bool {
        self.looper.tick()
    }

    pub fn tick_n(&self, frames: usize) -> bool {
        self.looper.tick_n(frames)
    }

    pub fn tick_while<P>(&self, predicate: P)
    where
        P: FnMut() -> bool,
    {
        self.looper.tick_while(predicate)
    }
}

impl LogicLooperPool for ManualLooperPool {
    fn loopers(&self) -> &[Arc<dyn LogicLooper>] {
        &self.loopers
    }

    fn get_looper(&self) -> Arc<dyn LogicLooper> {
        Arc::clone(&self.loopers[0])
    }

    fn shutdown(&self, grace: Duration) -> LooperResult<Completion<()>> {
        self.looper.shutdown(grace)
    }
}

impl fmt::Debug for ManualLooperPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualLooperPool")
            .field("looper", &self.looper)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const WAIT: Duration = Duration::from_secs(30);

    fn round_robin() -> Arc<dyn LooperPoolBalancer> {
        Arc::new(RoundRobinBalancer::new())
    }

    #[test]
    fn test_zero_loopers_rejected() {
        assert!(matches!(
            LooperPool::new(60.0, 0, round_robin()),
            Err(LooperError::InvalidLooperCount)
        ));
        assert!(matches!(
            LooperPool::new(0.0, 2, round_robin()),
            Err(LooperError::InvalidFrameRate)
        ));
    }

    #[test]
    fn test_get_looper_round_robin() {
        let pool = LooperPool::new(60.0, 3, round_robin()).unwrap();
        let ids: Vec<LooperId> = pool.loopers().iter().map(|l| l.id()).collect();
        let picked: Vec<usize> = (0..4)
            .map(|_| {
                let id = pool.get_looper().id();
                ids.iter().position(|i| *i == id).unwrap()
            })
            .collect();
        assert_eq!(picked, vec![0, 1, 2, 0]);
        pool.shutdown_and_wait(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_pooled_handle_refuses_shutdown() {
        let pool = LooperPool::new(60.0, 1, round_robin()).unwrap();
        let looper = pool.get_looper();
        assert!(matches!(
            looper.shutdown(Duration::ZERO),
            Err(LooperError::Unsupported(_))
        ));
        pool.shutdown_and_wait(Duration::ZERO).unwrap();
        assert!(matches!(
            looper.register(|_: &ActionContext| true),
            Err(LooperError::ShutDown)
        ));
    }

    #[test]
    fn test_no_lost_registrations_under_load() {
        const THREADS: usize = 8;
        const ACTIONS: usize = 50_000;
        const RUNS: usize = 10;

        let pool = Arc::new(LooperPool::new(60.0, 4, round_robin()).unwrap());
        let invocations = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let invocations = Arc::clone(&invocations);
                thread::spawn(move || {
                    (0..ACTIONS / THREADS)
                        .map(|_| {
                            let invocations = Arc::clone(&invocations);
                            let mut runs = 0;
                            pool.register(move |_: &ActionContext| {
                                invocations.fetch_add(1, Ordering::Relaxed);
                                runs += 1;
                                runs < RUNS
                            })
                            .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let completions: Vec<Completion<bool>> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(completions.len(), ACTIONS);

        Completion::when_all(completions).wait_timeout(WAIT).unwrap();
        assert_eq!(invocations.load(Ordering::Relaxed), ACTIONS * RUNS);

        pool.shutdown_and_wait(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_pool_shutdown_waits_for_all() {
        let pool = LooperPool::new(100.0, 3, round_robin()).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        for looper in pool.loopers() {
            let s = Arc::clone(&seen);
            looper
                .register(move |ctx: &ActionContext| {
                    if ctx.is_cancellation_requested() {
                        s.fetch_add(1, Ordering::SeqCst);
                        return false;
                    }
                    true
                })
                .unwrap();
        }

        let done = pool.shutdown(Duration::from_millis(200)).unwrap();
        done.wait_timeout(WAIT).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(pool.stats().total_running_actions, 0);
    }

    struct FailingFactory {
        created: AtomicUsize,
    }

    impl LooperFactory for FailingFactory {
        fn create(&self, frame_time: Duration) -> LooperResult<Arc<dyn LogicLooper>> {
            if self.created.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(LooperError::SpawnFailed);
            }
            DefaultLooperFactory.create(frame_time)
        }
    }

    #[test]
    fn test_factory_failure_is_reported() {
        let factory = FailingFactory {
            created: AtomicUsize::new(0),
        };
        let result = LooperPool::with_factory(Duration::from_millis(10), 3, round_robin(), &factory);
        assert!(matches!(result, Err(LooperError::SpawnFailed)));
    }

    #[test]
    fn test_shared_pool_lifecycle() {
        assert!(matches!(LooperPool::shared(), Err(LooperError::NotInitialized)));

        let pool = LooperPool::initialize_shared(60.0, 2, None, None).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(std::ptr::eq(pool, LooperPool::shared().unwrap()));
        assert!(matches!(
            LooperPool::initialize_shared(60.0, 2, None, None),
            Err(LooperError::AlreadyInitialized)
        ));

        let handle = LooperPool::shared()
            .unwrap()
            .register(|ctx: &ActionContext| ctx.current_frame() < 3)
            .unwrap();
        assert!(matches!(handle.wait_timeout(WAIT), Ok(true)));
    }

    #[test]
    fn test_manual_pool() {
        let pool = ManualLooperPool::new(60.0).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = pool
            .register_with_state(0u32, move |_: &ActionContext, n: &mut u32| {
                c.fetch_add(1, Ordering::SeqCst);
                *n += 1;
                *n < 3
            })
            .unwrap();

        assert_eq!(pool.loopers().len(), 1);
        assert_eq!(pool.get_looper().id(), LooperId::MANUAL);
        pool.tick_n(5);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(matches!(handle.try_result(), Some(Ok(true))));
        assert!(pool.shutdown(Duration::ZERO).unwrap().is_completed());
    }
}
