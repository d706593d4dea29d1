/// Fixed two-worker pool running the branches of a dual-output pipeline.
pub struct FanOutPool {
    pool: rayon::ThreadPool,
    submissions: usize,
}

impl FanOutPool {
    pub const WORKERS: usize = 2;

    pub fn new(name: &str) -> anyhow::Result<Self> {
        let prefix = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(Self::WORKERS)
            .thread_name(move |idx| format!("{}-branch-{}", prefix, idx))
            .build()?;
        Ok(Self {
            pool,
            submissions: 0,
        })
    }

    /// Runs both closures on the pool and blocks until both have finished.
    pub fn fork_join<A, B, RA, RB>(&mut self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        self.submissions += 2;
        self.pool.install(|| rayon::join(a, b))
    }

    /// Closures submitted so far.
    pub fn submissions(&self) -> usize {
        self.submissions
    }
}
