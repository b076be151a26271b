use bon::bon;

/// How often the node list is swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    /// One sweep; nodes created during it are still visited.
    SinglePass,
    /// Sweep until nothing changes, at most `max_sweeps` times.
    UntilFixpoint { max_sweeps: usize },
}

impl Default for RewriteMode {
    fn default() -> Self {
        Self::UntilFixpoint { max_sweeps: 16 }
    }
}

/// Rewrite engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteConfig {
    pub mode: RewriteMode,
    /// Hard cap on node visits per run; exceeding it is an error.
    pub max_visits: usize,
    /// Revalidate every reachable op after each applied rewrite and the whole
    /// function after each changing sweep. Each rewrite then costs a full
    /// pass over the graph, so a sweep is quadratic in the node count.
    pub revalidate: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self { mode: RewriteMode::default(), max_visits: 1_000_000, revalidate: true }
    }
}

#[bon]
impl RewriteConfig {
    #[builder]
    pub fn builder(
        #[builder(default)] mode: RewriteMode,
        #[builder(default = 1_000_000)] max_visits: usize,
        #[builder(default = true)] revalidate: bool,
    ) -> Self {
        Self { mode, max_visits, revalidate }
    }

    /// Configuration from environment variables.
    ///
    /// * `LOWP_MAX_SWEEPS` - sweep limit; `1` selects single-pass mode (default: 16)
    /// * `LOWP_MAX_VISITS` - node visit limit (default: 1000000)
    pub fn from_env() -> Self {
        let max_sweeps = std::env::var("LOWP_MAX_SWEEPS").ok().and_then(|s| s.parse().ok()).unwrap_or(16);
        let max_visits = std::env::var("LOWP_MAX_VISITS").ok().and_then(|s| s.parse().ok()).unwrap_or(1_000_000);
        let mode = if max_sweeps <= 1 { RewriteMode::SinglePass } else { RewriteMode::UntilFixpoint { max_sweeps } };
        Self { mode, max_visits, revalidate: true }
    }

    pub fn single_pass() -> Self {
        Self { mode: RewriteMode::SinglePass, ..Self::default() }
    }

    pub(crate) fn max_sweeps(&self) -> usize {
        match self.mode {
            RewriteMode::SinglePass => 1,
            RewriteMode::UntilFixpoint { max_sweeps } => max_sweeps.max(1),
        }
    }
}
