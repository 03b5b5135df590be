/// Tunables for a [`Tree`](crate::Tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    /// Log a warning when one child list repeats an explicit key.
    pub warn_on_duplicate_keys: bool,
    /// Creation deeper than this fails as a producer error at that position.
    pub max_depth: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            warn_on_duplicate_keys: true,
            max_depth: 256,
        }
    }
}
