//! Basic-block decomposer configuration.

/// Tuning knobs for `decompose_basic_blocks`.
#[derive(Copy, Clone, Debug)]
pub struct Options {
    /// Re-validate coverage, jump-target, and label-preservation
    /// invariants after decomposition and report violations as
    /// diagnostics instead of trusting the construction to have gotten
    /// them right. Costs an extra pass over every basic block; off by
    /// default for decomposition run at scale.
    pub check_decomposition_results: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            check_decomposition_results: false,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    pub fn with_check_decomposition_results(mut self, check: bool) -> Self {
        self.check_decomposition_results = check;
        self
    }
}
