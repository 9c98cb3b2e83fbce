//! Macro-decomposer configuration: static-initializer regex pairs, extra
//! non-returning function names, and extra non-returning imports.

use std::collections::HashSet;

use regex::Regex;

/// Tuning knobs for `decompose`. Built with a plain constructor plus
/// setters rather than a builder-macro dependency.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// `(begin, end)` regex pairs identifying static-initializer array
    /// bracket symbols, e.g. `(^__xi_a$, ^__xi_z$)`.
    pub static_initializer_patterns: Vec<(String, String)>,
    /// Undecorated function names treated as non-returning in addition to
    /// whatever the symbol source itself marks.
    pub extra_non_returning_functions: HashSet<String>,
    /// `(module, function)` import thunks treated as non-returning.
    pub extra_non_returning_imports: HashSet<(String, String)>,
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    pub fn with_static_initializer_pattern(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.static_initializer_patterns.push((begin.into(), end.into()));
        self
    }

    pub fn with_non_returning_function(mut self, name: impl Into<String>) -> Self {
        self.extra_non_returning_functions.insert(name.into());
        self
    }

    pub fn with_non_returning_import(mut self, module: impl Into<String>, function: impl Into<String>) -> Self {
        self.extra_non_returning_imports.insert((module.into(), function.into()));
        self
    }

    /// Compile `static_initializer_patterns` into regexes, skipping (and
    /// logging) any pattern that fails to compile rather than making
    /// decomposition fatally depend on caller-supplied regex syntax.
    pub(crate) fn compiled_static_initializer_patterns(&self) -> Vec<(Regex, Regex)> {
        self.static_initializer_patterns
            .iter()
            .filter_map(|(b, e)| match (Regex::new(b), Regex::new(e)) {
                (Ok(b), Ok(e)) => Some((b, e)),
                _ => {
                    log::warn!("skipping invalid static-initializer pattern ({:?}, {:?})", b, e);
                    None
                }
            })
            .collect()
    }
}
