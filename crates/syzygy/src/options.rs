//! Umbrella configuration: bundles the macro and basic-block decomposers'
//! independent options structs, since most callers tune both at once.

/// Tuning knobs for the whole toolchain. `Default` gives the same
/// conservative defaults each stage picks on its own.
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub macro_options: syzygy_macro::Options,
    pub bb_options: syzygy_bb::Options,
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    pub fn with_macro_options(mut self, options: syzygy_macro::Options) -> Self {
        self.macro_options = options;
        self
    }

    pub fn with_bb_options(mut self, options: syzygy_bb::Options) -> Self {
        self.bb_options = options;
        self
    }
}
