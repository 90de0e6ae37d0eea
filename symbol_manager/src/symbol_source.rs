use std::ops::ControlFlow;

use regex::Regex;

use crate::{Result, SymbolRecord};

/// A table of symbols for one binary image.
pub trait SymbolSource {
    /// Virtual address that corresponds to the image's load base.
    /// Symbol offsets are measured from here.
    fn image_base(&self) -> u64;

    /// Visit every defined, named symbol whose raw name matches
    /// `mask` (or every symbol, if no mask is given).  Enumeration
    /// ends early when `visit` returns `ControlFlow::Break`.
    fn for_each_symbol(
        &self,
        mask: Option<&Regex>,
        visit: &mut dyn FnMut(SymbolRecord<'_>) -> ControlFlow<()>,
    ) -> Result<()>;
}

impl<S: SymbolSource + ?Sized> SymbolSource for Box<S> {
    fn image_base(&self) -> u64 {
        (**self).image_base()
    }

    fn for_each_symbol(
        &self,
        mask: Option<&Regex>,
        visit: &mut dyn FnMut(SymbolRecord<'_>) -> ControlFlow<()>,
    ) -> Result<()> {
        (**self).for_each_symbol(mask, visit)
    }
}
