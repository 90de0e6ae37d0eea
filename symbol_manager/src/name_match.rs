use cpp_demangle::DemangleOptions;

/// The names under which a symbol may be requested.
///
/// A symbol is found by its raw (possibly mangled) name, by its full
/// demangled name, or by its demangled name without the trailing
/// parameter list.  For example, `_ZN13CoreLibBinder8GetClassE12BinderClassID`
/// is also found as `CoreLibBinder::GetClass(BinderClassID)` and
/// as `CoreLibBinder::GetClass`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateNames<'a> {
    raw: &'a str,
    demangled: Option<String>,
    without_params: Option<String>,
}

impl<'a> CandidateNames<'a> {
    pub fn of(raw: &'a str) -> Self {
        let parsed = raw
            .starts_with("_Z")
            .then(|| cpp_demangle::Symbol::new(raw.as_bytes()).ok())
            .flatten();

        let demangled = parsed
            .as_ref()
            .and_then(|sym| sym.demangle(&DemangleOptions::new()).ok());
        let without_params = parsed
            .as_ref()
            .and_then(|sym| {
                sym.demangle(&DemangleOptions::new().no_params().no_return_type())
                    .ok()
            })
            .filter(|name| Some(name) != demangled.as_ref());

        Self {
            raw,
            demangled,
            without_params,
        }
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    pub fn demangled(&self) -> Option<&str> {
        self.demangled.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        std::iter::once(self.raw)
            .chain(self.demangled.as_deref())
            .chain(self.without_params.as_deref())
    }

    pub fn matches(&self, wanted: &str) -> bool {
        self.iter().any(|name| name == wanted)
    }
}
