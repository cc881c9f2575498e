//! Name-only demangling for Rust, Itanium and MSVC symbols.
//!
//! Comments attached at call sites list several targets on one line, so
//! parameter lists, return types and hashes are dropped. Names that are not
//! recognized as mangled are returned unchanged.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_ITA_MANGLED: Lazy<Regex> = Lazy::new(|| {
    // Itanium (GCC/Clang) ABI, optionally with the Mach-O extra underscore
    Regex::new(r#"^_{1,2}Z[a-zA-Z0-9_]"#).expect("valid itanium mangled regex")
});
static RE_MSVC_MANGLED: Lazy<Regex> = Lazy::new(|| {
    // MSVC: ?name@@... or ??0... (avoid word boundaries due to '?')
    Regex::new(r#"^\?\??[A-Za-z0-9_@\$\?]+@"#).expect("valid msvc mangled regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Rust,
    Itanium,
    Msvc,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemangleResult {
    pub original: String,
    pub demangled: String,
    pub flavor: SymbolFlavor,
}

pub fn detect_flavor(s: &str) -> SymbolFlavor {
    if rustc_demangle::try_demangle(s).is_ok() {
        return SymbolFlavor::Rust;
    }
    if RE_ITA_MANGLED.is_match(s) {
        return SymbolFlavor::Itanium;
    }
    if RE_MSVC_MANGLED.is_match(s) {
        return SymbolFlavor::Msvc;
    }
    SymbolFlavor::Unknown
}

/// Demangle a single symbol to its qualified name. Returns None when not
/// recognized or when the demangler rejects it.
pub fn demangle_one(s: &str) -> Option<DemangleResult> {
    let (demangled, flavor) = match detect_flavor(s) {
        SymbolFlavor::Rust => {
            let dm = rustc_demangle::try_demangle(s).ok()?;
            // alternate form omits the trailing hash
            (format!("{:#}", dm), SymbolFlavor::Rust)
        }
        SymbolFlavor::Itanium => {
            let sym = cpp_demangle::Symbol::new(s).ok()?;
            let options = cpp_demangle::DemangleOptions::new()
                .no_params()
                .no_return_type();
            (sym.demangle(&options).ok()?, SymbolFlavor::Itanium)
        }
        SymbolFlavor::Msvc => {
            let out = msvc_demangler::demangle(s, msvc_demangler::DemangleFlags::NAME_ONLY).ok()?;
            (out, SymbolFlavor::Msvc)
        }
        SymbolFlavor::Unknown => return None,
    };
    if demangled.is_empty() {
        return None;
    }
    Some(DemangleResult {
        original: s.to_string(),
        demangled,
        flavor,
    })
}

/// Name-only form of `s`, or `None` if it is mangled but cannot be decoded.
///
/// Undecorated names pass through.
pub fn name_only(s: &str) -> Option<String> {
    if s.is_empty() {
        return None;
    }
    match detect_flavor(s) {
        SymbolFlavor::Unknown => Some(s.to_string()),
        _ => demangle_one(s).map(|r| r.demangled),
    }
}
