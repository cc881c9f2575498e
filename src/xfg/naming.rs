//! Display names for XFG targets.

use crate::demangle;
use crate::host::SymbolSource;
use crate::pe::AddressWidth;

use super::table::XfgEntry;

/// Best-effort name of the function at `address`.
///
/// Falls back to the fixed-width hex address when there is no symbol or it
/// cannot be demangled.
pub fn function_name<S: SymbolSource + ?Sized>(
    symbols: &S,
    address: u64,
    width: AddressWidth,
) -> String {
    symbols
        .decorated_symbol_at(address)
        .and_then(|decorated| demangle::name_only(&decorated))
        .unwrap_or_else(|| width.format_address(address))
}

/// Comment listing every target of one hash group, e.g. `"2fn: foo, bar"`.
pub fn group_comment<S: SymbolSource + ?Sized>(
    symbols: &S,
    entries: &[XfgEntry],
    width: AddressWidth,
) -> String {
    let names: Vec<String> = entries
        .iter()
        .map(|e| function_name(symbols, e.function(), width))
        .collect();
    format!("{}fn: {}", entries.len(), names.join(", "))
}
