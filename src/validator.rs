//! Contract Validator.
//!
//! Static checks applied to an already structurally-valid Wasm module (the
//! engine adapter's `parse_and_validate` has already run) before
//! instantiation. Uses `wasmer::Module`'s import/export introspection for
//! rules 1-3 and 5-7, and a direct `wasmparser` section scan (the same
//! `wasmer::wasmparser` re-export a metering cost function elsewhere reaches
//! for) for rule 4, since a module's start function isn't exposed by
//! `wasmer::Module`'s public API.

use wasmer::{ExternType, Module};

use crate::catalogue;
use crate::error::EeiError;

fn fail(msg: impl Into<String>) -> EeiError {
    EeiError::ContractValidationFailure(msg.into())
}

/// No `start` function may be present. Scans the raw
/// module bytes for a start section without re-validating the whole module.
fn has_start_section(code: &[u8]) -> Result<bool, EeiError> {
    use wasmer::wasmparser::{Parser, Payload};

    for payload in Parser::new(0).parse_all(code) {
        match payload.map_err(|e| fail(format!("malformed module: {e}")))? {
            Payload::StartSection { .. } => return Ok(true),
            Payload::End(_) => break,
            _ => {}
        }
    }
    Ok(false)
}

/// Runs all seven structural invariants against `module`/`code`.
/// `allow_debug_imports` additionally permits `debug::*` imports, for debug
/// builds that expose extra logging helpers to contracts.
pub fn validate(module: &Module, code: &[u8], allow_debug_imports: bool) -> Result<(), EeiError> {
    // Rule 1-3: exactly two exports, "main" (function, () -> ()) and
    // "memory" (memory).
    let exports: Vec<_> = module.exports().collect();
    if exports.len() != 2 {
        return Err(fail(format!(
            "expected exactly 2 exports (main, memory), found {}",
            exports.len()
        )));
    }

    let main_export = exports
        .iter()
        .find(|e| e.name() == "main")
        .ok_or_else(|| fail("missing export \"main\""))?;
    let memory_export = exports
        .iter()
        .find(|e| e.name() == "memory")
        .ok_or_else(|| fail("missing export \"memory\""))?;

    match main_export.ty() {
        ExternType::Function(ty) => {
            if !ty.params().is_empty() || !ty.results().is_empty() {
                return Err(fail("\"main\" must have type () -> ()"));
            }
        }
        _ => return Err(fail("\"main\" export must be a function")),
    }

    if !matches!(memory_export.ty(), ExternType::Memory(_)) {
        return Err(fail("\"memory\" export must be a memory"));
    }

    // Rule 4: no start function.
    if has_start_section(code)? {
        return Err(fail("module must not have a start function"));
    }

    // Rule 5-7: every import is `ethereum::<catalogue name>` (or
    // `debug::*` when allowed) with an exactly-matching signature.
    for import in module.imports() {
        let module_name = import.module();
        if module_name == "ethereum" {
            let entry = catalogue::find(import.name()).ok_or_else(|| {
                fail(format!("unknown ethereum import \"{}\"", import.name()))
            })?;
            match import.ty() {
                ExternType::Function(ty) => {
                    if ty.params() != entry.params || ty.results() != entry.results {
                        return Err(fail(format!(
                            "import \"{}\" has the wrong signature",
                            import.name()
                        )));
                    }
                }
                _ => {
                    return Err(fail(format!("import \"{}\" must be a function", import.name())))
                }
            }
        } else if module_name == "debug" && allow_debug_imports {
            // debug imports are unchecked by design; a debug build may
            // expose arbitrary logging helpers here.
        } else {
            return Err(fail(format!(
                "import module \"{module_name}\" is not allowed"
            )));
        }
    }

    Ok(())
}

/// The byte-exact Wasm preamble: `00 61 73 6D 01 00 00 00`.
pub fn has_wasm_preamble(code: &[u8]) -> bool {
    const PREAMBLE: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
    code.len() >= 8 && code[0..8] == PREAMBLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_detection_matches_wasm_header() {
        assert!(has_wasm_preamble(&[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00]));
        assert!(has_wasm_preamble(&[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0xff]));
        assert!(!has_wasm_preamble(&[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00]));
        assert!(!has_wasm_preamble(b"not wasm"));
    }

    #[test]
    fn preamble_detection_rejects_empty() {
        assert!(!has_wasm_preamble(&[]));
    }
}
