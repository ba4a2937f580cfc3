//! The EEI import catalogue: every name, its wire signature,
//! and the `ethereum`-namespace import it must match. Consumed by the
//! contract validator and by the engine adapter when wiring imports.

use wasmer::Type;

/// One catalogue entry: `(name, params, results)`.
pub struct CatalogueEntry {
    pub name: &'static str,
    pub params: &'static [Type],
    pub results: &'static [Type],
}

macro_rules! entry {
    ($name:literal, [$($p:ident),*], [$($r:ident),*]) => {
        CatalogueEntry { name: $name, params: &[$(Type::$p),*], results: &[$(Type::$r),*] }
    };
}

/// The 33 host functions exposed under the `ethereum` import namespace.
/// `finish` is the wire name for `return`.
pub const EEI_CATALOGUE: &[CatalogueEntry] = &[
    entry!("useGas", [I64], []),
    entry!("getGasLeft", [], [I64]),
    entry!("getAddress", [I32], []),
    entry!("getExternalBalance", [I32, I32], []),
    entry!("getBlockHash", [I64, I32], [I32]),
    entry!("getCallDataSize", [], [I32]),
    entry!("callDataCopy", [I32, I32, I32], []),
    entry!("getCaller", [I32], []),
    entry!("getCallValue", [I32], []),
    entry!("codeCopy", [I32, I32, I32], []),
    entry!("getCodeSize", [], [I32]),
    entry!("externalCodeCopy", [I32, I32, I32, I32], []),
    entry!("getExternalCodeSize", [I32], [I32]),
    entry!("getBlockCoinbase", [I32], []),
    entry!("getBlockDifficulty", [I32], []),
    entry!("getBlockGasLimit", [], [I64]),
    entry!("getTxGasPrice", [I32], []),
    entry!("log", [I32, I32, I32, I32, I32, I32, I32], []),
    entry!("getBlockNumber", [], [I64]),
    entry!("getBlockTimestamp", [], [I64]),
    entry!("getTxOrigin", [I32], []),
    entry!("storageStore", [I32, I32], []),
    entry!("storageLoad", [I32, I32], []),
    entry!("finish", [I32, I32], []),
    entry!("revert", [I32, I32], []),
    entry!("getReturnDataSize", [], [I32]),
    entry!("returnDataCopy", [I32, I32, I32], []),
    entry!("call", [I64, I32, I32, I32, I32], [I32]),
    entry!("callCode", [I64, I32, I32, I32, I32], [I32]),
    entry!("callDelegate", [I64, I32, I32, I32], [I32]),
    entry!("callStatic", [I64, I32, I32, I32], [I32]),
    entry!("create", [I32, I32, I32, I32], [I32]),
    entry!("selfDestruct", [I32], []),
];

pub fn find(name: &str) -> Option<&'static CatalogueEntry> {
    EEI_CATALOGUE.iter().find(|e| e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_33_entries() {
        assert_eq!(EEI_CATALOGUE.len(), 33);
    }

    #[test]
    fn catalogue_names_are_unique() {
        let mut names: Vec<&str> = EEI_CATALOGUE.iter().map(|e| e.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn finish_is_found_with_expected_signature() {
        let entry = find("finish").unwrap();
        assert_eq!(entry.params, &[Type::I32, Type::I32]);
        assert!(entry.results.is_empty());
    }

    #[test]
    fn unknown_import_is_absent() {
        assert!(find("selfdestruct_typo").is_none());
    }
}
