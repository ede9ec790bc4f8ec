use super::TablespacePaths;
use crate::constants::{METADATA_EXTENSION, TABLESPACE_EXTENSION};
use crate::table::TableId;
use std::path::Path;

/// Encode a schema or table name the way the server names its files.
///
/// ASCII letters, digits and `_` are kept; any other character becomes
/// `@` followed by its code point as four lowercase hex digits (`-` is
/// `@002d`). Letters the server maps to its short `@0x` codes (accented
/// Latin, Greek, Cyrillic) are not reproduced; such names are refused by the
/// inventory check because their files cannot be located reliably.
pub fn encode_filename(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for unit in name.encode_utf16() {
        match char::from_u32(unit as u32) {
            Some(c) if c.is_ascii_alphanumeric() || c == '_' => encoded.push(c),
            _ => encoded.push_str(&format!("@{:04x}", unit)),
        }
    }
    encoded
}

/// Whether [`encode_filename`] produces the server's file name for `name`
pub fn has_portable_filename(name: &str) -> bool {
    name.is_ascii()
}

/// `.ibd` and `.cfg` paths of `table` under `datadir`
pub fn tablespace_paths(datadir: &Path, table: &TableId) -> TablespacePaths {
    let dir = datadir.join(encode_filename(&table.schema));
    let stem = encode_filename(&table.name);
    TablespacePaths {
        ibd: dir.join(format!("{}.{}", stem, TABLESPACE_EXTENSION)),
        cfg: dir.join(format!("{}.{}", stem, METADATA_EXTENSION)),
    }
}
