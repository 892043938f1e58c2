//! Local schema bookkeeping: migrations, version history, backups.

/// Backups, integrity checks, and import/export.
pub mod integrity;
/// Versioned, run-once migration steps.
pub mod migrations;
/// One-shot reconciliation run at startup.
pub mod startup;
/// System version history and version comparison.
pub mod version;

/// Non-cryptographic 32-bit fingerprint rendered as hex.
///
/// Only used for bookkeeping; it says nothing about content integrity.
pub fn fingerprint(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    format!("{:08x}", hash as u32)
}
