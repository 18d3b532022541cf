//! Fixed sentinel ids and engine version tag.
//!
//! Role in the kernel:
//! - Sentinel genera are bootstrapped idempotently on kernel open (see
//!   `kernel::Kernel::new`) and referenced by name everywhere else; the ids
//!   themselves only matter for on-disk stability.
//! - `ENGINE_VERSION` feeds into the action/process definition hash so a
//!   kernel upgrade that changes interpretation semantics is visible in
//!   stored fingerprints.

use tessella_domain::ResId;

/// Crockford base32 alphabet (no I, L, O, U).
const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Sentinel genera, in bootstrap order. `meta` is always 26 zeros; each
/// subsequent sentinel increments the last character of the id.
pub const SENTINEL_NAMES: &[&str] = &[
    "meta",
    "log",
    "error",
    "task",
    "branch",
    "taxonomy",
    "default_taxonomy",
    "cron",
    "workspace",
    "science",
    "default_science",
    "palace_room",
    "palace_scroll",
    "palace_npc",
];

fn sentinel_id_str(index: usize) -> String {
    assert!(index < CROCKFORD.len(), "sentinel index exceeds single-char increment range");
    let mut chars = [b'0'; 26];
    chars[25] = CROCKFORD[index];
    String::from_utf8(chars.to_vec()).expect("ascii")
}

/// Computes the fixed id for the `index`-th sentinel (0 = `meta`).
pub fn sentinel_id(index: usize) -> ResId {
    ResId::from_str_fixed(&sentinel_id_str(index))
}

/// Looks up a sentinel's fixed id by name.
pub fn sentinel_id_for(name: &str) -> Option<ResId> {
    SENTINEL_NAMES.iter().position(|n| *n == name).map(sentinel_id)
}

/// The id of the `meta` sentinel: the genus every other genus, including
/// itself, belongs to.
pub fn meta_genus_id() -> ResId {
    sentinel_id(0)
}

pub const MAIN_BRANCH: &str = "main";

pub const ENGINE_VERSION: &str = "tessella-kernel/1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_is_all_zeros() {
        let id = sentinel_id_str(0);
        assert_eq!(id.len(), 26);
        assert!(id.chars().all(|c| c == '0'));
    }

    #[test]
    fn sentinels_increment_last_char() {
        let meta = sentinel_id_str(0);
        let log = sentinel_id_str(1);
        assert_ne!(meta, log);
        assert_eq!(&log[..25], &meta[..25]);
        assert_eq!(&log[25..], "1");
    }

    #[test]
    fn names_resolve_to_ids() {
        assert_eq!(sentinel_id_for("meta"), Some(sentinel_id(0)));
        assert_eq!(sentinel_id_for("palace_npc"), Some(sentinel_id(13)));
        assert_eq!(sentinel_id_for("nonexistent"), None);
    }
}
