//! Deterministic ID generation via BLAKE3

use blake3::Hasher;

use crate::storage::EntityKind;

/// Compute deterministic entity ID
///
/// ID = BLAKE3(kind|key) -> u128 (first 16 bytes)
///
/// # Examples
/// ```
/// use degrees::graph::compute_entity_id;
/// use degrees::storage::EntityKind;
///
/// let id = compute_entity_id(EntityKind::Hashtag, "rustlang");
/// assert_ne!(id, 0);
/// ```
pub fn compute_entity_id(kind: EntityKind, key: &str) -> u128 {
    let mut hasher = Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(key.as_bytes());

    let hash = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash.as_bytes()[0..16]);
    u128::from_le_bytes(bytes)
}

/// Adjacency key: src (16 bytes BE) followed by dst (16 bytes BE).
///
/// Big-endian so that a prefix scan on `src` yields all its edges.
pub fn edge_key(src: u128, dst: u128) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(&src.to_be_bytes());
    key[16..].copy_from_slice(&dst.to_be_bytes());
    key
}

pub fn id_key(id: u128) -> [u8; 16] {
    id.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_id() {
        let id1 = compute_entity_id(EntityKind::Hashtag, "rustlang");
        let id2 = compute_entity_id(EntityKind::Hashtag, "rustlang");
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_different_keys_different_ids() {
        let id1 = compute_entity_id(EntityKind::Hashtag, "rustlang");
        let id2 = compute_entity_id(EntityKind::Hashtag, "golang");
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_different_kinds_different_ids() {
        // A user whose id happens to look like a post id must not collide
        let id1 = compute_entity_id(EntityKind::User, "12345");
        let id2 = compute_entity_id(EntityKind::Post, "12345");
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_edge_key_prefix_is_src() {
        let key = edge_key(7, 9);
        assert_eq!(&key[..16], &id_key(7));
        assert_eq!(&key[16..], &id_key(9));
    }
}
