//! Key hashing for slot selection.
//!
//! A key's slot is `crc32(tag) % MAX_SLOT_NUM`, where `tag` is the part of the
//! key between the first `{` and the next `}` if both are present, or the whole
//! key otherwise. Hash tags let clients force related keys onto one slot.

use crate::error::{Error, Result};
use crate::types::{SlotId, MAX_SLOT_NUM};
use bytes::Bytes;
use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// The portion of `key` that determines its slot.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(beg) = key.iter().position(|&b| b == b'{') {
        let rest = &key[beg + 1..];
        if let Some(end) = rest.iter().position(|&b| b == b'}') {
            return &rest[..end];
        }
    }
    key
}

/// CRC32 (IEEE) of the key's hash tag.
pub fn hash(key: &[u8]) -> u32 {
    CRC32.checksum(hash_tag(key))
}

/// Slot owning `key`.
pub fn slot_for_key(key: &[u8]) -> SlotId {
    (hash(key) as usize % MAX_SLOT_NUM) as SlotId
}

/// Resolve a request's routing keys to one slot and the keys that must be
/// checked against an in-progress migration.
///
/// Multi-key requests are accepted only when every key maps to the same slot.
/// The returned keys hold one key per distinct hash tag, in request order:
/// migrating a key moves every key sharing its tag, so one per tag is enough.
/// Keyless requests land on slot 0 with no keys to check.
pub fn resolve_slot(keys: &[Bytes]) -> Result<(SlotId, Vec<&[u8]>)> {
    let Some(first) = keys.first() else {
        return Ok((0, Vec::new()));
    };
    let slot = slot_for_key(first);

    let mut tags: Vec<&[u8]> = Vec::with_capacity(keys.len());
    let mut hash_keys = Vec::with_capacity(keys.len());
    for key in keys {
        let other = slot_for_key(key);
        if other != slot {
            return Err(Error::CrossSlot {
                first: slot,
                second: other,
            });
        }
        let tag = hash_tag(key);
        if !tags.contains(&tag) {
            tags.push(tag);
            hash_keys.push(key.as_ref());
        }
    }
    Ok((slot, hash_keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(hash(b"123456789"), 0xCBF4_3926);
        assert_eq!(slot_for_key(b"123456789"), 294);
    }

    #[test]
    fn test_hash_tag() {
        assert_eq!(hash_tag(b"{user1000}.following"), b"user1000");
        assert_eq!(hash_tag(b"foo{bar}{zap}"), b"bar");
        assert_eq!(hash_tag(b"foo{}bar"), b"");
        assert_eq!(hash_tag(b"foo{bar"), b"foo{bar");
        assert_eq!(hash_tag(b"foo}bar{"), b"foo}bar{");
        assert_eq!(hash_tag(b"plain"), b"plain");
    }

    #[test]
    fn test_tagged_keys_share_slot() {
        assert_eq!(
            slot_for_key(b"{user1000}.following"),
            slot_for_key(b"{user1000}.followers")
        );
        assert_eq!(slot_for_key(b"{user1000}.following"), slot_for_key(b"user1000"));
    }

    #[test]
    fn test_slot_distribution() {
        let mut distribution: HashMap<SlotId, usize> = HashMap::new();
        for i in 0..100_000 {
            let key = format!("key-{}", i);
            *distribution.entry(slot_for_key(key.as_bytes())).or_insert(0) += 1;
        }

        assert_eq!(distribution.len(), MAX_SLOT_NUM);
        for &count in distribution.values() {
            assert!(count > 30, "Slot has too few keys: {}", count);
            assert!(count < 200, "Slot has too many keys: {}", count);
        }
    }

    #[test]
    fn test_resolve_keyless() {
        let (slot, keys) = resolve_slot(&[]).unwrap();
        assert_eq!(slot, 0);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_resolve_empty_key_is_checked() {
        let args = [Bytes::new()];
        let (slot, keys) = resolve_slot(&args).unwrap();
        assert_eq!(slot, slot_for_key(b""));
        assert_eq!(keys, vec![&b""[..]]);
    }

    #[test]
    fn test_resolve_same_tag() {
        let keys = vec![Bytes::from("{tag}a"), Bytes::from("{tag}b"), Bytes::from("tag")];
        let (slot, hash_keys) = resolve_slot(&keys).unwrap();
        assert_eq!(slot, slot_for_key(b"tag"));
        assert_eq!(hash_keys, vec![&b"{tag}a"[..]]);
    }

    #[test]
    fn test_resolve_untagged_keys_on_one_slot() {
        let a = Bytes::from("key-a");
        let b = (0..)
            .map(|i| Bytes::from(format!("key-b-{}", i)))
            .find(|k| slot_for_key(k) == slot_for_key(&a))
            .unwrap();

        let keys = vec![a.clone(), b.clone(), a.clone()];
        let (slot, hash_keys) = resolve_slot(&keys).unwrap();
        assert_eq!(slot, slot_for_key(&a));
        assert_eq!(hash_keys, vec![a.as_ref(), b.as_ref()]);
    }

    #[test]
    fn test_resolve_cross_slot() {
        // Find two keys that land on different slots.
        let a = Bytes::from("key-a");
        let b = (0..)
            .map(|i| Bytes::from(format!("key-b-{}", i)))
            .find(|k| slot_for_key(k) != slot_for_key(&a))
            .unwrap();

        let err = resolve_slot(&[a.clone(), b.clone()]).unwrap_err();
        match err {
            Error::CrossSlot { first, second } => {
                assert_eq!(first, slot_for_key(&a));
                assert_eq!(second, slot_for_key(&b));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
