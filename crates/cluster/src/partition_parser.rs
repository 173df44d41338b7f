//! Partition ownership bitmaps.
//!
//! `replicas-master` answers `ns:bitmap;...` and `replicas-all` answers
//! `ns:count,bitmap,...;...`, one base64 bitmap per replica index. Bit `i`
//! of a bitmap is set when the answering node owns partition `i` of that
//! replica.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use corelib::{Error, PartitionMap, Result, PARTITIONS};

/// Info command for the requested replica depth.
pub fn replicas_command(request_proles: bool) -> &'static str {
    if request_proles {
        "replicas-all"
    } else {
        "replicas-master"
    }
}

/// Builds the ownership map reported by `owner`.
pub fn parse_replicas<N>(value: &str, owner: &Arc<N>, with_proles: bool) -> Result<PartitionMap<N>> {
    let mut map = PartitionMap::new();

    for entry in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (namespace, bitmaps) = entry
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("missing `:` in replicas entry `{entry}`")))?;
        let namespace = namespace.trim();
        if namespace.is_empty() {
            return Err(Error::Parse(format!("empty namespace in replicas entry `{entry}`")));
        }

        if with_proles {
            let mut parts = bitmaps.split(',');
            let count: usize = parts
                .next()
                .unwrap_or_default()
                .parse()
                .map_err(|_| Error::Parse(format!("bad replica count in `{entry}`")))?;
            map.ensure_replicas(namespace, count);

            let mut seen = 0;
            for (replica, bitmap) in parts.enumerate() {
                apply_bitmap(&mut map, namespace, replica, bitmap, owner)?;
                seen += 1;
            }
            if seen != count {
                return Err(Error::Parse(format!(
                    "namespace `{namespace}` announces {count} replicas but carries {seen}"
                )));
            }
        } else {
            map.ensure_replicas(namespace, 1);
            apply_bitmap(&mut map, namespace, 0, bitmaps, owner)?;
        }
    }

    Ok(map)
}

fn apply_bitmap<N>(
    map: &mut PartitionMap<N>,
    namespace: &str,
    replica: usize,
    encoded: &str,
    owner: &Arc<N>,
) -> Result<()> {
    let bitmap = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Parse(format!("bad bitmap for `{namespace}`: {e}")))?;
    if bitmap.len() < PARTITIONS / 8 {
        return Err(Error::Parse(format!(
            "bitmap for `{namespace}` has {} bytes, expected {}",
            bitmap.len(),
            PARTITIONS / 8
        )));
    }

    for partition_id in 0..PARTITIONS {
        if bitmap[partition_id >> 3] & (0x80 >> (partition_id & 7)) != 0 {
            map.set(namespace, replica, partition_id, Arc::clone(owner));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(owned: &[usize]) -> String {
        let mut bytes = vec![0u8; PARTITIONS / 8];
        for &id in owned {
            bytes[id >> 3] |= 0x80 >> (id & 7);
        }
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_master_bitmap() {
        let owner = Arc::new("A");
        let value = format!("test:{};bar:{}", bitmap(&[0, 9, 4095]), bitmap(&[]));
        let map = parse_replicas(&value, &owner, false).unwrap();

        assert!(Arc::ptr_eq(map.get("test", 0, 0).unwrap(), &owner));
        assert!(Arc::ptr_eq(map.get("test", 0, 9).unwrap(), &owner));
        assert!(Arc::ptr_eq(map.get("test", 0, 4095).unwrap(), &owner));
        assert!(map.get("test", 0, 1).is_none());
        assert_eq!(map.owned_count(&owner), 3);
        assert_eq!(map.replica_count("bar"), 1);
    }

    #[test]
    fn test_all_replicas() {
        let owner = Arc::new("B");
        let value = format!("test:2,{},{}", bitmap(&[1]), bitmap(&[2]));
        let map = parse_replicas(&value, &owner, true).unwrap();

        assert_eq!(map.replica_count("test"), 2);
        assert!(map.get("test", 0, 1).is_some());
        assert!(map.get("test", 1, 2).is_some());
        assert!(map.get("test", 1, 1).is_none());
    }

    #[test]
    fn test_replica_count_mismatch() {
        let owner = Arc::new("C");
        let value = format!("test:3,{}", bitmap(&[1]));
        assert!(parse_replicas(&value, &owner, true).is_err());
    }

    #[test]
    fn test_short_bitmap_rejected() {
        let owner = Arc::new("D");
        let value = format!("test:{}", STANDARD.encode([0xFFu8; 4]));
        assert!(parse_replicas(&value, &owner, false).is_err());
    }

    #[test]
    fn test_bad_base64_rejected() {
        let owner = Arc::new("E");
        assert!(parse_replicas("test:***", &owner, false).is_err());
    }
}
