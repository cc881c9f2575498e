//! Signature scan for XFG hash loads.
//!
//! Before an XFG-checked indirect call the compiler stages the expected type
//! hash with an immediate load, e.g. on x64:
//!
//! ```text
//! 49 BA 70 D9 5B 74 A1 8F 04 A6    mov r10, 0A6048FA1745BD970h
//! ```
//!
//! The scan is a plain forward substring search. Most matches are unrelated
//! code; they are filtered later by looking the candidate hash up.

use memchr::memmem;

use crate::pe::XFG_HASH_SIZE;

const HASH_LEN: usize = XFG_HASH_SIZE as usize;

/// Clear the low bit of an XFG hash. The bit is not part of the hash identity.
#[inline]
pub fn mask_hash(hash: u64) -> u64 {
    hash & !1
}

/// One candidate hash load found in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashLoad {
    /// Offset of the signature in the scanned buffer
    pub offset: usize,
    /// Immediate following the signature, low bit masked
    pub hash: u64,
}

/// Iterator over every signature match followed by a full 8-byte immediate.
///
/// After a match the search resumes right behind the signature, so a
/// spurious match cannot hide a real load starting inside its would-be
/// immediate. Once a candidate is known to be a hash load, call
/// [`skip_immediate`](Self::skip_immediate) to resume past its immediate.
pub struct HashLoadMatches<'h, 's> {
    haystack: &'h [u8],
    finder: memmem::Finder<'s>,
    signature_len: usize,
    position: usize,
    immediate_end: usize,
}

impl<'h, 's> HashLoadMatches<'h, 's> {
    pub fn new(haystack: &'h [u8], signature: &'s [u8]) -> Self {
        Self {
            haystack,
            finder: memmem::Finder::new(signature),
            signature_len: signature.len(),
            position: 0,
            immediate_end: 0,
        }
    }

    /// Treat the immediate of the last match as consumed.
    pub fn skip_immediate(&mut self) {
        self.position = self.position.max(self.immediate_end);
    }
}

impl Iterator for HashLoadMatches<'_, '_> {
    type Item = HashLoad;

    fn next(&mut self) -> Option<HashLoad> {
        if self.signature_len == 0 {
            return None;
        }
        let rest = self.haystack.get(self.position..)?;
        let offset = self.position + self.finder.find(rest)?;

        let imm = offset + self.signature_len;
        let bytes: [u8; HASH_LEN] = self.haystack.get(imm..imm + HASH_LEN)?.try_into().ok()?;
        self.position = imm;
        self.immediate_end = imm + HASH_LEN;

        Some(HashLoad {
            offset,
            hash: mask_hash(u64::from_le_bytes(bytes)),
        })
    }
}

/// Scan `code` for `signature` followed by an 8-byte immediate.
pub fn find_hash_loads<'h, 's>(code: &'h [u8], signature: &'s [u8]) -> HashLoadMatches<'h, 's> {
    HashLoadMatches::new(code, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::X64_HASH_LOAD_PREFIX;

    fn load(hash: u64) -> Vec<u8> {
        let mut v = X64_HASH_LOAD_PREFIX.to_vec();
        v.extend_from_slice(&hash.to_le_bytes());
        v
    }

    #[test]
    fn masking_is_idempotent() {
        for h in [0u64, 1, 0xA604_8FA1_745B_D971, u64::MAX] {
            assert_eq!(mask_hash(mask_hash(h)), mask_hash(h));
            assert_eq!(mask_hash(h) & 1, 0);
        }
    }

    #[test]
    fn reports_single_match_at_prefix() {
        let mut code = vec![0x90, 0x90, 0x48, 0x8B, 0xC1];
        code.extend(load(0xA604_8FA1_745B_D971));
        code.extend([0x41, 0xFF, 0xD3]);

        let hits: Vec<_> = find_hash_loads(&code, &X64_HASH_LOAD_PREFIX).collect();
        assert_eq!(
            hits,
            vec![HashLoad {
                offset: 5,
                hash: 0xA604_8FA1_745B_D970,
            }]
        );
    }

    #[test]
    fn spurious_match_does_not_hide_next_load() {
        let mut code = vec![0x49, 0xBA, 0x00, 0x00];
        code.extend(load(0x1122_3344_5566_7788));
        code.extend([0xCC; 6]);

        let hits: Vec<_> = find_hash_loads(&code, &X64_HASH_LOAD_PREFIX).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].offset, 0);
        assert_eq!(hits[1].offset, 4);
        assert_eq!(hits[1].hash, 0x1122_3344_5566_7788);
    }

    #[test]
    fn skipped_immediate_is_not_rescanned() {
        // the immediate itself contains 49 BA
        let mut code = load(0x0000_0000_0000_BA49);
        code.extend(load(0x10));

        let offsets: Vec<_> = find_hash_loads(&code, &X64_HASH_LOAD_PREFIX)
            .map(|hit| hit.offset)
            .collect();
        assert_eq!(offsets, vec![0, 2, 10]);

        let mut matches = find_hash_loads(&code, &X64_HASH_LOAD_PREFIX);
        let mut accepted = Vec::new();
        while let Some(hit) = matches.next() {
            matches.skip_immediate();
            accepted.push(hit.offset);
        }
        assert_eq!(accepted, vec![0, 10]);
    }

    #[test]
    fn truncated_tail_is_ignored() {
        let mut code = load(0x1234);
        code.extend([0x49, 0xBA, 1, 2, 3, 4, 5, 6, 7]);

        let hits: Vec<_> = find_hash_loads(&code, &X64_HASH_LOAD_PREFIX).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hash, 0x1234);
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(find_hash_loads(&[], &X64_HASH_LOAD_PREFIX).count(), 0);
        assert_eq!(find_hash_loads(&[0x49, 0xBA], &[]).count(), 0);
    }
}
