//! Bit-precise IPv6 prefix arithmetic.
//!
//! A [`Prefix`] is a 128-bit address (IPv4 addresses are carried IPv4-mapped,
//! per `examples/original_source/src/prefix_utils.h`) plus a prefix length.
//! Bit index `0` is the most significant bit of the address (the leftmost
//! bit as printed), matching the original's big-endian `in6_addr` layout.

use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A prefix: a 128-bit address and a length in `0..=128`.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Prefix {
    /// The address, as a 128-bit big-endian integer (bit 0 = MSB).
    pub addr: u128,
    /// Prefix length, `0..=128`.
    pub plen: u8,
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Prefix({})", self.ntop(false))
    }
}

/// The bitmask covering the first `plen` bits (MSB-first) of a 128-bit value.
fn mask_for(plen: u8) -> u128 {
    if plen == 0 {
        0
    } else if plen >= 128 {
        !0u128
    } else {
        !0u128 << (128 - plen as u32)
    }
}

fn top_bits_eq(a: u128, b: u128, nbits: u8) -> bool {
    let mask = mask_for(nbits);
    (a & mask) == (b & mask)
}

/// Extracts `len` bits starting at MSB-indexed bit `start`, right-aligned
/// into the low bits of the result (i.e. as an unsigned integer).
fn get_bits(v: u128, start: u8, len: u8) -> u128 {
    if len == 0 {
        return 0;
    }
    let shift = 128 - (start as u32 + len as u32);
    let mask = (1u128.checked_shl(len as u32).unwrap_or(0)).wrapping_sub(1);
    (v >> shift) & mask
}

/// Sets `len` bits starting at MSB-indexed bit `start` to the low `len` bits
/// of `value`, leaving every other bit of `v` untouched.
fn put_bits(v: u128, start: u8, len: u8, value: u128) -> u128 {
    if len == 0 {
        return v;
    }
    let shift = 128 - (start as u32 + len as u32);
    let field_mask = (1u128.checked_shl(len as u32).unwrap_or(0)).wrapping_sub(1);
    let cleared = v & !(field_mask << shift);
    cleared | ((value & field_mask) << shift)
}

/// Copies `n_bits` starting at bit `from_bit` from `src` into `dst`; bits
/// outside the range are left untouched in the returned value.
pub fn bmemcpy(dst: u128, src: u128, from_bit: u8, n_bits: u8) -> u128 {
    put_bits(dst, from_bit, n_bits, get_bits(src, from_bit, n_bits))
}

/// Like [`bmemcpy`] but allows unequal source/destination start offsets.
pub fn bmemcpy_shift(dst: u128, dst_start: u8, src: u128, src_start: u8, n_bits: u8) -> u128 {
    put_bits(dst, dst_start, n_bits, get_bits(src, src_start, n_bits))
}

/// `::ffff:0:0/96` — the IPv4-in-IPv6 mapping prefix.
pub const IPV4_IN_IPV6_PREFIX: Prefix = Prefix {
    addr: 0x0000_0000_0000_0000_0000_ffff_0000_0000,
    plen: 96,
};

/// `fc00::/7` — the ULA range.
pub const IPV6_ULA_PREFIX: Prefix = Prefix {
    addr: 0xfc00_0000_0000_0000_0000_0000_0000_0000,
    plen: 7,
};

/// `fe80::/10` — the link-local range.
pub const IPV6_LL_PREFIX: Prefix = Prefix {
    addr: 0xfe80_0000_0000_0000_0000_0000_0000_0000,
    plen: 10,
};

/// `2000::/3` — the global unicast range.
pub const IPV6_GLOBAL_PREFIX: Prefix = Prefix {
    addr: 0x2000_0000_0000_0000_0000_0000_0000_0000,
    plen: 3,
};

impl Prefix {
    /// Builds a prefix from a raw address and length without canonicalizing.
    pub fn new(addr: u128, plen: u8) -> Prefix {
        Prefix { addr, plen }
    }

    /// `prefix_contains`: true iff `self.plen <= inner.plen` and the first
    /// `self.plen` bits of both addresses match.
    pub fn contains(&self, inner: &Prefix) -> bool {
        self.plen <= inner.plen && top_bits_eq(self.addr, inner.addr, self.plen)
    }

    /// `prefix_canonical`: zeroes every bit past `plen`.
    pub fn canonical(&self) -> Prefix {
        Prefix {
            addr: self.addr & mask_for(self.plen),
            plen: self.plen,
        }
    }

    /// `prefix_cmp`: longer prefixes sort first (are "smaller"); equal
    /// lengths compare lexicographically over the first `plen` bits.
    pub fn prefix_cmp(&self, other: &Prefix) -> Ordering {
        match self.plen.cmp(&other.plen) {
            Ordering::Equal => {
                let mask = mask_for(self.plen);
                (self.addr & mask).cmp(&(other.addr & mask))
            }
            Ordering::Greater => Ordering::Less,
            Ordering::Less => Ordering::Greater,
        }
    }

    /// True iff `self` lies within `::ffff:0:0/96`.
    pub fn is_ipv4(&self) -> bool {
        IPV4_IN_IPV6_PREFIX.contains(self)
    }

    /// True iff `self` lies within `fc00::/7`.
    pub fn is_ula(&self) -> bool {
        IPV6_ULA_PREFIX.contains(self)
    }

    /// True iff `self` lies within `fe80::/10`.
    pub fn is_link_local(&self) -> bool {
        IPV6_LL_PREFIX.contains(self)
    }

    /// True iff `self` lies within `2000::/3`.
    pub fn is_global(&self) -> bool {
        IPV6_GLOBAL_PREFIX.contains(self)
    }

    /// `prefix_random`: a uniformly random sub-prefix of length `plen`
    /// inside `self`. `None` if `plen < self.plen`.
    pub fn random_subprefix(&self, plen: u8) -> Option<Prefix> {
        let mut rng = rand::thread_rng();
        self.subprefix_with_rng(&mut rng, plen)
    }

    /// `prefix_prandom`: a deterministic pseudo-random sub-prefix keyed by
    /// `(seed, counter)`. Same inputs always produce the same output; the
    /// RNG seed is derived by XOR-folding the seed bytes and the counter
    /// into a 32-byte array rather than hashing, so results stay stable
    /// across Rust/std versions.
    pub fn prandom_subprefix(&self, seed: &[u8], counter: u32, plen: u8) -> Option<Prefix> {
        let mut seed_bytes = [0u8; 32];
        for (i, b) in seed.iter().enumerate() {
            seed_bytes[i % 32] ^= *b;
        }
        for (i, b) in counter.to_le_bytes().iter().enumerate() {
            seed_bytes[i % 32] ^= *b;
        }
        let mut rng = ChaCha8Rng::from_seed(seed_bytes);
        self.subprefix_with_rng(&mut rng, plen)
    }

    fn subprefix_with_rng(&self, rng: &mut impl RngCore, plen: u8) -> Option<Prefix> {
        if plen < self.plen || plen > 128 {
            return None;
        }
        let host_len = plen - self.plen;
        let host_bits: u128 = if host_len == 0 {
            0
        } else if host_len >= 128 {
            rng.gen()
        } else {
            rng.gen_range(0..(1u128 << host_len))
        };
        let addr = put_bits(self.canonical().addr, self.plen, host_len, host_bits);
        Some(Prefix { addr, plen })
    }

    /// `prefix_increment`: treats bits `[protected_len, plen)` as an
    /// unsigned counter, increments it, and wraps. Returns `None` if
    /// `plen <= protected_len` or the counter field is wider than 32 bits;
    /// otherwise the incremented prefix and whether the counter wrapped.
    pub fn increment(&self, protected_len: u8) -> Option<(Prefix, bool)> {
        if self.plen <= protected_len {
            return None;
        }
        let counter_len = self.plen - protected_len;
        if counter_len > 32 {
            return None;
        }
        let field_mask = (1u128.checked_shl(counter_len as u32).unwrap_or(0)).wrapping_sub(1);
        let current = get_bits(self.addr, protected_len, counter_len);
        let next = (current + 1) & field_mask;
        let wrapped = next == 0;
        let addr = put_bits(self.addr, protected_len, counter_len, next);
        Some((Prefix { addr, plen: self.plen }, wrapped))
    }

    /// `prefix_last`: sets the counter field `[protected_len, plen)` to
    /// all-ones.
    pub fn last(&self, protected_len: u8) -> Option<Prefix> {
        if self.plen <= protected_len {
            return None;
        }
        let counter_len = self.plen - protected_len;
        let field_mask = (1u128.checked_shl(counter_len as u32).unwrap_or(0)).wrapping_sub(1);
        let addr = put_bits(self.addr, protected_len, counter_len, field_mask);
        Some(Prefix { addr, plen: self.plen })
    }

    /// `prefix_pton`: parses `ADDR`, `ADDR/PLEN`, or a dotted-quad IPv4
    /// literal (optionally `/PLEN` in IPv4 bits, promoted to IPv4-mapped
    /// IPv6). `None` on any parse error; `/PLEN` values out of range for
    /// the address family are rejected rather than clamped.
    pub fn pton(s: &str) -> Option<Prefix> {
        let (addr_part, plen_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };

        if addr_part.contains('.') && !addr_part.contains(':') {
            let v4 = Ipv4Addr::from_str(addr_part).ok()?;
            let plen4 = match plen_part {
                Some(p) => p.parse::<u8>().ok()?,
                None => 32,
            };
            if plen4 > 32 {
                return None;
            }
            let v4_bits = u32::from(v4) as u128;
            let addr = IPV4_IN_IPV6_PREFIX.addr | v4_bits;
            return Some(Prefix {
                addr,
                plen: 96 + plen4,
            });
        }

        let v6 = Ipv6Addr::from_str(addr_part).ok()?;
        let plen = match plen_part {
            Some(p) => p.parse::<u8>().ok()?,
            None => 128,
        };
        if plen > 128 {
            return None;
        }
        Some(Prefix {
            addr: u128::from(v6),
            plen,
        })
    }

    /// `prefix_ntop`: renders `"address/plen"`. IPv4-mapped prefixes render
    /// the address as dotted-quad. When `canonical` is set, trailing bits
    /// past `plen` are zeroed before printing; otherwise the address is
    /// printed exactly as stored.
    pub fn ntop(&self, canonical: bool) -> String {
        let p = if canonical { self.canonical() } else { *self };
        if p.is_ipv4() {
            let v4 = Ipv4Addr::from((p.addr & 0xffff_ffff) as u32);
            format!("{}/{}", v4, p.plen.saturating_sub(96))
        } else {
            let v6 = Ipv6Addr::from(p.addr);
            format!("{}/{}", v6, p.plen)
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.ntop(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_parse_print_round_trip() {
        let p = Prefix::pton("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff/67").unwrap();
        assert_eq!(p.plen, 67);
        assert_eq!(p.addr, u128::MAX);
        assert_eq!(p.ntop(true), "ffff:ffff:ffff:ffff:e000::/67");
        assert_eq!(
            p.ntop(false),
            "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff/67"
        );
    }

    #[test]
    fn s2_ipv4_parse() {
        let p = Prefix::pton("10.0.0.0/8").unwrap();
        assert_eq!(p.plen, 104);
        let bytes = p.addr.to_be_bytes();
        assert_eq!(&bytes[10..], &[0xff, 0xff, 0x0a, 0x00, 0x00, 0x00]);

        let p2 = Prefix::pton("192.168.0.1").unwrap();
        assert_eq!(p2.plen, 128);
    }

    #[test]
    fn s3_increment_wrap() {
        let start = Prefix::pton("10::/16").unwrap();
        let (once, wrapped) = start.increment(12).unwrap();
        assert_eq!(once.ntop(false), "11::/16");
        assert!(!wrapped);

        // counter field is 4 bits wide (plen 16, protected_len 12), so a
        // full cycle back to the start takes 2^4 = 16 increments (invariant 8).
        let mut cur = start;
        let mut last_wrapped = false;
        for _ in 0..16 {
            let (next, w) = cur.increment(12).unwrap();
            cur = next;
            last_wrapped = w;
        }
        assert_eq!(cur.ntop(false), start.ntop(false));
        assert!(last_wrapped);
    }

    #[test]
    fn invariant_contains_implies_cmp_le() {
        let outer = Prefix::pton("2001:db8::/32").unwrap();
        let inner = Prefix::pton("2001:db8:1::/48").unwrap();
        assert!(outer.contains(&inner));
        assert!(outer.prefix_cmp(&inner) != Ordering::Greater);
    }

    #[test]
    fn invariant_increment_full_cycle() {
        let start = Prefix::pton("10::/8").unwrap();
        let protected = 4;
        let counter_len = start.plen - protected;
        let total = 1u128 << counter_len;
        let mut cur = start;
        let mut wraps = 0;
        for _ in 0..total {
            let (next, w) = cur.increment(protected).unwrap();
            cur = next;
            if w {
                wraps += 1;
            }
        }
        assert_eq!(cur.canonical().addr, start.canonical().addr);
        assert_eq!(wraps, 1);
    }

    #[test]
    fn pton_rejects_out_of_range_plen() {
        assert!(Prefix::pton("2001:db8::/129").is_none());
        assert!(Prefix::pton("10.0.0.0/33").is_none());
    }

    #[test]
    fn classification_predicates() {
        assert!(Prefix::pton("10.0.0.0/8").unwrap().is_ipv4());
        assert!(Prefix::pton("fc00::/7").unwrap().is_ula());
        assert!(Prefix::pton("fe80::1/128").unwrap().is_link_local());
        assert!(Prefix::pton("2001:db8::/32").unwrap().is_global());
    }

    #[test]
    fn prandom_is_deterministic() {
        let parent = Prefix::pton("fc00::/7").unwrap();
        let a = parent.prandom_subprefix(b"link0", 3, 48).unwrap();
        let b = parent.prandom_subprefix(b"link0", 3, 48).unwrap();
        assert_eq!(a.addr, b.addr);
        let c = parent.prandom_subprefix(b"link1", 3, 48).unwrap();
        assert_ne!(a.addr, c.addr);
    }
}
