//! Raw memory operations, hashing, and page arithmetic
//!
//! The hashes here are the ones the framework layers above use for hashed
//! collections (the incremental CRC-table hash), for integrity checks
//! (ISO-3309 CRC-32), and for stream checksums (Adler-32).
//!
//! The CRC-32 table is faulted in on first use under the process
//! [`base_lock`](crate::sync::base_lock), published with a double-checked
//! flag: readers that observe the flag set are guaranteed to see every
//! table entry.

use std::cell::UnsafeCell;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::sync::base_lock;

/// Size of a host memory page in bytes.
pub const PAGE_SIZE: usize = 4096;

const ADLER_BASE: u32 = 65521;
const ADLER_NMAX: usize = 5552;

/// The 256-entry CRC-16 table used by the incremental framework hash.
const CRC16_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut index = 0;
    while index < 256 {
        let mut crc = index as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            bit += 1;
        }
        table[index] = crc;
        index += 1;
    }
    table
};

// ---------------------------------------------------------------------------
// Buffer operations
// ---------------------------------------------------------------------------

/// Copy `count` bytes from the front of `src` to the front of `dst`.
pub fn copy_buf(dst: &mut [u8], src: &[u8], count: usize) {
    dst[..count].copy_from_slice(&src[..count]);
}

/// Move `count` bytes within one buffer; the ranges may overlap.
pub fn move_buf(buf: &mut [u8], src_index: usize, dst_index: usize, count: usize) {
    buf.copy_within(src_index..src_index + count, dst_index);
}

/// Compare the first `count` bytes of two buffers.
pub fn compare_buf(first: &[u8], second: &[u8], count: usize) -> CmpOrdering {
    first[..count].cmp(&second[..count])
}

/// Fill a byte buffer with the given value.
pub fn set_buf(dst: &mut [u8], fill: u8) {
    dst.fill(fill);
}

/// Fill a 16-bit buffer. When both bytes of the fill value are equal the
/// fill lowers to a plain byte fill.
pub fn set_buf_u16(dst: &mut [u16], fill: u16) {
    if (fill >> 8) as u8 == (fill & 0xFF) as u8 {
        // All bytes equal, so a byte-wise fill produces the same pattern
        unsafe {
            std::ptr::write_bytes(dst.as_mut_ptr(), (fill & 0xFF) as u8, dst.len());
        }
        return;
    }
    dst.fill(fill);
}

/// Fill a 32-bit buffer. A zero fill lowers to a plain byte fill.
pub fn set_buf_u32(dst: &mut [u32], fill: u32) {
    if fill == 0 {
        unsafe {
            std::ptr::write_bytes(dst.as_mut_ptr(), 0, dst.len());
        }
        return;
    }
    dst.fill(fill);
}

/// Fill a 64-bit buffer. A zero fill lowers to a plain byte fill.
pub fn set_buf_u64(dst: &mut [u64], fill: u64) {
    if fill == 0 {
        unsafe {
            std::ptr::write_bytes(dst.as_mut_ptr(), 0, dst.len());
        }
        return;
    }
    dst.fill(fill);
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Incremental framework hash over disjoint buffer fragments.
///
/// `last` is the value returned by the previous fragment's hash, or 0 to
/// start a new stream. Each byte indexes a constant CRC-16 table so that
/// the accumulated bits scramble better than a plain byte sum would. The
/// return value is reduced by `modulus`.
pub fn hash_buffer(last: u32, buf: &[u8], modulus: u32) -> u32 {
    let mut hash = last;
    for &byte in buf {
        let high = hash >> 24;
        hash = hash
            .wrapping_add(hash.wrapping_mul(37))
            .wrapping_add(high)
            .wrapping_add(u32::from(CRC16_TABLE[byte as usize]));
    }
    hash % modulus
}

/// Hash a single buffer with the framework hash.
pub fn hash_buffer_full(buf: &[u8], modulus: u32) -> u32 {
    hash_buffer(0, buf, modulus)
}

struct Crc32Table(UnsafeCell<[u32; 256]>);

// Published once under the base lock; read-only afterwards.
unsafe impl Sync for Crc32Table {}

static CRC32_READY: AtomicBool = AtomicBool::new(false);
static CRC32_TABLE: Crc32Table = Crc32Table(UnsafeCell::new([0u32; 256]));

fn crc32_table() -> &'static [u32; 256] {
    if !CRC32_READY.load(Ordering::Acquire) {
        let _guard = base_lock().enter();
        if !CRC32_READY.load(Ordering::Relaxed) {
            let table = unsafe { &mut *CRC32_TABLE.0.get() };
            for (index, entry) in table.iter_mut().enumerate() {
                let mut current = index as u32;
                for _ in 0..8 {
                    current = if current & 1 != 0 {
                        0xEDB8_8320 ^ (current >> 1)
                    } else {
                        current >> 1
                    };
                }
                *entry = current;
            }
            CRC32_READY.store(true, Ordering::Release);
        }
    }
    unsafe { &*CRC32_TABLE.0.get() }
}

/// Incremental ISO-3309 CRC-32 over disjoint buffer fragments.
///
/// `last` is the running CRC value. The single-shot form is
/// [`crc32_full`], which applies the standard pre/post conditioning.
pub fn crc32(last: u32, buf: &[u8]) -> u32 {
    let table = crc32_table();
    let mut hash = last;
    for &byte in buf {
        hash = table[((hash ^ u32::from(byte)) & 0xFF) as usize] ^ (hash >> 8);
    }
    hash
}

/// ISO-3309 CRC-32 of a whole buffer.
pub fn crc32_full(buf: &[u8]) -> u32 {
    crc32(u32::MAX, buf) ^ u32::MAX
}

/// Incremental Adler-32 (RFC 1950).
///
/// `adler` is the running checksum; an empty fragment leaves it
/// unchanged. New streams start from [`adler32_full`] or a seed of 1.
pub fn adler32(adler: u32, buf: &[u8]) -> u32 {
    if buf.is_empty() {
        return if adler == 0 { 1 } else { adler };
    }

    let mut s1 = adler & 0xFFFF;
    let mut s2 = (adler >> 16) & 0xFFFF;

    // The sums only need reducing every NMAX bytes, which keeps the
    // modulo operations out of the inner loop.
    for chunk in buf.chunks(ADLER_NMAX) {
        for &byte in chunk {
            s1 += u32::from(byte);
            s2 += s1;
        }
        s1 %= ADLER_BASE;
        s2 %= ADLER_BASE;
    }
    (s2 << 16) | s1
}

/// Adler-32 of a whole buffer. The empty buffer hashes to 1, the
/// stream identity.
pub fn adler32_full(buf: &[u8]) -> u32 {
    adler32(1, buf)
}

/// Combine two Adler-32 checksums: given `adler32_full(a)`,
/// `adler32_full(b)` and the length of `b`, produce
/// `adler32_full(a ++ b)` without touching the data again.
pub fn adler32_combine(adler1: u32, adler2: u32, len2: u64) -> u32 {
    let base = u64::from(ADLER_BASE);
    let rem = len2 % base;

    let mut sum1 = u64::from(adler1 & 0xFFFF);
    let mut sum2 = (rem * sum1) % base;
    sum1 += u64::from(adler2 & 0xFFFF) + base - 1;
    sum2 += u64::from((adler1 >> 16) & 0xFFFF) + u64::from((adler2 >> 16) & 0xFFFF) + base - rem;

    if sum1 >= base {
        sum1 -= base;
    }
    if sum1 >= base {
        sum1 -= base;
    }
    if sum2 >= base << 1 {
        sum2 -= base << 1;
    }
    if sum2 >= base {
        sum2 -= base;
    }
    ((sum2 as u32) << 16) | sum1 as u32
}

// ---------------------------------------------------------------------------
// Page arithmetic
// ---------------------------------------------------------------------------

/// Round a byte count up to a whole number of pages, with a minimum of
/// one page.
pub fn page_rounded(to_round: usize) -> usize {
    if to_round <= PAGE_SIZE {
        return PAGE_SIZE;
    }
    let partial = to_round % PAGE_SIZE;
    if partial == 0 {
        to_round
    } else {
        to_round - partial + PAGE_SIZE
    }
}

/// Number of pages needed to cover a byte count. Zero bytes cover zero
/// pages.
pub fn pages_covered(size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let pages = size / PAGE_SIZE;
    if size % PAGE_SIZE != 0 {
        pages + 1
    } else {
        pages
    }
}

/// Round an address up to the next page boundary. An address already on
/// a boundary is returned unchanged; a null address stays null.
pub fn next_page_addr(addr: usize) -> usize {
    if addr == 0 {
        return 0;
    }
    let mut aligned = (addr / PAGE_SIZE) * PAGE_SIZE;
    if aligned == 0 {
        aligned = PAGE_SIZE;
    } else if addr % PAGE_SIZE != 0 {
        aligned += PAGE_SIZE;
    }
    aligned
}

/// Round an address down to its page boundary. Addresses below one page
/// (null included) map to null.
pub fn prev_page_addr(addr: usize) -> usize {
    if addr < PAGE_SIZE {
        return 0;
    }
    (addr / PAGE_SIZE) * PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_table_law() {
        let table = crc32_table();
        for (index, &entry) in table.iter().enumerate() {
            let mut expected = index as u32;
            for _ in 0..8 {
                expected = if expected & 1 != 0 {
                    0xEDB8_8320 ^ (expected >> 1)
                } else {
                    expected >> 1
                };
            }
            assert_eq!(entry, expected, "table entry {index}");
        }
    }

    #[test]
    fn test_crc32_check_value() {
        // The standard CRC-32/ISO-HDLC check value
        assert_eq!(crc32_full(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32_full(b""), 0);
    }

    #[test]
    fn test_crc32_incremental_matches_single_shot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let (a, b) = data.split_at(17);
        let running = crc32(crc32(u32::MAX, a), b) ^ u32::MAX;
        assert_eq!(running, crc32_full(data));
    }

    #[test]
    fn test_adler32_identities() {
        assert_eq!(adler32_full(b""), 1);
        assert_eq!(adler32_full(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn test_adler32_combine_law() {
        let a = b"first fragment ";
        let b = b"and the second, somewhat longer fragment";
        let combined = adler32_combine(adler32_full(a), adler32_full(b), b.len() as u64);
        let whole = {
            let mut joined = a.to_vec();
            joined.extend_from_slice(b);
            adler32_full(&joined)
        };
        assert_eq!(combined, whole);
    }

    #[test]
    fn test_framework_hash_identities() {
        const MODULUS: u32 = 109;
        assert_eq!(hash_buffer_full(b"", MODULUS), 0);

        let one = hash_buffer_full(b"some key text", MODULUS);
        let two = hash_buffer_full(b"some key text", MODULUS);
        assert_eq!(one, two);
        assert!(one < MODULUS);
    }

    #[test]
    fn test_typed_fills() {
        let mut buf16 = [0u16; 8];
        set_buf_u16(&mut buf16, 0xABAB);
        assert!(buf16.iter().all(|&v| v == 0xABAB));
        set_buf_u16(&mut buf16, 0x1234);
        assert!(buf16.iter().all(|&v| v == 0x1234));

        let mut buf32 = [7u32; 4];
        set_buf_u32(&mut buf32, 0);
        assert!(buf32.iter().all(|&v| v == 0));

        let mut buf64 = [0u64; 4];
        set_buf_u64(&mut buf64, 0x0102_0304_0506_0708);
        assert!(buf64.iter().all(|&v| v == 0x0102_0304_0506_0708));
    }

    #[test]
    fn test_move_buf_overlapping() {
        let mut buf = *b"abcdefgh";
        move_buf(&mut buf, 0, 2, 6);
        assert_eq!(&buf, b"ababcdef");
    }

    #[test]
    fn test_page_arithmetic() {
        assert_eq!(page_rounded(0), PAGE_SIZE);
        assert_eq!(page_rounded(1), PAGE_SIZE);
        assert_eq!(page_rounded(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_rounded(PAGE_SIZE + 1), 2 * PAGE_SIZE);

        assert_eq!(pages_covered(0), 0);
        assert_eq!(pages_covered(1), 1);
        assert_eq!(pages_covered(PAGE_SIZE), 1);
        assert_eq!(pages_covered(PAGE_SIZE * 3 + 5), 4);

        assert_eq!(next_page_addr(0), 0);
        assert_eq!(next_page_addr(1), PAGE_SIZE);
        assert_eq!(next_page_addr(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(next_page_addr(PAGE_SIZE + 1), 2 * PAGE_SIZE);

        assert_eq!(prev_page_addr(0), 0);
        assert_eq!(prev_page_addr(PAGE_SIZE - 1), 0);
        assert_eq!(prev_page_addr(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(prev_page_addr(2 * PAGE_SIZE + 17), 2 * PAGE_SIZE);
    }
}
