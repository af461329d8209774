//! Raw ELF dynamic-section walking.
//!
//! Everything in this module reads directly out of the dynamic linker's own
//! in-memory bookkeeping (`struct link_map`, the `.dynamic` array, the
//! symbol and string tables it points at) rather than re-parsing the ELF
//! file from disk. That's deliberate: `st_value` is only meaningful once
//! the loader has applied its load bias, and the symbol count itself is
//! derived from the hash table the loader builds at load time.
//!
//! Every function here is `unsafe`; callers above this module only ever see
//! the safe iterator produced by [`DynamicObject::symbols`].

use std::ffi::{c_char, c_void, CStr};
use std::os::raw::c_long;

use crate::error::LoadError;

// Constants from <elf.h>. `libc` doesn't expose these in a portable,
// ELF-specific way, so they're restated here as the minimal subset this
// crate needs.
const DT_NULL: c_long = 0;
const DT_HASH: c_long = 4;
const DT_STRTAB: c_long = 5;
const DT_SYMTAB: c_long = 6;
const DT_SYMENT: c_long = 11;
const DT_GNU_HASH: c_long = 0x6fff_fef5;

/// The stable, documented prefix of glibc's internal `struct link_map`
/// (see `<link.h>`). Only these five fields are part of the public ABI
/// `dlinfo(RTLD_DI_LINKMAP, ...)` hands back a pointer to.
#[repr(C)]
struct LinkMap {
    l_addr: usize,
    l_name: *const c_char,
    l_ld: *const Elf64Dyn,
    l_next: *mut LinkMap,
    l_prev: *mut LinkMap,
}

/// One `Elf64_Dyn` entry: a tag plus a tagged union of value-or-pointer,
/// represented here as a raw `u64` and reinterpreted per tag.
#[repr(C)]
struct Elf64Dyn {
    d_tag: c_long,
    d_un: u64,
}

/// One `Elf64_Sym` entry, field layout per the ELF64 ABI.
#[repr(C)]
#[derive(Clone, Copy)]
struct Elf64Sym {
    st_name: u32,
    st_info: u8,
    st_other: u8,
    st_shndx: u16,
    st_value: u64,
    st_size: u64,
}

/// A resolved `(name, address)` pair for one entry of a loaded object's
/// symbol table.
pub struct Symbol<'a> {
    pub name: &'a str,
    /// The relocated runtime address: `base + st_value`.
    pub address: usize,
}

/// A loaded shared object's dynamic section, reduced to what the discovery
/// engine needs: a symbol table, a string table, and a count.
pub struct DynamicObject {
    base: usize,
    symtab: *const Elf64Sym,
    strtab: *const c_char,
    symbol_count: usize,
}

// SAFETY: all pointers here point into the target process's own mapped,
// read-only (for our purposes) ELF image, which outlives the `dlopen`
// handle this was derived from. We never mutate through them.
unsafe impl Send for DynamicObject {}
unsafe impl Sync for DynamicObject {}

impl DynamicObject {
    /// Walks the `.dynamic` section reachable from a live `dlopen` handle.
    ///
    /// Mirrors `loadDL()` from the original C harness: resolve the
    /// `link_map` via `dlinfo`, then iterate `DT_*` tags until `DT_NULL`.
    pub(crate) fn from_handle(handle: *mut c_void, path: &str) -> Result<Self, LoadError> {
        let mut lm: *mut LinkMap = std::ptr::null_mut();

        // SAFETY: `handle` is a valid handle returned by a successful
        // `dlopen()`; `RTLD_DI_LINKMAP` with an `*mut LinkMap` output
        // parameter is the documented (if informally-typed) dlinfo() usage.
        let rc = unsafe {
            libc::dlinfo(
                handle,
                libc::RTLD_DI_LINKMAP,
                &mut lm as *mut *mut LinkMap as *mut c_void,
            )
        };

        if rc != 0 || lm.is_null() {
            return Err(LoadError::Dlinfo {
                path: path.to_string(),
                message: crate::error::dl_error_message(),
            });
        }

        // SAFETY: `lm` was just validated non-null by a successful dlinfo().
        let link_map = unsafe { &*lm };
        let base = link_map.l_addr;

        let mut symbol_count = 0usize;
        let mut symtab: *const Elf64Sym = std::ptr::null();
        let mut strtab: *const c_char = std::ptr::null();

        let mut cursor = link_map.l_ld;
        if cursor.is_null() {
            return Err(LoadError::MissingSymtab {
                path: path.to_string(),
            });
        }

        // SAFETY: `l_ld` points at the object's `.dynamic` array, which is
        // terminated by a `DT_NULL` entry; we stop exactly there.
        loop {
            let entry = unsafe { &*cursor };
            if entry.d_tag == DT_NULL {
                break;
            }

            match entry.d_tag {
                DT_GNU_HASH => {
                    // SAFETY: a non-null DT_GNU_HASH points at a valid
                    // GNU-style hash table for this object's dynsym.
                    symbol_count = unsafe { gnu_hash_symbol_count(entry.d_un as *const u32) };
                }
                DT_HASH => {
                    // SAFETY: a non-null DT_HASH points at a valid
                    // SysV-style hash table for this object's dynsym.
                    symbol_count = unsafe { sysv_hash_symbol_count(entry.d_un as *const u32) };
                }
                DT_SYMENT => {
                    let expect = std::mem::size_of::<Elf64Sym>() as u64;
                    if entry.d_un != expect {
                        tracing::warn!(
                            path,
                            got = entry.d_un,
                            expected = expect,
                            "unexpected DT_SYMENT value"
                        );
                    }
                }
                DT_SYMTAB => symtab = entry.d_un as *const Elf64Sym,
                DT_STRTAB => strtab = entry.d_un as *const c_char,
                _ => {}
            }

            // SAFETY: staying within the same `.dynamic` array until DT_NULL.
            cursor = unsafe { cursor.add(1) };
        }

        if symbol_count == 0 {
            return Err(LoadError::UnknownSymbolCount {
                path: path.to_string(),
            });
        }
        if symtab.is_null() {
            return Err(LoadError::MissingSymtab {
                path: path.to_string(),
            });
        }
        if strtab.is_null() {
            return Err(LoadError::MissingStrtab {
                path: path.to_string(),
            });
        }

        Ok(DynamicObject {
            base,
            symtab,
            strtab,
            symbol_count,
        })
    }

    /// The object's load bias (`link_map::l_addr`), i.e. `base` in
    /// `base + st_value`.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Iterates every defined symbol (index 1 and up — index 0 is always
    /// the reserved, always-undefined entry) as `(name, relocated address)`
    /// pairs.
    ///
    /// The harness never inspects `st_info`/`st_type`: sentinel symbols are
    /// classified purely by name prefix (spec §4.1).
    pub fn symbols(&self) -> impl Iterator<Item = Symbol<'_>> + '_ {
        (1..self.symbol_count).filter_map(move |i| {
            // SAFETY: `i < self.symbol_count`, which was derived from the
            // object's own hash table, so this stays within the symtab.
            let sym = unsafe { *self.symtab.add(i) };
            // SAFETY: `st_name` indexes into the object's string table,
            // which the dynamic linker guarantees is NUL-terminated.
            let name = unsafe { CStr::from_ptr(self.strtab.add(sym.st_name as usize)) };
            let name = name.to_str().ok()?;
            if name.is_empty() {
                return None;
            }
            Some(Symbol {
                name,
                address: self.base.wrapping_add(sym.st_value as usize),
            })
        })
    }
}

/// Symbol count via `DT_HASH` (spec §4.1): `nchain`, the second 32-bit word
/// of the SysV hash table, *is* the symbol table length.
///
/// # Safety
/// `table` must point at a valid SysV hash table (at least two `u32`s
/// readable).
unsafe fn sysv_hash_symbol_count(table: *const u32) -> usize {
    // SAFETY: forwarded from caller.
    unsafe { *table.add(1) as usize }
}

/// Symbol count via `DT_GNU_HASH` (spec §4.1).
///
/// Layout: `[nbuckets, sym_offset, bloom_size, bloom_shift]`, followed by
/// `bloom_size` machine words of bloom filter, `nbuckets` 32-bit bucket
/// heads, then chain words (terminated by a low bit of 1).
///
/// If the bloom filter is entirely zero the table is considered empty and
/// the symbol count is 1 (just the reserved undefined entry) — walking
/// buckets/chains in that state is undefined per the algorithm's own
/// precondition.
///
/// # Safety
/// `table` must point at a valid GNU-style hash table.
unsafe fn gnu_hash_symbol_count(table: *const u32) -> usize {
    // SAFETY: forwarded from caller; reads are bounded by the header
    // fields read first and used to size subsequent reads.
    unsafe {
        let nbuckets = *table as usize;
        let sym_offset = *table.add(1) as usize;
        let bloom_size = *table.add(2) as usize;
        // table[3] is bloom_shift; unused here.

        let bloom_words = table.add(4) as *const usize;
        let bloom_all_zero = (0..bloom_size).all(|i| *bloom_words.add(i) == 0);

        if bloom_all_zero {
            return 1;
        }

        let buckets = bloom_words.add(bloom_size) as *const u32;
        let mut max_index = sym_offset;
        for i in 0..nbuckets {
            let b = *buckets.add(i) as usize;
            if b > max_index {
                max_index = b;
            }
        }

        let chain = buckets.add(nbuckets);
        while (*chain.add(max_index - sym_offset) & 1) == 0 {
            max_index += 1;
        }

        max_index + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a synthetic GNU-hash table in a `Vec<u32>` and checks the
    /// symbol-count algorithm against a hand-computed expectation.
    #[test]
    fn gnu_hash_symbol_count_walks_chain_to_terminator() {
        // 2 buckets, sym_offset = 2 (first 2 symbols not in the hash),
        // bloom_size = 1 (non-zero so we don't take the empty shortcut).
        let nbuckets = 2u32;
        let sym_offset = 2u32;
        let bloom_size = 1u32;
        let bloom_shift = 0u32;

        let mut words: Vec<u32> = vec![nbuckets, sym_offset, bloom_size, bloom_shift];
        // one non-zero bloom word (as two u32 halves on a 64-bit machine word)
        words.push(1);
        words.push(0);
        // bucket heads: bucket 0 -> symbol 3, bucket 1 -> symbol 4
        words.push(3);
        words.push(4);
        // chain words starting at sym_offset (index 2): chain[1] (sym 3) not
        // terminal, chain[2] (sym 4) terminal (LSB set).
        words.push(0b10); // sym 2 (unused, before sym_offset-relative index 0)
        words.push(0b10); // sym 3 -> not last
        words.push(0b11); // sym 4 -> last (LSB=1)

        // SAFETY: `words` stays alive for the duration of the call below.
        let count = unsafe { gnu_hash_symbol_count(words.as_ptr()) };
        assert_eq!(count, 5);
    }

    #[test]
    fn gnu_hash_all_zero_bloom_means_one_symbol() {
        let words: Vec<u32> = vec![
            1, // nbuckets
            1, // sym_offset
            1, // bloom_size
            0, // bloom_shift
            0, 0, // zeroed bloom word
        ];

        // SAFETY: `words` stays alive for the duration of the call below.
        let count = unsafe { gnu_hash_symbol_count(words.as_ptr()) };
        assert_eq!(count, 1);
    }

    #[test]
    fn sysv_hash_symbol_count_reads_nchain() {
        let words: Vec<u32> = vec![10, 42];
        // SAFETY: `words` stays alive for the duration of the call below.
        let count = unsafe { sysv_hash_symbol_count(words.as_ptr()) };
        assert_eq!(count, 42);
    }
}
