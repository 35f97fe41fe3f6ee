//! Identity hashes
//!
//! An object's identity hash is derived from its address the first time it is
//! requested. Young objects move when promoted, so their hash is stored in the
//! header and travels with the copy. Old objects never move; when their
//! header holds no hash the address-derived value is stable on its own.

use strand_core::ObjRef;
use xxhash_rust::xxh3::xxh3_64_with_seed;

const HASH_SEED: u64 = 0x5354_5241_4E44_4944;

/// Address-derived identity hash. Never zero (zero marks "not taken").
#[inline]
pub fn address_hash(obj: ObjRef) -> u64 {
    match xxh3_64_with_seed(&obj.raw().to_le_bytes(), HASH_SEED) {
        0 => 1,
        h => h,
    }
}

/// Identity hash of an object given the hash stored in its header.
#[inline]
pub fn identity_hash(obj: ObjRef, stored: u64) -> u64 {
    if stored != 0 {
        stored
    } else {
        address_hash(obj)
    }
}
