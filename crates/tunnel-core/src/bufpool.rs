//! Size-classed buffer pool for splice copy loops.
//!
//! An optimization, not a correctness requirement: [`get`] falls back to a
//! fresh allocation whenever the pool is empty, and [`put`] silently drops
//! buffers that don't fit a known size class. Pool-owned buffers must never
//! leak into long-lived storage — callers hold them only for the duration
//! of one copy call.

use std::sync::{Mutex, OnceLock};

const CLASS_16K: usize = 16 * 1024;
const CLASS_5K: usize = 5 * 1024;
const CLASS_2K: usize = 2 * 1024;
const CLASS_1K: usize = 1024;

struct Pools {
    p16k: Mutex<Vec<Vec<u8>>>,
    p5k: Mutex<Vec<Vec<u8>>>,
    p2k: Mutex<Vec<Vec<u8>>>,
    p1k: Mutex<Vec<Vec<u8>>>,
    small: Mutex<Vec<Vec<u8>>>,
}

fn pools() -> &'static Pools {
    static POOLS: OnceLock<Pools> = OnceLock::new();
    POOLS.get_or_init(|| Pools {
        p16k: Mutex::new(Vec::new()),
        p5k: Mutex::new(Vec::new()),
        p2k: Mutex::new(Vec::new()),
        p1k: Mutex::new(Vec::new()),
        small: Mutex::new(Vec::new()),
    })
}

fn class_for(size: usize) -> &'static Mutex<Vec<Vec<u8>>> {
    let p = pools();
    if size >= CLASS_16K {
        &p.p16k
    } else if size >= CLASS_5K {
        &p.p5k
    } else if size >= CLASS_2K {
        &p.p2k
    } else if size >= CLASS_1K {
        &p.p1k
    } else {
        &p.small
    }
}

/// Borrow a buffer of at least `size` bytes, resized to exactly `size`.
pub fn get(size: usize) -> Vec<u8> {
    let mut queue = class_for(size).lock().unwrap();
    while let Some(mut buf) = queue.pop() {
        if buf.capacity() >= size {
            buf.resize(size, 0);
            return buf;
        }
        // Too small for this class somehow; drop and keep looking.
    }
    vec![0u8; size]
}

/// Return a buffer to the pool matching its capacity.
pub fn put(buf: Vec<u8>) {
    class_for(buf.capacity()).lock().unwrap().push(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_requested_size() {
        let buf = get(4096);
        assert_eq!(buf.len(), 4096);
    }

    #[test]
    fn put_then_get_reuses_capacity() {
        let buf = get(20 * 1024);
        let cap = buf.capacity();
        put(buf);
        let reused = get(20 * 1024);
        assert!(reused.capacity() >= cap);
    }
}
