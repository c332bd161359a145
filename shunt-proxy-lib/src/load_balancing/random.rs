/// Map a random draw onto a pool index.
///
/// Pure: the caller supplies the draw, so selection is reproducible in
/// tests. Returns `None` for an empty pool.
pub fn pick_index(len: usize, draw: u64) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some((draw % len as u64) as usize)
}

/// Pick a member of `pool` using `draw`.
pub fn pick<T>(pool: &[T], draw: u64) -> Option<&T> {
    pick_index(pool.len(), draw).and_then(|i| pool.get(i))
}

/// A fresh uniform draw from the thread-local generator.
pub fn draw() -> u64 {
    rand::random::<u64>()
}
