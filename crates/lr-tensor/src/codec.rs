//! Header-less byte codec for typed arrays.
//!
//! An array of `N` elements of size `E` encodes to exactly `N * E` bytes in
//! the native byte order of the producing process. The reader must know the
//! element type out of band; trailing bytes that do not fill a whole element
//! are ignored on decode.

use bytemuck::Pod;

/// Raw memory copy of `values`.
pub fn serialize_array<T: Pod>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

/// Rebuilds `len(bytes) / size_of::<T>()` elements from `bytes`.
///
/// The input need not be aligned for `T`.
pub fn deserialize_array<T: Pod>(bytes: &[u8]) -> Vec<T> {
    let size = std::mem::size_of::<T>();
    if size == 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}
