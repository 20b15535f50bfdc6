use std::ffi::CStr;
use std::mem::size_of;


/// Perform a binary search on a slice, returning the index of the match
/// (if found) or the one of the previous item (if any), taking into
/// account duplicates.
///
/// This functionality is useful for cases where we compare elements with
/// a size, such as ranges, and an address to search for can be covered by
/// a range whose start is before the item to search for.
pub(crate) fn find_match_or_lower_bound_by_key<T, U, F>(
    slice: &[T],
    item: U,
    mut f: F,
) -> Option<usize>
where
    U: Ord,
    F: FnMut(&T) -> U,
{
    let idx = slice.partition_point(|e| f(e) < item);

    // At this point `idx` references the first item greater or equal to
    // the one we are looking for.

    if let Some(e) = slice.get(idx) {
        // If the item at `idx` is equal to what we were looking for, we
        // are trivially done, as it's guaranteed to be the first one to
        // match.
        if f(e) == item {
            return Some(idx)
        }
    }

    // Otherwise `idx` points to a "greater" item. Hence, we pick the
    // previous one, but then have to scan backwards for as long as we see
    // this one item, so that we end up reporting the index of the first
    // of all equal ones.
    let idx = idx.checked_sub(1)?;
    let cmp_e = f(slice.get(idx)?);

    for i in (0..idx).rev() {
        let e = slice.get(i)?;
        if f(e) != cmp_e {
            return Some(i + 1)
        }
    }
    Some(idx)
}


/// A marker trait for "plain old data" data types.
///
/// # Safety
/// Only safe to implement for types that are valid for any bit pattern.
pub(crate) unsafe trait Pod {}

unsafe impl Pod for u8 {}
unsafe impl Pod for u16 {}
unsafe impl Pod for u32 {}
unsafe impl Pod for u64 {}


/// A trait providing utility functions for reading data from a byte
/// buffer.
pub(crate) trait ReadRaw<'data> {
    /// Ensure that `len` bytes are available for consumption.
    fn ensure(&self, len: usize) -> Option<()>;

    /// Consume and return `len` bytes.
    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]>;

    /// Read a NUL terminated string.
    fn read_cstr(&mut self) -> Option<&'data CStr>;

    /// Read anything implementing `Pod`.
    ///
    /// The value is copied out of the buffer, so no alignment
    /// requirements apply to the source data.
    #[inline]
    fn read_pod<T>(&mut self) -> Option<T>
    where
        T: Pod,
    {
        let data = self.read_slice(size_of::<T>())?;
        // SAFETY: `T` is `Pod` and hence valid for any bit pattern. The
        //         pointer is guaranteed to be valid and to point to
        //         memory of at least `sizeof(T)` bytes.
        let value = unsafe { data.as_ptr().cast::<T>().read_unaligned() };
        Some(value)
    }
}

impl<'data> ReadRaw<'data> for &'data [u8] {
    #[inline]
    fn ensure(&self, len: usize) -> Option<()> {
        if len > self.len() {
            return None
        }
        Some(())
    }

    #[inline]
    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]> {
        self.ensure(len)?;
        let (a, b) = self.split_at(len);
        *self = b;
        Some(a)
    }

    #[inline]
    fn read_cstr(&mut self) -> Option<&'data CStr> {
        let idx = self.iter().position(|byte| *byte == b'\0')?;
        CStr::from_bytes_with_nul(self.read_slice(idx + 1)?).ok()
    }
}


#[cfg(test)]
mod tests {
    use super::*;


    /// Make sure that `[u8]::ensure` works as expected.
    #[test]
    fn u8_slice_len_ensurance() {
        let slice = [0u8; 0].as_slice();
        assert_eq!(slice.ensure(0), Some(()));
        assert_eq!(slice.ensure(1), None);

        let slice = [1u8].as_slice();
        assert_eq!(slice.ensure(1), Some(()));
        assert_eq!(slice.ensure(2), None);
    }

    /// Check that we can read unaligned POD data from a slice.
    #[test]
    fn pod_reading() {
        let data = [0u8, 0x39, 0x30, 0xff];
        // Start at an odd offset to rule out any alignment requirements.
        let mut raw = &data[1..];
        let half = raw.read_pod::<u16>().unwrap();
        assert_eq!(half, u16::from_ne_bytes([0x39, 0x30]));
        assert_eq!(raw, &[0xff]);
        assert_eq!(raw.read_pod::<u16>(), None);
    }

    /// Check that we can read NUL terminated strings from a slice.
    #[test]
    fn cstr_reading() {
        let mut data = b"abc\0def\0".as_slice();
        let cstr = data.read_cstr().unwrap();
        assert_eq!(cstr.to_str().unwrap(), "abc");
        let cstr = data.read_cstr().unwrap();
        assert_eq!(cstr.to_str().unwrap(), "def");
        assert_eq!(data.read_cstr(), None);
    }

    /// Check the binary search helper against corner cases.
    #[test]
    fn lower_bound_search() {
        let data = [(0u64, "a"), (4u64, "b"), (4u64, "c"), (8u64, "d")];
        let key = |e: &(u64, &str)| e.0;

        assert_eq!(find_match_or_lower_bound_by_key(&data, 0, key), Some(0));
        assert_eq!(find_match_or_lower_bound_by_key(&data, 3, key), Some(0));
        // The first of the duplicates is reported.
        assert_eq!(find_match_or_lower_bound_by_key(&data, 4, key), Some(1));
        assert_eq!(find_match_or_lower_bound_by_key(&data, 5, key), Some(1));
        assert_eq!(find_match_or_lower_bound_by_key(&data, 9, key), Some(3));
        assert_eq!(find_match_or_lower_bound_by_key(&[], 9, |e: &u64| *e), None);
    }
}
