//! Cflat runtime
//!
//! The two symbols that code emitted by the Cflat code generator imports.
//! Built as a staticlib so compiled programs can link against it directly.
//!
//! Heap blocks handed out by [`_cflat_alloc`] are never freed; the language
//! has no deallocation construct and compiled programs are short-lived
//! batch processes.

use std::ffi::c_char;

/// Allocate a zeroed, 8-byte-aligned heap block of at least `size_bytes`.
///
/// The code generator always passes `(n + 1) * 8` where `n` is the element
/// count, leaving room for the hidden length word at offset 0. It also
/// guards `n > 0` before calling, but a non-positive request is still
/// answered with an abort rather than undefined behavior.
///
/// # Safety
/// Always safe to call; never returns null (allocation failure aborts).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _cflat_alloc(size_bytes: i64) -> *mut u8 {
    if size_bytes <= 0 {
        die("allocation of non-positive size");
    }
    // calloc keeps the zero-initialization guarantee the generated code
    // relies on for fresh array elements.
    let block = unsafe { libc::calloc(1, size_bytes as libc::size_t) };
    if block.is_null() {
        die("out of memory");
    }
    debug_assert_eq!(block.align_offset(8), 0);
    block.cast()
}

/// Report a runtime fault and terminate the process.
///
/// The code generator funnels both of the language's runtime errors here
/// (array index out of bounds, non-positive allocation length), each with a
/// static NUL-terminated message.
///
/// # Safety
/// `msg` must point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _cflat_panic(msg: *const c_char) -> ! {
    unsafe {
        write_all(b"cflat panic: ");
        if !msg.is_null() {
            let len = libc::strlen(msg);
            libc::write(2, msg.cast(), len);
        }
        write_all(b"\n");
        libc::_exit(1);
    }
}

/// Best-effort write to stderr; used on paths where the process is about
/// to exit anyway.
fn write_all(bytes: &[u8]) {
    unsafe {
        libc::write(2, bytes.as_ptr().cast(), bytes.len());
    }
}

fn die(msg: &str) -> ! {
    write_all(b"cflat runtime: ");
    write_all(msg.as_bytes());
    write_all(b"\n");
    unsafe { libc::_exit(1) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_returns_aligned_zeroed_block() {
        let block = unsafe { _cflat_alloc(4 * 8) };
        assert!(!block.is_null());
        assert_eq!(block.align_offset(8), 0);
        for i in 0..32 {
            assert_eq!(unsafe { *block.add(i) }, 0);
        }
    }

    #[test]
    fn test_alloc_block_is_writable() {
        let block = unsafe { _cflat_alloc(2 * 8) };
        let words = block.cast::<i64>();
        unsafe {
            *words = 1;
            *words.add(1) = -7;
            assert_eq!(*words, 1);
            assert_eq!(*words.add(1), -7);
        }
    }
}
