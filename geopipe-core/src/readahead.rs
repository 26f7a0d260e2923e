/// Issues `madvise(WILLNEED)` for a mapped region from a detached thread,
/// so opening a large mmap never stalls the caller on readahead. The hint
/// is advisory; the thread is never joined and failures are ignored.
///
/// Safety of the detached access: the kernel call only touches page
/// metadata, and a region unmapped before the hint lands degrades to a
/// harmless `EINVAL`/`ENOMEM` inside the kernel, never a fault in process
/// memory.
pub fn spawn_willneed_hint(data: &[u8]) {
    #[cfg(unix)]
    {
        let addr = data.as_ptr() as usize;
        let len = data.len();
        if len == 0 {
            return;
        }
        std::thread::spawn(move || unsafe {
            extern "C" {
                fn madvise(addr: *mut std::ffi::c_void, length: usize, advice: i32) -> i32;
            }
            const MADV_WILLNEED: i32 = 3;
            madvise(addr as *mut std::ffi::c_void, len, MADV_WILLNEED);
        });
    }
    #[cfg(not(unix))]
    {
        let _ = data;
    }
}
