// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named POSIX shared memory segments.
//
// Each segment starts with a small fixed header holding a process-shared
// `AtomicI32` reference counter; the user-visible region follows. Keeping
// the counter at a fixed offset means every mapper finds it at the same
// place even if their size expectations differ. The counter is
// incremented on every successful map and decremented on drop; whoever
// observes it reaching zero unlinks the backing object, so a segment
// lives exactly as long as someone holds a handle to it.

use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use crate::shm_name::make_shm_name;

/// Open mode for named segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    /// Create exclusively; fail with `EEXIST` if the name is taken.
    Create,
    /// Open an existing segment; fail if it does not exist.
    Open,
    /// Create if missing, otherwise open.
    CreateOrOpen,
}

/// Bytes reserved ahead of the user region: the ref counter plus padding
/// that keeps the user region 8-aligned.
const HEADER_SIZE: usize = 8;

/// How long an opener waits for the creator's ftruncate to land.
const SIZE_WAIT_MS: u64 = 1000;

fn total_size(user_size: usize) -> usize {
    HEADER_SIZE + user_size
}

/// The leading reference counter of a mapped region.
///
/// # Safety
/// `mem` must point to a live mapping of at least `HEADER_SIZE` bytes.
unsafe fn ref_counter(mem: *mut u8) -> &'static AtomicI32 {
    &*(mem as *const AtomicI32)
}

/// A named, reference-counted shared memory segment.
#[derive(Debug)]
pub struct ShmSegment {
    mem: *mut u8,
    total: usize,
    user_size: usize,
    name: String, // POSIX form, with leading '/'
    prev_ref: i32,
}

// The mapping is process-shared by design; all mutation inside it goes
// through atomics or is guarded by the callers' own synchronisation.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Map a named segment of `user_size` usable bytes.
    ///
    /// Fresh segments are zero-filled by the kernel. Use
    /// [`prev_ref_count`](Self::prev_ref_count) to learn whether this
    /// handle was the first mapper (and therefore owns initialisation).
    ///
    /// Opening an existing object that is smaller than `user_size`
    /// requires fails with `InvalidInput` — the two sides disagree on the
    /// segment layout.
    pub fn acquire(name: &str, user_size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if user_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let perms: libc::mode_t = 0o666;
        let total = total_size(user_size);

        // For CreateOrOpen, try the exclusive create first so ftruncate only
        // runs on an object we actually own: on macOS, ftruncate on an
        // already-sized shm object can zero it before failing with EINVAL.
        let (fd, own_object) = match mode {
            ShmMode::Create => {
                let fd = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if fd == -1 {
                    return Err(io::Error::last_os_error());
                }
                (fd, true)
            }
            ShmMode::Open => {
                let fd =
                    unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint) };
                if fd == -1 {
                    return Err(io::Error::last_os_error());
                }
                (fd, false)
            }
            ShmMode::CreateOrOpen => {
                let fd = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if fd != -1 {
                    (fd, true)
                } else {
                    let e = io::Error::last_os_error();
                    if e.raw_os_error() != Some(libc::EEXIST) {
                        return Err(e);
                    }
                    let fd2 = unsafe {
                        libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint)
                    };
                    if fd2 == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    (fd2, false)
                }
            }
        };

        unsafe { libc::fchmod(fd, perms) };

        if own_object {
            let ret = unsafe { libc::ftruncate(fd, total as libc::off_t) };
            if ret != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }
        } else if let Err(e) = Self::wait_for_size(fd, total) {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let mem = mem as *mut u8;

        let prev = unsafe { ref_counter(mem).fetch_add(1, Ordering::AcqRel) };

        Ok(Self {
            mem,
            total,
            user_size,
            name: posix_name,
            prev_ref: prev,
        })
    }

    /// Mapping an object another process owns: its ftruncate may not have
    /// landed yet, so give a freshly-created object a moment to reach its
    /// size before rejecting it.
    fn wait_for_size(fd: i32, total: usize) -> io::Result<()> {
        let deadline = Instant::now() + Duration::from_millis(SIZE_WAIT_MS);
        loop {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut st) } != 0 {
                return Err(io::Error::last_os_error());
            }
            if st.st_size as usize >= total {
                return Ok(());
            }
            if st.st_size != 0 || Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "segment is smaller than requested",
                ));
            }
            std::thread::yield_now();
        }
    }

    /// Mutable pointer to the start of the user-visible region.
    pub fn get(&self) -> *mut u8 {
        unsafe { self.mem.add(HEADER_SIZE) }
    }

    /// User-requested size of the segment.
    pub fn user_size(&self) -> usize {
        self.user_size
    }

    /// POSIX name of the backing object (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference count *before* this handle's own increment; 0 means this
    /// handle was the first mapper and owns initialisation.
    pub fn prev_ref_count(&self) -> i32 {
        self.prev_ref
    }

    /// Current reference count across all mappers.
    pub fn ref_count(&self) -> i32 {
        unsafe { ref_counter(self.mem).load(Ordering::Acquire) }
    }

    /// Remove the backing object (`shm_unlink`). Existing mappings stay valid.
    pub fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    /// Remove a named segment's backing object without an open handle.
    pub fn clear_storage(name: &str) {
        let posix_name = make_shm_name(name);
        if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        let prev = unsafe { ref_counter(self.mem).fetch_sub(1, Ordering::AcqRel) };
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.total) };
        if prev <= 1 {
            self.unlink();
        }
    }
}
