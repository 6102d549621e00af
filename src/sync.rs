// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named process-shared synchronisation objects: a pthread mutex and a
// pthread condition variable, each living inside its own shared memory
// segment so unrelated processes can block on the same name.
//
// All threads of one process that open the same name MUST share a single
// mapping: macOS's pthread implementation keeps internal pointers relative
// to the address the object was initialised at, and a second mapping of
// the same page at a different address fails with EINVAL on lock. The
// process-local cache below enforces that.

use std::collections::HashMap;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::shm::{ShmMode, ShmSegment};

// ---------------------------------------------------------------------------
// Process-local mapping cache
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CachedSeg {
    seg: ShmSegment,
    local_refs: AtomicUsize,
}

type SegCache = Mutex<HashMap<String, Arc<CachedSeg>>>;

fn mutex_cache() -> &'static SegCache {
    static CACHE: OnceLock<SegCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cond_cache() -> &'static SegCache {
    static CACHE: OnceLock<SegCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Acquire (or reuse) the single per-process mapping for `name`.
///
/// When this call performs the first-ever mapping of the segment,
/// `init` runs on the raw pointer while the cache lock is still held, so
/// no other thread can observe a half-initialised object.
fn cache_acquire<F>(cache: &SegCache, name: &str, size: usize, init: F) -> io::Result<Arc<CachedSeg>>
where
    F: FnOnce(*mut u8) -> io::Result<()>,
{
    let mut map = cache.lock().unwrap();
    if let Some(entry) = map.get(name) {
        entry.local_refs.fetch_add(1, Ordering::Relaxed);
        return Ok(Arc::clone(entry));
    }
    let seg = ShmSegment::acquire(name, size, ShmMode::CreateOrOpen)?;
    if seg.prev_ref_count() == 0 {
        init(seg.get())?;
    }
    let entry = Arc::new(CachedSeg {
        seg,
        local_refs: AtomicUsize::new(1),
    });
    map.insert(name.to_string(), Arc::clone(&entry));
    Ok(entry)
}

fn cache_release(cache: &SegCache, name: &str) {
    let mut map = cache.lock().unwrap();
    if let Some(entry) = map.get(name) {
        if entry.local_refs.fetch_sub(1, Ordering::AcqRel) <= 1 {
            map.remove(name);
        }
    }
}

fn cache_purge(cache: &SegCache, name: &str) {
    cache.lock().unwrap().remove(name);
}

// ---------------------------------------------------------------------------
// Robust-mutex support — absent from `libc` on some targets, and from the
// platform itself on macOS.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

// ---------------------------------------------------------------------------
// NamedMutex
// ---------------------------------------------------------------------------

/// A named inter-process mutex: a `pthread_mutex_t` in shared memory with
/// `PTHREAD_PROCESS_SHARED` (and `PTHREAD_MUTEX_ROBUST` where available).
#[derive(Debug)]
pub struct NamedMutex {
    cached: Arc<CachedSeg>,
    name: String,
}

impl NamedMutex {
    /// Open (or create) a named mutex.
    pub fn open(name: &str) -> io::Result<Self> {
        let size = std::mem::size_of::<libc::pthread_mutex_t>();
        let cached = cache_acquire(mutex_cache(), name, size, |base| {
            let mtx = base as *mut libc::pthread_mutex_t;
            unsafe {
                ptr::write_bytes(mtx, 0, 1);

                let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
                let mut eno = libc::pthread_mutexattr_init(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
                eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
                if eno != 0 {
                    libc::pthread_mutexattr_destroy(&mut attr);
                    return Err(io::Error::from_raw_os_error(eno));
                }
                #[cfg(not(target_os = "macos"))]
                {
                    eno = pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST);
                    if eno != 0 {
                        libc::pthread_mutexattr_destroy(&mut attr);
                        return Err(io::Error::from_raw_os_error(eno));
                    }
                }
                eno = libc::pthread_mutex_init(mtx, &attr);
                libc::pthread_mutexattr_destroy(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
            }
            Ok(())
        })?;

        Ok(Self {
            cached,
            name: name.to_string(),
        })
    }

    fn mtx_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.cached.seg.get() as *mut libc::pthread_mutex_t
    }

    /// Lock, blocking. A dead previous owner (robust mutex) is recovered
    /// with `pthread_mutex_consistent` and reported as success.
    pub fn lock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_lock(self.mtx_ptr()) };
        match eno {
            0 => Ok(()),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => {
                let eno2 = unsafe { pthread_mutex_consistent(self.mtx_ptr()) };
                if eno2 != 0 {
                    return Err(io::Error::from_raw_os_error(eno2));
                }
                Ok(())
            }
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    /// Try to lock without blocking. `Ok(false)` when contended.
    pub fn try_lock(&self) -> io::Result<bool> {
        let eno = unsafe { libc::pthread_mutex_trylock(self.mtx_ptr()) };
        match eno {
            0 => Ok(true),
            libc::EBUSY => Ok(false),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => {
                let eno2 = unsafe { pthread_mutex_consistent(self.mtx_ptr()) };
                if eno2 != 0 {
                    return Err(io::Error::from_raw_os_error(eno2));
                }
                Ok(true)
            }
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    /// Unlock.
    pub fn unlock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_unlock(self.mtx_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    pub(crate) fn native_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.mtx_ptr()
    }

    /// Remove the backing storage of a named mutex and purge the local cache.
    pub fn clear_storage(name: &str) {
        cache_purge(mutex_cache(), name);
        ShmSegment::clear_storage(name);
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        // No pthread_mutex_destroy: after munmap the virtual address may be
        // recycled to a different segment, and destroy would clobber
        // whatever lives there now. Unmapping and unlinking is sufficient.
        cache_release(mutex_cache(), &self.name);
    }
}

// ---------------------------------------------------------------------------
// NamedCondvar
// ---------------------------------------------------------------------------

/// A named inter-process condition variable: a `pthread_cond_t` in shared
/// memory with `PTHREAD_PROCESS_SHARED`.
#[derive(Debug)]
pub struct NamedCondvar {
    cached: Arc<CachedSeg>,
    name: String,
}

impl NamedCondvar {
    /// Open (or create) a named condition variable.
    pub fn open(name: &str) -> io::Result<Self> {
        let size = std::mem::size_of::<libc::pthread_cond_t>();
        let cached = cache_acquire(cond_cache(), name, size, |base| {
            let cond = base as *mut libc::pthread_cond_t;
            unsafe {
                ptr::write_bytes(cond, 0, 1);

                let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
                let mut eno = libc::pthread_condattr_init(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
                eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
                if eno != 0 {
                    libc::pthread_condattr_destroy(&mut attr);
                    return Err(io::Error::from_raw_os_error(eno));
                }
                eno = libc::pthread_cond_init(cond, &attr);
                libc::pthread_condattr_destroy(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
            }
            Ok(())
        })?;

        Ok(Self {
            cached,
            name: name.to_string(),
        })
    }

    fn cond_ptr(&self) -> *mut libc::pthread_cond_t {
        self.cached.seg.get() as *mut libc::pthread_cond_t
    }

    /// Wait on the condition variable; the caller must hold `mtx` locked.
    /// The mutex is atomically released and re-acquired around the wait.
    /// Returns `Ok(true)` when signalled, `Ok(false)` on timeout.
    pub fn wait(&self, mtx: &NamedMutex, timeout_ms: Option<u64>) -> io::Result<bool> {
        let mtx_ptr = mtx.native_ptr();
        match timeout_ms {
            None => {
                let eno = unsafe { libc::pthread_cond_wait(self.cond_ptr(), mtx_ptr) };
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
                Ok(true)
            }
            Some(ms) => {
                use std::time::{Duration, SystemTime, UNIX_EPOCH};
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                let deadline = now + Duration::from_millis(ms);
                let ts = libc::timespec {
                    tv_sec: deadline.as_secs() as libc::time_t,
                    tv_nsec: deadline.subsec_nanos() as libc::c_long,
                };
                let eno = unsafe { libc::pthread_cond_timedwait(self.cond_ptr(), mtx_ptr, &ts) };
                match eno {
                    0 => Ok(true),
                    libc::ETIMEDOUT => Ok(false),
                    _ => Err(io::Error::from_raw_os_error(eno)),
                }
            }
        }
    }

    /// Wake one waiter.
    pub fn notify(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_cond_signal(self.cond_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    /// Wake all waiters.
    pub fn broadcast(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_cond_broadcast(self.cond_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    /// Remove the backing storage of a named condvar and purge the local cache.
    pub fn clear_storage(name: &str) {
        cache_purge(cond_cache(), name);
        ShmSegment::clear_storage(name);
    }
}

impl Drop for NamedCondvar {
    fn drop(&mut self) {
        // Same rationale as NamedMutex: never pthread_cond_destroy a
        // possibly-recycled address.
        cache_release(cond_cache(), &self.name);
    }
}
