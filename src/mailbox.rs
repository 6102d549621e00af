// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared-memory mailboxes: bounded rings of fixed-size message
// slots with any number of senders and at most one receiver.
//
// A mailbox is the "communication endpoint" of this crate. The supervisor
// binds one per service ahead of time and hands its name out at check-in;
// messages sent before the service attaches are retained in the ring,
// like traffic queued on a receive right the supervisor is holding.
//
// Each slot carries a transport-level reply-to channel name next to the
// payload, so request/reply routing never leaks into the payload bytes.
//
// Slot hand-off is a sequence protocol: slot `i` starts with `seq == i`;
// a sender claims the slot by advancing the enqueue cursor, fills it, and
// publishes with `seq = pos + 1`; the receiver consumes it and recycles
// with `seq = pos + capacity`. All cursors wrap.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::buffer::MsgBuffer;
use crate::shm::{ShmMode, ShmSegment};
use crate::waiter::Waiter;

/// Width of the reply-to name field in every slot.
pub const NAME_MAX: usize = 64;

/// Default slot payload capacity when a caller passes 0.
pub const DEFAULT_SLOT_SIZE: u32 = 512;

/// Number of slots per ring.
const RING_CAPACITY: u32 = 64;

/// How long an opener waits for the first mapper to finish initialising.
const INIT_WAIT_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Shared memory layout
// ---------------------------------------------------------------------------

#[repr(C)]
struct RingHeader {
    /// 0 until the first mapper has finished initialising the ring.
    ready: AtomicU32,
    /// Payload capacity per slot, fixed at bind time.
    slot_size: AtomicU32,
    /// Number of slots.
    capacity: AtomicU32,
    /// 1 while a receiver is attached (at most one).
    receivers: AtomicU32,
    enqueue_pos: AtomicU32,
    dequeue_pos: AtomicU32,
}

#[repr(C)]
struct SlotHeader {
    seq: AtomicU32,
    len: AtomicU32,
    reply_to: [u8; NAME_MAX],
}

fn slot_stride(slot_size: u32) -> usize {
    (std::mem::size_of::<SlotHeader>() + slot_size as usize + 7) & !7
}

fn ring_size(slot_size: u32) -> usize {
    std::mem::size_of::<RingHeader>() + RING_CAPACITY as usize * slot_stride(slot_size)
}

unsafe fn header<'a>(base: *mut u8) -> &'a RingHeader {
    &*(base as *const RingHeader)
}

unsafe fn slot<'a>(base: *mut u8, stride: usize, idx: u32) -> &'a SlotHeader {
    let off = std::mem::size_of::<RingHeader>() + idx as usize * stride;
    &*(base.add(off) as *const SlotHeader)
}

unsafe fn slot_payload(base: *mut u8, stride: usize, idx: u32) -> *mut u8 {
    let off = std::mem::size_of::<RingHeader>() + idx as usize * stride;
    base.add(off + std::mem::size_of::<SlotHeader>())
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One message popped from a mailbox: the payload plus the sender's
/// reply-to channel name, if it provided one.
#[derive(Debug)]
pub struct Message {
    payload: MsgBuffer,
    reply_to: Option<String>,
}

impl Message {
    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        self.payload.data()
    }

    /// The channel the sender wants the reply on.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Consume into the payload buffer.
    pub fn into_payload(self) -> MsgBuffer {
        self.payload
    }
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// How an endpoint attaches to a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailMode {
    Sender,
    Receiver,
}

/// A named shared-memory mailbox.
#[derive(Debug)]
pub struct Mailbox {
    name: String,
    shm: ShmSegment,
    attach: Option<MailMode>,
    slot_size: u32,
    stride: usize,
    rd_waiter: Waiter,
    wt_waiter: Waiter,
}

impl Mailbox {
    /// Bind a mailbox without attaching: creates (or keeps alive) the ring
    /// so that traffic survives while no receiver is around. This is what
    /// the supervisor holds for each pre-bound service endpoint.
    pub fn bind(name: &str, slot_size: u32) -> io::Result<Self> {
        Self::open(name, slot_size, None)
    }

    /// Connect to a mailbox as a sender or as the receiver.
    ///
    /// `slot_size == 0` selects [`DEFAULT_SLOT_SIZE`]. Connecting to an
    /// existing ring whose slot size differs from a nonzero request fails:
    /// both sides must agree on the maximum message size.
    ///
    /// At most one receiver may be attached at a time; a second receiver
    /// is refused with `AddrInUse`.
    pub fn connect(name: &str, slot_size: u32, mode: MailMode) -> io::Result<Self> {
        Self::open(name, slot_size, Some(mode))
    }

    fn open(name: &str, slot_size: u32, attach: Option<MailMode>) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        let slot_size = if slot_size == 0 { DEFAULT_SLOT_SIZE } else { slot_size };
        let stride = slot_stride(slot_size);

        let shm = ShmSegment::acquire(
            &format!("QU_MBX__{name}"),
            ring_size(slot_size),
            ShmMode::CreateOrOpen,
        )?;
        let base = shm.get();
        let hdr = unsafe { header(base) };

        if shm.prev_ref_count() == 0 {
            // First mapper initialises the ring.
            hdr.slot_size.store(slot_size, Ordering::Relaxed);
            hdr.capacity.store(RING_CAPACITY, Ordering::Relaxed);
            for i in 0..RING_CAPACITY {
                unsafe { slot(base, stride, i) }.seq.store(i, Ordering::Relaxed);
            }
            hdr.ready.store(1, Ordering::Release);
        } else {
            let deadline = Instant::now() + Duration::from_millis(INIT_WAIT_MS);
            while hdr.ready.load(Ordering::Acquire) == 0 {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "mailbox was never initialised",
                    ));
                }
                std::thread::yield_now();
            }
            if hdr.slot_size.load(Ordering::Relaxed) != slot_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "mailbox slot size does not match",
                ));
            }
        }

        let rd_waiter = Waiter::open(&format!("RD_MBX__{name}"))?;
        let wt_waiter = Waiter::open(&format!("WT_MBX__{name}"))?;

        if attach == Some(MailMode::Receiver)
            && hdr
                .receivers
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "mailbox already has a receiver",
            ));
        }

        Ok(Self {
            name: name.to_string(),
            shm,
            attach,
            slot_size,
            stride,
            rd_waiter,
            wt_waiter,
        })
    }

    /// The mailbox name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload capacity per message.
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Whether a receiver is currently attached.
    pub fn has_receiver(&self) -> bool {
        unsafe { header(self.shm.get()) }
            .receivers
            .load(Ordering::Acquire)
            != 0
    }

    /// Name of the read-side waiter. Other wake sources (the idle timer,
    /// the wait-set destroy handle) open their own instance of it.
    pub(crate) fn wake_name(&self) -> String {
        format!("RD_MBX__{}", self.name)
    }

    /// Whether a committed message is waiting to be popped.
    pub fn has_pending(&self) -> bool {
        let base = self.shm.get();
        let hdr = unsafe { header(base) };
        let pos = hdr.dequeue_pos.load(Ordering::Relaxed);
        let s = unsafe { slot(base, self.stride, pos % RING_CAPACITY) };
        s.seq.load(Ordering::Acquire).wrapping_sub(pos.wrapping_add(1)) as i32 == 0
    }

    /// Send a message, requiring an attached receiver.
    ///
    /// Returns `Ok(false)` when no receiver is attached, or when the ring
    /// stayed full for `timeout_ms` (0 means do not block).
    pub fn send(
        &mut self,
        payload: &[u8],
        reply_to: Option<&str>,
        timeout_ms: u64,
    ) -> io::Result<bool> {
        if self.attach != Some(MailMode::Sender) {
            return Err(io::Error::new(io::ErrorKind::Other, "not a sender"));
        }
        if !self.has_receiver() {
            return Ok(false);
        }
        self.enqueue(payload, reply_to, timeout_ms)
    }

    /// Send a message whether or not a receiver is attached. Traffic posted
    /// to a bound-but-unattended endpoint is delivered once the service
    /// connects.
    pub fn post(
        &mut self,
        payload: &[u8],
        reply_to: Option<&str>,
        timeout_ms: u64,
    ) -> io::Result<bool> {
        if self.attach != Some(MailMode::Sender) {
            return Err(io::Error::new(io::ErrorKind::Other, "not a sender"));
        }
        self.enqueue(payload, reply_to, timeout_ms)
    }

    fn enqueue(
        &mut self,
        payload: &[u8],
        reply_to: Option<&str>,
        timeout_ms: u64,
    ) -> io::Result<bool> {
        if payload.len() > self.slot_size as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "message exceeds slot capacity",
            ));
        }
        if let Some(rt) = reply_to {
            if rt.len() >= NAME_MAX {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "reply-to name too long",
                ));
            }
        }

        let base = self.shm.get();
        let stride = self.stride;
        let deadline = (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));

        loop {
            let hdr = unsafe { header(base) };
            let pos = hdr.enqueue_pos.load(Ordering::Relaxed);
            let s = unsafe { slot(base, stride, pos % RING_CAPACITY) };
            let seq = s.seq.load(Ordering::Acquire);
            let dif = seq.wrapping_sub(pos) as i32;

            if dif == 0 {
                if hdr
                    .enqueue_pos
                    .compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // Slot claimed: fill it, then publish via seq.
                    unsafe {
                        let dst = slot_payload(base, stride, pos % RING_CAPACITY);
                        ptr::copy_nonoverlapping(payload.as_ptr(), dst, payload.len());
                        let rt_dst = s.reply_to.as_ptr() as *mut u8;
                        ptr::write_bytes(rt_dst, 0, NAME_MAX);
                        if let Some(rt) = reply_to {
                            ptr::copy_nonoverlapping(rt.as_ptr(), rt_dst, rt.len());
                        }
                    }
                    s.len.store(payload.len() as u32, Ordering::Relaxed);
                    s.seq.store(pos.wrapping_add(1), Ordering::Release);
                    let _ = self.rd_waiter.broadcast();
                    return Ok(true);
                }
                std::thread::yield_now();
                continue;
            }

            if dif < 0 {
                // Ring full: wait for the receiver to free a slot.
                let remaining = match deadline {
                    Some(dl) => {
                        let r = dl.saturating_duration_since(Instant::now());
                        if r.is_zero() {
                            return Ok(false);
                        }
                        r.as_millis() as u64
                    }
                    None => return Ok(false),
                };
                let woke = self.wt_waiter.wait_if(
                    || {
                        let hdr = unsafe { header(base) };
                        let pos = hdr.enqueue_pos.load(Ordering::Relaxed);
                        let s = unsafe { slot(base, stride, pos % RING_CAPACITY) };
                        (s.seq.load(Ordering::Acquire).wrapping_sub(pos) as i32) < 0
                    },
                    Some(remaining),
                )?;
                if !woke {
                    return Ok(false);
                }
                continue;
            }

            // Another sender claimed this slot between our two loads.
            std::thread::yield_now();
        }
    }

    /// Pop the next message in delivery order.
    ///
    /// `None` blocks indefinitely; `Some(ms)` returns `Ok(None)` once the
    /// timeout elapses with the ring still empty (`Some(0)` polls).
    pub fn recv(&mut self, timeout_ms: Option<u64>) -> io::Result<Option<Message>> {
        if self.attach != Some(MailMode::Receiver) {
            return Err(io::Error::new(io::ErrorKind::Other, "not a receiver"));
        }

        let base = self.shm.get();
        let stride = self.stride;
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));

        loop {
            let hdr = unsafe { header(base) };
            let pos = hdr.dequeue_pos.load(Ordering::Relaxed);
            let s = unsafe { slot(base, stride, pos % RING_CAPACITY) };
            let seq = s.seq.load(Ordering::Acquire);

            if seq.wrapping_sub(pos.wrapping_add(1)) as i32 == 0 {
                // Committed slot: read it out, then recycle it for senders.
                let len = (s.len.load(Ordering::Relaxed) as usize).min(self.slot_size as usize);
                let mut payload = vec![0u8; len];
                let mut rt = [0u8; NAME_MAX];
                unsafe {
                    let src = slot_payload(base, stride, pos % RING_CAPACITY);
                    ptr::copy_nonoverlapping(src, payload.as_mut_ptr(), len);
                    ptr::copy_nonoverlapping(s.reply_to.as_ptr(), rt.as_mut_ptr(), NAME_MAX);
                }
                hdr.dequeue_pos.store(pos.wrapping_add(1), Ordering::Relaxed);
                s.seq
                    .store(pos.wrapping_add(RING_CAPACITY), Ordering::Release);
                let _ = self.wt_waiter.broadcast();

                let end = rt.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
                let reply_to = if end == 0 {
                    None
                } else {
                    Some(String::from_utf8_lossy(&rt[..end]).into_owned())
                };
                return Ok(Some(Message {
                    payload: MsgBuffer::from_vec(payload),
                    reply_to,
                }));
            }

            // Ring empty: wait for a commit.
            let remaining = match deadline {
                Some(dl) => {
                    let r = dl.saturating_duration_since(Instant::now());
                    if r.is_zero() {
                        return Ok(None);
                    }
                    Some(r.as_millis() as u64)
                }
                None => None,
            };
            let woke = self.rd_waiter.wait_if(
                || {
                    let hdr = unsafe { header(base) };
                    let pos = hdr.dequeue_pos.load(Ordering::Relaxed);
                    let s = unsafe { slot(base, stride, pos % RING_CAPACITY) };
                    s.seq
                        .load(Ordering::Acquire)
                        .wrapping_sub(pos.wrapping_add(1)) as i32
                        != 0
                },
                remaining,
            )?;
            if !woke {
                return Ok(None);
            }
        }
    }

    /// Pop without blocking.
    pub fn try_recv(&mut self) -> io::Result<Option<Message>> {
        self.recv(Some(0))
    }

    /// Remove all backing storage for a named mailbox.
    pub fn clear_storage(name: &str) {
        ShmSegment::clear_storage(&format!("QU_MBX__{name}"));
        Waiter::clear_storage(&format!("RD_MBX__{name}"));
        Waiter::clear_storage(&format!("WT_MBX__{name}"));
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if self.attach == Some(MailMode::Receiver) {
            unsafe { header(self.shm.get()) }
                .receivers
                .store(0, Ordering::Release);
            // Senders parked on a full ring re-check and time out normally.
            let _ = self.wt_waiter.broadcast();
        }
    }
}
