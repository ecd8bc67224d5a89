//! Shared-memory bridge for the out-of-process monitor
//!
//! The monitor process creates a fixed-layout POSIX shared-memory segment
//! named after its JACK client; a host process opens it to read levels and
//! to request shutdown. There is no message framing: the segment holds
//! atomics plus one process-shared semaphore used purely as a wake-up.
//!
//! ```text
//! ┌──────────────────┐  levels (relaxed stores)  ┌────────────────┐
//! │ monitor process  │──────────────────────────►│  MonitorShm    │
//! │ (RT callback)    │  checks `closing` first   │  (mmap'd)      │
//! └──────────────────┘                           └───────┬────────┘
//!          ▲                                             │ closing + sem_post
//!          │ sem_timedwait (poll interval)               ▼
//! ┌──────────────────┐                           ┌────────────────┐
//! │ monitor control  │◄──────────────────────────│  host process  │
//! └──────────────────┘                           └────────────────┘
//! ```

use std::cell::UnsafeCell;
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::audio::{AudioError, AudioResult};
use crate::engine::{LevelMeter, MidiSource};
use crate::types::PORT_MAX;

/// Layout of the shared segment
///
/// `#[repr(C)]` so that both processes agree on it regardless of how they
/// were compiled. Only the read side is public; writes go through a
/// [`ShmWriter`], which exists only for writable mappings.
#[repr(C)]
pub struct MonitorShm {
    /// Number of metered channels
    channels: AtomicU32,
    /// Set by the host; the RT callback does nothing once it is set
    closing: AtomicBool,
    /// Published levels, hundredths of a dB (audio) or velocity step (MIDI)
    levels: [AtomicI32; PORT_MAX],
    done: UnsafeCell<libc::sem_t>,
}

// sem_t is built for concurrent use from several threads and processes
unsafe impl Sync for MonitorShm {}
unsafe impl Send for MonitorShm {}

/// Outcome of [`ShmWriter::wait_done`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

impl MonitorShm {
    #[inline]
    pub fn channels(&self) -> usize {
        (self.channels.load(Ordering::Relaxed) as usize).min(PORT_MAX)
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    /// Published value of a channel; 0 out of range
    pub fn level(&self, channel: usize) -> i32 {
        self.levels
            .get(channel)
            .map_or(0, |level| level.load(Ordering::Relaxed))
    }
}

/// Write access to a segment mapped read-write
///
/// Obtained from [`SharedSegment::writer`]. Derefs to [`MonitorShm`] for
/// the read side.
#[derive(Clone, Copy)]
pub struct ShmWriter<'a> {
    shm: &'a MonitorShm,
}

impl std::ops::Deref for ShmWriter<'_> {
    type Target = MonitorShm;

    fn deref(&self) -> &MonitorShm {
        self.shm
    }
}

impl ShmWriter<'_> {
    pub fn set_channels(&self, channels: usize) {
        self.shm
            .channels
            .store(channels.min(PORT_MAX) as u32, Ordering::Relaxed);
    }

    /// Level cells for the meter to publish into
    #[inline]
    pub fn levels(&self) -> &[AtomicI32] {
        &self.shm.levels
    }

    /// Stop the RT path; the control loop is not woken
    pub fn set_closing(&self) {
        self.shm.closing.store(true, Ordering::Relaxed);
    }

    /// Wake the monitor's control loop
    pub fn post_done(&self) {
        // SAFETY: the semaphore was initialized by the creating process and
        // the mapping is writable
        unsafe {
            libc::sem_post(self.shm.done.get());
        }
    }

    /// Ask the monitor to shut down
    pub fn request_close(&self) {
        self.set_closing();
        self.post_done();
    }

    /// Block until the semaphore is posted or `timeout` elapses
    pub fn wait_done(&self, timeout: Duration) -> WaitResult {
        let deadline = deadline_after(timeout);
        loop {
            // SAFETY: as in `post_done`
            let rc = unsafe { libc::sem_timedwait(self.shm.done.get(), &deadline) };
            if rc == 0 {
                return WaitResult::Signaled;
            }
            match io::Error::last_os_error().raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return WaitResult::TimedOut,
                _ => {
                    log::debug!("sem_timedwait failed: {}", io::Error::last_os_error());
                    return WaitResult::TimedOut;
                }
            }
        }
    }
}

/// Absolute CLOCK_REALTIME deadline for sem_timedwait
fn deadline_after(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid out-pointer
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }

    let mut sec = now.tv_sec + timeout.as_secs() as libc::time_t;
    let mut nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if nsec >= 1_000_000_000 {
        sec += 1;
        nsec -= 1_000_000_000;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}

/// Segment name for a monitor client: `/<client name>`, no inner slashes
pub fn segment_name(client_name: &str) -> String {
    format!("/{}", client_name.replace('/', "_"))
}

fn shm_error(name: &str, source: io::Error) -> AudioError {
    AudioError::SharedMemory {
        name: name.to_string(),
        source,
    }
}

/// How the mapping came to be, which decides the cleanup on drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Created the named segment: destroy, unmap, unlink
    Owner,
    /// Opened someone else's segment: unmap only
    Host,
    /// Process-private anonymous mapping: destroy, unmap
    Private,
}

/// A mapped [`MonitorShm`]
pub struct SharedSegment {
    ptr: NonNull<MonitorShm>,
    name: Option<CString>,
    role: Role,
    writable: bool,
}

// The mapping is only accessed through atomics and the semaphore
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

const SEGMENT_SIZE: usize = std::mem::size_of::<MonitorShm>();

impl SharedSegment {
    /// Create (or take over) the named segment; the monitor process side
    pub fn create(name: &str) -> AudioResult<Self> {
        let c_name = CString::new(name)
            .map_err(|e| shm_error(name, io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        // SAFETY: plain POSIX calls on a NUL-terminated name; every failure
        // path closes the descriptor and unlinks what it created.
        unsafe {
            let fd = libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600);
            if fd == -1 {
                return Err(shm_error(name, io::Error::last_os_error()));
            }
            if libc::ftruncate(fd, SEGMENT_SIZE as libc::off_t) == -1 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
                return Err(shm_error(name, err));
            }
            let addr = libc::mmap(
                std::ptr::null_mut(),
                SEGMENT_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            let err = io::Error::last_os_error();
            libc::close(fd);
            if addr == libc::MAP_FAILED {
                libc::shm_unlink(c_name.as_ptr());
                return Err(shm_error(name, err));
            }

            let ptr = Self::initialize(addr.cast()).map_err(|err| {
                libc::munmap(addr, SEGMENT_SIZE);
                libc::shm_unlink(c_name.as_ptr());
                shm_error(name, err)
            })?;
            log::info!("Created shared segment {} ({} bytes)", name, SEGMENT_SIZE);
            Ok(Self {
                ptr,
                name: Some(c_name),
                role: Role::Owner,
                writable: true,
            })
        }
    }

    /// Open an existing segment; the host process side
    ///
    /// A read-only mapping can read levels but not request shutdown.
    pub fn open(name: &str, writable: bool) -> AudioResult<Self> {
        let c_name = CString::new(name)
            .map_err(|e| shm_error(name, io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let (oflag, prot) = if writable {
            (libc::O_RDWR, libc::PROT_READ | libc::PROT_WRITE)
        } else {
            (libc::O_RDONLY, libc::PROT_READ)
        };

        // SAFETY: as in `create`; the size check keeps us inside the mapping
        unsafe {
            let fd = libc::shm_open(c_name.as_ptr(), oflag, 0);
            if fd == -1 {
                return Err(shm_error(name, io::Error::last_os_error()));
            }
            let mut stat: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut stat) == -1 || (stat.st_size as usize) < SEGMENT_SIZE {
                libc::close(fd);
                return Err(shm_error(
                    name,
                    io::Error::new(io::ErrorKind::InvalidData, "segment too small"),
                ));
            }
            let addr = libc::mmap(std::ptr::null_mut(), SEGMENT_SIZE, prot, libc::MAP_SHARED, fd, 0);
            let err = io::Error::last_os_error();
            libc::close(fd);
            if addr == libc::MAP_FAILED {
                return Err(shm_error(name, err));
            }
            let ptr = NonNull::new(addr.cast::<MonitorShm>())
                .ok_or_else(|| shm_error(name, io::Error::from(io::ErrorKind::InvalidData)))?;
            Ok(Self {
                ptr,
                name: Some(c_name),
                role: Role::Host,
                writable,
            })
        }
    }

    /// Anonymous mapping with the same layout, for in-process monitors
    pub fn private() -> AudioResult<Self> {
        // SAFETY: anonymous shared mapping of the segment size
        unsafe {
            let addr = libc::mmap(
                std::ptr::null_mut(),
                SEGMENT_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if addr == libc::MAP_FAILED {
                return Err(shm_error("<private>", io::Error::last_os_error()));
            }
            let ptr = Self::initialize(addr.cast()).map_err(|err| {
                libc::munmap(addr, SEGMENT_SIZE);
                shm_error("<private>", err)
            })?;
            Ok(Self {
                ptr,
                name: None,
                role: Role::Private,
                writable: true,
            })
        }
    }

    /// Write a fresh [`MonitorShm`] and initialize its semaphore
    ///
    /// # Safety
    /// `ptr` must point to a writable mapping of at least `SEGMENT_SIZE`
    /// bytes.
    unsafe fn initialize(ptr: *mut MonitorShm) -> io::Result<NonNull<MonitorShm>> {
        let ptr = NonNull::new(ptr).ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        unsafe {
            ptr.as_ptr().write(MonitorShm {
                channels: AtomicU32::new(0),
                closing: AtomicBool::new(false),
                levels: std::array::from_fn(|_| AtomicI32::new(0)),
                done: UnsafeCell::new(std::mem::zeroed()),
            });
            if libc::sem_init((*ptr.as_ptr()).done.get(), 1, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(ptr)
    }

    /// Read-only view, valid for every mapping
    pub fn shm(&self) -> &MonitorShm {
        // SAFETY: the mapping lives as long as `self`
        unsafe { self.ptr.as_ref() }
    }

    /// Write access; `None` for a host that opened the segment read-only
    #[inline]
    pub fn writer(&self) -> Option<ShmWriter<'_>> {
        self.writable.then(|| ShmWriter { shm: self.shm() })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Ask the monitor to shut down (host side)
    pub fn request_close(&self) -> AudioResult<()> {
        let writer = self.writer().ok_or_else(|| {
            shm_error(
                &self.display_name(),
                io::Error::new(io::ErrorKind::PermissionDenied, "segment mapped read-only"),
            )
        })?;
        writer.request_close();
        Ok(())
    }

    fn display_name(&self) -> String {
        self.name
            .as_ref()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<private>".to_string())
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // SAFETY: we own the mapping; after this nothing touches `ptr`
        unsafe {
            if self.role != Role::Host {
                libc::sem_destroy(self.shm().done.get());
            }
            libc::munmap(self.ptr.as_ptr().cast(), SEGMENT_SIZE);
            if self.role == Role::Owner {
                if let Some(name) = &self.name {
                    libc::shm_unlink(name.as_ptr());
                }
            }
        }
        log::debug!("Released shared segment {}", self.display_name());
    }
}

/// Wakes a segment's control loop from another thread
///
/// Holds the segment weakly, so a signal handler keeping one around does
/// not stop the owner from unlinking it.
#[derive(Clone)]
pub struct SegmentWaker {
    segment: Weak<SharedSegment>,
}

impl SegmentWaker {
    pub fn new(segment: &Arc<SharedSegment>) -> Self {
        Self {
            segment: Arc::downgrade(segment),
        }
    }

    /// Post the semaphore; false once the segment is gone or read-only
    pub fn wake(&self) -> bool {
        let Some(segment) = self.segment.upgrade() else {
            return false;
        };
        match segment.writer() {
            Some(shm) => {
                shm.post_done();
                true
            }
            None => false,
        }
    }
}

/// Meter one audio buffer into the segment
///
/// No-op once either the process-local `closed` flag or the segment's
/// `closing` flag is set. Returns whether levels were published.
pub fn process_shared_audio(
    meter: &mut LevelMeter,
    shm: ShmWriter<'_>,
    closed: &AtomicBool,
    sources: &[&[f32]],
) -> bool {
    if closed.load(Ordering::Relaxed) || shm.is_closing() {
        return false;
    }
    let channels = shm.channels().min(sources.len());
    meter.process_audio(&sources[..channels], shm.levels());
    true
}

/// Meter one MIDI buffer into the segment; same guards as
/// [`process_shared_audio`]
pub fn process_shared_midi<'a, S: MidiSource<'a>>(
    meter: &mut LevelMeter,
    shm: ShmWriter<'_>,
    closed: &AtomicBool,
    sources: &mut [S],
    nframes: usize,
) -> bool {
    if closed.load(Ordering::Relaxed) || shm.is_closing() {
        return false;
    }
    let channels = shm.channels().min(sources.len());
    meter.process_midi(&mut sources[..channels], nframes, shm.levels());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MeterScale, MidiEvent};

    fn private_writer(segment: &SharedSegment) -> ShmWriter<'_> {
        segment.writer().unwrap()
    }

    #[test]
    fn test_segment_name() {
        assert_eq!(segment_name("monitor"), "/monitor");
        assert_eq!(segment_name("a/b"), "/a_b");
    }

    #[test]
    fn test_closing_freezes_levels() {
        let segment = SharedSegment::private().unwrap();
        let shm = private_writer(&segment);
        shm.set_channels(2);
        let closed = AtomicBool::new(false);
        let mut meter = LevelMeter::new(MeterScale::Decibels, 48000);

        let loud = vec![1.0f32; 256];
        let quiet = vec![0.01f32; 256];
        assert!(process_shared_audio(&mut meter, shm, &closed, &[loud.as_slice(), quiet.as_slice()]));
        let before = [shm.level(0), shm.level(1)];

        segment.request_close().unwrap();
        let silent = vec![0.0f32; 256];
        for _ in 0..10 {
            assert!(!process_shared_audio(&mut meter, shm, &closed, &[silent.as_slice(), silent.as_slice()]));
        }
        assert_eq!([shm.level(0), shm.level(1)], before);
    }

    #[test]
    fn test_local_closed_flag_guards_midi() {
        let segment = SharedSegment::private().unwrap();
        let shm = private_writer(&segment);
        shm.set_channels(1);
        let closed = AtomicBool::new(true);
        let mut meter = LevelMeter::new(MeterScale::Velocity, 48000);

        let events = [MidiEvent::new(0, &[0x90, 60, 100])];
        let mut sources = [events.iter().copied().peekable()];
        assert!(!process_shared_midi(&mut meter, shm, &closed, &mut sources, 256));
        assert_eq!(shm.level(0), 0);

        closed.store(false, Ordering::Relaxed);
        assert!(process_shared_midi(&mut meter, shm, &closed, &mut sources, 256));
        assert_eq!(shm.level(0), 10000);
    }

    #[test]
    fn test_channel_count_limits_metering() {
        let segment = SharedSegment::private().unwrap();
        let shm = private_writer(&segment);
        shm.set_channels(PORT_MAX + 10);
        assert_eq!(shm.channels(), PORT_MAX);

        shm.set_channels(1);
        let closed = AtomicBool::new(false);
        let mut meter = LevelMeter::new(MeterScale::Decibels, 48000);
        let loud = vec![1.0f32; 64];
        process_shared_audio(&mut meter, shm, &closed, &[loud.as_slice(), loud.as_slice()]);
        assert_ne!(shm.level(0), 0);
        assert_eq!(shm.level(1), 0);
    }

    #[test]
    fn test_wait_done() {
        let segment = SharedSegment::private().unwrap();
        let shm = private_writer(&segment);

        assert_eq!(shm.wait_done(Duration::from_millis(10)), WaitResult::TimedOut);
        shm.request_close();
        assert_eq!(shm.wait_done(Duration::from_secs(1)), WaitResult::Signaled);
        assert!(shm.is_closing());
        assert_eq!(shm.wait_done(Duration::from_millis(10)), WaitResult::TimedOut);

        shm.post_done();
        assert_eq!(shm.wait_done(Duration::from_secs(1)), WaitResult::Signaled);
    }

    #[test]
    fn test_waker_posts_until_segment_dropped() {
        let segment = Arc::new(SharedSegment::private().unwrap());
        let waker = SegmentWaker::new(&segment);

        let handle = {
            let waker = waker.clone();
            std::thread::spawn(move || waker.wake())
        };
        assert!(handle.join().unwrap());
        let writer = segment.writer().unwrap();
        assert_eq!(writer.wait_done(Duration::from_secs(1)), WaitResult::Signaled);
        assert!(!writer.is_closing());

        drop(segment);
        assert!(!waker.wake());
    }

    #[test]
    fn test_named_segment_host_and_owner() {
        let name = segment_name(&format!("patchmesh-test-{}", std::process::id()));
        let owner = SharedSegment::create(&name).unwrap();
        let writer = owner.writer().unwrap();
        writer.set_channels(4);
        writer.levels()[2].store(-1234, Ordering::Relaxed);

        let host = SharedSegment::open(&name, true).unwrap();
        host.request_close().unwrap();
        assert_eq!(writer.wait_done(Duration::from_secs(1)), WaitResult::Signaled);
        assert!(owner.shm().is_closing());
        drop(host);

        drop(owner);
        assert!(SharedSegment::open(&name, false).is_err(), "owner unlinks on drop");
    }

    #[test]
    fn test_read_only_host_cannot_write() {
        let name = segment_name(&format!("patchmesh-readonly-{}", std::process::id()));
        let owner = SharedSegment::create(&name).unwrap();
        let writer = owner.writer().unwrap();
        writer.set_channels(3);
        writer.levels()[1].store(-600, Ordering::Relaxed);

        let reader = SharedSegment::open(&name, false).unwrap();
        assert!(!reader.is_writable());
        assert!(reader.writer().is_none());
        assert!(reader.request_close().is_err());

        assert_eq!(reader.shm().channels(), 3);
        assert_eq!(reader.shm().level(1), -600);
        assert!(!reader.shm().is_closing());
        assert!(!owner.shm().is_closing());
        assert_eq!(writer.wait_done(Duration::from_millis(10)), WaitResult::TimedOut);
    }
}
