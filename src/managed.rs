// SPDX-License-Identifier: MPL-2.0

//! Managed memory objects.
//!
//! A managed memory object is a page-granular byte range shared between two
//! handles: the *backing* half, on which the owner arms a [`ManageHandler`]
//! that populates pages on demand, and the *frontal* half, which clients
//! lock and read. Locking a range drives one [`ManageRequest`] per maximal
//! run of non-resident pages through the armed handler; the handler fills
//! the request's window and completes the load, after which the locked
//! range can be read through the returned [`LockGuard`].
//!
//! Pages are materialized lazily and are zero-filled until a handler
//! installs their contents.

use log::warn;

use crate::prelude::*;

/// The paging granularity of managed memory objects, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// A handler armed on the backing half of a managed memory object.
///
/// Each call services exactly one manage request. The handler must fill the
/// request's window and consume the request with
/// [`ManageRequest::complete_load`]; returning without completing leaves the
/// range non-resident and fails the lock that drove the request.
pub trait ManageHandler: Send + Sync {
    fn manage(&self, req: ManageRequest<'_>) -> Result<()>;
}

struct Inner {
    /// Resident pages, keyed by page index. Absent pages are not resident.
    pages: Mutex<BTreeMap<usize, Box<[u8]>>>,
    handler: Mutex<Option<Arc<dyn ManageHandler>>>,
    /// Serializes manage requests on this object; requests are delivered in
    /// order, one at a time.
    service: Mutex<()>,
    size: usize,
}

/// Factory for managed memory pairs.
pub struct ManagedMemory;

impl ManagedMemory {
    /// Creates a managed memory object of `size` bytes (rounded up to a
    /// page), returning its backing and frontal halves.
    pub fn create(size: usize) -> (BackingMemory, FrontalMemory) {
        let inner = Arc::new(Inner {
            pages: Mutex::new(BTreeMap::new()),
            handler: Mutex::new(None),
            service: Mutex::new(()),
            size: size.align_up(PAGE_SIZE),
        });
        (
            BackingMemory {
                inner: inner.clone(),
            },
            FrontalMemory { inner },
        )
    }
}

/// The owner-facing half of a managed memory object.
pub struct BackingMemory {
    inner: Arc<Inner>,
}

impl BackingMemory {
    /// Arms `handler` to service manage requests for this object.
    ///
    /// The handler runs for the lifetime of the object; dropping both
    /// halves tears it down.
    pub fn serve(&self, handler: Arc<dyn ManageHandler>) {
        *self.inner.handler.lock() = Some(handler);
    }

    /// Installs `data` at `offset` and marks the covered pages resident.
    ///
    /// `offset` must be page-aligned and `data` a whole number of pages.
    ///
    /// # Panics
    ///
    /// Completing a load for a page that is already resident is a protocol
    /// violation and panics.
    pub fn complete_load(&self, offset: usize, data: &[u8]) {
        assert!(offset % PAGE_SIZE == 0 && data.len() % PAGE_SIZE == 0);
        assert!(offset + data.len() <= self.inner.size);

        let mut pages = self.inner.pages.lock();
        for (chunk, page_idx) in data.chunks(PAGE_SIZE).zip(offset / PAGE_SIZE..) {
            let prev = pages.insert(page_idx, Box::from(chunk));
            assert!(prev.is_none(), "repeated complete-load of a resident page");
        }
    }
}

/// The client-facing half of a managed memory object.
#[derive(Clone)]
pub struct FrontalMemory {
    inner: Arc<Inner>,
}

impl FrontalMemory {
    /// Returns the object's size in bytes (a multiple of the page size).
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Pins `[offset, offset + len)`, faulting in any non-resident pages
    /// through the armed handler, and returns a read window over the range.
    ///
    /// `offset` and `len` must be page-aligned.
    pub fn lock(&self, offset: usize, len: usize) -> Result<LockGuard<'_>> {
        if offset % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 {
            return Err(Error::AlignmentViolation);
        }
        assert!(offset + len <= self.inner.size);

        let page_range = offset / PAGE_SIZE..(offset + len) / PAGE_SIZE;
        let _service = self.inner.service.lock();
        for run in self.non_resident_runs(page_range.clone()) {
            let handler = self.inner.handler.lock().clone().ok_or_else(|| {
                warn!("managed: no handler armed for page-in");
                Error::IoFailed
            })?;
            handler.manage(ManageRequest {
                offset: run.start * PAGE_SIZE,
                window: vec![0u8; run.len() * PAGE_SIZE],
                inner: &self.inner,
            })?;
        }

        // A handler that returned `Ok` without completing its load leaves
        // the range unreadable.
        let pages = self.inner.pages.lock();
        if !page_range.clone().all(|idx| pages.contains_key(&idx)) {
            warn!("managed: handler did not complete its load");
            return Err(Error::IoFailed);
        }
        drop(pages);

        Ok(LockGuard {
            inner: &self.inner,
            range: offset..offset + len,
        })
    }

    /// Collects the maximal runs of non-resident pages within `range`.
    fn non_resident_runs(&self, range: Range<usize>) -> Vec<Range<usize>> {
        let pages = self.inner.pages.lock();
        let mut runs: Vec<Range<usize>> = Vec::new();
        for idx in range {
            if pages.contains_key(&idx) {
                continue;
            }
            match runs.last_mut() {
                Some(run) if run.end == idx => run.end += 1,
                _ => runs.push(idx..idx + 1),
            }
        }
        runs
    }
}

/// One page-in request delivered to a [`ManageHandler`].
///
/// The window covers `[offset, offset + length)` of the object and starts
/// zero-filled. Consuming the request with [`complete_load`] installs the
/// window's contents; dropping it without completing leaves the range
/// non-resident.
///
/// [`complete_load`]: Self::complete_load
pub struct ManageRequest<'a> {
    offset: usize,
    window: Vec<u8>,
    inner: &'a Inner,
}

impl ManageRequest<'_> {
    /// The byte offset of the requested range within the object.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The length of the requested range, a non-zero multiple of the page
    /// size.
    pub fn length(&self) -> usize {
        self.window.len()
    }

    /// The window to populate.
    pub fn window(&mut self) -> &mut [u8] {
        &mut self.window
    }

    /// Marks the requested range resident with the window's contents.
    pub fn complete_load(self) {
        let mut pages = self.inner.pages.lock();
        for (chunk, page_idx) in self
            .window
            .chunks(PAGE_SIZE)
            .zip(self.offset / PAGE_SIZE..)
        {
            let prev = pages.insert(page_idx, Box::from(chunk));
            assert!(prev.is_none(), "repeated complete-load of a resident page");
        }
    }
}

/// A pinned, readable window over a locked range of a frontal handle.
///
/// Offsets passed to the read methods are absolute within the object and
/// must fall inside the locked range.
pub struct LockGuard<'a> {
    inner: &'a Inner,
    range: Range<usize>,
}

impl Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockGuard").field("range", &self.range).finish()
    }
}

impl LockGuard<'_> {
    /// Copies `buf.len()` bytes starting at `offset` out of the window.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        assert!(self.range.start <= offset && offset + buf.len() <= self.range.end);

        let pages = self.inner.pages.lock();
        let mut progress = 0;
        while progress < buf.len() {
            let pos = offset + progress;
            let within = pos % PAGE_SIZE;
            let count = (PAGE_SIZE - within).min(buf.len() - progress);
            // Locking made every page in the range resident.
            let page = pages.get(&(pos / PAGE_SIZE)).ok_or(Error::IoFailed)?;
            buf[progress..progress + count].copy_from_slice(&page[within..within + count]);
            progress += count;
        }
        Ok(())
    }

    /// Reads a POD value at `offset`.
    pub fn read_val<T: Pod>(&self, offset: usize) -> Result<T> {
        let mut bytes = vec![0u8; core::mem::size_of::<T>()];
        self.read_bytes(offset, &mut bytes)?;
        Ok(T::from_bytes(&bytes))
    }
}
