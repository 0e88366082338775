use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use crate::{
    disk_manager::DiskManager,
    disk_scheduler::DiskScheduler,
    lru_k_replacer::{AccessType, FrameId, LruKReplacer},
    page::{Page, PageId},
};

/// Buffer pool manager: allocation, fetching, pinning, eviction and
/// dirty-bit tracking for fixed-size pages. External collaborator per the
/// design — the hash table only ever goes through `new_page`,
/// `fetch_page_{read,write}`, `unpin_page` and `delete_page`.
#[derive(Debug)]
pub struct BufferPoolManager {
    free_list: Mutex<Vec<FrameId>>,
    pages: Vec<Page>,
    replacer: Mutex<LruKReplacer>,
    disk_scheduler: Arc<DiskScheduler>,
    pages_map: DashMap<PageId, FrameId>,
    next_page_id: AtomicUsize,
}

impl BufferPoolManager {
    pub fn new(disk_manager: DiskManager, pool_size: usize, replacer_k: usize) -> Self {
        let pages = (0..pool_size).map(|_| Page::new()).collect();
        let free_list = (0..pool_size).collect();

        Self {
            pages,
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(LruKReplacer::new(pool_size, replacer_k)),
            disk_scheduler: Arc::new(DiskScheduler::new(Arc::new(disk_manager))),
            pages_map: DashMap::default(),
            next_page_id: AtomicUsize::new(0),
        }
    }

    /// Allocates a frame, pins it and returns its new page id together
    /// with the write latch already held, so callers can initialize the
    /// page's contents before anyone else can observe them.
    pub fn new_page(&self) -> Option<(PageId, RwLockWriteGuard<'_, Vec<u8>>)> {
        let frame_id = self.acquire_frame()?;
        let page_id = self.allocate_page();
        let page = &self.pages[frame_id];

        page.set_id(page_id);
        page.set_dirty(false);
        self.pages_map.insert(page_id, frame_id);
        page.pin();
        self.mark_recently_used(frame_id);

        Some((page_id, page.get_data_write()))
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Option<RwLockReadGuard<'_, Vec<u8>>> {
        let frame_id = self.fetch_frame(page_id)?;
        Some(self.pages[frame_id].get_data_read())
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        let frame_id = self.fetch_frame(page_id)?;
        Some(self.pages[frame_id].get_data_write())
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let frame_id = *self
            .pages_map
            .get(&page_id)
            .with_context(|| format!("page {page_id} is not in buffer pool"))?;
        let page = &self.pages[frame_id];

        page.unpin();
        if is_dirty {
            page.set_dirty(true);
        }

        if !page.is_pinned() {
            self.replacer.lock().set_evictable(frame_id, true);
        }

        Ok(())
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = *self
            .pages_map
            .get(&page_id)
            .with_context(|| format!("page {page_id} is not in buffer pool"))?;
        let page = &self.pages[frame_id];

        self.write_through(page_id, page.get_data_read().clone())?;
        page.set_dirty(false);

        Ok(())
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = *self
            .pages_map
            .get(&page_id)
            .with_context(|| format!("page {page_id} is not in buffer pool"))?;
        let page = &self.pages[frame_id];

        if page.is_pinned() {
            bail!("page {page_id} is pinned and cannot be deleted");
        }

        self.pages_map.remove(&page_id);
        self.replacer.lock().remove(frame_id);
        self.free_list.lock().push(frame_id);
        page.reset();

        Ok(())
    }

    fn mark_recently_used(&self, frame_id: FrameId) {
        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id, AccessType::Unknown);
        replacer.set_evictable(frame_id, false);
    }

    /// Pins and returns the frame backing `page_id`, fetching it from disk
    /// on a cache miss. Every return path increments the frame's pin
    /// count exactly once — a prior revision only pinned on a cold fetch,
    /// which let a page get evicted while a second reader thought it
    /// still held a reference.
    fn fetch_frame(&self, page_id: PageId) -> Option<FrameId> {
        if let Some(frame_id) = self.pages_map.get(&page_id).map(|entry| *entry) {
            self.pages[frame_id].pin();
            self.mark_recently_used(frame_id);
            return Some(frame_id);
        }

        let frame_id = self.acquire_frame()?;
        let page = &self.pages[frame_id];
        let data = self.read_through(page_id)?;

        *page.get_data_write() = data;
        page.set_id(page_id);
        page.set_dirty(false);
        self.pages_map.insert(page_id, frame_id);
        page.pin();
        self.mark_recently_used(frame_id);

        Some(frame_id)
    }

    /// Finds a free frame, evicting via LRU-K and flushing it first if
    /// it was holding a dirty page.
    fn acquire_frame(&self) -> Option<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Some(frame_id);
        }

        let frame_id = self.replacer.lock().evict()?;
        let page = &self.pages[frame_id];

        if let Some(old_id) = page.get_id() {
            if page.is_dirty() {
                let _ = self.write_through(old_id, page.get_data_read().clone());
            }
            self.pages_map.remove(&old_id);
        }

        page.reset();
        Some(frame_id)
    }

    fn read_through(&self, page_id: PageId) -> Option<Vec<u8>> {
        let (sender, receiver) = mpsc::channel();
        self.disk_scheduler.schedule_read(page_id, sender);
        receiver.recv().ok()?.ok()
    }

    fn write_through(&self, page_id: PageId, data: Vec<u8>) -> Result<()> {
        let (sender, receiver) = mpsc::channel();
        self.disk_scheduler.schedule_write(page_id, data, sender);
        receiver
            .recv()
            .context("disk scheduler dropped the write callback")?
    }

    fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn bpm(pool_size: usize) -> BufferPoolManager {
        let file = NamedTempFile::new().unwrap();
        let disk_manager = DiskManager::new(file.path()).unwrap();
        BufferPoolManager::new(disk_manager, pool_size, 2)
    }

    #[test]
    fn new_page_round_trips_through_fetch() {
        let bpm = bpm(4);
        let (page_id, mut guard) = bpm.new_page().unwrap();
        guard[0] = 123;
        drop(guard);
        bpm.unpin_page(page_id, true).unwrap();

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard[0], 123);
        drop(guard);
        bpm.unpin_page(page_id, false).unwrap();
    }

    #[test]
    fn pinned_page_cannot_be_deleted() {
        let bpm = bpm(4);
        let (page_id, guard) = bpm.new_page().unwrap();
        drop(guard);

        assert!(bpm.delete_page(page_id).is_err());
        bpm.unpin_page(page_id, false).unwrap();
        assert!(bpm.delete_page(page_id).is_ok());
    }

    #[test]
    fn evicts_when_pool_is_exhausted() {
        let bpm = bpm(1);
        let (first_id, guard) = bpm.new_page().unwrap();
        drop(guard);
        bpm.unpin_page(first_id, true).unwrap();

        // pool has one frame; allocating a second page must evict the
        // first (it is unpinned and thus evictable)
        let (second_id, guard) = bpm.new_page().unwrap();
        drop(guard);
        assert_ne!(first_id, second_id);

        bpm.unpin_page(second_id, false).unwrap();
        let guard = bpm.fetch_page_read(first_id).unwrap();
        assert_eq!(guard.len(), crate::page::PAGE_SIZE);
    }
}
