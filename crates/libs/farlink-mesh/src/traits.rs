//! Collaborator traits injected into the stack at construction. Radio,
//! storage, GPS, clock and randomness all cross this boundary rather
//! than hiding behind globals, so `farlinkd` (or a test) can swap in
//! whatever backs each concern.

/// A whole mesh frame (20-byte header + up to 255 bytes of payload).
pub const MAX_FRAME_LEN: usize = 275;

/// Single-reader/single-writer radio. MAC mediates all access; nothing
/// else touches this trait directly.
pub trait RadioDevice {
    fn send(&mut self, frame: &[u8]) -> bool;
    fn poll(&mut self) -> Option<(Vec<u8>, i16, i8)>;
    fn rssi_now(&self) -> i16;
    fn sleep(&mut self);
    fn wake(&mut self);

    /// Boosts TX power / spreading factor for SOS transmission. A
    /// best-effort hint; adapters without the capability may no-op.
    fn set_emergency_mode(&mut self, _enabled: bool) {}
}

/// Keyed blob store for names and message history. The protocol never
/// requires this — it's a convenience layer over whatever filesystem
/// or in-memory map the host provides.
pub trait BlobStore {
    fn exists(&self, name: &str) -> bool;
    fn read(&self, name: &str) -> std::io::Result<Vec<u8>>;
    fn write(&mut self, name: &str, data: &[u8]) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsFix {
    NoFix,
    Fix2d,
    Fix3d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsReading {
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_m: i32,
    pub sats: u8,
    pub fix: GpsFix,
    pub timestamp: u32,
}

/// Optional position source backing the geographic routing module.
pub trait GpsSource {
    fn poll(&mut self) -> Option<GpsReading>;
}

/// Reference [`BlobStore`] backed by an in-memory map. Used by tests
/// and the demo binary; production nodes supply their own backend.
#[derive(Default)]
pub struct InMemoryBlobStore {
    files: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn exists(&self, name: &str) -> bool {
        self.files.lock().unwrap().contains_key(name)
    }

    fn read(&self, name: &str) -> std::io::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, name))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> std::io::Result<()> {
        self.files.lock().unwrap().insert(name.to_string(), data.to_vec());
        Ok(())
    }
}

/// Reference [`BlobStore`] backed by plain files under a base directory.
pub struct FileBlobStore {
    base_dir: std::path::PathBuf,
}

impl FileBlobStore {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, name: &str) -> std::path::PathBuf {
        self.base_dir.join(name)
    }
}

impl BlobStore for FileBlobStore {
    fn exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }

    fn read(&self, name: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_for(name))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> std::io::Result<()> {
        std::fs::write(self.path_for(name), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_blob_store_round_trips() {
        let mut store = InMemoryBlobStore::new();
        assert!(!store.exists("a"));
        store.write("a", b"hello").unwrap();
        assert!(store.exists("a"));
        assert_eq!(store.read("a").unwrap(), b"hello");
    }

    #[test]
    fn file_blob_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileBlobStore::new(dir.path());
        store.write("b", b"world").unwrap();
        assert_eq!(store.read("b").unwrap(), b"world");
    }
}
