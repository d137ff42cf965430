//! External collaborator contracts.
//!
//! The transfer core consumes four services it does not implement itself:
//! persistent room-secret storage, a same-origin session registry, a
//! random-access file-byte source, and an image down-scaler for request
//! previews. Each is a trait here, with small in-memory implementations
//! used by tests and as embedding defaults, plus a read-only disk adapter
//! for the file source.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

// ── Room secrets ─────────────────────────────────────────────────────────────

/// One stored pair secret and its per-association preferences.
#[derive(Debug, Clone)]
pub struct RoomSecretEntry {
    /// The secret itself; doubles as the room id of the paired room.
    pub secret: String,
    /// Display name the paired device last advertised.
    pub display_name: Option<String>,
    /// Accept transfers from this association without prompting.
    pub auto_accept: bool,
}

impl RoomSecretEntry {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            display_name: None,
            auto_accept: false,
        }
    }
}

/// Persistent storage for pair secrets.
pub trait SecretStore: Send + Sync {
    /// All stored secrets, in storage order.
    fn list_secrets(&self) -> Result<Vec<String>>;

    fn get_entry(&self, secret: &str) -> Result<Option<RoomSecretEntry>>;

    /// Insert or replace the entry for `entry.secret`.
    fn set_entry(&self, entry: RoomSecretEntry) -> Result<()>;

    /// Remove a secret; returns the removed entry if it existed.
    fn delete_secret(&self, secret: &str) -> Result<Option<RoomSecretEntry>>;

    /// Replace `old` with `new`, keeping the stored metadata. Used when a
    /// legacy-length secret is regenerated server-side.
    fn update_secret(&self, old: &str, new: &str) -> Result<()>;

    fn set_auto_accept(&self, secret: &str, auto_accept: bool) -> Result<()>;
}

/// In-memory secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<Vec<RoomSecretEntry>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn list_secrets(&self) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().map(|e| e.secret.clone()).collect())
    }

    fn get_entry(&self, secret: &str) -> Result<Option<RoomSecretEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().find(|e| e.secret == secret).cloned())
    }

    fn set_entry(&self, entry: RoomSecretEntry) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.secret == entry.secret) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    fn delete_secret(&self, secret: &str) -> Result<Option<RoomSecretEntry>> {
        let mut entries = self.entries.lock().unwrap();
        let index = entries.iter().position(|e| e.secret == secret);
        Ok(index.map(|i| entries.remove(i)))
    }

    fn update_secret(&self, old: &str, new: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.secret == old) {
            entry.secret = new.to_string();
        }
        Ok(())
    }

    fn set_auto_accept(&self, secret: &str, auto_accept: bool) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.secret == secret) {
            entry.auto_accept = auto_accept;
        }
        Ok(())
    }
}

// ── Same-origin registry ─────────────────────────────────────────────────────

/// Registry of peer ids belonging to other sessions of the same origin
/// (e.g. other tabs of one browser profile). Same-origin peers share all
/// room secrets, so a secret association with one of them proves nothing
/// and must not enable auto-accept.
pub trait TabsRegistry: Send + Sync {
    fn register(&self, peer_id: &str) -> Result<()>;
    fn deregister(&self, peer_id: &str) -> Result<()>;
    fn is_same_origin(&self, peer_id: &str) -> bool;
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct MemoryTabsRegistry {
    ids: Mutex<HashSet<String>>,
}

impl MemoryTabsRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TabsRegistry for MemoryTabsRegistry {
    fn register(&self, peer_id: &str) -> Result<()> {
        self.ids.lock().unwrap().insert(peer_id.to_string());
        Ok(())
    }

    fn deregister(&self, peer_id: &str) -> Result<()> {
        self.ids.lock().unwrap().remove(peer_id);
        Ok(())
    }

    fn is_same_origin(&self, peer_id: &str) -> bool {
        self.ids.lock().unwrap().contains(peer_id)
    }
}

// ── File bytes ───────────────────────────────────────────────────────────────

/// Random-access source of the bytes of one named file.
pub trait FileSource: Send {
    fn name(&self) -> &str;
    fn mime(&self) -> &str;
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `len` bytes starting at `offset`. Short reads only occur at
    /// end of file.
    fn slice(&mut self, offset: u64, len: usize) -> Result<Bytes>;
}

/// A file held fully in memory.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    mime: String,
    bytes: Bytes,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }
}

impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime(&self) -> &str {
        &self.mime
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn slice(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        let start = usize::try_from(offset).context("offset exceeds memory file size")?;
        let end = start.saturating_add(len).min(self.bytes.len());
        if start > self.bytes.len() {
            return Ok(Bytes::new());
        }
        Ok(self.bytes.slice(start..end))
    }
}

/// A file read lazily from disk.
pub struct DiskFile {
    name: String,
    mime: String,
    len: u64,
    file: File,
}

impl DiskFile {
    /// Open `path` for reading. The mime type is supplied by the caller
    /// (mime guessing is an external concern).
    pub fn open(path: impl AsRef<Path>, mime: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open file: {}", path.display()))?;
        let len = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            name,
            mime: mime.into(),
            len,
            file,
        })
    }
}

impl FileSource for DiskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime(&self) -> &str {
        &self.mime
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn slice(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }
}

// ── Image previews ───────────────────────────────────────────────────────────

/// Down-scaling codec used to attach a small preview to transfer requests
/// whose first file is an image.
pub trait ImageScaler: Send + Sync {
    /// Encode a preview of `source` no wider than `max_width`, returned as
    /// a data URL.
    fn preview_data_url(&self, source: &mut dyn FileSource, max_width: u32) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_store_roundtrip_and_regeneration() {
        let store = MemorySecretStore::new();
        store.set_entry(RoomSecretEntry::new("old-secret")).unwrap();
        store.set_auto_accept("old-secret", true).unwrap();

        store.update_secret("old-secret", "new-secret").unwrap();
        assert_eq!(store.list_secrets().unwrap(), vec!["new-secret"]);

        // Regeneration keeps the stored preferences.
        let entry = store.get_entry("new-secret").unwrap().unwrap();
        assert!(entry.auto_accept);

        let removed = store.delete_secret("new-secret").unwrap();
        assert!(removed.is_some());
        assert!(store.list_secrets().unwrap().is_empty());
    }

    #[test]
    fn memory_file_slices() {
        let mut file = MemoryFile::new("a.bin", "application/octet-stream", vec![1u8, 2, 3, 4, 5]);
        assert_eq!(file.len(), 5);
        assert_eq!(file.slice(1, 3).unwrap().as_ref(), &[2, 3, 4]);
        // Short read at end of file.
        assert_eq!(file.slice(4, 10).unwrap().as_ref(), &[5]);
        assert!(file.slice(9, 2).unwrap().is_empty());
    }

    #[test]
    fn disk_file_slices() {
        let dir = std::env::temp_dir().join("relaydrop_test").join("storage");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("disk_file.bin");
        std::fs::write(&path, b"hello disk file").unwrap();

        let mut file = DiskFile::open(&path, "text/plain").unwrap();
        assert_eq!(file.name(), "disk_file.bin");
        assert_eq!(file.len(), 15);
        assert_eq!(file.slice(6, 4).unwrap().as_ref(), b"disk");
        assert_eq!(file.slice(11, 100).unwrap().as_ref(), b"file");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn tabs_registry_tracks_same_origin_ids() {
        let tabs = MemoryTabsRegistry::new();
        assert!(!tabs.is_same_origin("abc"));
        tabs.register("abc").unwrap();
        assert!(tabs.is_same_origin("abc"));
        tabs.deregister("abc").unwrap();
        assert!(!tabs.is_same_origin("abc"));
    }
}
