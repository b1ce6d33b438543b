//! Naming and message persistence over the injected [`crate::traits::BlobStore`].
//! A convenience layer: nothing in the protocol depends on it.

use std::collections::{HashMap, VecDeque};

use crate::traits::BlobStore;

pub const NODE_NAME_MAX_LEN: usize = 16;
pub const STORED_MESSAGE_RING_CAPACITY: usize = 50;
const NAME_MAP_BLOB: &str = "node_names";
const MESSAGE_RING_BLOB: &str = "message_ring";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub timestamp: u32,
    pub src: u32,
    pub dst: u32,
    pub channel: u8,
    pub flags: u8,
    pub rssi_dbm: i16,
    pub snr_db: i8,
    pub text: String,
}

impl StoredMessage {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.text.len());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.src.to_le_bytes());
        buf.extend_from_slice(&self.dst.to_le_bytes());
        buf.push(self.channel);
        buf.push(self.flags);
        buf.extend_from_slice(&self.rssi_dbm.to_le_bytes());
        buf.push(self.snr_db as u8);
        let text_bytes = self.text.as_bytes();
        buf.extend_from_slice(&(text_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(text_bytes);
        buf
    }

    fn decode(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < 16 {
            return None;
        }
        let timestamp = u32::from_le_bytes(data[0..4].try_into().ok()?);
        let src = u32::from_le_bytes(data[4..8].try_into().ok()?);
        let dst = u32::from_le_bytes(data[8..12].try_into().ok()?);
        let channel = data[12];
        let flags = data[13];
        let rssi_dbm = i16::from_le_bytes(data[14..16].try_into().ok()?);
        if data.len() < 19 {
            return None;
        }
        let snr_db = data[16] as i8;
        let text_len = u16::from_le_bytes(data[17..19].try_into().ok()?) as usize;
        if data.len() < 19 + text_len {
            return None;
        }
        let text = String::from_utf8_lossy(&data[19..19 + text_len]).into_owned();
        Some((Self { timestamp, src, dst, channel, flags, rssi_dbm, snr_db, text }, 19 + text_len))
    }
}

/// Address → display name, and a bounded ring of recently exchanged
/// messages, both mirrored to a `BlobStore` on every mutation.
pub struct NamingStore<'a> {
    blob: &'a mut dyn BlobStore,
    names: HashMap<u32, String>,
    messages: VecDeque<StoredMessage>,
}

impl<'a> NamingStore<'a> {
    pub fn load(blob: &'a mut dyn BlobStore) -> Self {
        let names = blob
            .read(NAME_MAP_BLOB)
            .ok()
            .map(|data| decode_name_map(&data))
            .unwrap_or_default();
        let messages = blob
            .read(MESSAGE_RING_BLOB)
            .ok()
            .map(|data| decode_message_ring(&data))
            .unwrap_or_default();
        Self { blob, names, messages }
    }

    pub fn name_for(&self, addr: u32) -> Option<&str> {
        self.names.get(&addr).map(|s| s.as_str())
    }

    /// Truncates to `NODE_NAME_MAX_LEN` bytes if longer.
    pub fn set_name(&mut self, addr: u32, name: &str) -> std::io::Result<()> {
        let truncated: String = name.chars().take(NODE_NAME_MAX_LEN).collect();
        self.names.insert(addr, truncated);
        self.persist_names()
    }

    fn persist_names(&mut self) -> std::io::Result<()> {
        let mut buf = Vec::new();
        for (addr, name) in &self.names {
            buf.extend_from_slice(&addr.to_le_bytes());
            let bytes = name.as_bytes();
            buf.push(bytes.len() as u8);
            buf.extend_from_slice(bytes);
        }
        self.blob.write(NAME_MAP_BLOB, &buf)
    }

    pub fn record_message(&mut self, message: StoredMessage) -> std::io::Result<()> {
        if self.messages.len() >= STORED_MESSAGE_RING_CAPACITY {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
        self.persist_messages()
    }

    fn persist_messages(&mut self) -> std::io::Result<()> {
        let mut buf = Vec::new();
        for msg in &self.messages {
            buf.extend_from_slice(&msg.encode());
        }
        self.blob.write(MESSAGE_RING_BLOB, &buf)
    }

    pub fn messages(&self) -> impl Iterator<Item = &StoredMessage> {
        self.messages.iter()
    }
}

fn decode_name_map(data: &[u8]) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    let mut off = 0;
    while off + 5 <= data.len() {
        let addr = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let len = data[off] as usize;
        off += 1;
        if off + len > data.len() {
            break;
        }
        map.insert(addr, String::from_utf8_lossy(&data[off..off + len]).into_owned());
        off += len;
    }
    map
}

fn decode_message_ring(data: &[u8]) -> VecDeque<StoredMessage> {
    let mut out = VecDeque::new();
    let mut off = 0;
    while off < data.len() {
        match StoredMessage::decode(&data[off..]) {
            Some((msg, consumed)) => {
                out.push_back(msg);
                off += consumed;
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::InMemoryBlobStore;

    #[test]
    fn long_name_is_truncated() {
        let mut store = InMemoryBlobStore::new();
        let mut naming = NamingStore::load(&mut store);
        naming.set_name(1, "a_name_that_is_way_too_long").unwrap();
        assert_eq!(naming.name_for(1).unwrap().len(), NODE_NAME_MAX_LEN);
    }

    #[test]
    fn names_survive_a_reload_from_the_same_blob_store() {
        let mut store = InMemoryBlobStore::new();
        {
            let mut naming = NamingStore::load(&mut store);
            naming.set_name(7, "basecamp").unwrap();
        }
        let naming = NamingStore::load(&mut store);
        assert_eq!(naming.name_for(7), Some("basecamp"));
    }

    #[test]
    fn message_ring_evicts_oldest_beyond_capacity() {
        let mut store = InMemoryBlobStore::new();
        let mut naming = NamingStore::load(&mut store);
        for i in 0..(STORED_MESSAGE_RING_CAPACITY as u32 + 1) {
            naming
                .record_message(StoredMessage {
                    timestamp: i,
                    src: i,
                    dst: 0,
                    channel: 0,
                    flags: 0,
                    rssi_dbm: -60,
                    snr_db: 5,
                    text: "hi".into(),
                })
                .unwrap();
        }
        assert_eq!(naming.messages().count(), STORED_MESSAGE_RING_CAPACITY);
        assert_eq!(naming.messages().next().unwrap().src, 1);
    }

    #[test]
    fn message_ring_round_trips_through_the_blob_store() {
        let mut store = InMemoryBlobStore::new();
        {
            let mut naming = NamingStore::load(&mut store);
            naming
                .record_message(StoredMessage { timestamp: 1, src: 2, dst: 3, channel: 0, flags: 0, rssi_dbm: -70, snr_db: -2, text: "hello".into() })
                .unwrap();
        }
        let naming = NamingStore::load(&mut store);
        let msg = naming.messages().next().unwrap();
        assert_eq!(msg.src, 2);
        assert_eq!(msg.text, "hello");
    }
}
