//! Store-and-forward queue: a bounded outbox for messages whose
//! destination isn't reachable yet (no route, neighbor table miss).
//! The mesh core drains it every tick and on neighbor-discovery events.

pub const QUEUE_CAPACITY: usize = 32;
pub const MESSAGE_TTL_MS: u64 = 3_600_000;
/// Minimum gap between delivery attempts for the same message. Not
/// pinned by a specific constant in spec §4.8; picked in the same
/// order of magnitude as `ack_timeout_ms`'s default.
pub const RETRY_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: u32,
    pub destination: u32,
    pub priority: u8,
    pub payload: Vec<u8>,
    pub enqueued_ms: u64,
    pub last_attempt_ms: Option<u64>,
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreForwardError {
    QueueFull,
}

#[derive(Default)]
pub struct StoreForwardQueue {
    items: Vec<QueuedMessage>,
    next_id: u32,
}

impl StoreForwardQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn enqueue(&mut self, destination: u32, priority: u8, payload: Vec<u8>, now_ms: u64) -> Result<u32, StoreForwardError> {
        if self.items.len() >= QUEUE_CAPACITY {
            return Err(StoreForwardError::QueueFull);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.items.push(QueuedMessage {
            id,
            destination,
            priority,
            payload,
            enqueued_ms: now_ms,
            last_attempt_ms: None,
            retries: 0,
        });
        Ok(id)
    }

    /// Marks `id` delivered, freeing its slot.
    pub fn on_ack(&mut self, id: u32) -> bool {
        let before = self.items.len();
        self.items.retain(|m| m.id != id);
        self.items.len() != before
    }

    /// Drops messages older than [`MESSAGE_TTL_MS`], returning their ids.
    pub fn expire(&mut self, now_ms: u64) -> Vec<u32> {
        let expired: Vec<u32> = self
            .items
            .iter()
            .filter(|m| now_ms.saturating_sub(m.enqueued_ms) > MESSAGE_TTL_MS)
            .map(|m| m.id)
            .collect();
        self.items.retain(|m| !expired.contains(&m.id));
        expired
    }

    /// Selects messages due for a delivery attempt (destination
    /// reachable per `is_reachable`, retry interval elapsed) and
    /// records the attempt. Highest priority first, then oldest first.
    pub fn due_for_delivery(&mut self, now_ms: u64, is_reachable: impl Fn(u32) -> bool) -> Vec<QueuedMessage> {
        let mut due_ids: Vec<u32> = self
            .items
            .iter()
            .filter(|m| is_reachable(m.destination))
            .filter(|m| match m.last_attempt_ms {
                None => true,
                Some(last) => now_ms.saturating_sub(last) >= RETRY_INTERVAL_MS,
            })
            .map(|m| m.id)
            .collect();
        due_ids.sort_by_key(|id| {
            let m = self.items.iter().find(|m| m.id == *id).unwrap();
            (std::cmp::Reverse(m.priority), m.enqueued_ms)
        });

        let mut out = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            if let Some(m) = self.items.iter_mut().find(|m| m.id == id) {
                m.last_attempt_ms = Some(now_ms);
                m.retries += 1;
                out.push(m.clone());
            }
        }
        out
    }

    /// Forces an immediate retry attempt the next time `due_for_delivery`
    /// runs for every message addressed to a newly-discovered neighbor.
    pub fn on_neighbor_discovered(&mut self, address: u32) {
        for m in self.items.iter_mut().filter(|m| m.destination == address) {
            m.last_attempt_ms = None;
        }
    }
}
