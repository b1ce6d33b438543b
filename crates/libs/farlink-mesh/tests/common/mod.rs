//! Shared loopback-radio harness for the multi-node integration tests in
//! this directory. Nodes share an [`Ether`] instead of a real transport:
//! `send` fans a frame out to every other node whose link is still up,
//! `poll` drains the caller's own inbox. Disconnecting a pair of indices
//! lets a test shape a multi-hop topology instead of a single broadcast
//! domain.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use farlink_mesh::traits::RadioDevice;
use farlink_mesh::{MeshConfig, MeshEvent, NodeStack};

pub struct Ether {
    queues: Vec<VecDeque<Vec<u8>>>,
    links: Vec<Vec<bool>>,
}

impl Ether {
    pub fn new(n: usize) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self { queues: vec![VecDeque::new(); n], links: vec![vec![true; n]; n] }))
    }

    pub fn disconnect(&mut self, a: usize, b: usize) {
        self.links[a][b] = false;
        self.links[b][a] = false;
    }
}

pub struct LoopbackRadio {
    ether: Rc<RefCell<Ether>>,
    index: usize,
    awake: bool,
}

impl RadioDevice for LoopbackRadio {
    fn send(&mut self, frame: &[u8]) -> bool {
        if !self.awake {
            return false;
        }
        let mut ether = self.ether.borrow_mut();
        let n = ether.queues.len();
        for peer in 0..n {
            if peer != self.index && ether.links[self.index][peer] {
                ether.queues[peer].push_back(frame.to_vec());
            }
        }
        true
    }

    fn poll(&mut self) -> Option<(Vec<u8>, i16, i8)> {
        if !self.awake {
            return None;
        }
        self.ether.borrow_mut().queues[self.index].pop_front().map(|frame| (frame, -60, 5))
    }

    fn rssi_now(&self) -> i16 {
        -95
    }

    fn sleep(&mut self) {
        self.awake = false;
    }

    fn wake(&mut self) {
        self.awake = true;
    }
}

/// A node with TDMA and the encrypted-link handshake both off — these
/// tests exercise AODV/DTN/SOS over the plain channel, not the session
/// layer (that's `farlink-crypto`'s job).
pub fn make_node(ether: &Rc<RefCell<Ether>>, index: usize, addr: u32) -> NodeStack<LoopbackRadio> {
    let config = MeshConfig { node_address: addr, tdma_enabled: false, forward_secrecy_enabled: false, ..Default::default() };
    let radio = LoopbackRadio { ether: Rc::clone(ether), index, awake: true };
    NodeStack::new(config, radio)
}

/// Advances every node by one MAC slot: each transmits at most one
/// queued frame, then each drains whatever just landed in its inbox.
/// Transmit-then-drain (rather than interleaving per node) matches a
/// real shared channel, where everyone's slot-N frame is in the air
/// before anyone's slot-N receive window opens.
pub fn step_all(nodes: &mut [NodeStack<LoopbackRadio>], now_ms: u64, now_secs: u32) -> Vec<Vec<MeshEvent>> {
    for node in nodes.iter_mut() {
        node.tick(now_ms, now_secs);
    }
    nodes.iter_mut().map(|node| node.poll_inbound(now_ms, now_secs)).collect()
}
