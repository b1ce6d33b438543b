//! A UDP-socket stand-in for the real LoRa radio. The protocol doesn't
//! care what carries its frames, and a loopback/LAN socket is the
//! simplest way to run several nodes for a demo without real hardware.
//!
//! RSSI/SNR aren't measured here — the real driver reads them off the
//! modem; this adapter reports a fixed value so the rest of the stack
//! (link-quality EWMA, perimeter-mode tie-breaks) still has something
//! to chew on.

use std::net::{SocketAddr, UdpSocket};

use farlink_mesh::traits::{RadioDevice, MAX_FRAME_LEN};

const FAKE_RSSI_DBM: i16 = -70;
const FAKE_SNR_DB: i8 = 8;

pub struct UdpRadio {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    awake: bool,
}

impl UdpRadio {
    pub fn bind(listen_addr: SocketAddr, peers: Vec<SocketAddr>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(listen_addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, peers, awake: true })
    }
}

impl RadioDevice for UdpRadio {
    /// "Broadcasts" by unicasting to every configured peer; real LoRa
    /// hardware has no notion of a peer list at all.
    fn send(&mut self, frame: &[u8]) -> bool {
        if !self.awake {
            return false;
        }
        let mut any_ok = false;
        for peer in &self.peers {
            any_ok |= self.socket.send_to(frame, peer).is_ok();
        }
        any_ok
    }

    fn poll(&mut self) -> Option<(Vec<u8>, i16, i8)> {
        if !self.awake {
            return None;
        }
        let mut buf = [0u8; MAX_FRAME_LEN];
        match self.socket.recv_from(&mut buf) {
            Ok((n, _from)) => Some((buf[..n].to_vec(), FAKE_RSSI_DBM, FAKE_SNR_DB)),
            Err(_) => None,
        }
    }

    fn rssi_now(&self) -> i16 {
        FAKE_RSSI_DBM
    }

    fn sleep(&mut self) {
        self.awake = false;
    }

    fn wake(&mut self) {
        self.awake = true;
    }
}
