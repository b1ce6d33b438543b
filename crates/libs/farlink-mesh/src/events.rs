//! Typed events delivered to the host application, replacing the
//! source's raw function-pointer callbacks (see spec §9's "typed
//! events, not raw callbacks" redesign note).

#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    Message { src: u32, payload: Vec<u8>, rssi: i16, snr: i8 },
    LinkEstablished { peer: u32 },
    LinkClosed { peer: u32 },
    BundleDelivered { bundle_id: u32, payload: Vec<u8> },
    SosReceived { src: u32, sos_type: farlink_wire::SosType, message: String, rssi: i16 },
}
