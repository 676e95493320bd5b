use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use crate::error::{GlimmerError, GlimmerResult};
use crate::model::{ArtnetConfig, UNIVERSE_SIZE};
use crate::sink::DmxSink;

const ARTNET_PORT: u16 = 6454;
const OP_DMX: u16 = 0x5000;
const PROTOCOL_VERSION: u16 = 14;

/// Art-Net sink sending one ArtDmx datagram per frame.
///
/// The socket is bound to an ephemeral port and connected once at
/// construction: to the configured unicast address, or to the limited
/// broadcast address when none is given.
pub struct ArtnetSink {
    socket: Option<UdpSocket>,
    subnet: u8,
    sequence: u8,
}

impl ArtnetSink {
    pub fn new(config: &ArtnetConfig) -> GlimmerResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| GlimmerError::sink(format!("bind artnet socket: {e}")))?;

        let target = match config.address {
            Some(address) => address,
            None => {
                socket
                    .set_broadcast(true)
                    .map_err(|e| GlimmerError::sink(format!("enable broadcast: {e}")))?;
                Ipv4Addr::BROADCAST
            }
        };
        socket
            .connect(SocketAddrV4::new(target, ARTNET_PORT))
            .map_err(|e| GlimmerError::sink(format!("connect artnet target {target}: {e}")))?;

        Ok(ArtnetSink {
            socket: Some(socket),
            subnet: config.subnet,
            sequence: 0,
        })
    }
}

impl DmxSink for ArtnetSink {
    fn stream(&mut self, universe: u16, frame: &[u8; UNIVERSE_SIZE]) -> GlimmerResult<()> {
        let Some(socket) = &self.socket else {
            return Err(GlimmerError::sink("artnet sink is closed"));
        };

        // sequence cycles 1..=255; 0 would tell receivers to ignore ordering
        self.sequence = if self.sequence == u8::MAX {
            1
        } else {
            self.sequence + 1
        };

        let packet = art_dmx_packet(self.subnet, universe, self.sequence, frame);
        let sent = socket
            .send(&packet)
            .map_err(|e| GlimmerError::sink(format!("send artnet frame: {e}")))?;
        if sent != packet.len() {
            return Err(GlimmerError::sink("short artnet datagram write"));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.socket = None;
    }
}

/// Encode one ArtDmx packet (opcode 0x5000, protocol revision 14).
///
/// Sub-Uni carries the subnet in its high nibble and the low nibble of the
/// universe id; Net stays 0.
fn art_dmx_packet(
    subnet: u8,
    universe: u16,
    sequence: u8,
    frame: &[u8; UNIVERSE_SIZE],
) -> Vec<u8> {
    let mut packet = Vec::with_capacity(18 + UNIVERSE_SIZE);
    packet.extend_from_slice(b"Art-Net\0");
    packet.extend_from_slice(&OP_DMX.to_le_bytes());
    packet.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    packet.push(sequence);
    packet.push(0); // physical input port, informational only
    packet.push(((subnet & 0x0f) << 4) | (universe as u8 & 0x0f));
    packet.push(0); // net
    packet.extend_from_slice(&(UNIVERSE_SIZE as u16).to_be_bytes());
    packet.extend_from_slice(frame);
    packet
}
