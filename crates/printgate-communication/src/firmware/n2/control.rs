//! N2 control session protocol (port 31625)

use super::message::{client_string, HomeInfo, SettingsInfo, HOME_GETINFO, SETTING_GETINFO};
use super::packet::{N2Command, N2Packet};
use crate::device::SessionProtocol;
use bytes::{Buf, Bytes, BytesMut};
use printgate_core::{DeviceStatus, ProtocolError, Result};

/// Default control port
pub const N2_CONTROL_PORT: u16 = 31625;

/// Session protocol for the N2 control channel
#[derive(Debug, Default)]
pub struct N2Protocol {
    buf: BytesMut,
}

impl N2Protocol {
    /// Fresh protocol state
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply type the device sends for `request`, if any
    pub fn reply_to(request: &N2Packet) -> Option<N2Command> {
        match request.command().ok()? {
            N2Command::ClientString => match request.string(0).as_str() {
                SETTING_GETINFO => Some(N2Command::SettingsInfo),
                HOME_GETINFO => Some(N2Command::HomeInfo),
                _ => None,
            },
            N2Command::StartPrint if request.bytes.first() == Some(&1) => Some(N2Command::PrintAck),
            N2Command::DirQuery => Some(N2Command::DirInfo),
            N2Command::FileQuery => Some(N2Command::FileInfo),
            _ => None,
        }
    }
}

impl SessionProtocol for N2Protocol {
    type Request = N2Packet;
    type Reply = N2Packet;

    fn name(&self) -> &str {
        "n2"
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    fn encode(&mut self, request: &N2Packet) -> Result<Bytes> {
        Ok(request.encode())
    }

    fn expects_reply(&self, request: &N2Packet) -> bool {
        Self::reply_to(request).is_some()
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<N2Packet>> {
        self.buf.extend_from_slice(data);
        let mut replies = Vec::new();
        loop {
            let (packet, used) = match N2Packet::decode(&self.buf) {
                Ok(decoded) => decoded,
                Err(e) if e.is_incomplete() => break,
                Err(e) => return Err(e.into()),
            };
            self.buf.advance(used);
            replies.push(packet);
        }
        Ok(replies)
    }

    fn handshake(&self) -> Vec<N2Packet> {
        vec![client_string(SETTING_GETINFO), client_string(HOME_GETINFO)]
    }

    fn poll(&self) -> Vec<N2Packet> {
        vec![client_string(HOME_GETINFO)]
    }

    fn apply(
        &mut self,
        request: Option<&N2Packet>,
        reply: &N2Packet,
        status: &mut DeviceStatus,
    ) -> Result<()> {
        let command = reply.command()?;
        if let Some(expected) = request.and_then(Self::reply_to) {
            if expected != command {
                return Err(ProtocolError::UnexpectedReply {
                    expected: expected.to_string(),
                    actual: command.to_string(),
                }
                .into());
            }
        }
        match command {
            N2Command::HomeInfo => HomeInfo::from_packet(reply)?.apply(status),
            N2Command::SettingsInfo => SettingsInfo::from_packet(reply)?.apply(status),
            _ => tracing::trace!("n2 reply {}", command),
        }
        Ok(())
    }

    fn release(&self) -> Option<N2Packet> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::n2::message::{cancel_print, start_print};
    use printgate_core::DeviceState;

    fn server(command: N2Command) -> N2Packet {
        let mut packet = N2Packet::new(command);
        packet.side = 1;
        packet
    }

    #[test]
    fn test_reply_correlation() {
        let proto = N2Protocol::new();
        assert!(proto.expects_reply(&client_string(HOME_GETINFO)));
        assert!(proto.expects_reply(&start_print("a.gcode")));
        assert!(!proto.expects_reply(&cancel_print("a.gcode")));
    }

    #[test]
    fn test_decode_across_reads() {
        let mut proto = N2Protocol::new();
        let mut home = server(N2Command::HomeInfo);
        home.ints = vec![0; 27];
        home.ints[1] = 215f32.to_bits();
        let mut wire = home.encode().to_vec();
        wire.extend_from_slice(&server(N2Command::PrintAck).encode());

        assert!(proto.decode(&wire[..30]).unwrap().is_empty());
        let replies = proto.decode(&wire[30..]).unwrap();
        assert_eq!(replies.len(), 2);

        let mut status = DeviceStatus::new();
        proto
            .apply(Some(&client_string(HOME_GETINFO)), &replies[0], &mut status)
            .unwrap();
        assert_eq!(status.state, DeviceState::Printing);
        assert_eq!(status.temps.ext[0], [0.0, 215.0]);
    }

    #[test]
    fn test_mismatched_reply() {
        let mut proto = N2Protocol::new();
        let mut status = DeviceStatus::new();
        let err = proto
            .apply(
                Some(&client_string(HOME_GETINFO)),
                &server(N2Command::PrintAck),
                &mut status,
            )
            .unwrap_err();
        assert!(err.is_protocol());
    }
}
