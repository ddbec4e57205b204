//! GX control session protocol
//!
//! Text framing sends `~<M-code> <args>\r\n`; the reply is every line up to
//! the first line containing `ok`. That line is kept only when `ok` is not at
//! its start (`... ok` trailers carry data).

use super::packet::GxPacket;
use super::protocol::{GxCommand, GxFraming, GxReply, GxRequest};
use super::status_parser::{apply_info, apply_progress, apply_status, apply_temps};
use crate::communication::LineFramer;
use crate::device::SessionProtocol;
use bytes::{Buf, Bytes, BytesMut};
use printgate_core::{DeviceFault, DeviceStatus, Result};

/// Session protocol for GX devices
#[derive(Debug, Default)]
pub struct GxProtocol {
    framing: GxFraming,
    framer: LineFramer,
    packets: BytesMut,
    lines: Vec<String>,
}

impl GxProtocol {
    /// Protocol using the given framing
    pub fn new(framing: GxFraming) -> Self {
        Self {
            framing,
            ..Self::default()
        }
    }

    /// Active framing
    pub fn framing(&self) -> GxFraming {
        self.framing
    }

    fn collect_line(&mut self, line: String, replies: &mut Vec<GxReply>) {
        match line.find("ok") {
            Some(at) => {
                if at > 0 {
                    self.lines.push(line);
                }
                replies.push(GxReply {
                    lines: std::mem::take(&mut self.lines),
                });
            }
            None => self.lines.push(line),
        }
    }
}

impl SessionProtocol for GxProtocol {
    type Request = GxRequest;
    type Reply = GxReply;

    fn name(&self) -> &str {
        "gx"
    }

    fn reset(&mut self) {
        self.framer = LineFramer::new();
        self.packets.clear();
        self.lines.clear();
    }

    fn encode(&mut self, request: &GxRequest) -> Result<Bytes> {
        Ok(match (request, self.framing) {
            (GxRequest::Chunk(data), _) => data.clone(),
            (GxRequest::Command { command, .. }, GxFraming::Packet) => {
                GxPacket::command(*command, &request.text().unwrap_or_default()).encode()
            }
            (GxRequest::Command { .. }, GxFraming::Text) => {
                Bytes::from(format!("~{}\r\n", request.text().unwrap_or_default()))
            }
        })
    }

    fn expects_reply(&self, _request: &GxRequest) -> bool {
        true
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<GxReply>> {
        let mut replies = Vec::new();
        match self.framing {
            GxFraming::Text => {
                for line in self.framer.push(data) {
                    self.collect_line(line, &mut replies);
                }
            }
            GxFraming::Packet => {
                self.packets.extend_from_slice(data);
                loop {
                    let (packet, used) = match GxPacket::decode(&self.packets) {
                        Ok(decoded) => decoded,
                        Err(e) if e.is_incomplete() => break,
                        Err(e) => return Err(e.into()),
                    };
                    self.packets.advance(used);
                    for line in packet.text().lines() {
                        let line = line.trim_end_matches('\r').to_string();
                        if !line.is_empty() {
                            self.collect_line(line, &mut replies);
                        }
                    }
                }
            }
        }
        Ok(replies)
    }

    fn handshake(&self) -> Vec<GxRequest> {
        vec![GxRequest::with_args(GxCommand::Control, "S1")]
    }

    fn poll(&self) -> Vec<GxRequest> {
        [
            GxCommand::GetInfo,
            GxCommand::GetStatus,
            GxCommand::Status,
            GxCommand::GetTemp,
        ]
        .into_iter()
        .map(GxRequest::command)
        .collect()
    }

    fn apply(
        &mut self,
        request: Option<&GxRequest>,
        reply: &GxReply,
        status: &mut DeviceStatus,
    ) -> Result<()> {
        let Some(command) = request.and_then(GxRequest::gx_command) else {
            return Ok(());
        };
        let body = reply.body();
        if let Some(line) = body
            .iter()
            .find(|l| l.to_ascii_lowercase().contains("failed"))
        {
            return Err(DeviceFault::Rejected {
                request: command.to_string(),
                reason: line.clone(),
            }
            .into());
        }
        match command {
            GxCommand::GetInfo => apply_info(body, status),
            GxCommand::GetStatus => apply_status(body, status)?,
            GxCommand::Status => apply_progress(body, status)?,
            GxCommand::GetTemp => apply_temps(body, status)?,
            _ => {}
        }
        Ok(())
    }

    fn release(&self) -> Option<GxRequest> {
        Some(GxRequest::command(GxCommand::Release))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_reply_split() {
        let mut proto = GxProtocol::new(GxFraming::Text);
        let replies = proto
            .decode(b"CMD M105 Received.\r\nT0:25 /0 B:24 /0\r\nok\r\nCMD M27 Rec")
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].lines, vec!["CMD M105 Received.", "T0:25 /0 B:24 /0"]);
        assert_eq!(replies[0].body(), &["T0:25 /0 B:24 /0".to_string()]);

        let replies = proto.decode(b"eived.\r\nSD printing byte 1/2 ok\r\n").unwrap();
        assert_eq!(
            replies[0].lines,
            vec!["CMD M27 Received.", "SD printing byte 1/2 ok"]
        );
    }

    #[test]
    fn test_text_encode() {
        let mut proto = GxProtocol::new(GxFraming::Text);
        let frame = proto
            .encode(&GxRequest::with_args(GxCommand::Control, "S1"))
            .unwrap();
        assert_eq!(&frame[..], b"~M601 S1\r\n");
    }

    #[test]
    fn test_packet_framing() {
        let mut proto = GxProtocol::new(GxFraming::Packet);
        let mut reply = GxPacket::command(GxCommand::GetTemp, "CMD M105 Received.\r\nT0:30 /0 B:20 /0\r\nok\r\n");
        reply.side = 1;
        let frame = reply.encode();
        assert!(proto.decode(&frame[..10]).unwrap().is_empty());
        let replies = proto.decode(&frame[10..]).unwrap();
        assert_eq!(replies.len(), 1);
        let mut status = DeviceStatus::new();
        proto
            .apply(
                Some(&GxRequest::command(GxCommand::GetTemp)),
                &replies[0],
                &mut status,
            )
            .unwrap();
        assert_eq!(status.temps.ext[0], [30.0, 0.0]);
    }
}
