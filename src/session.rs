//! 세션 전송 계층
//!
//! - 시퀀스 번호 / 세션 ID 카운터 (mod 256)
//! - 마지막 송신 요청 기록 (재전송, RTT 샘플 매칭)
//! - RTT 추정

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, trace, warn};

use crate::message::Opcode;
use crate::packet::Packet;
use crate::transport::{Target, Transport};
use crate::{Config, Error, Result};

/// 마지막 송신 요청
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub packet: Packet,
    pub sent_at: Instant,
}

/// 세션 상태 + 전송 소유
pub struct Session<T> {
    transport: T,
    seq: u16,
    session_id: u8,
    last_sent: Option<SentRequest>,
    rtt: Duration,
    min_rtt: Duration,
    target: Target,
    frames_sent: u64,
    frames_received: u64,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: &Config) -> Self {
        Self {
            transport,
            seq: 0,
            session_id: 0,
            last_sent: None,
            rtt: config.initial_rtt(),
            min_rtt: config.min_rtt(),
            target: Target::new(
                config.target_network,
                config.target_system,
                config.target_component,
            ),
            frames_sent: 0,
            frames_received: 0,
        }
    }

    /// 요청 송신
    ///
    /// seq/session을 현재 값으로 채운 뒤 seq 증가
    pub fn send(&mut self, mut packet: Packet) -> Result<()> {
        packet.seq = self.seq;
        packet.session = self.session_id;

        trace!(
            "> seq={} session={} {:?} size={} offset={}",
            packet.seq,
            packet.session,
            packet.opcode,
            packet.size,
            packet.offset
        );

        self.transport.send_frame(&self.target, &packet.to_frame())?;

        self.seq = (self.seq + 1) % 256;
        self.frames_sent += 1;
        self.last_sent = Some(SentRequest {
            packet,
            sent_at: Instant::now(),
        });
        Ok(())
    }

    /// 마지막 요청을 새 오프셋으로 재전송
    pub fn resend_last(&mut self, offset: u32) -> Result<()> {
        let mut packet = self
            .last_sent
            .as_ref()
            .map(|sent| sent.packet.clone())
            .ok_or(Error::ConnectionClosed)?;
        packet.offset = offset;
        self.send(packet)
    }

    /// 현재 세션 종료 후 세션 ID 증가
    ///
    /// 이전 세션의 늦은 응답이 다음 작업 응답으로 오인되지 않도록 함
    pub fn terminate(&mut self) -> Result<()> {
        debug!("세션 {} 종료", self.session_id);
        let result = self.send(Packet::request(
            Opcode::TerminateSession,
            0,
            0,
            Bytes::new(),
        ));
        self.session_id = self.session_id.wrapping_add(1);
        result
    }

    /// 응답 수신 처리 (RTT 갱신, NACK 로그)
    pub fn on_reply(&mut self, packet: &Packet, recv_time: Instant) {
        self.frames_received += 1;

        if let Some(sent) = &self.last_sent {
            let expected_seq = (sent.packet.seq + 1) % 256;
            if packet.req_opcode == sent.packet.opcode && packet.seq % 256 == expected_seq {
                let sample = recv_time.saturating_duration_since(sent.sent_at);
                self.rtt = self.rtt.min(sample).max(self.min_rtt);
            }
        }

        if let Some(code) = packet.nack_code() {
            error!("FTP NACK ({:?}): {}", packet.req_opcode, code);
        }
    }

    /// 다음 응답 수신
    ///
    /// 잘못된 프레임은 경고 후 버리고 None
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        let Some(frame) = self.transport.recv_frame(timeout)? else {
            return Ok(None);
        };
        let now = Instant::now();

        match Packet::decode(&frame) {
            Ok(packet) => {
                trace!(
                    "< seq={} session={} {:?}/{:?} size={} offset={} burst_complete={}",
                    packet.seq,
                    packet.session,
                    packet.opcode,
                    packet.req_opcode,
                    packet.size,
                    packet.offset,
                    packet.burst_complete
                );
                self.on_reply(&packet, now);
                Ok(Some(packet))
            }
            Err(e) => {
                warn!("프레임 버림: {}", e);
                Ok(None)
            }
        }
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    pub fn last_sent(&self) -> Option<&SentRequest> {
        self.last_sent.as_ref()
    }

    pub fn last_opcode(&self) -> Option<Opcode> {
        self.last_sent.as_ref().map(|sent| sent.packet.opcode)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
