//! 파일 읽기 엔진
//!
//! - OpenFileRO로 열고 BurstReadFile로 연속 청크 수신
//! - 순서가 어긋나거나 손실된 구간은 갭으로 기록
//! - 갭은 ReadFile 단일 범위 요청으로 채움 (동시 요청 수 제한)
//! - 짧은 마지막 버스트 또는 EndOfFile NACK으로 파일 끝 판단
//!
//! 상태: Idle → Opening → Bursting → (GapFilling ⇄ Bursting) → Finishing

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::config::RetryPolicy;
use crate::dispatcher::{Operation, Route};
use crate::gaps::GapSet;
use crate::message::{NackCode, Opcode};
use crate::packet::Packet;
use crate::session::Session;
use crate::stats::TransferStats;
use crate::transport::Transport;
use crate::{Config, Error, Result, MAX_PAYLOAD};

/// 읽기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Idle,
    Opening,
    Bursting,
    GapFilling,
    Finishing,
}

/// 요청 범위 기준 스크래치 버퍼
///
/// 인덱스 0 = 요청 오프셋
#[derive(Debug, Default)]
struct ScratchBuffer {
    data: BytesMut,
}

impl ScratchBuffer {
    fn write(&mut self, pos: usize, bytes: &[u8]) {
        let end = pos + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[pos..end].copy_from_slice(bytes);
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn into_bytes(self, limit: usize) -> Bytes {
        let mut data = self.data;
        data.truncate(limit);
        data.freeze()
    }
}

/// 읽기 작업 상태
pub struct ReadOp {
    path: String,
    offset: u64,
    size: u64,
    state: ReadState,

    burst_size: u32,
    read_size: u32,
    max_backlog: usize,
    open_policy: RetryPolicy,
    gap_policy: RetryPolicy,

    open_attempts: u32,
    open_sent_at: Option<Instant>,
    remote_size: Option<u32>,

    scratch: ScratchBuffer,
    /// 지금까지 도달한 가장 먼 절대 오프셋 (뒤쪽 구멍은 모두 갭으로 기록됨)
    cursor: u64,
    received: u64,
    gaps: GapSet,
    backlog: usize,
    reached_eof: bool,
    last_burst: Option<Instant>,

    stats: TransferStats,
    result: Option<Bytes>,
}

impl ReadOp {
    pub fn new(path: impl Into<String>, offset: u32, size: u32, config: &Config) -> Self {
        Self {
            path: path.into(),
            offset: offset as u64,
            size: size as u64,
            state: ReadState::Idle,
            burst_size: config.burst_size() as u32,
            read_size: config.single_read_size() as u32,
            max_backlog: config.max_backlog.max(1),
            open_policy: config.open_policy(),
            gap_policy: config.gap_policy(),
            open_attempts: 0,
            open_sent_at: None,
            remote_size: None,
            scratch: ScratchBuffer::default(),
            cursor: offset as u64,
            received: 0,
            gaps: GapSet::new(),
            backlog: 0,
            reached_eof: false,
            last_burst: None,
            stats: TransferStats::new(size as u64),
            result: None,
        }
    }

    /// 파일 열기 요청
    pub fn start<T: Transport>(&mut self, session: &mut Session<T>) -> Result<()> {
        info!(
            "읽기 시작: {} offset={} size={}",
            self.path, self.offset, self.size
        );
        self.state = ReadState::Opening;
        self.open_attempts = 0;
        self.send_open(session)
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn gaps(&self) -> &GapSet {
        &self.gaps
    }

    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    pub fn reached_eof(&self) -> bool {
        self.reached_eof
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn open_attempts(&self) -> u32 {
        self.open_attempts
    }

    /// 열기 응답에 담긴 원격 파일 크기
    pub fn remote_size(&self) -> Option<u32> {
        self.remote_size
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn into_parts(self) -> (Option<Bytes>, TransferStats) {
        (self.result, self.stats)
    }

    fn end(&self) -> u64 {
        self.offset + self.size
    }

    fn send_open<T: Transport>(&mut self, session: &mut Session<T>) -> Result<()> {
        session.send(Packet::with_payload(
            Opcode::OpenFileRO,
            0,
            Bytes::copy_from_slice(self.path.as_bytes()),
        ))?;
        self.open_attempts += 1;
        self.open_sent_at = Some(Instant::now());
        Ok(())
    }

    /// 세션을 바꿔 열기 재시도
    fn retry_open<T: Transport>(&mut self, session: &mut Session<T>, reason: &str) -> Result<()> {
        if !self.open_policy.can_retry(self.open_attempts) {
            warn!(
                "파일 열기 실패: {} ({}회 시도, {})",
                self.path, self.open_attempts, reason
            );
            return Err(Error::OpenRetriesExceeded {
                attempts: self.open_attempts,
            });
        }

        debug!("파일 열기 재시도 ({}): {}", reason, self.path);
        session.terminate()?;
        self.stats.open_retries += 1;
        self.send_open(session)
    }

    fn send_burst<T: Transport>(&mut self, session: &mut Session<T>, at: u64) -> Result<()> {
        trace!("버스트 요청: offset={} size={}", at, self.burst_size);
        session.send(Packet::request(
            Opcode::BurstReadFile,
            self.burst_size as u8,
            at as u32,
            Bytes::new(),
        ))?;
        self.last_burst = Some(Instant::now());
        self.stats.burst_requests += 1;
        Ok(())
    }

    /// 수신 데이터 반영
    ///
    /// 반환값: 새로 채워진 바이트 수 (0 = 중복)
    fn absorb(&mut self, start: u64, data: &[u8]) -> u64 {
        let end = self.end();

        // 커서보다 앞선 데이터: 사이 구간을 갭으로
        if start > self.cursor && self.cursor < end {
            let gap_end = start.min(end);
            let added = self.gaps.record(self.cursor, gap_end, self.burst_size);
            self.stats.gaps_recorded += added as u64;
            debug!(
                "갭 기록: [{}, {}) {}개, 총 {}개 {} bytes",
                self.cursor,
                gap_end,
                added,
                self.gaps.len(),
                self.gaps.missing_bytes()
            );
            self.cursor = gap_end;
        }

        let lo = start.max(self.offset);
        let hi = (start + data.len() as u64).min(end);
        if lo >= hi {
            return 0;
        }

        // 커서 뒤쪽은 갭에 걸친 부분만 새 데이터
        let mut fresh = self.gaps.fill(lo, hi.min(self.cursor));
        if hi > self.cursor {
            fresh += hi - lo.max(self.cursor);
            self.cursor = hi;
        }

        if fresh > 0 {
            let slice = &data[(lo - start) as usize..(hi - start) as usize];
            self.scratch.write((lo - self.offset) as usize, slice);
            self.received += fresh;
            self.stats.received_bytes = self.received;
        }
        fresh
    }

    fn handle_open_reply<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        packet: &Packet,
    ) -> Result<()> {
        if self.state != ReadState::Opening {
            trace!("열기 중복 응답 무시");
            return Ok(());
        }

        match packet.opcode {
            Opcode::Ack => {
                if packet.payload.len() >= 4 {
                    let mut raw = [0u8; 4];
                    raw.copy_from_slice(&packet.payload[..4]);
                    self.remote_size = Some(u32::from_le_bytes(raw));
                }
                info!(
                    "파일 열림: {} (원격 크기 {:?})",
                    self.path, self.remote_size
                );
                self.state = ReadState::Bursting;
                self.cursor = self.offset;
                self.send_burst(session, self.offset)
            }
            Opcode::Nack => {
                let code = NackCode::from_payload(&packet.payload);
                self.retry_open(session, &format!("nack {}", code))
            }
            _ => Ok(()),
        }
    }

    fn handle_burst_reply<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        packet: &Packet,
    ) -> Result<()> {
        if !matches!(self.state, ReadState::Bursting | ReadState::GapFilling) {
            trace!("예상하지 못한 버스트 응답 무시 (state {:?})", self.state);
            return Ok(());
        }
        self.last_burst = Some(Instant::now());

        match packet.opcode {
            Opcode::Ack => {
                let size = packet.payload.len() as u32;
                if size > self.burst_size {
                    // 응답자가 요청 버스트 크기를 무시함
                    self.burst_size = MAX_PAYLOAD as u32;
                    debug!("버스트 크기 변경: {}", self.burst_size);
                }

                self.stats.burst_packets += 1;
                let fresh = self.absorb(packet.offset as u64, &packet.payload);
                if fresh == 0 && size > 0 {
                    self.stats.duplicate_packets += 1;
                    trace!(
                        "중복 버스트 응답: offset={} size={}",
                        packet.offset,
                        size
                    );
                }

                if packet.burst_complete {
                    if size > 0 && size < self.burst_size {
                        // 짧은 마지막 버스트 = 파일 끝 (빈 완료 패킷은 제외)
                        if !self.reached_eof {
                            debug!(
                                "EOF: offset={} 갭 {}개, {:.2}s",
                                packet.end_offset(),
                                self.gaps.len(),
                                self.stats.elapsed().as_secs_f64()
                            );
                        }
                        self.reached_eof = true;
                    } else if self.received < self.size
                        && !self.reached_eof
                        && packet.end_offset() < self.end()
                    {
                        debug!("버스트 계속: offset={}", packet.end_offset());
                        self.send_burst(session, packet.end_offset())?;
                    }
                }
            }
            Opcode::Nack => match NackCode::from_payload(&packet.payload) {
                NackCode::EndOfFile | NackCode::None => {
                    if !self.reached_eof && packet.offset as u64 > self.cursor {
                        // 마지막 버스트 일부 손실, 정체 재요청으로 복구
                        debug!(
                            "버스트 EOF 전 손실: cursor={} nack offset={}",
                            self.cursor, packet.offset
                        );
                        return Ok(());
                    }
                    if !self.reached_eof {
                        debug!(
                            "EOF (nack): cursor={} 갭 {}개",
                            self.cursor,
                            self.gaps.len()
                        );
                    }
                    self.reached_eof = true;
                }
                code => return Err(Error::ProtocolNack { code }),
            },
            other => debug!("버스트 응답 opcode 무시: {:?}", other),
        }
        Ok(())
    }

    fn handle_read_reply<T: Transport>(
        &mut self,
        _session: &mut Session<T>,
        packet: &Packet,
    ) -> Result<()> {
        self.backlog = self.backlog.saturating_sub(1);

        match packet.opcode {
            Opcode::Ack => {
                let fresh = self.absorb(packet.offset as u64, &packet.payload);
                if fresh > 0 {
                    debug!(
                        "갭 채움: offset={} size={} 남은 갭 {}개",
                        packet.offset,
                        packet.payload.len(),
                        self.gaps.len()
                    );
                } else {
                    self.stats.duplicate_packets += 1;
                    trace!("갭 아닌 읽기 응답: offset={}", packet.offset);
                }
                Ok(())
            }
            Opcode::Nack => {
                let code = NackCode::from_payload(&packet.payload);
                warn!(
                    "갭 읽기 실패: offset={} {} (갭 {}개)",
                    packet.offset,
                    code,
                    self.gaps.len()
                );
                Err(Error::ProtocolNack { code })
            }
            _ => Ok(()),
        }
    }

    /// 만료/미전송 갭 하나 요청 (backlog 한도 안에서)
    fn service_gaps<T: Transport>(&mut self, session: &mut Session<T>, now: Instant) -> Result<()> {
        let retry = self.gap_policy.interval;
        self.backlog = self.in_flight(now, retry);

        if self.backlog < self.max_backlog {
            let Some((start, len)) = self.gaps.next_due(now, retry) else {
                return Ok(());
            };
            let len = len.min(self.read_size);
            trace!(
                "갭 읽기: offset={} len={} 남은 갭 {}개 backlog={}",
                start,
                len,
                self.gaps.len(),
                self.backlog
            );
            session.send(Packet::request(
                Opcode::ReadFile,
                len as u8,
                start as u32,
                Bytes::new(),
            ))?;
            self.gaps.mark_sent(start, now);
            self.backlog += 1;
            self.stats.gap_reads_sent += 1;
        }
        Ok(())
    }

    /// 재시도 간격 안에 보낸(응답 대기 중인) 갭 수
    fn in_flight(&self, now: Instant, retry: Duration) -> usize {
        self.gaps
            .iter()
            .filter(|(_, g)| {
                g.last_sent
                    .is_some_and(|sent| now.saturating_duration_since(sent) < retry)
            })
            .count()
    }

    fn update_state(&mut self) {
        if !matches!(self.state, ReadState::Bursting | ReadState::GapFilling) {
            return;
        }
        let streaming = !self.reached_eof && self.cursor < self.end();
        self.state = if self.gaps.is_empty() || streaming {
            ReadState::Bursting
        } else {
            ReadState::GapFilling
        };
    }

    /// 완료 조건 확인 후 결과 조립
    fn check_finished(&mut self) -> bool {
        if !matches!(self.state, ReadState::Bursting | ReadState::GapFilling) {
            return self.state == ReadState::Finishing;
        }
        if !self.gaps.is_empty() || !(self.reached_eof || self.received >= self.size) {
            return false;
        }

        let available = self.scratch.len().min(self.size as usize);
        let scratch = std::mem::take(&mut self.scratch);
        let result = scratch.into_bytes(available);

        if (result.len() as u64) < self.size {
            warn!(
                "요청보다 짧은 결과: {} < {} ({})",
                result.len(),
                self.size,
                self.path
            );
        }

        self.state = ReadState::Finishing;
        self.stats.finish();
        info!("읽기 완료: {} {} bytes | {}", self.path, result.len(), self.stats.summary());
        self.result = Some(result);
        true
    }

    /// 응답/유휴 처리 후 공통 진행
    fn advance<T: Transport>(&mut self, session: &mut Session<T>, now: Instant) -> Result<()> {
        if self.check_finished() {
            return Ok(());
        }
        self.service_gaps(session, now)?;
        self.update_state();
        Ok(())
    }
}

impl Operation for ReadOp {
    fn accepts(&self, route: Route) -> bool {
        matches!(route, Route::Open | Route::Burst | Route::Read)
    }

    fn on_reply<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        route: Route,
        packet: &Packet,
    ) -> Result<()> {
        match route {
            Route::Open => self.handle_open_reply(session, packet)?,
            Route::Burst => self.handle_burst_reply(session, packet)?,
            Route::Read => self.handle_read_reply(session, packet)?,
            _ => return Ok(()),
        }
        self.stats.rtt = session.rtt();

        if self.state == ReadState::Opening {
            return Ok(());
        }
        self.advance(session, Instant::now())
    }

    fn on_idle<T: Transport>(&mut self, session: &mut Session<T>, now: Instant) -> Result<()> {
        match self.state {
            ReadState::Opening => {
                let waited = self
                    .open_sent_at
                    .map(|sent| now.saturating_duration_since(sent))
                    .unwrap_or_default();
                if self.open_policy.is_due(waited) {
                    self.retry_open(session, "응답 없음")?;
                }
                Ok(())
            }
            ReadState::Bursting | ReadState::GapFilling => {
                // 버스트 정체 시 커서부터 재요청
                let stalled = self.last_burst.map_or(true, |t| {
                    self.gap_policy.is_due(now.saturating_duration_since(t))
                });
                if stalled
                    && !self.reached_eof
                    && self.cursor < self.end()
                    && self.received < self.size
                {
                    debug!(
                        "버스트 재요청: offset={} rtt={:.2}s",
                        self.cursor,
                        session.rtt().as_secs_f64()
                    );
                    self.send_burst(session, self.cursor)?;
                }
                self.advance(session, now)
            }
            ReadState::Idle | ReadState::Finishing => Ok(()),
        }
    }

    fn is_done(&self) -> bool {
        self.state == ReadState::Finishing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelPeer, ChannelTransport};

    fn setup(offset: u32, size: u32) -> (Session<ChannelTransport>, ChannelPeer, ReadOp) {
        setup_with(Config::default(), offset, size)
    }

    fn setup_with(
        config: Config,
        offset: u32,
        size: u32,
    ) -> (Session<ChannelTransport>, ChannelPeer, ReadOp) {
        let (transport, peer) = ChannelTransport::pair(1024);
        let session = Session::new(transport, &config);
        let op = ReadOp::new("/data.bin", offset, size, &config);
        (session, peer, op)
    }

    fn bursts(peer: &ChannelPeer) -> Vec<Packet> {
        sent(peer)
            .into_iter()
            .filter(|p| p.opcode == Opcode::BurstReadFile)
            .collect()
    }

    fn sent(peer: &ChannelPeer) -> Vec<Packet> {
        peer.rx
            .try_iter()
            .map(|(_, frame)| Packet::decode(&frame).unwrap())
            .collect()
    }

    fn file(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn burst(request: &Packet, data: &[u8], offset: usize, len: usize, complete: bool) -> Packet {
        let end = (offset + len).min(data.len());
        let mut reply = Packet::ack(
            request,
            offset as u32,
            Bytes::copy_from_slice(&data[offset..end]),
        );
        reply.burst_complete = complete;
        reply
    }

    fn open(session: &mut Session<ChannelTransport>, peer: &ChannelPeer, op: &mut ReadOp) -> Packet {
        op.start(session).unwrap();
        let open = sent(peer).pop().unwrap();
        assert_eq!(open.opcode, Opcode::OpenFileRO);
        let ack = Packet::ack(&open, 0, Bytes::copy_from_slice(&1000u32.to_le_bytes()));
        op.on_reply(session, Route::Open, &ack).unwrap();
        assert_eq!(op.remote_size(), Some(1000));
        let request = sent(peer).pop().unwrap();
        assert_eq!(request.opcode, Opcode::BurstReadFile);
        request
    }

    #[test]
    fn test_in_order_burst_has_no_gaps() {
        let data = file(1000);
        let (mut session, peer, mut op) = setup(0, 1000);
        let request = open(&mut session, &peer, &mut op);
        assert_eq!(request.offset, 0);
        assert_eq!(request.size, 239);

        for offset in (0..1000).step_by(239) {
            let last = offset + 239 >= 1000;
            let reply = burst(&request, &data, offset, 239, last);
            op.on_reply(&mut session, Route::Burst, &reply).unwrap();
            assert!(op.gaps().is_empty());
        }

        assert!(op.reached_eof());
        assert_eq!(op.state(), ReadState::Finishing);
        assert_eq!(op.stats().gaps_recorded, 0);
        let (result, _) = op.into_parts();
        assert_eq!(result.unwrap().as_ref(), &data[..]);
    }

    #[test]
    fn test_lost_burst_packet_becomes_gap() {
        let data = file(1000);
        let (mut session, peer, mut op) = setup(0, 1000);
        let request = open(&mut session, &peer, &mut op);

        for offset in (0..1000).step_by(239).filter(|&o| o != 239) {
            let last = offset + 239 >= 1000;
            let reply = burst(&request, &data, offset, 239, last);
            op.on_reply(&mut session, Route::Burst, &reply).unwrap();
        }

        assert_eq!(op.gaps().len(), 1);
        assert_eq!(op.gaps().get(239).map(|g| g.len), Some(239));
        assert!(op.reached_eof());
        assert_eq!(op.state(), ReadState::GapFilling);

        // 갭 읽기 요청이 나가야 함
        let gap_read = sent(&peer)
            .into_iter()
            .find(|p| p.opcode == Opcode::ReadFile)
            .unwrap();
        assert_eq!((gap_read.offset, gap_read.size), (239, 239));

        let fill = burst(&gap_read, &data, 239, 239, false);
        op.on_reply(&mut session, Route::Read, &fill).unwrap();

        assert_eq!(op.state(), ReadState::Finishing);
        let (result, stats) = op.into_parts();
        assert_eq!(result.unwrap().as_ref(), &data[..]);
        assert_eq!(stats.gaps_recorded, 1);
        assert_eq!(stats.gap_reads_sent, 1);
    }

    #[test]
    fn test_wide_gap_split_by_burst_size() {
        let data = file(2000);
        let (mut session, peer, mut op) = setup(0, 2000);
        let request = open(&mut session, &peer, &mut op);

        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 0, 239, false))
            .unwrap();
        // 239..1195 손실
        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 1195, 239, false))
            .unwrap();

        let spans: Vec<(u64, u32)> = op.gaps().iter().map(|(s, g)| (s, g.len)).collect();
        assert_eq!(spans, vec![(239, 239), (478, 239), (717, 239), (956, 239)]);
    }

    #[test]
    fn test_duplicate_inside_confirmed_range_is_noop() {
        let data = file(1000);
        let (mut session, peer, mut op) = setup(0, 1000);
        let request = open(&mut session, &peer, &mut op);

        let first = burst(&request, &data, 0, 239, false);
        op.on_reply(&mut session, Route::Burst, &first).unwrap();
        op.on_reply(&mut session, Route::Burst, &first).unwrap();

        assert!(op.gaps().is_empty());
        assert_eq!(op.received(), 239);
        assert_eq!(op.stats().duplicate_packets, 1);
    }

    #[test]
    fn test_short_final_burst_returns_available_bytes() {
        let data = file(500);
        let (mut session, peer, mut op) = setup(0, 1000);
        let request = open(&mut session, &peer, &mut op);

        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 0, 239, false))
            .unwrap();
        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 239, 239, false))
            .unwrap();
        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 478, 239, true))
            .unwrap();

        assert!(op.reached_eof());
        let (result, _) = op.into_parts();
        let result = result.unwrap();
        assert_eq!(result.len(), 500);
        assert_eq!(result.as_ref(), &data[..]);
    }

    #[test]
    fn test_burst_continues_after_complete() {
        let data = file(1000);
        let (mut session, peer, mut op) = setup(0, 1000);
        let request = open(&mut session, &peer, &mut op);

        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 0, 239, false))
            .unwrap();
        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 239, 239, true))
            .unwrap();

        let next = sent(&peer)
            .into_iter()
            .filter(|p| p.opcode == Opcode::BurstReadFile)
            .last()
            .unwrap();
        assert_eq!(next.offset, 478);
        assert!(!op.is_done());
    }

    #[test]
    fn test_request_inside_file_finishes_without_eof() {
        let data = file(2000);
        let (mut session, peer, mut op) = setup(300, 400);
        let request = open(&mut session, &peer, &mut op);
        assert_eq!(request.offset, 300);

        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 300, 239, false))
            .unwrap();
        assert!(!op.is_done());
        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 539, 239, false))
            .unwrap();

        assert!(!op.reached_eof());
        let (result, _) = op.into_parts();
        assert_eq!(result.unwrap().as_ref(), &data[300..700]);
    }

    #[test]
    fn test_gap_read_nack_aborts() {
        let data = file(1000);
        let (mut session, peer, mut op) = setup(0, 1000);
        let request = open(&mut session, &peer, &mut op);

        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 478, 239, false))
            .unwrap();
        let gap_read = sent(&peer)
            .into_iter()
            .find(|p| p.opcode == Opcode::ReadFile)
            .unwrap();

        let nack = Packet::nack(&gap_read, NackCode::Fail);
        let result = op.on_reply(&mut session, Route::Read, &nack);
        assert!(matches!(
            result,
            Err(Error::ProtocolNack {
                code: NackCode::Fail
            })
        ));
    }

    #[test]
    fn test_backlog_caps_gap_reads() {
        let data = file(5000);
        let (mut session, peer, mut op) = setup(0, 5000);
        let request = open(&mut session, &peer, &mut op);

        // 0..4780 전부 손실 → 갭 20개
        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 4780, 239, false))
            .unwrap();
        assert_eq!(op.gaps().len(), 20);

        let reads = |peer: &ChannelPeer| {
            sent(peer)
                .into_iter()
                .filter(|p| p.opcode == Opcode::ReadFile)
                .count()
        };
        // 처리 단계마다 하나씩
        assert_eq!(reads(&peer), 1);
        let now = Instant::now();
        op.on_idle(&mut session, now).unwrap();
        assert_eq!(reads(&peer), 1);

        for _ in 0..10 {
            op.on_idle(&mut session, now).unwrap();
        }
        // 이미 2개 진행 중, 나머지는 backlog 한도까지만
        assert_eq!(reads(&peer), Config::default().max_backlog - 2);
    }

    #[test]
    fn test_empty_complete_packet_is_not_eof() {
        let data = file(1000);
        let (mut session, peer, mut op) = setup(0, 1000);
        let request = open(&mut session, &peer, &mut op);

        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 0, 239, false))
            .unwrap();
        let mut empty = Packet::ack(&request, 239, Bytes::new());
        empty.burst_complete = true;
        op.on_reply(&mut session, Route::Burst, &empty).unwrap();

        assert!(!op.reached_eof());
        assert!(!op.is_done());
        assert_eq!(op.stats().duplicate_packets, 0);
        let next = bursts(&peer).pop().unwrap();
        assert_eq!(next.offset, 239);
    }

    #[test]
    fn test_oversized_reply_resets_burst_size() {
        let data = file(1000);
        let config = Config {
            burst_read_size: 100,
            ..Config::default()
        };
        let (mut session, peer, mut op) = setup_with(config, 0, 1000);
        let request = open(&mut session, &peer, &mut op);
        assert_eq!(request.size, 100);

        // 응답자가 239바이트로 응답
        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 0, 239, true))
            .unwrap();

        assert_eq!(op.burst_size(), 239);
        assert!(!op.reached_eof());
        let next = bursts(&peer).pop().unwrap();
        assert_eq!((next.offset, next.size), (239, 239));
    }

    #[test]
    fn test_stalled_burst_rerequested_from_cursor() {
        let data = file(1000);
        let (mut session, peer, mut op) = setup(0, 1000);
        let request = open(&mut session, &peer, &mut op);

        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 0, 239, false))
            .unwrap();
        let now = Instant::now();

        op.on_idle(&mut session, now + Duration::from_millis(50))
            .unwrap();
        assert!(bursts(&peer).is_empty());

        op.on_idle(&mut session, now + Duration::from_millis(300))
            .unwrap();
        let retry = bursts(&peer);
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].offset, 239);
        assert_eq!(op.stats().burst_requests, 2);
    }

    #[test]
    fn test_eof_nack_past_cursor_waits_for_tail() {
        let data = file(1000);
        let (mut session, peer, mut op) = setup(0, 1000);
        let request = open(&mut session, &peer, &mut op);

        op.on_reply(&mut session, Route::Burst, &burst(&request, &data, 0, 239, false))
            .unwrap();

        // 꼬리 손실: EOF nack이 커서보다 앞
        let mut early = Packet::nack(&request, NackCode::EndOfFile);
        early.offset = 717;
        op.on_reply(&mut session, Route::Burst, &early).unwrap();
        assert!(!op.reached_eof());
        assert!(!op.is_done());

        op.on_idle(&mut session, Instant::now() + Duration::from_millis(300))
            .unwrap();
        let retry = bursts(&peer).pop().unwrap();
        assert_eq!(retry.offset, 239);

        // 커서 위치의 EOF는 확정
        let eof = Packet::nack(&retry, NackCode::EndOfFile);
        op.on_reply(&mut session, Route::Burst, &eof).unwrap();
        assert!(op.reached_eof());
        let (result, _) = op.into_parts();
        assert_eq!(result.unwrap().as_ref(), &data[..239]);
    }

    #[test]
    fn test_open_nack_retries_with_new_session() {
        let (mut session, peer, mut op) = setup(0, 10);
        op.start(&mut session).unwrap();
        let first = sent(&peer).pop().unwrap();
        assert_eq!(first.session, 0);

        let nack = Packet::nack(&first, NackCode::NoSessionsAvailable);
        op.on_reply(&mut session, Route::Open, &nack).unwrap();

        let frames = sent(&peer);
        assert_eq!(frames[0].opcode, Opcode::TerminateSession);
        assert_eq!(frames[0].session, 0);
        assert_eq!(frames[1].opcode, Opcode::OpenFileRO);
        assert_eq!(frames[1].session, 1);
        assert_eq!(op.open_attempts(), 2);
    }

    #[test]
    fn test_open_timeout_exhausts_retries() {
        let (mut session, peer, mut op) = setup(0, 10);
        op.start(&mut session).unwrap();

        let mut now = Instant::now();
        let mut result = Ok(());
        for _ in 0..3 {
            now += Duration::from_millis(1100);
            result = op.on_idle(&mut session, now);
            if result.is_err() {
                break;
            }
        }

        assert!(matches!(
            result,
            Err(Error::OpenRetriesExceeded { attempts: 3 })
        ));
        let opens = sent(&peer)
            .into_iter()
            .filter(|p| p.opcode == Opcode::OpenFileRO)
            .count();
        assert_eq!(opens, 3);
    }
}
