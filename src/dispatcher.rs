//! 응답 라우팅 + 폴링 루프
//!
//! 응답 패킷의 req_opcode로 진행 중인 작업의 핸들러를 고르고,
//! 수신 대기(타임아웃)와 유휴 작업(재시도 검사)을 번갈아 실행

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::message::Opcode;
use crate::packet::Packet;
use crate::session::Session;
use crate::transport::Transport;
use crate::{Error, Result};

/// 응답 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 디렉터리 목록 응답
    List,
    /// 파일 열기 응답
    Open,
    /// 버스트 읽기 응답
    Burst,
    /// 단일 범위(갭) 읽기 응답
    Read,
    /// 처리 대상 아님
    Unknown,
}

impl Route {
    pub fn of(req_opcode: Opcode) -> Self {
        match req_opcode {
            Opcode::ListDirectory => Route::List,
            Opcode::OpenFileRO => Route::Open,
            Opcode::BurstReadFile => Route::Burst,
            Opcode::ReadFile => Route::Read,
            _ => Route::Unknown,
        }
    }
}

/// 세션 위에서 진행되는 작업 (목록/읽기)
pub trait Operation {
    /// 이 작업이 처리하는 응답 경로인지
    fn accepts(&self, route: Route) -> bool;

    /// 응답 처리
    fn on_reply<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        route: Route,
        packet: &Packet,
    ) -> Result<()>;

    /// 유휴 작업 (재시도 검사)
    fn on_idle<T: Transport>(&mut self, session: &mut Session<T>, now: Instant) -> Result<()>;

    /// 종료 상태 도달 여부
    fn is_done(&self) -> bool;
}

/// 대기 시간 창
#[derive(Debug, Clone, Copy)]
pub struct Window {
    /// 작업 시작 후 첫 대기
    pub initial: Duration,
    /// 응답을 받을 때마다 보장되는 추가 대기
    pub after_reply: Duration,
}

/// 수신 패킷 하나를 작업으로 전달
///
/// 반환값: 작업이 받아들였는지
pub fn dispatch<O: Operation, T: Transport>(
    session: &mut Session<T>,
    op: &mut O,
    packet: &Packet,
) -> Result<bool> {
    if packet.session != session.session_id() {
        trace!(
            "이전 세션 응답 무시: session={} (현재 {})",
            packet.session,
            session.session_id()
        );
        return Ok(false);
    }

    let route = Route::of(packet.req_opcode);
    if route == Route::Unknown || !op.accepts(route) {
        debug!(
            "처리할 수 없는 응답: {:?}/{:?} seq={}",
            packet.opcode, packet.req_opcode, packet.seq
        );
        return Ok(false);
    }

    op.on_reply(session, route, packet)?;
    Ok(true)
}

/// 작업이 끝나거나 대기 창이 닫힐 때까지 폴링
pub fn drive<O: Operation, T: Transport>(
    session: &mut Session<T>,
    op: &mut O,
    poll_interval: Duration,
    window: Window,
) -> Result<()> {
    let mut deadline = Instant::now() + window.initial;

    while !op.is_done() {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout);
        }

        let wait = poll_interval.min(deadline - now);
        if let Some(packet) = session.recv(wait)? {
            if dispatch(session, op, &packet)? {
                deadline = deadline.max(Instant::now() + window.after_reply);
            }
        }

        if op.is_done() {
            break;
        }
        op.on_idle(session, Instant::now())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use crate::Config;
    use bytes::Bytes;

    /// 응답 n개를 받으면 끝나는 작업
    struct Counter {
        routes: Vec<Route>,
        idle_ticks: usize,
        want: usize,
    }

    impl Operation for Counter {
        fn accepts(&self, route: Route) -> bool {
            route == Route::Burst
        }

        fn on_reply<T: Transport>(
            &mut self,
            _session: &mut Session<T>,
            route: Route,
            _packet: &Packet,
        ) -> Result<()> {
            self.routes.push(route);
            Ok(())
        }

        fn on_idle<T: Transport>(&mut self, _session: &mut Session<T>, _now: Instant) -> Result<()> {
            self.idle_ticks += 1;
            Ok(())
        }

        fn is_done(&self) -> bool {
            self.routes.len() >= self.want
        }
    }

    fn reply(session: u8, req_opcode: Opcode) -> Bytes {
        let mut request = Packet::request(req_opcode, 0, 0, Bytes::new());
        request.session = session;
        Packet::ack(&request, 0, Bytes::new()).to_frame()
    }

    #[test]
    fn test_route_of() {
        assert_eq!(Route::of(Opcode::ListDirectory), Route::List);
        assert_eq!(Route::of(Opcode::OpenFileRO), Route::Open);
        assert_eq!(Route::of(Opcode::BurstReadFile), Route::Burst);
        assert_eq!(Route::of(Opcode::ReadFile), Route::Read);
        assert_eq!(Route::of(Opcode::TerminateSession), Route::Unknown);
    }

    #[test]
    fn test_dispatch_filters_stale_and_foreign_replies() {
        let (transport, peer) = ChannelTransport::pair(16);
        let mut session = Session::new(transport, &Config::default());
        let mut op = Counter {
            routes: Vec::new(),
            idle_ticks: 0,
            want: 1,
        };

        // 다른 세션, 다른 경로, 종료 응답 → 모두 무시
        peer.tx.send(reply(9, Opcode::BurstReadFile)).unwrap();
        peer.tx.send(reply(0, Opcode::ListDirectory)).unwrap();
        peer.tx.send(reply(0, Opcode::TerminateSession)).unwrap();
        peer.tx.send(reply(0, Opcode::BurstReadFile)).unwrap();

        let window = Window {
            initial: Duration::from_secs(1),
            after_reply: Duration::from_secs(1),
        };
        drive(&mut session, &mut op, Duration::from_millis(10), window).unwrap();

        assert_eq!(op.routes, vec![Route::Burst]);
        assert!(op.idle_ticks >= 3);
    }

    #[test]
    fn test_drive_times_out() {
        let (transport, _peer) = ChannelTransport::pair(16);
        let mut session = Session::new(transport, &Config::default());
        let mut op = Counter {
            routes: Vec::new(),
            idle_ticks: 0,
            want: 1,
        };

        let window = Window {
            initial: Duration::from_millis(50),
            after_reply: Duration::from_millis(50),
        };
        let started = Instant::now();
        let result = drive(&mut session, &mut op, Duration::from_millis(10), window);

        assert!(matches!(result, Err(Error::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(op.idle_ticks > 0);
    }
}
