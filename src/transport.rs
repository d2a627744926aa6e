//! 프레임 전송 계층
//!
//! 엔진은 "프레임 송신" / "타임아웃 수신" 두 가지만 요구함
//! - UdpTransport: 블로킹 UDP
//! - ChannelTransport: 별도 스레드와 crossbeam 채널로 연결
//! - LossyTransport: 송수신 경계에서 인위적 패킷 손실

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use tracing::{trace, warn};

use crate::FRAME_LEN;

/// 프레임 목적지 (MAVLink FILE_TRANSFER_PROTOCOL 주소 필드)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Target {
    pub network: u8,
    pub system: u8,
    pub component: u8,
}

/// UDP 데이터그램 앞에 붙는 주소 헤더 길이
pub const TARGET_HEADER_LEN: usize = 3;

impl Target {
    pub fn new(network: u8, system: u8, component: u8) -> Self {
        Self {
            network,
            system,
            component,
        }
    }

    /// 주소 헤더 + 프레임으로 데이터그램 구성
    pub fn wrap(&self, frame: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(TARGET_HEADER_LEN + frame.len());
        buf.put_u8(self.network);
        buf.put_u8(self.system);
        buf.put_u8(self.component);
        buf.put_slice(frame);
        buf.freeze()
    }

    /// 데이터그램에서 주소 헤더 분리
    pub fn unwrap(datagram: &[u8]) -> Option<(Self, &[u8])> {
        if datagram.len() < TARGET_HEADER_LEN {
            return None;
        }
        let target = Self::new(datagram[0], datagram[1], datagram[2]);
        Some((target, &datagram[TARGET_HEADER_LEN..]))
    }
}

/// 원시 프레임 전송 인터페이스
pub trait Transport {
    /// 프레임 송신 (최대 251바이트)
    fn send_frame(&mut self, target: &Target, frame: &[u8]) -> io::Result<()>;

    /// 다음 프레임 수신, 타임아웃 시 None
    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Bytes>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_frame(&mut self, target: &Target, frame: &[u8]) -> io::Result<()> {
        (**self).send_frame(target, frame)
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Bytes>> {
        (**self).recv_frame(timeout)
    }
}

/// 블로킹 UDP 전송
///
/// 데이터그램 = 주소 헤더 3바이트 + 251바이트 프레임
pub struct UdpTransport {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// bind 후 원격 주소로 connect
    pub fn connect(bind_addr: SocketAddr, remote_addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(remote_addr)?;
        Ok(Self {
            socket,
            buf: vec![0u8; 2048],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send_frame(&mut self, target: &Target, frame: &[u8]) -> io::Result<()> {
        self.socket.send(&target.wrap(frame))?;
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Bytes>> {
        // 0 타임아웃은 set_read_timeout에서 에러
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        match self.socket.recv(&mut self.buf) {
            Ok(len) => match Target::unwrap(&self.buf[..len]) {
                Some((_, frame)) if frame.len() <= FRAME_LEN => {
                    Ok(Some(Bytes::copy_from_slice(frame)))
                }
                _ => {
                    warn!("잘못된 데이터그램 무시: {} bytes", len);
                    Ok(None)
                }
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// crossbeam 채널 기반 전송
///
/// 응답자나 링크 브리지를 별도 스레드에서 돌릴 때 사용
pub struct ChannelTransport {
    tx: Sender<(Target, Bytes)>,
    rx: Receiver<Bytes>,
}

/// 채널 반대편 (응답자/브리지 스레드가 보유)
pub struct ChannelPeer {
    pub rx: Receiver<(Target, Bytes)>,
    pub tx: Sender<Bytes>,
}

impl ChannelTransport {
    /// 연결된 전송/상대편 쌍 생성
    pub fn pair(capacity: usize) -> (Self, ChannelPeer) {
        let (out_tx, out_rx) = crossbeam_channel::bounded(capacity);
        let (in_tx, in_rx) = crossbeam_channel::bounded(capacity);
        (
            Self {
                tx: out_tx,
                rx: in_rx,
            },
            ChannelPeer {
                rx: out_rx,
                tx: in_tx,
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn send_frame(&mut self, target: &Target, frame: &[u8]) -> io::Result<()> {
        self.tx
            .send((*target, Bytes::copy_from_slice(frame)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "채널 닫힘"))
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Bytes>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "채널 닫힘",
            )),
        }
    }
}

/// 송수신 경계에서 확률적으로 프레임을 버리는 래퍼
///
/// 확률은 0 ~ 100 (%), 0이면 그대로 통과
pub struct LossyTransport<T> {
    inner: T,
    tx_drop_probability: f64,
    rx_drop_probability: f64,
    pub dropped_tx: u64,
    pub dropped_rx: u64,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T, tx_drop_probability: f64, rx_drop_probability: f64) -> Self {
        Self {
            inner,
            tx_drop_probability: tx_drop_probability.clamp(0.0, 100.0),
            rx_drop_probability: rx_drop_probability.clamp(0.0, 100.0),
            dropped_tx: 0,
            dropped_rx: 0,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    fn roll(probability: f64) -> bool {
        probability > 0.0 && rand::thread_rng().gen_range(0.0..100.0) < probability
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn send_frame(&mut self, target: &Target, frame: &[u8]) -> io::Result<()> {
        if Self::roll(self.tx_drop_probability) {
            trace!("송신 프레임 드롭 (시뮬레이션)");
            self.dropped_tx += 1;
            return Ok(());
        }
        self.inner.send_frame(target, frame)
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Bytes>> {
        let frame = self.inner.recv_frame(timeout)?;
        if frame.is_some() && Self::roll(self.rx_drop_probability) {
            trace!("수신 프레임 드롭 (시뮬레이션)");
            self.dropped_rx += 1;
            return Ok(None);
        }
        Ok(frame)
    }
}
