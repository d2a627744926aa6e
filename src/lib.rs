//! # mavftp
//!
//! MAVLink FTP 클라이언트 엔진 (손실 많은 텔레메트리 링크용)
//!
//! ## 핵심 특징
//! - **버스트 읽기**: 응답자가 연속 청크를 스트리밍, 요청 수 최소화
//! - **갭 추적**: 손실/순서 어긋남 구간만 단일 읽기로 다시 요청
//! - **세션 격리**: 작업마다 세션 종료 후 ID 증가, 늦은 응답 차단
//! - **단일 스레드**: 블로킹 폴링 루프 위의 명시적 상태 기계
//! - **전송 추상화**: UDP / 채널 / 손실 주입 / 루프백

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gaps;
pub mod list;
pub mod message;
pub mod packet;
pub mod read;
pub mod session;
pub mod sim;
pub mod stats;
pub mod transport;

pub use client::Client;
pub use config::{Config, RetryPolicy};
pub use error::{Error, Result};
pub use list::DirectoryEntry;
pub use message::{NackCode, Opcode};
pub use packet::Packet;
pub use session::Session;
pub use stats::TransferStats;
pub use transport::{ChannelTransport, LossyTransport, Target, Transport, UdpTransport};

/// 패킷 헤더 크기 (바이트)
pub const HEADER_LEN: usize = 12;

/// 최대 payload 크기 (바이트)
pub const MAX_PAYLOAD: usize = 239;

/// 전송 프레임 크기 (헤더 + payload, 0 패딩)
pub const FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD; // 251
