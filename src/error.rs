//! 에러 타입 정의

use thiserror::Error;

use crate::message::NackCode;

/// MAVLink FTP 클라이언트 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("잘못된 패킷: {reason}")]
    MalformedPacket { reason: String },

    #[error("응답자 NACK: {code}")]
    ProtocolNack { code: NackCode },

    #[error("파일 열기 재시도 초과: {attempts}회 전송")]
    OpenRetriesExceeded { attempts: u32 },

    #[error("작업 타임아웃")]
    Timeout,

    #[error("유효하지 않은 경로: {path}")]
    InvalidPath { path: String },

    #[error("연결 종료")]
    ConnectionClosed,
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedPacket {
            reason: reason.into(),
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
