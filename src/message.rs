//! 프로토콜 opcode 및 NACK 에러 코드 정의
//!
//! 번호는 MAVLink FTP 규격을 그대로 따름

use std::fmt;

use serde::{Deserialize, Serialize};

/// 요청/응답 opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// 요청 없음 (요청 패킷의 req_opcode 자리)
    None = 0,

    /// 세션 종료
    TerminateSession = 1,

    /// 모든 세션 초기화
    ResetSessions = 2,

    /// 디렉터리 목록
    ListDirectory = 3,

    /// 읽기 전용 파일 열기
    OpenFileRO = 4,

    /// 단일 범위 읽기
    ReadFile = 5,

    CreateFile = 6,
    WriteFile = 7,
    RemoveFile = 8,
    CreateDirectory = 9,
    RemoveDirectory = 10,
    OpenFileWO = 11,
    TruncateFile = 12,
    Rename = 13,
    CalcFileCrc32 = 14,

    /// 버스트 읽기 (응답자가 연속 청크를 스트리밍)
    BurstReadFile = 15,

    /// 긍정 응답
    Ack = 128,

    /// 부정 응답 (payload[0] = 에러 코드)
    Nack = 129,
}

impl Opcode {
    /// 바이트에서 opcode 변환
    pub fn from_u8(value: u8) -> Option<Self> {
        let op = match value {
            0 => Opcode::None,
            1 => Opcode::TerminateSession,
            2 => Opcode::ResetSessions,
            3 => Opcode::ListDirectory,
            4 => Opcode::OpenFileRO,
            5 => Opcode::ReadFile,
            6 => Opcode::CreateFile,
            7 => Opcode::WriteFile,
            8 => Opcode::RemoveFile,
            9 => Opcode::CreateDirectory,
            10 => Opcode::RemoveDirectory,
            11 => Opcode::OpenFileWO,
            12 => Opcode::TruncateFile,
            13 => Opcode::Rename,
            14 => Opcode::CalcFileCrc32,
            15 => Opcode::BurstReadFile,
            128 => Opcode::Ack,
            129 => Opcode::Nack,
            _ => return None,
        };
        Some(op)
    }

    /// 이 클라이언트가 절대 보내지 않는 쓰기 계열 opcode 여부
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Opcode::CreateFile
                | Opcode::WriteFile
                | Opcode::RemoveFile
                | Opcode::CreateDirectory
                | Opcode::RemoveDirectory
                | Opcode::OpenFileWO
                | Opcode::TruncateFile
                | Opcode::Rename
        )
    }
}

/// NACK payload 첫 바이트에 담기는 에러 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NackCode {
    None,
    Fail,
    /// 두 번째 payload 바이트에 errno
    FailErrno(u8),
    InvalidDataSize,
    InvalidSession,
    NoSessionsAvailable,
    EndOfFile,
    UnknownCommand,
    FileExists,
    FileProtected,
    FileNotFound,
    Unknown(u8),
}

impl NackCode {
    /// NACK payload에서 에러 코드 추출
    ///
    /// 빈 payload는 `Fail`로 취급
    pub fn from_payload(payload: &[u8]) -> Self {
        let Some(&code) = payload.first() else {
            return NackCode::Fail;
        };
        match code {
            0 => NackCode::None,
            1 => NackCode::Fail,
            2 => NackCode::FailErrno(payload.get(1).copied().unwrap_or(0)),
            3 => NackCode::InvalidDataSize,
            4 => NackCode::InvalidSession,
            5 => NackCode::NoSessionsAvailable,
            6 => NackCode::EndOfFile,
            7 => NackCode::UnknownCommand,
            8 => NackCode::FileExists,
            9 => NackCode::FileProtected,
            10 => NackCode::FileNotFound,
            other => NackCode::Unknown(other),
        }
    }

    /// 와이어 표현 (1~2 바이트)
    pub fn to_payload(self) -> Vec<u8> {
        match self {
            NackCode::FailErrno(errno) => vec![2, errno],
            other => vec![other.code()],
        }
    }

    pub fn code(self) -> u8 {
        match self {
            NackCode::None => 0,
            NackCode::Fail => 1,
            NackCode::FailErrno(_) => 2,
            NackCode::InvalidDataSize => 3,
            NackCode::InvalidSession => 4,
            NackCode::NoSessionsAvailable => 5,
            NackCode::EndOfFile => 6,
            NackCode::UnknownCommand => 7,
            NackCode::FileExists => 8,
            NackCode::FileProtected => 9,
            NackCode::FileNotFound => 10,
            NackCode::Unknown(code) => code,
        }
    }
}

impl fmt::Display for NackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackCode::FailErrno(errno) => write!(f, "FailErrno(errno={})", errno),
            NackCode::Unknown(code) => write!(f, "Unknown({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}
