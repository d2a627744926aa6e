//! 디렉터리 목록 교환
//!
//! 응답 payload는 NUL로 구분된 항목들:
//! - `D<name>`: 디렉터리
//! - `F<name>\t<size>`: 파일
//! - `S`: 건너뛴 항목 (오프셋에는 포함)
//!
//! ACK마다 소비한 항목 수만큼 오프셋을 올려 다음 페이지를 요청하고,
//! EndOfFile NACK에서 누적된 결과를 확정함

use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::dispatcher::{Operation, Route};
use crate::message::{NackCode, Opcode};
use crate::packet::Packet;
use crate::session::Session;
use crate::transport::Transport;
use crate::{Error, Result};

/// 디렉터리 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    /// 파일 크기 (디렉터리는 0)
    pub size_b: u64,
}

impl DirectoryEntry {
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size_b: 0,
        }
    }

    pub fn file(name: impl Into<String>, size_b: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size_b,
        }
    }

    /// 항목 하나 해석, 건너뛸 항목이면 None
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?;
        let mut chars = text.chars();
        match chars.next()? {
            'D' => Some(Self::directory(chars.as_str())),
            'F' => {
                let (name, size) = chars.as_str().split_once('\t')?;
                Some(Self::file(name, size.trim().parse().ok()?))
            }
            _ => None,
        }
    }

    /// 와이어 표현 (NUL 제외)
    pub fn encode(&self) -> Vec<u8> {
        if self.is_dir {
            format!("D{}", self.name).into_bytes()
        } else {
            format!("F{}\t{}", self.name, self.size_b).into_bytes()
        }
    }
}

/// payload 한 개 디코딩
///
/// 반환값: (해석된 항목, 오프셋에 더할 항목 수)
pub fn decode_entries(payload: &[u8]) -> (Vec<DirectoryEntry>, u32) {
    let mut entries = Vec::new();
    let mut consumed = 0u32;
    for raw in payload.split(|&b| b == 0).filter(|raw| !raw.is_empty()) {
        consumed += 1;
        match DirectoryEntry::parse(raw) {
            Some(entry) => entries.push(entry),
            None => trace!("목록 항목 건너뜀: {:?}", String::from_utf8_lossy(raw)),
        }
    }
    (entries, consumed)
}

/// 목록 작업 상태
#[derive(Debug)]
pub struct ListOp {
    path: String,
    dir_offset: u32,
    batch: Vec<DirectoryEntry>,
    result: Option<Vec<DirectoryEntry>>,
    pages: u32,
}

impl ListOp {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            dir_offset: 0,
            batch: Vec::new(),
            result: None,
            pages: 0,
        }
    }

    /// 첫 페이지 요청
    pub fn start<T: Transport>(&mut self, session: &mut Session<T>) -> Result<()> {
        debug!("목록 요청: {} (session {})", self.path, session.session_id());
        session.send(Packet::with_payload(
            Opcode::ListDirectory,
            self.dir_offset,
            Bytes::copy_from_slice(self.path.as_bytes()),
        ))
    }

    pub fn dir_offset(&self) -> u32 {
        self.dir_offset
    }

    /// 확정된 결과
    pub fn into_entries(self) -> Option<Vec<DirectoryEntry>> {
        self.result
    }

    fn complete(&mut self) {
        let entries = std::mem::take(&mut self.batch);
        info!(
            "목록 완료: {} ({} 항목, {} 페이지)",
            self.path,
            entries.len(),
            self.pages
        );
        self.result = Some(entries);
    }
}

impl Operation for ListOp {
    fn accepts(&self, route: Route) -> bool {
        route == Route::List
    }

    fn on_reply<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        _route: Route,
        packet: &Packet,
    ) -> Result<()> {
        if self.result.is_some() {
            return Ok(());
        }

        match packet.opcode {
            Opcode::Ack => {
                // 이미 받은 페이지의 중복 응답
                if packet.offset != self.dir_offset {
                    debug!(
                        "목록 중복 응답 무시: offset={} (현재 {})",
                        packet.offset, self.dir_offset
                    );
                    return Ok(());
                }

                let (entries, consumed) = decode_entries(&packet.payload);
                if consumed == 0 {
                    // 빈 페이지는 끝으로 간주
                    self.complete();
                    return Ok(());
                }

                self.pages += 1;
                self.dir_offset += consumed;
                self.batch.extend(entries);
                debug!("목록 페이지 {}: 다음 오프셋 {}", self.pages, self.dir_offset);
                session.resend_last(self.dir_offset)
            }
            Opcode::Nack => match NackCode::from_payload(&packet.payload) {
                NackCode::EndOfFile => {
                    self.complete();
                    Ok(())
                }
                code => Err(Error::ProtocolNack { code }),
            },
            other => {
                debug!("목록 응답 opcode 무시: {:?}", other);
                Ok(())
            }
        }
    }

    fn on_idle<T: Transport>(&mut self, _session: &mut Session<T>, _now: Instant) -> Result<()> {
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.result.is_some()
    }
}
