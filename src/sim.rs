//! 시뮬레이션 응답자 (오토파일럿 FTP 서버 흉내)
//!
//! - 메모리 파일 트리 (로컬 디렉터리에서 적재 가능)
//! - open/terminate/list/read/burst 처리, EOF/세션 NACK
//! - LoopbackTransport: 동기식 전송, 응답 필터로 손실/순서 조작
//! - spawn_responder: ChannelTransport 상대편 스레드

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, trace, warn};

use crate::list::DirectoryEntry;
use crate::message::{NackCode, Opcode};
use crate::packet::Packet;
use crate::transport::{ChannelPeer, Target, Transport};
use crate::MAX_PAYLOAD;

/// 파일 트리 노드
#[derive(Debug, Clone)]
enum Node {
    File(Bytes),
    Dir,
    /// 목록에 `S`로만 보이는 항목
    Special,
}

/// 메모리 파일 트리
///
/// 키는 정규화된 경로 (`/a/b`, `@ROMFS/x`)
#[derive(Debug, Clone)]
pub struct FileTree {
    nodes: BTreeMap<String, Node>,
}

impl Default for FileTree {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self { nodes }
    }
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// 파일 추가 (상위 디렉터리 자동 생성)
    pub fn add_file(&mut self, path: &str, data: impl Into<Bytes>) -> &mut Self {
        let path = normalize(path);
        self.add_parents(&path);
        self.nodes.insert(path, Node::File(data.into()));
        self
    }

    pub fn add_dir(&mut self, path: &str) -> &mut Self {
        let path = normalize(path);
        self.add_parents(&path);
        self.nodes.insert(path, Node::Dir);
        self
    }

    /// 목록에서 건너뛰는 항목 추가
    pub fn add_special(&mut self, path: &str) -> &mut Self {
        let path = normalize(path);
        self.add_parents(&path);
        self.nodes.insert(path, Node::Special);
        self
    }

    /// 로컬 디렉터리를 `/` 아래로 적재
    pub fn from_dir(root: &Path) -> io::Result<Self> {
        let mut tree = Self::new();
        tree.load_dir(root, "")?;
        Ok(tree)
    }

    fn load_dir(&mut self, dir: &Path, prefix: &str) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = format!("{}/{}", prefix, name);
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.add_dir(&path);
                self.load_dir(&entry.path(), &path)?;
            } else if file_type.is_file() {
                self.add_file(&path, fs::read(entry.path())?);
            } else {
                self.add_special(&path);
            }
        }
        Ok(())
    }

    pub fn file(&self, path: &str) -> Option<&Bytes> {
        match self.nodes.get(&normalize(path)) {
            Some(Node::File(data)) => Some(data),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.get(&normalize(path)), Some(Node::Dir))
    }

    /// 디렉터리 직계 항목 (와이어 표현, 이름 순)
    pub fn children(&self, dir: &str) -> Option<Vec<Vec<u8>>> {
        let dir = normalize(dir);
        if !self.is_dir(&dir) {
            return None;
        }

        let entries = self
            .nodes
            .iter()
            .filter(|(path, _)| **path != dir && parent(path) == dir)
            .map(|(path, node)| {
                let name = path.rsplit('/').next().unwrap_or(path.as_str());
                match node {
                    Node::File(data) => DirectoryEntry::file(name, data.len() as u64).encode(),
                    Node::Dir => DirectoryEntry::directory(name).encode(),
                    Node::Special => b"S".to_vec(),
                }
            })
            .collect();
        Some(entries)
    }

    fn add_parents(&mut self, path: &str) {
        let mut dir = parent(path);
        while !dir.is_empty() && !self.nodes.contains_key(&dir) {
            let next = parent(&dir);
            self.nodes.insert(dir, Node::Dir);
            dir = next;
        }
    }
}

/// 끝 `/` 제거, 빈 경로는 루트
fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('\0').trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) if path != "/" => "/".to_string(),
        Some((head, _)) if !head.is_empty() => head.to_string(),
        _ => String::new(),
    }
}

/// 시뮬레이션 응답자
#[derive(Debug)]
pub struct Responder {
    tree: FileTree,
    /// 열린 파일 (세션 ID, 경로)
    open: Option<(u8, String)>,
    /// 버스트 요청당 최대 패킷 수
    burst_packets: usize,
    pub requests: u64,
}

impl Responder {
    pub fn new(tree: FileTree) -> Self {
        Self {
            tree,
            open: None,
            burst_packets: 32,
            requests: 0,
        }
    }

    pub fn with_burst_packets(mut self, burst_packets: usize) -> Self {
        self.burst_packets = burst_packets.max(1);
        self
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// 열린 파일의 세션 ID
    pub fn open_session(&self) -> Option<u8> {
        self.open.as_ref().map(|(session, _)| *session)
    }

    /// 요청 하나 처리, 응답 목록 반환
    pub fn handle(&mut self, request: &Packet) -> Vec<Packet> {
        self.requests += 1;
        let path = payload_path(request);

        match request.opcode {
            Opcode::TerminateSession | Opcode::ResetSessions => {
                if self.open_session() == Some(request.session)
                    || request.opcode == Opcode::ResetSessions
                {
                    self.open = None;
                }
                vec![Packet::ack(request, request.offset, Bytes::new())]
            }
            Opcode::ListDirectory => vec![self.list(request, &path)],
            Opcode::OpenFileRO => vec![self.open_file(request, path)],
            Opcode::ReadFile => vec![self.read(request)],
            Opcode::BurstReadFile => self.burst(request),
            other if other.is_write() => {
                debug!("읽기 전용 트리에 쓰기 요청: {:?}", other);
                vec![Packet::nack(request, NackCode::FileProtected)]
            }
            other => {
                debug!("지원하지 않는 요청: {:?}", other);
                vec![Packet::nack(request, NackCode::UnknownCommand)]
            }
        }
    }

    fn list(&self, request: &Packet, path: &str) -> Packet {
        let Some(children) = self.tree.children(path) else {
            return Packet::nack(request, NackCode::FileNotFound);
        };

        let start = request.offset as usize;
        if start >= children.len() {
            return Packet::nack(request, NackCode::EndOfFile);
        }

        let mut payload = Vec::with_capacity(MAX_PAYLOAD);
        for entry in &children[start..] {
            if payload.len() + entry.len() + 1 > MAX_PAYLOAD {
                break;
            }
            payload.extend_from_slice(entry);
            payload.push(0);
        }
        Packet::ack(request, request.offset, Bytes::from(payload))
    }

    fn open_file(&mut self, request: &Packet, path: String) -> Packet {
        if let Some((session, _)) = &self.open {
            if *session != request.session {
                return Packet::nack(request, NackCode::NoSessionsAvailable);
            }
        }

        let Some(data) = self.tree.file(&path) else {
            return Packet::nack(request, NackCode::FileNotFound);
        };
        let size = data.len() as u32;
        self.open = Some((request.session, path));
        Packet::ack(request, 0, Bytes::copy_from_slice(&size.to_le_bytes()))
    }

    /// 요청 세션의 열린 파일
    fn opened(&self, request: &Packet) -> Result<Bytes, NackCode> {
        match &self.open {
            Some((session, path)) if *session == request.session => self
                .tree
                .file(path)
                .cloned()
                .ok_or(NackCode::FileNotFound),
            _ => Err(NackCode::InvalidSession),
        }
    }

    fn read(&self, request: &Packet) -> Packet {
        let data = match self.opened(request) {
            Ok(data) => data,
            Err(code) => return Packet::nack(request, code),
        };

        let start = request.offset as usize;
        if start >= data.len() {
            return Packet::nack(request, NackCode::EndOfFile);
        }
        let end = (start + chunk_size(request)).min(data.len());
        Packet::ack(request, request.offset, data.slice(start..end))
    }

    fn burst(&self, request: &Packet) -> Vec<Packet> {
        let data = match self.opened(request) {
            Ok(data) => data,
            Err(code) => return vec![Packet::nack(request, code)],
        };

        let chunk = chunk_size(request);
        let mut pos = request.offset as usize;
        if pos >= data.len() {
            let mut nack = Packet::nack(request, NackCode::EndOfFile);
            nack.burst_complete = true;
            return vec![nack];
        }

        let mut replies = Vec::new();
        let mut seq = request.seq;
        while pos < data.len() && replies.len() < self.burst_packets {
            let end = (pos + chunk).min(data.len());
            let mut reply = Packet::ack(request, pos as u32, data.slice(pos..end));
            reply.seq = seq.wrapping_add(1);
            seq = reply.seq;
            pos = end;
            reply.burst_complete = pos >= data.len() || replies.len() + 1 == self.burst_packets;
            replies.push(reply);
        }
        trace!(
            "버스트 응답: offset={} {}개",
            request.offset,
            replies.len()
        );
        replies
    }
}

/// 요청 payload의 경로 (NUL 이후 무시)
fn payload_path(request: &Packet) -> String {
    let raw = request.payload.split(|&b| b == 0).next().unwrap_or(&[]);
    String::from_utf8_lossy(raw).into_owned()
}

/// 요청 크기 (0이나 239 초과는 239)
fn chunk_size(request: &Packet) -> usize {
    match request.size as usize {
        0 => MAX_PAYLOAD,
        size => size.min(MAX_PAYLOAD),
    }
}

/// 응답 통과 여부 판단 (false = 버림)
pub type ReplyFilter = Box<dyn FnMut(&Packet) -> bool + Send>;

/// 응답자를 직접 호출하는 동기 전송
///
/// 송신 즉시 응답이 큐에 쌓이고, 큐가 비면 타임아웃만큼 대기
pub struct LoopbackTransport {
    responder: Responder,
    queue: VecDeque<Bytes>,
    filter: Option<ReplyFilter>,
    sent: Arc<Mutex<Vec<Packet>>>,
}

impl LoopbackTransport {
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            queue: VecDeque::new(),
            filter: None,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_filter(mut self, filter: impl FnMut(&Packet) -> bool + Send + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// 송신 기록 공유 핸들
    pub fn sent_log(&self) -> Arc<Mutex<Vec<Packet>>> {
        Arc::clone(&self.sent)
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }
}

impl Transport for LoopbackTransport {
    fn send_frame(&mut self, _target: &Target, frame: &[u8]) -> io::Result<()> {
        let request = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("응답자: 잘못된 요청 {}", e);
                return Ok(());
            }
        };
        self.sent.lock().push(request.clone());

        for reply in self.responder.handle(&request) {
            let deliver = self.filter.as_mut().map_or(true, |filter| filter(&reply));
            if deliver {
                self.queue.push_back(reply.to_frame());
            } else {
                trace!("응답 드롭: {:?} offset={}", reply.req_opcode, reply.offset);
            }
        }
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Bytes>> {
        match self.queue.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}

/// 채널 상대편에서 응답자 실행
///
/// `reorder_seed`가 있으면 요청별 응답 순서를 섞음.
/// 클라이언트 쪽 채널이 닫히면 종료하고 응답자 반환
pub fn spawn_responder(
    mut responder: Responder,
    peer: ChannelPeer,
    reorder_seed: Option<u64>,
) -> JoinHandle<Responder> {
    thread::spawn(move || {
        let mut rng = reorder_seed.map(StdRng::seed_from_u64);

        while let Ok((_target, frame)) = peer.rx.recv() {
            let request = match Packet::decode(&frame) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("응답자: 잘못된 요청 {}", e);
                    continue;
                }
            };

            let mut replies = responder.handle(&request);
            if let Some(rng) = rng.as_mut() {
                replies.shuffle(rng);
            }
            for reply in replies {
                if peer.tx.send(reply.to_frame()).is_err() {
                    return responder;
                }
            }
        }
        responder
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> FileTree {
        let mut tree = FileTree::new();
        tree.add_file("/APM/LOGS/00000001.BIN", vec![7u8; 600])
            .add_file("/params.parm", b"A 1\n".to_vec())
            .add_special("/APM/dev");
        tree
    }

    fn request(opcode: Opcode, session: u8, size: u8, offset: u32, path: &str) -> Packet {
        let mut packet = Packet::request(opcode, size, offset, Bytes::copy_from_slice(path.as_bytes()));
        packet.session = session;
        packet
    }

    #[test]
    fn test_tree_paths() {
        assert_eq!(normalize("/APM/"), "/APM");
        assert_eq!(normalize(""), "/");
        assert_eq!(parent("/APM/LOGS"), "/APM");
        assert_eq!(parent("/APM"), "/");
        assert_eq!(parent("@ROMFS/x"), "@ROMFS");

        let tree = tree();
        assert!(tree.is_dir("/APM/LOGS"));
        assert_eq!(tree.file("/params.parm").map(|d| d.len()), Some(4));
    }

    #[test]
    fn test_children_listing() {
        let tree = tree();
        let root = tree.children("/").unwrap();
        assert_eq!(root, vec![b"DAPM".to_vec(), b"Fparams.parm\t4".to_vec()]);

        let apm = tree.children("/APM").unwrap();
        assert_eq!(apm, vec![b"DLOGS".to_vec(), b"S".to_vec()]);
        assert!(tree.children("/missing").is_none());
    }

    #[test]
    fn test_open_reports_size_and_checks_session() {
        let mut responder = Responder::new(tree());
        let open = request(Opcode::OpenFileRO, 3, 0, 0, "/APM/LOGS/00000001.BIN");
        let reply = responder.handle(&open).remove(0);
        assert_eq!(reply.opcode, Opcode::Ack);
        assert_eq!(reply.payload.as_ref(), &600u32.to_le_bytes());

        // 다른 세션의 읽기
        let read = request(Opcode::ReadFile, 4, 100, 0, "");
        let reply = responder.handle(&read).remove(0);
        assert_eq!(reply.nack_code(), Some(NackCode::InvalidSession));

        let missing = request(Opcode::OpenFileRO, 3, 0, 0, "/nope");
        assert_eq!(
            responder.handle(&missing)[0].nack_code(),
            Some(NackCode::FileNotFound)
        );
    }

    #[test]
    fn test_burst_marks_last_packet() {
        let mut responder = Responder::new(tree());
        responder.handle(&request(Opcode::OpenFileRO, 0, 0, 0, "/APM/LOGS/00000001.BIN"));

        let replies = responder.handle(&request(Opcode::BurstReadFile, 0, 239, 0, ""));
        let shape: Vec<(u32, usize, bool)> = replies
            .iter()
            .map(|p| (p.offset, p.payload.len(), p.burst_complete))
            .collect();
        assert_eq!(
            shape,
            vec![(0, 239, false), (239, 239, false), (478, 122, true)]
        );

        let eof = responder.handle(&request(Opcode::BurstReadFile, 0, 239, 600, ""));
        assert_eq!(eof[0].nack_code(), Some(NackCode::EndOfFile));
        assert!(eof[0].burst_complete);
    }

    #[test]
    fn test_burst_packet_limit() {
        let mut responder = Responder::new(tree()).with_burst_packets(2);
        responder.handle(&request(Opcode::OpenFileRO, 0, 0, 0, "/APM/LOGS/00000001.BIN"));

        let replies = responder.handle(&request(Opcode::BurstReadFile, 0, 100, 0, ""));
        assert_eq!(replies.len(), 2);
        assert!(!replies[0].burst_complete);
        assert!(replies[1].burst_complete);
        assert_eq!(replies[1].end_offset(), 200);
    }

    #[test]
    fn test_write_requests_rejected() {
        let mut responder = Responder::new(tree());
        let reply = responder.handle(&request(Opcode::CreateFile, 0, 0, 0, "/new.txt"));
        assert_eq!(reply[0].nack_code(), Some(NackCode::FileProtected));

        let reply = responder.handle(&request(Opcode::CalcFileCrc32, 0, 0, 0, "/params.parm"));
        assert_eq!(reply[0].nack_code(), Some(NackCode::UnknownCommand));
    }

    #[test]
    fn test_terminate_closes_file() {
        let mut responder = Responder::new(tree());
        responder.handle(&request(Opcode::OpenFileRO, 0, 0, 0, "/params.parm"));
        assert_eq!(responder.open_session(), Some(0));

        let reply = responder.handle(&request(Opcode::TerminateSession, 0, 0, 0, ""));
        assert_eq!(reply[0].opcode, Opcode::Ack);
        assert_eq!(responder.open_session(), None);
    }

    #[test]
    fn test_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("logs")).unwrap();
        fs::write(dir.path().join("logs").join("a.bin"), [1u8, 2, 3]).unwrap();

        let tree = FileTree::from_dir(dir.path()).unwrap();
        assert!(tree.is_dir("/logs"));
        assert_eq!(tree.file("/logs/a.bin").unwrap().as_ref(), &[1, 2, 3]);
    }
}
