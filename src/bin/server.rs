//! mavftp 시뮬레이터 - 로컬 디렉터리를 MAVLink FTP 응답자로 제공
//!
//! 데이터그램 = 주소 헤더 3바이트 + 251바이트 프레임
//! (클라이언트 UdpTransport와 동일한 형식)
//!
//! 사용법:
//!   cargo run --release --bin mavftp-sim -- [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉터리 제공
//!   cargo run --release --bin mavftp-sim -- --bind 127.0.0.1:14555 --root .
//!
//!   # 응답 20% 손실
//!   cargo run --release --bin mavftp-sim -- -r ./logs --drop 20

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use mavftp::sim::{FileTree, Responder};
use mavftp::{Packet, Target};

/// 시뮬레이터 설정
struct SimConfig {
    bind_addr: SocketAddr,
    root: Option<PathBuf>,
    /// 응답 손실률 (0 ~ 100 %)
    drop_probability: f64,
    burst_packets: usize,
    verbose: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 14555)),
            root: None,
            drop_probability: 0.0,
            burst_packets: 32,
            verbose: false,
        }
    }
}

fn parse_args() -> SimConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SimConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--root" | "-r" => {
                if i + 1 < args.len() {
                    config.root = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--drop" => {
                if i + 1 < args.len() {
                    config.drop_probability = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--burst-packets" => {
                if i + 1 < args.len() {
                    config.burst_packets = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"mavftp-sim - MAVLink FTP 응답자 시뮬레이터

로컬 디렉터리를 오토파일럿 파일 시스템처럼 제공
- open/terminate/list/read/burst 지원 (읽기 전용)
- 응답 손실 주입으로 갭 채움 검증

사용법:
  cargo run --release --bin mavftp-sim -- [OPTIONS]

옵션:
  -b, --bind <ADDR>         바인드 주소 (기본: 127.0.0.1:14555)
  -r, --root <DIR>          제공할 디렉터리 (기본: 테스트 파일 1개)
  --drop <PERCENT>          응답 손실률 0~100 (기본: 0)
  --burst-packets <N>       버스트 요청당 최대 패킷 수 (기본: 32)
  -v, --verbose             패킷 단위 로그
  -h, --help                이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sim_config = parse_args();

    // 로깅 설정 (RUST_LOG 우선)
    let default_level = if sim_config.verbose { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mavftp-sim starting...");
    info!("Bind address: {}", sim_config.bind_addr);

    let tree = match &sim_config.root {
        Some(root) => {
            info!("Serving directory: {:?}", root);
            FileTree::from_dir(root)?
        }
        None => {
            // 테스트용 더미 파일 (64KB)
            info!("Using test tree (/test.bin 64KB)");
            let mut tree = FileTree::new();
            let data: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
            tree.add_file("/test.bin", data);
            tree
        }
    };
    let mut responder = Responder::new(tree).with_burst_packets(sim_config.burst_packets);

    let socket = Arc::new(UdpSocket::bind(sim_config.bind_addr).await?);
    info!("Listening on {}", socket.local_addr()?);

    // ═══════════════════════════════════════════════════════════════
    // 송신 큐 + 송신 태스크
    // ═══════════════════════════════════════════════════════════════
    let (send_tx, mut send_rx) = mpsc::channel::<(bytes::Bytes, SocketAddr)>(10_000);

    let send_socket = socket.clone();
    let _send_task = tokio::spawn(async move {
        while let Some((datagram, addr)) = send_rx.recv().await {
            if let Err(e) = send_socket.send_to(&datagram, addr).await {
                warn!("송신 실패 {}: {}", addr, e);
            }
        }
    });

    // ═══════════════════════════════════════════════════════════════
    // 수신 루프
    // ═══════════════════════════════════════════════════════════════
    let mut buf = vec![0u8; 2048];
    let mut report = tokio::time::interval(Duration::from_secs(10));
    let mut dropped = 0u64;

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (len, addr) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("수신 실패: {}", e);
                        continue;
                    }
                };

                let Some((target, frame)) = Target::unwrap(&buf[..len]) else {
                    debug!("짧은 데이터그램 무시: {} bytes from {}", len, addr);
                    continue;
                };
                let request = match Packet::decode(frame) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("잘못된 요청 from {}: {}", addr, e);
                        continue;
                    }
                };

                for reply in responder.handle(&request) {
                    if sim_config.drop_probability > 0.0
                        && rand::thread_rng().gen_range(0.0..100.0) < sim_config.drop_probability
                    {
                        dropped += 1;
                        continue;
                    }
                    // 응답 주소 헤더는 요청 대상을 그대로 사용
                    let datagram = target.wrap(&reply.to_frame());
                    if send_tx.send((datagram, addr)).await.is_err() {
                        warn!("송신 큐 닫힘");
                        return Ok(());
                    }
                }
            }
            _ = report.tick() => {
                debug!("Requests: {} | Dropped replies: {}", responder.requests, dropped);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down (requests {}, dropped {})", responder.requests, dropped);
                break;
            }
        }
    }

    Ok(())
}
