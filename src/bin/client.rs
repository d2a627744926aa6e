//! mavftp 클라이언트 - MAVLink FTP 목록/파일 읽기
//!
//! 사용법:
//!   cargo run --release --bin mavftp-client -- [OPTIONS] <COMMAND>
//!
//! 예시:
//!   # 루트 목록
//!   cargo run --release --bin mavftp-client -- -c 127.0.0.1:14555 ls /
//!
//!   # 로그 파일 받기
//!   cargo run --release --bin mavftp-client -- get /APM/LOGS/00000001.BIN -o 1.bin
//!
//!   # 손실 링크 프리셋 + 일부 범위
//!   cargo run --release --bin mavftp-client -- --lossy get /test.bin --offset 1000 --size 4096

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mavftp::{Client, Config, UdpTransport};

/// 실행할 명령
enum Command {
    List { path: String },
    Get {
        path: String,
        offset: u32,
        size: Option<u32>,
        output: Option<PathBuf>,
    },
}

/// 클라이언트 설정
struct ClientConfig {
    bind_addr: SocketAddr,
    remote_addr: SocketAddr,
    command: Option<Command>,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 14555)),
            command: None,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();
    let mut positional = Vec::new();
    let mut offset = 0u32;
    let mut size = None;
    let mut output = None;

    // 프리셋 먼저, 개별 옵션은 그 위에 덮어씀
    for arg in &args[1..] {
        match arg.as_str() {
            "--lossy" => config.config = Config::lossy_link(),
            "--fast" => config.config = Config::fast_link(),
            _ => {}
        }
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--connect" | "-c" => {
                if i + 1 < args.len() {
                    config.remote_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--offset" => {
                if i + 1 < args.len() {
                    offset = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--size" => {
                if i + 1 < args.len() {
                    size = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    output = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--debug" | "-d" => {
                if i + 1 < args.len() {
                    config.config.debug = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--drop-tx" => {
                if i + 1 < args.len() {
                    config.config.tx_drop_probability =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--drop-rx" => {
                if i + 1 < args.len() {
                    config.config.rx_drop_probability =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--burst-size" => {
                if i + 1 < args.len() {
                    config.config.burst_read_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--system" => {
                if i + 1 < args.len() {
                    config.config.target_system = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--component" => {
                if i + 1 < args.len() {
                    config.config.target_component =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--lossy" | "--fast" => {}
            "--help" | "-h" => {
                println!(
                    r#"mavftp-client - MAVLink FTP 클라이언트

버스트 읽기 + 갭 채움으로 손실 링크에서 파일 수신

사용법:
  cargo run --release --bin mavftp-client -- [OPTIONS] <COMMAND>

명령:
  ls <PATH>                 디렉터리 목록
  get <PATH>                파일 읽기 (--size 없으면 상위 목록에서 크기 확인)

옵션:
  -c, --connect <ADDR>      응답자 주소 (기본: 127.0.0.1:14555)
  -b, --bind <ADDR>         로컬 바인드 주소 (기본: 0.0.0.0:0)
  --offset <N>              읽기 시작 오프셋 (기본: 0)
  --size <N>                읽기 크기
  -o, --output <PATH>       저장 경로 (기본: 표준 출력)
  -d, --debug <LEVEL>       로그 상세도 0~2
  --drop-tx <PERCENT>       송신 손실 주입 0~100
  --drop-rx <PERCENT>       수신 손실 주입 0~100
  --burst-size <N>          버스트 청크 크기 1~239
  --system <ID>             대상 시스템 ID (기본: 1)
  --component <ID>          대상 컴포넌트 ID (기본: 1)
  --lossy                   손실 링크 프리셋
  --fast                    빠른 링크 프리셋
  -h, --help                이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    config.command = match positional.as_slice() {
        [cmd, path] if cmd == "ls" => Some(Command::List {
            path: fix_path(path),
        }),
        [cmd, path] if cmd == "get" => Some(Command::Get {
            path: fix_path(path),
            offset,
            size,
            output,
        }),
        _ => None,
    };

    config
}

/// `/@ROMFS/...` 같은 가상 루트는 앞 `/` 없이 요청
fn fix_path(path: &str) -> String {
    match path.strip_prefix('/') {
        Some(rest) if rest.starts_with('@') => rest.to_string(),
        _ => path.to_string(),
    }
}

/// 상위 디렉터리 목록에서 파일 크기 확인
fn discover_size(client: &mut Client<UdpTransport>, path: &str) -> Option<u32> {
    let (dir, name) = match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => ("/", path),
    };

    client
        .list_entries(dir)
        .into_iter()
        .find(|entry| !entry.is_dir && entry.name == name)
        .map(|entry| entry.size_b.min(u32::MAX as u64) as u32)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_config = parse_args();

    // 로깅 설정 (RUST_LOG 우선)
    let default_level = match client_config.config.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = client_config.command else {
        eprintln!("명령 필요: ls <PATH> | get <PATH> (--help 참고)");
        std::process::exit(2);
    };

    let transport = UdpTransport::connect(client_config.bind_addr, client_config.remote_addr)?;
    info!(
        "Connected: {} -> {}",
        transport.local_addr()?,
        client_config.remote_addr
    );
    let mut client = Client::new(transport, client_config.config);

    match command {
        Command::List { path } => {
            let entries = client.list(&path)?;
            let mut stdout = std::io::stdout().lock();
            for entry in entries {
                if entry.is_dir {
                    writeln!(stdout, "d {:>10} {}", "", entry.name)?;
                } else {
                    writeln!(stdout, "- {:>10} {}", entry.size_b, entry.name)?;
                }
            }
        }
        Command::Get {
            path,
            offset,
            size,
            output,
        } => {
            let size = match size {
                Some(size) => size,
                None => match discover_size(&mut client, &path) {
                    Some(size) => size.saturating_sub(offset),
                    None => {
                        warn!("파일 크기 확인 실패: {} (--size 지정 필요)", path);
                        std::process::exit(1);
                    }
                },
            };

            let data = client.read(&path, offset, size)?;
            if let Some(stats) = client.last_stats() {
                info!("{}", stats.summary());
            }

            match output {
                Some(out) => {
                    std::fs::write(&out, &data)?;
                    info!("Saved {} bytes to {:?}", data.len(), out);
                }
                None => std::io::stdout().write_all(&data)?,
            }
        }
    }

    Ok(())
}
