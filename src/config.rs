//! 클라이언트 설정

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MAX_PAYLOAD;

/// MAVLink FTP 클라이언트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 디버그 상세도 (0 = 최소, 2 이상 = 패킷 단위 로그)
    pub debug: u8,

    /// 송신 패킷 인위적 손실률 (0 ~ 100 %)
    /// 재시도/갭 채움 검증용, 운영 환경에서는 0
    pub tx_drop_probability: f64,

    /// 수신 패킷 인위적 손실률 (0 ~ 100 %)
    pub rx_drop_probability: f64,

    /// 동시에 진행 중인 갭 읽기 최대 개수
    pub max_backlog: usize,

    /// 버스트 읽기 청크 크기 (1 ~ 239)
    pub burst_read_size: usize,

    /// 단일 범위 읽기 크기
    pub read_size: usize,

    /// 쓰기 큐 깊이 (읽기 전용 클라이언트에서는 미사용)
    pub write_queue_size: usize,

    /// 갭/버스트 재요청 간격 (밀리초)
    pub retry_time_ms: u64,

    /// 수신 대기 단위 (밀리초)
    /// 재시도 판단의 최악 지연
    pub poll_interval_ms: u64,

    /// 파일 열기 응답 대기 (밀리초)
    pub open_timeout_ms: u64,

    /// 파일 열기 재시도 횟수 (최초 전송 제외)
    pub open_retries: u32,

    /// 디렉터리 목록 시도 횟수
    pub list_attempts: u32,

    /// 목록 시도당 대기 (밀리초)
    pub list_attempt_timeout_ms: u64,

    /// 목록 응답 수신 후 연장 대기 (밀리초)
    pub list_reply_extension_ms: u64,

    /// 읽기 무응답 타임아웃 (밀리초)
    /// 열기 재시도 전체 시간보다 길어야 함
    pub read_timeout_ms: u64,

    /// RTT 초기 추정값 (밀리초)
    pub initial_rtt_ms: u64,

    /// RTT 하한 (밀리초)
    pub min_rtt_ms: u64,

    /// 대상 시스템 ID
    pub target_system: u8,

    /// 대상 컴포넌트 ID
    pub target_component: u8,

    /// 대상 네트워크 ID
    pub target_network: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: 0,
            tx_drop_probability: 0.0,
            rx_drop_probability: 0.0,
            max_backlog: 5,
            burst_read_size: MAX_PAYLOAD,
            read_size: MAX_PAYLOAD,
            write_queue_size: 5,
            retry_time_ms: 200,
            poll_interval_ms: 200,
            open_timeout_ms: 1000,
            open_retries: 2,
            list_attempts: 5,
            list_attempt_timeout_ms: 2000,
            list_reply_extension_ms: 1000,
            read_timeout_ms: 5000,
            initial_rtt_ms: 500,
            min_rtt_ms: 10,
            target_system: 1,
            target_component: 1,
            target_network: 0,
        }
    }
}

/// 재시도 정책 (최대 시도 횟수 + 간격)
///
/// 목록/열기/갭 읽기가 같은 형태의 값으로 재시도를 판단
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// 마지막 시도 이후 재시도 간격이 지났는지
    pub fn is_due(&self, elapsed: Duration) -> bool {
        elapsed >= self.interval
    }

    /// 남은 시도가 있는지 (attempts = 이미 보낸 횟수)
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// [1, 239]로 제한된 버스트 크기
    pub fn burst_size(&self) -> usize {
        self.burst_read_size.clamp(1, MAX_PAYLOAD)
    }

    /// [1, 239]로 제한된 단일 읽기 크기
    pub fn single_read_size(&self) -> usize {
        self.read_size.clamp(1, MAX_PAYLOAD)
    }

    pub fn retry_time(&self) -> Duration {
        Duration::from_millis(self.retry_time_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn initial_rtt(&self) -> Duration {
        Duration::from_millis(self.initial_rtt_ms)
    }

    pub fn min_rtt(&self) -> Duration {
        Duration::from_millis(self.min_rtt_ms)
    }

    /// 파일 열기: 최초 1회 + open_retries
    pub fn open_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.open_retries + 1,
            Duration::from_millis(self.open_timeout_ms),
        )
    }

    /// 디렉터리 목록: list_attempts회, 시도당 대기
    pub fn list_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.list_attempts.max(1),
            Duration::from_millis(self.list_attempt_timeout_ms),
        )
    }

    /// 갭 읽기: 횟수 제한 없이 retry_time 간격
    pub fn gap_policy(&self) -> RetryPolicy {
        RetryPolicy::new(u32::MAX, self.retry_time())
    }

    pub fn list_reply_extension(&self) -> Duration {
        Duration::from_millis(self.list_reply_extension_ms)
    }

    /// 손실이 심한 텔레메트리 링크용 설정
    pub fn lossy_link() -> Self {
        Self {
            max_backlog: 3,
            burst_read_size: 200,
            retry_time_ms: 400,
            open_timeout_ms: 2000,
            open_retries: 4,
            list_attempt_timeout_ms: 4000,
            read_timeout_ms: 15000,
            ..Self::default()
        }
    }

    /// USB/이더넷 등 빠른 링크용 설정
    pub fn fast_link() -> Self {
        Self {
            max_backlog: 16,
            retry_time_ms: 50,
            poll_interval_ms: 20,
            open_timeout_ms: 300,
            list_attempt_timeout_ms: 500,
            list_reply_extension_ms: 300,
            read_timeout_ms: 2000,
            initial_rtt_ms: 50,
            min_rtt_ms: 1,
            ..Self::default()
        }
    }
}
