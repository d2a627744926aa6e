//! 전송 통계

use std::time::{Duration, Instant};

/// 읽기 작업 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 종료 시간 (완료/실패 시 기록)
    pub end_time: Option<Instant>,

    /// 요청 크기
    pub requested_bytes: u64,

    /// 새로 채워진 바이트 (중복 제외)
    pub received_bytes: u64,

    /// 수신한 버스트 패킷 수
    pub burst_packets: u64,

    /// 중복 패킷 수
    pub duplicate_packets: u64,

    /// 기록된 갭 수
    pub gaps_recorded: u64,

    /// 보낸 갭 읽기 요청 수
    pub gap_reads_sent: u64,

    /// 버스트 재요청 수 (정체/연속)
    pub burst_requests: u64,

    /// 파일 열기 재시도 수
    pub open_retries: u32,

    /// 마지막 RTT 추정값
    pub rtt: Duration,
}

impl TransferStats {
    pub fn new(requested_bytes: u64) -> Self {
        Self {
            start_time: Instant::now(),
            end_time: None,
            requested_bytes,
            received_bytes: 0,
            burst_packets: 0,
            duplicate_packets: 0,
            gaps_recorded: 0,
            gap_reads_sent: 0,
            burst_requests: 0,
            open_retries: 0,
            rtt: Duration::ZERO,
        }
    }

    /// 종료 시각 기록
    pub fn finish(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Instant::now());
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.received_bytes as f64 / elapsed
    }

    /// 갭 비율 (버스트 패킷 대비 갭 수)
    pub fn gap_ratio(&self) -> f64 {
        if self.burst_packets == 0 {
            return 0.0;
        }
        self.gaps_recorded as f64 / self.burst_packets as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {}/{} | Rate: {:.1} kB/s | Bursts: {} | Dups: {} | Gaps: {} ({:.1}%, reads {}) | Open retries: {} | RTT: {:.0}ms",
            self.elapsed().as_secs_f64(),
            self.received_bytes,
            self.requested_bytes,
            self.throughput() / 1024.0,
            self.burst_packets,
            self.duplicate_packets,
            self.gaps_recorded,
            self.gap_ratio() * 100.0,
            self.gap_reads_sent,
            self.open_retries,
            self.rtt.as_secs_f64() * 1000.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(0)
    }
}
