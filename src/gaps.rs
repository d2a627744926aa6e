//! 갭(아직 확인되지 않은 바이트 구간) 관리
//!
//! 시작 오프셋을 키로 하는 정렬 맵. 수신된 구간은 겹치는 갭에서 빼고
//! 남은 조각은 원래 송신 시각을 유지함

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// 갭 항목
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapEntry {
    /// 구간 길이 (바이트)
    pub len: u32,

    /// 마지막 읽기 요청 시각 (None = 아직 안 보냄)
    pub last_sent: Option<Instant>,
}

/// 갭 집합
#[derive(Debug, Default)]
pub struct GapSet {
    gaps: BTreeMap<u64, GapEntry>,
}

impl GapSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    /// 남은 갭 바이트 합계
    pub fn missing_bytes(&self) -> u64 {
        self.gaps.values().map(|g| g.len as u64).sum()
    }

    pub fn get(&self, start: u64) -> Option<&GapEntry> {
        self.gaps.get(&start)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &GapEntry)> + '_ {
        self.gaps.iter().map(|(&start, entry)| (start, entry))
    }

    /// [start, end) 구간을 max_len 이하 조각으로 나눠 추가
    ///
    /// 반환값: 추가된 갭 수
    pub fn record(&mut self, start: u64, end: u64, max_len: u32) -> usize {
        let max_len = max_len.max(1) as u64;
        let mut added = 0;
        let mut pos = start;
        while pos < end {
            let len = (end - pos).min(max_len);
            self.gaps.insert(
                pos,
                GapEntry {
                    len: len as u32,
                    last_sent: None,
                },
            );
            pos += len;
            added += 1;
        }
        added
    }

    /// [start, end) 수신 처리: 겹치는 갭을 제거/분할
    ///
    /// 반환값: 새로 채워진 바이트 수 (0이면 갭과 무관한 중복)
    pub fn fill(&mut self, start: u64, end: u64) -> u64 {
        if start >= end {
            return 0;
        }

        // start 이전에서 시작해 start를 넘는 갭도 포함
        let first = self
            .gaps
            .range(..=start)
            .next_back()
            .filter(|(&s, g)| s + g.len as u64 > start)
            .map(|(&s, _)| s)
            .unwrap_or(start);

        let overlapping: Vec<(u64, GapEntry)> = self
            .gaps
            .range(first..end)
            .map(|(&s, &g)| (s, g))
            .collect();

        let mut filled = 0;
        for (gap_start, entry) in overlapping {
            let gap_end = gap_start + entry.len as u64;
            let lo = gap_start.max(start);
            let hi = gap_end.min(end);
            if lo >= hi {
                continue;
            }

            self.gaps.remove(&gap_start);
            filled += hi - lo;

            if gap_start < lo {
                self.gaps.insert(
                    gap_start,
                    GapEntry {
                        len: (lo - gap_start) as u32,
                        last_sent: entry.last_sent,
                    },
                );
            }
            if hi < gap_end {
                self.gaps.insert(
                    hi,
                    GapEntry {
                        len: (gap_end - hi) as u32,
                        last_sent: entry.last_sent,
                    },
                );
            }
        }
        filled
    }

    /// 다음에 요청할 갭 선택
    ///
    /// 한 번도 안 보낸 갭 우선(오프셋 순), 그 다음 가장 오래전에 보낸 갭.
    /// retry 간격이 지나지 않은 갭은 제외
    pub fn next_due(&self, now: Instant, retry: Duration) -> Option<(u64, u32)> {
        let mut oldest: Option<(Instant, u64, u32)> = None;

        for (&start, entry) in &self.gaps {
            match entry.last_sent {
                None => return Some((start, entry.len)),
                Some(sent) if now.saturating_duration_since(sent) >= retry => {
                    if oldest.map_or(true, |(t, _, _)| sent < t) {
                        oldest = Some((sent, start, entry.len));
                    }
                }
                Some(_) => {}
            }
        }

        oldest.map(|(_, start, len)| (start, len))
    }

    /// 송신 시각 기록
    pub fn mark_sent(&mut self, start: u64, now: Instant) {
        if let Some(entry) = self.gaps.get_mut(&start) {
            entry.last_sent = Some(now);
        }
    }
}
