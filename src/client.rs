//! FTP 클라이언트
//!
//! 세션 하나를 소유하고 목록/읽기 작업을 한 번에 하나씩 실행.
//! 모든 작업은 종료 시 TerminateSession을 보내 세션 ID를 올림

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::dispatcher::{drive, Window};
use crate::list::{DirectoryEntry, ListOp};
use crate::read::ReadOp;
use crate::session::Session;
use crate::stats::TransferStats;
use crate::transport::{LossyTransport, Transport};
use crate::{Config, Error, Result, MAX_PAYLOAD};

/// MAVLink FTP 클라이언트
pub struct Client<T: Transport> {
    session: Session<LossyTransport<T>>,
    config: Config,
    last_stats: Option<TransferStats>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: Config) -> Self {
        let transport = LossyTransport::new(
            transport,
            config.tx_drop_probability,
            config.rx_drop_probability,
        );
        let session = Session::new(transport, &config);
        Self {
            session,
            config,
            last_stats: None,
        }
    }

    /// 디렉터리 목록
    ///
    /// 시도마다 새 세션으로 시작하고, 응답을 받는 동안은 대기를 연장
    pub fn list(&mut self, path: &str) -> Result<Vec<DirectoryEntry>> {
        self.check_path(path)?;

        let policy = self.config.list_policy();
        let window = Window {
            initial: policy.interval,
            after_reply: self.config.list_reply_extension(),
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut op = ListOp::new(path);
            let result = op
                .start(&mut self.session)
                .and_then(|_| drive(&mut self.session, &mut op, self.config.poll_interval(), window));
            let terminated = self.session.terminate();

            match result {
                Ok(()) => {
                    terminated?;
                    return op.into_entries().ok_or(Error::Timeout);
                }
                Err(Error::Timeout) if policy.can_retry(attempts) => {
                    debug!(
                        "목록 응답 없음: {} ({}/{}회)",
                        path, attempts, policy.max_attempts
                    );
                }
                Err(e) => {
                    warn!("목록 실패: {} ({})", path, e);
                    return Err(e);
                }
            }
        }
    }

    /// 디렉터리 목록, 실패 시 빈 목록
    pub fn list_entries(&mut self, path: &str) -> Vec<DirectoryEntry> {
        self.list(path).unwrap_or_else(|e| {
            debug!("목록 결과 없음: {} ({})", path, e);
            Vec::new()
        })
    }

    /// 파일 범위 읽기
    ///
    /// 파일이 요청보다 짧으면 있는 만큼만 반환
    pub fn read(&mut self, path: &str, offset: u32, size: u32) -> Result<Bytes> {
        self.check_path(path)?;

        let timeout = self.config.read_timeout();
        let window = Window {
            initial: timeout,
            after_reply: timeout,
        };

        let mut op = ReadOp::new(path, offset, size, &self.config);
        let result = op
            .start(&mut self.session)
            .and_then(|_| drive(&mut self.session, &mut op, self.config.poll_interval(), window));
        let terminated = self.session.terminate();

        let (data, mut stats) = op.into_parts();
        stats.rtt = self.session.rtt();
        stats.finish();

        let outcome = match result {
            Ok(()) => {
                terminated?;
                data.ok_or(Error::Timeout)
            }
            Err(e) => {
                warn!(
                    "읽기 실패: {} ({}) | {}",
                    path,
                    e,
                    stats.summary()
                );
                Err(e)
            }
        };
        self.last_stats = Some(stats);

        if let Ok(data) = &outcome {
            info!("{} bytes 수신: {}", data.len(), path);
        }
        outcome
    }

    /// 경로 검사, 실패해도 세션은 종료
    fn check_path(&mut self, path: &str) -> Result<()> {
        let Err(e) = validate_path(path) else {
            return Ok(());
        };
        warn!("요청 거부: {}", e);
        if let Err(term) = self.session.terminate() {
            debug!("세션 종료 실패: {}", term);
        }
        Err(e)
    }

    pub fn session(&self) -> &Session<LossyTransport<T>> {
        &self.session
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 마지막 읽기의 통계
    pub fn last_stats(&self) -> Option<&TransferStats> {
        self.last_stats.as_ref()
    }

    /// 내부 전송 (손실 주입 계층 아래)
    pub fn transport(&self) -> &T {
        self.session.transport().inner()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.session.transport_mut().inner_mut()
    }
}

/// 요청 payload에 실을 수 있는 경로인지
fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || !path.is_ascii() || path.len() > MAX_PAYLOAD {
        return Err(Error::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(())
}
