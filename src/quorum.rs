//! # Quorum 收集 (Race-to-M Collection)
//!
//! 向全部 n 个候选方并发发起请求 (而不是只向 t 个)，谁先回复就先接收谁的分片，
//! 收满 t 个有效且索引互不相同的分片后立即停止，其余连接全部中止。
//!
//! ## 流程 (Flow)
//! 1. **扇出 (Fan-out)**: 每个候选方一个 watcher 任务，放在同一个 `JoinSet` 中。
//! 2. **扇入 (Fan-in)**: 每个 watcher 恰好通过 `mpsc` 通道上报一次 `Reply` (分片或失败)。
//! 3. **判定 (Decide)**: 收集者按到达顺序消费通道，直到:
//!    - 已接收 t 个分片 -> 成功，`JoinSet` 被丢弃，未完成的连接随之关闭；
//!    - 已接收 + 仍在等待 < t -> `QuorumUnreachable`；
//!    - 超过总截止时间 -> `QuorumTimeout`。
//!
//! 拉取 (pull) 模式由协调者主动连接各分片持有者；推送 (push) 模式由请求者打开
//! 回调端口，分片持有者主动连进来投递。两者共用同一个 `QuorumState` 和消费循环。
//! 推送模式下无法解析出分片的连接记为 `Reply::Stray`，不占用候选名额，只受截止时间约束。

use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, ProtocolResult, SharingError, WireError};
use crate::net::{Connection, Endpoint, Message};
use crate::shamir::Share;

/// What one candidate contributed: a parsed share or the reason it could not.
#[derive(Debug)]
pub enum Reply {
    Share { from: SocketAddr, share: Share },
    Failed { from: SocketAddr, reason: String },
    /// An inbound delivery that produced no share. Anyone can connect to a
    /// callback endpoint, so it does not use up a candidate.
    Stray { from: SocketAddr, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Accepted,
    Dropped,
    Satisfied,
}

/// Accepted shares plus the number of candidates that may still answer.
#[derive(Debug)]
pub struct QuorumState {
    threshold: usize,
    pending: usize,
    accepted: BTreeMap<u16, Share>,
}

impl QuorumState {
    pub fn new(threshold: usize, candidates: usize) -> Self {
        Self {
            threshold,
            pending: candidates,
            accepted: BTreeMap::new(),
        }
    }

    /// Folds one reply in. Once satisfied, further replies are ignored.
    pub fn offer(&mut self, reply: Reply) -> Progress {
        if self.is_satisfied() {
            return Progress::Satisfied;
        }
        match reply {
            Reply::Share { from, share } => {
                self.pending = self.pending.saturating_sub(1);
                if self.accepted.contains_key(&share.index()) {
                    warn!("[QUORUM] duplicate index {} from {}, dropped", share.index(), from);
                    return Progress::Dropped;
                }
                debug!("[QUORUM] accepted share {} from {}", share.index(), from);
                self.accepted.insert(share.index(), share);
                if self.is_satisfied() {
                    Progress::Satisfied
                } else {
                    Progress::Accepted
                }
            }
            Reply::Failed { from, reason } => {
                self.pending = self.pending.saturating_sub(1);
                warn!("[QUORUM] candidate {} dropped: {}", from, reason);
                Progress::Dropped
            }
            Reply::Stray { from, reason } => {
                warn!("[QUORUM] delivery from {} ignored: {}", from, reason);
                Progress::Dropped
            }
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.accepted.len() >= self.threshold
    }

    pub fn is_reachable(&self) -> bool {
        self.accepted.len() + self.pending >= self.threshold
    }

    pub fn accepted(&self) -> usize {
        self.accepted.len()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn into_shares(self) -> Vec<Share> {
        self.accepted.into_values().collect()
    }
}

/// Consumes replies until quorum, unreachability or `deadline`.
pub async fn drain(
    mut state: QuorumState,
    replies: &mut mpsc::Receiver<Reply>,
    started: Instant,
    deadline: Instant,
) -> ProtocolResult<Vec<Share>> {
    loop {
        if state.is_satisfied() {
            info!(
                "[QUORUM] reached {}/{} after {:?}",
                state.accepted(),
                state.threshold,
                started.elapsed()
            );
            return Ok(state.into_shares());
        }
        if !state.is_reachable() {
            return Err(unreachable(&state));
        }

        match tokio::time::timeout_at(deadline, replies.recv()).await {
            Ok(Some(reply)) => {
                state.offer(reply);
            }
            // Every reporter is gone; nobody else can answer.
            Ok(None) => {
                state.pending = 0;
                return Err(unreachable(&state));
            }
            Err(_) => {
                return Err(ProtocolError::QuorumTimeout {
                    accepted: state.accepted(),
                    threshold: state.threshold,
                    elapsed: started.elapsed(),
                })
            }
        }
    }
}

fn unreachable(state: &QuorumState) -> ProtocolError {
    ProtocolError::QuorumUnreachable {
        accepted: state.accepted(),
        pending: state.pending(),
        threshold: state.threshold,
    }
}

fn check_threshold(threshold: usize, candidates: usize) -> ProtocolResult<()> {
    if threshold == 0 {
        return Err(SharingError::InvalidThreshold {
            threshold,
            shares: candidates,
        }
        .into());
    }
    Ok(())
}

/// Pull flavour: ask every candidate for its share and keep the first `threshold`.
pub async fn collect(
    candidates: &[Endpoint],
    threshold: usize,
    request: &Message,
    quorum_timeout: Duration,
    connect_timeout: Duration,
) -> ProtocolResult<Vec<Share>> {
    check_threshold(threshold, candidates.len())?;
    let started = Instant::now();
    let deadline = started + quorum_timeout;

    let (tx, mut rx) = mpsc::channel(candidates.len().max(1));
    let mut watchers = JoinSet::new();
    for &endpoint in candidates {
        let tx = tx.clone();
        let request = request.clone();
        watchers.spawn(async move {
            let from = endpoint.addr();
            let reply = match fetch_share(endpoint, &request, connect_timeout).await {
                Ok(share) => Reply::Share { from, share },
                Err(e) => Reply::Failed {
                    from,
                    reason: e.to_string(),
                },
            };
            // The collector may already be done.
            let _ = tx.send(reply).await;
        });
    }
    drop(tx);

    let result = drain(
        QuorumState::new(threshold, candidates.len()),
        &mut rx,
        started,
        deadline,
    )
    .await;
    watchers.abort_all();
    result
}

async fn fetch_share(
    endpoint: Endpoint,
    request: &Message,
    connect_timeout: Duration,
) -> Result<Share, WireError> {
    let mut conn = Connection::connect(endpoint, connect_timeout).await?;
    conn.send(request).await?;
    conn.recv().await?.into_share()
}

/// Push flavour: a listener that shareholders deliver their shares to.
///
/// Bind it before the request goes out so no early delivery is refused.
pub struct Inbox {
    endpoint: Endpoint,
    replies: mpsc::Receiver<Reply>,
    tasks: JoinSet<()>,
}

impl Inbox {
    pub async fn bind(host: IpAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(host, 0)).await?;
        let endpoint = Endpoint::from(listener.local_addr()?);
        let (tx, replies) = mpsc::channel(64);
        let mut tasks = JoinSet::new();
        tasks.spawn(accept_deliveries(listener, tx));
        debug!("[INBOX] listening on {}", endpoint);
        Ok(Self {
            endpoint,
            replies,
            tasks,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Waits for `threshold` of the `expected` deliveries. Closes the
    /// listener and every open delivery connection on return.
    pub async fn collect(
        mut self,
        expected: usize,
        threshold: usize,
        started: Instant,
        deadline: Instant,
    ) -> ProtocolResult<Vec<Share>> {
        check_threshold(threshold, expected)?;
        let result = drain(
            QuorumState::new(threshold, expected),
            &mut self.replies,
            started,
            deadline,
        )
        .await;
        self.tasks.abort_all();
        result
    }
}

async fn accept_deliveries(listener: TcpListener, tx: mpsc::Sender<Reply>) {
    let mut readers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, from)) => {
                    let tx = tx.clone();
                    readers.spawn(async move {
                        let mut conn = Connection::new(stream, from);
                        let reply = match conn.recv().await.and_then(Message::into_share) {
                            Ok(share) => Reply::Share { from, share },
                            Err(e) => Reply::Stray { from, reason: e.to_string() },
                        };
                        let _ = tx.send(reply).await;
                    });
                }
                Err(e) => {
                    warn!("[INBOX] accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::Scalar;

    fn from() -> SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    fn share(index: u16) -> Reply {
        Reply::Share {
            from: from(),
            share: Share::new(index, Scalar::from(u64::from(index))).unwrap(),
        }
    }

    fn failed() -> Reply {
        Reply::Failed {
            from: from(),
            reason: "malformed".into(),
        }
    }

    #[test]
    fn state_moves_from_empty_to_satisfied() {
        let mut state = QuorumState::new(2, 4);
        assert!(!state.is_satisfied());
        assert_eq!(state.offer(share(3)), Progress::Accepted);
        assert_eq!(state.offer(share(1)), Progress::Satisfied);
        // Satisfied is terminal; late replies change nothing.
        assert_eq!(state.offer(share(4)), Progress::Satisfied);
        assert_eq!(state.offer(failed()), Progress::Satisfied);

        let indices: Vec<u16> = state.into_shares().iter().map(Share::index).collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn duplicates_and_failures_cost_a_candidate() {
        let mut state = QuorumState::new(3, 4);
        assert_eq!(state.offer(share(2)), Progress::Accepted);
        assert_eq!(state.offer(share(2)), Progress::Dropped);
        assert!(state.is_reachable());
        assert_eq!(state.offer(failed()), Progress::Dropped);
        assert_eq!(state.accepted(), 1);
        assert_eq!(state.pending(), 1);
        assert!(!state.is_reachable());
    }

    #[test]
    fn stray_deliveries_leave_candidates_pending() {
        let mut state = QuorumState::new(2, 2);
        let stray = Reply::Stray {
            from: from(),
            reason: "undecodable frame".into(),
        };
        assert_eq!(state.offer(stray), Progress::Dropped);
        assert_eq!(state.pending(), 2);
        assert!(state.is_reachable());
    }

    #[tokio::test]
    async fn drain_stops_at_threshold() {
        let (tx, mut rx) = mpsc::channel(8);
        for reply in [share(5), failed(), share(2), share(9), share(1)] {
            tx.send(reply).await.unwrap();
        }
        let started = Instant::now();
        let shares = drain(
            QuorumState::new(3, 5),
            &mut rx,
            started,
            started + Duration::from_secs(5),
        )
        .await
        .unwrap();

        let indices: Vec<u16> = shares.iter().map(Share::index).collect();
        assert_eq!(indices, vec![2, 5, 9]);
        // The fifth reply was never consumed.
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn drain_gives_up_when_too_many_fail() {
        let (tx, mut rx) = mpsc::channel(8);
        for reply in [share(1), failed(), failed()] {
            tx.send(reply).await.unwrap();
        }
        let started = Instant::now();
        let err = drain(
            QuorumState::new(2, 3),
            &mut rx,
            started,
            started + Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::QuorumUnreachable {
                accepted: 1,
                pending: 0,
                threshold: 2
            }
        ));
    }

    #[tokio::test]
    async fn drain_times_out_on_silence() {
        let (tx, mut rx) = mpsc::channel::<Reply>(8);
        tx.send(share(1)).await.unwrap();
        let started = Instant::now();
        let err = drain(
            QuorumState::new(2, 3),
            &mut rx,
            started,
            started + Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::QuorumTimeout {
                accepted: 1,
                threshold: 2,
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(tx);
    }

    #[tokio::test]
    async fn closed_channel_means_unreachable() {
        let (tx, mut rx) = mpsc::channel::<Reply>(8);
        tx.send(share(1)).await.unwrap();
        drop(tx);
        let started = Instant::now();
        let err = drain(
            QuorumState::new(2, 3),
            &mut rx,
            started,
            started + Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProtocolError::QuorumUnreachable { .. }));
    }

    #[tokio::test]
    async fn collect_against_dead_endpoints_fails_fast() {
        // Reserve ports, then free them so connections are refused.
        let mut dead = Vec::new();
        for _ in 0..3 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            dead.push(Endpoint::from(listener.local_addr().unwrap()));
        }
        let request = Message::Request {
            token: "pls".into(),
            callback: None,
        };
        let started = Instant::now();
        let err = collect(
            &dead,
            2,
            &request,
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProtocolError::QuorumUnreachable { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn inbox_accepts_pushed_shares() {
        let inbox = Inbox::bind("127.0.0.1".parse().unwrap()).await.unwrap();
        let endpoint = inbox.endpoint();
        for index in [4u16, 7] {
            tokio::spawn(async move {
                let mut conn = Connection::connect(endpoint, Duration::from_secs(1))
                    .await
                    .unwrap();
                let share = Share::new(index, Scalar::from(1u64)).unwrap();
                conn.send(&Message::Share { share }).await.unwrap();
            });
        }
        let started = Instant::now();
        let shares = inbox
            .collect(3, 2, started, started + Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(shares.len(), 2);
    }

    #[tokio::test]
    async fn inbox_ignores_junk_from_unknown_peers() {
        let inbox = Inbox::bind("127.0.0.1".parse().unwrap()).await.unwrap();
        let endpoint = inbox.endpoint();

        let mut junk = Connection::connect(endpoint, Duration::from_secs(1))
            .await
            .unwrap();
        junk.send_raw(b"hello\n").await.unwrap();
        drop(junk);

        for index in [1u16, 2, 3] {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let mut conn = Connection::connect(endpoint, Duration::from_secs(1))
                    .await
                    .unwrap();
                let share = Share::new(index, Scalar::from(u64::from(index))).unwrap();
                conn.send(&Message::Share { share }).await.unwrap();
            });
        }
        let started = Instant::now();
        let shares = inbox
            .collect(3, 3, started, started + Duration::from_secs(5))
            .await
            .unwrap();
        let indices: Vec<u16> = shares.iter().map(Share::index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }
}
