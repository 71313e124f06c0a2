//! The session manager: one mutex, short critical sections.
//!
//! The hot path (event ingestion → fan-out) takes a [`FanoutTargets`]
//! snapshot and releases the lock before anything awaits. Wrapper
//! long-polls block outside the lock on a per-session `Notify`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use tg_core::address::{ChatId, UserId};

use crate::error::{Result, SessionError};
use crate::types::{
    BackgroundJobRecord, ControlAction, FanoutTargets, JobStatus, PendingFlow, ReapedSession,
    RemoteSession, SessionSummary,
};

/// Background-job tables are bounded per session.
const JOB_TABLE_CAP: usize = 200;

struct Record {
    session: RemoteSession,
    input_queue: VecDeque<String>,
    control: Option<ControlAction>,
    last_seen: Instant,
    jobs: HashMap<String, BackgroundJobRecord>,
    job_order: VecDeque<String>,
    notify: Arc<Notify>,
}

impl Record {
    fn new(session: RemoteSession) -> Self {
        Self {
            session,
            input_queue: VecDeque::new(),
            control: None,
            last_seen: Instant::now(),
            jobs: HashMap::new(),
            job_order: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Record>,
    /// chat → session id. At most one session per chat (I3).
    attachments: HashMap<ChatId, String>,
    /// session id → subscribed group/topic chats.
    group_subs: HashMap<String, Vec<ChatId>>,
    /// poll id → waiting interactive flow.
    flows: HashMap<String, PendingFlow>,
    /// (session, chat, user) → file mentions consumed by the next input.
    pending_mentions: HashMap<(String, String, String), Vec<String>>,
}

/// Thread-safe in-memory registry of remote sessions.
pub struct SessionManager {
    inner: Mutex<Inner>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_sessions,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register a session. Idempotent on `existing_id`: when the id is
    /// already known the stored record is returned unchanged, which is what
    /// crash recovery relies on.
    pub fn register_remote(
        &self,
        command: Vec<String>,
        chat_id: ChatId,
        owner_user_id: UserId,
        cwd: String,
        existing_id: Option<&str>,
    ) -> Result<RemoteSession> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(id) = existing_id {
            if let Some(record) = inner.sessions.get_mut(id) {
                record.last_seen = Instant::now();
                debug!(session = %id, "register_remote: existing id, returning record");
                return Ok(record.session.clone());
            }
        }

        if inner.sessions.len() >= self.max_sessions {
            return Err(SessionError::LimitReached {
                max: self.max_sessions,
            });
        }

        let id = existing_id
            .map(str::to_string)
            .unwrap_or_else(RemoteSession::new_id);
        let session = RemoteSession {
            id: id.clone(),
            command,
            cwd,
            chat_id,
            owner_user_id,
            registered_at: chrono::Utc::now().to_rfc3339(),
        };
        inner.sessions.insert(id.clone(), Record::new(session.clone()));
        info!(session = %id, "registered remote session");
        Ok(session)
    }

    /// Remove a session after its wrapper exited. Detaches chats and drops
    /// flows and pending mentions. Returns the chats that were attached.
    pub fn end_remote(&self, id: &str) -> Option<ReapedSession> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.sessions.remove(id)?;
        record.notify.notify_waiters();
        let attached_chats = cleanup_session(&mut inner, id);
        info!(session = %id, "remote session ended");
        Some(ReapedSession {
            session: record.session,
            attached_chats,
        })
    }

    /// Remove sessions whose wrapper has not long-polled within `max_age`.
    pub fn reap_stale_remotes(&self, max_age: Duration) -> Vec<ReapedSession> {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, r)| r.last_seen.elapsed() > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        let mut reaped = Vec::new();
        for id in stale {
            if let Some(record) = inner.sessions.remove(&id) {
                record.notify.notify_waiters();
                let attached_chats = cleanup_session(&mut inner, &id);
                warn!(session = %id, "reaped stale remote session");
                reaped.push(ReapedSession {
                    session: record.session,
                    attached_chats,
                });
            }
        }
        reaped
    }

    pub fn get(&self, id: &str) -> Option<RemoteSession> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.get(id).map(|r| r.session.clone())
    }

    pub fn exists(&self, id: &str) -> bool {
        self.inner.lock().unwrap().sessions.contains_key(id)
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<SessionSummary> = inner
            .sessions
            .values()
            .map(|r| SessionSummary {
                id: r.session.id.clone(),
                command: r.session.command.clone(),
                cwd: r.session.cwd.clone(),
                bound_chat: bound_chat_of(&inner, &r.session),
                queued_input: r.input_queue.len(),
                idle_secs: r.last_seen.elapsed().as_secs(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Sessions owned by `user`, for the router's sole-session fallback.
    pub fn sessions_owned_by(&self, user: &UserId) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<String> = inner
            .sessions
            .values()
            .filter(|r| &r.session.owner_user_id == user)
            .map(|r| r.session.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Only the owner may drive a session.
    pub fn can_user_access_session(&self, user: &UserId, session_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(session_id)
            .map(|r| &r.session.owner_user_id == user)
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Attachments & subscriptions
    // -----------------------------------------------------------------------

    /// Attach `chat_id` to `session_id`. Fails when the session is unknown.
    /// The chat is detached from any prior session and removed from every
    /// other session's group-subscription set (I3).
    pub fn attach(&self, chat_id: &ChatId, session_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.contains_key(session_id) {
            return false;
        }
        for (sid, subs) in inner.group_subs.iter_mut() {
            if sid != session_id {
                subs.retain(|c| c != chat_id);
            }
        }
        inner.attachments.insert(chat_id.clone(), session_id.to_string());
        debug!(chat = %chat_id, session = %session_id, "attached chat");
        true
    }

    /// Remove the chat's attachment and group-subscription membership.
    pub fn detach(&self, chat_id: &ChatId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let had = inner.attachments.remove(chat_id).is_some();
        for subs in inner.group_subs.values_mut() {
            subs.retain(|c| c != chat_id);
        }
        had
    }

    /// Session attached to this chat, if any.
    pub fn session_for_chat(&self, chat_id: &ChatId) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.attachments.get(chat_id).cloned()
    }

    /// The primary reply target for a session. Non-DM chats supersede the
    /// owner DM when both are attached.
    pub fn get_bound_chat(&self, session_id: &str) -> Option<ChatId> {
        let inner = self.inner.lock().unwrap();
        let session = &inner.sessions.get(session_id)?.session;
        bound_chat_of(&inner, session)
    }

    pub fn subscribe_group(&self, session_id: &str, chat_id: &ChatId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.contains_key(session_id) {
            return false;
        }
        let subs = inner.group_subs.entry(session_id.to_string()).or_default();
        if !subs.contains(chat_id) {
            subs.push(chat_id.clone());
        }
        true
    }

    pub fn unsubscribe_group(&self, session_id: &str, chat_id: &ChatId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.group_subs.get_mut(session_id) {
            Some(subs) => {
                let before = subs.len();
                subs.retain(|c| c != chat_id);
                subs.len() != before
            }
            None => false,
        }
    }

    pub fn subscribed_groups(&self, session_id: &str) -> Vec<ChatId> {
        let inner = self.inner.lock().unwrap();
        inner.group_subs.get(session_id).cloned().unwrap_or_default()
    }

    /// Snapshot of bound chat + subscribed groups for fan-out.
    pub fn fanout_targets(&self, session_id: &str) -> Option<FanoutTargets> {
        let inner = self.inner.lock().unwrap();
        let session = &inner.sessions.get(session_id)?.session;
        Some(FanoutTargets {
            bound: bound_chat_of(&inner, session),
            groups: inner
                .group_subs
                .get(session_id)
                .cloned()
                .unwrap_or_default(),
        })
    }

    // -----------------------------------------------------------------------
    // Input queue & control actions
    // -----------------------------------------------------------------------

    /// Queue an input line for the wrapper. FIFO delivery.
    pub fn queue_input(&self, session_id: &str, line: String) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get_mut(session_id) {
            Some(record) => {
                record.input_queue.push_back(line);
                record.notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Merge a control action (see [`ControlAction::merge`]).
    pub fn request_control(&self, session_id: &str, action: ControlAction) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get_mut(session_id) {
            Some(record) => {
                record.control = Some(ControlAction::merge(record.control.take(), action));
                record.notify.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn request_remote_stop(&self, session_id: &str) -> bool {
        self.request_control(session_id, ControlAction::Stop)
    }

    pub fn request_remote_kill(&self, session_id: &str) -> bool {
        self.request_control(session_id, ControlAction::Kill)
    }

    pub fn request_remote_resume(&self, session_id: &str, session_ref: String) -> bool {
        self.request_control(session_id, ControlAction::Resume { session_ref })
    }

    /// Drain all queued input. `None` means the session is unknown — the
    /// HTTP layer turns that into `{unknown:true}`. Updates `lastSeenAt`.
    pub fn drain_remote_input(&self, session_id: &str) -> Option<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.sessions.get_mut(session_id)?;
        record.last_seen = Instant::now();
        Some(record.input_queue.drain(..).collect())
    }

    /// Atomically take the pending control action (I5). Updates
    /// `lastSeenAt`. Outer `None` means the session is unknown.
    pub fn drain_remote_control(&self, session_id: &str) -> Option<Option<ControlAction>> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.sessions.get_mut(session_id)?;
        record.last_seen = Instant::now();
        Some(record.control.take())
    }

    /// True when the wrapper has something to pick up.
    pub fn has_pending_work(&self, session_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(session_id)
            .map(|r| !r.input_queue.is_empty() || r.control.is_some())
            .unwrap_or(false)
    }

    /// The per-session wakeup used by the server-side long-poll.
    pub fn input_notify(&self, session_id: &str) -> Option<Arc<Notify>> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.get(session_id).map(|r| Arc::clone(&r.notify))
    }

    // -----------------------------------------------------------------------
    // Pending interactive flows
    // -----------------------------------------------------------------------

    pub fn put_flow(&self, poll_id: String, flow: PendingFlow) {
        let mut inner = self.inner.lock().unwrap();
        inner.flows.insert(poll_id, flow);
    }

    pub fn take_flow(&self, poll_id: &str) -> Option<PendingFlow> {
        let mut inner = self.inner.lock().unwrap();
        inner.flows.remove(poll_id)
    }

    pub fn peek_flow(&self, poll_id: &str) -> Option<PendingFlow> {
        let inner = self.inner.lock().unwrap();
        inner.flows.get(poll_id).cloned()
    }

    /// The open approval poll for a session, if one exists:
    /// `(poll_id, chat_id, message_id)`.
    pub fn open_approval_poll(&self, session_id: &str) -> Option<(String, ChatId, String)> {
        let inner = self.inner.lock().unwrap();
        inner.flows.iter().find_map(|(poll_id, flow)| match flow {
            PendingFlow::ApprovalPoll {
                session_id: sid,
                chat_id,
                message_id,
                ..
            } if sid == session_id => {
                Some((poll_id.clone(), chat_id.clone(), message_id.clone()))
            }
            _ => None,
        })
    }

    // -----------------------------------------------------------------------
    // Pending file mentions
    // -----------------------------------------------------------------------

    pub fn set_pending_file_mentions(
        &self,
        session_id: &str,
        chat_id: &ChatId,
        user_id: &UserId,
        mentions: Vec<String>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending_mentions.insert(
            (
                session_id.to_string(),
                chat_id.as_str().to_string(),
                user_id.as_str().to_string(),
            ),
            mentions,
        );
    }

    /// Take the mentions staged for `(session, chat, user)` — consumed by
    /// the next plain-text input from that user in that chat.
    pub fn consume_pending_file_mentions(
        &self,
        session_id: &str,
        chat_id: &ChatId,
        user_id: &UserId,
    ) -> Option<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.pending_mentions.remove(&(
            session_id.to_string(),
            chat_id.as_str().to_string(),
            user_id.as_str().to_string(),
        ))
    }

    // -----------------------------------------------------------------------
    // Background jobs
    // -----------------------------------------------------------------------

    /// Upsert a job record. New URLs and a command observed later are merged
    /// into an existing record rather than clobbering it.
    pub fn update_background_job(
        &self,
        session_id: &str,
        task_id: &str,
        status: JobStatus,
        command: Option<String>,
        urls: Vec<String>,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.sessions.get_mut(session_id) else {
            return false;
        };

        let now = chrono::Utc::now().to_rfc3339();
        if let Some(job) = record.jobs.get_mut(task_id) {
            job.status = status;
            job.updated_at = now;
            if job.command.is_none() {
                job.command = command;
            }
            for url in urls {
                if !job.urls.contains(&url) && job.urls.len() < 3 {
                    job.urls.push(url);
                }
            }
            return true;
        }

        if record.jobs.len() >= JOB_TABLE_CAP {
            if let Some(evicted) = record.job_order.pop_front() {
                record.jobs.remove(&evicted);
            }
        }
        record.job_order.push_back(task_id.to_string());
        record.jobs.insert(
            task_id.to_string(),
            BackgroundJobRecord {
                task_id: task_id.to_string(),
                status,
                command,
                urls: urls.into_iter().take(3).collect(),
                updated_at: now,
            },
        );
        true
    }

    /// Jobs for one session, insertion order.
    pub fn background_jobs(&self, session_id: &str) -> Vec<BackgroundJobRecord> {
        let inner = self.inner.lock().unwrap();
        let Some(record) = inner.sessions.get(session_id) else {
            return Vec::new();
        };
        record
            .job_order
            .iter()
            .filter_map(|id| record.jobs.get(id).cloned())
            .collect()
    }

    /// Jobs across sessions, optionally filtered by session cwd.
    pub fn all_background_jobs(&self, cwd: Option<&str>) -> Vec<(String, BackgroundJobRecord)> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for record in inner.sessions.values() {
            if let Some(cwd) = cwd {
                if record.session.cwd != cwd {
                    continue;
                }
            }
            for id in &record.job_order {
                if let Some(job) = record.jobs.get(id) {
                    out.push((record.session.id.clone(), job.clone()));
                }
            }
        }
        out
    }

    /// Jobs still in `running` state for one session, for the status board.
    pub fn running_jobs(&self, session_id: &str) -> Vec<BackgroundJobRecord> {
        self.background_jobs(session_id)
            .into_iter()
            .filter(|j| j.status == JobStatus::Running)
            .collect()
    }
}

/// Drop everything keyed by a session that no longer exists. Returns the
/// chats that were attached.
fn cleanup_session(inner: &mut Inner, session_id: &str) -> Vec<ChatId> {
    let attached: Vec<ChatId> = inner
        .attachments
        .iter()
        .filter(|(_, sid)| sid.as_str() == session_id)
        .map(|(chat, _)| chat.clone())
        .collect();
    for chat in &attached {
        inner.attachments.remove(chat);
    }
    inner.group_subs.remove(session_id);
    inner
        .flows
        .retain(|_, flow| flow.session_id() != Some(session_id));
    inner
        .pending_mentions
        .retain(|(sid, _, _), _| sid != session_id);
    attached
}

/// Resolve the reply target: any attached non-DM chat beats the owner DM.
fn bound_chat_of(inner: &Inner, session: &RemoteSession) -> Option<ChatId> {
    let mut dm: Option<ChatId> = None;
    let mut non_dm: Option<ChatId> = None;
    for (chat, sid) in &inner.attachments {
        if sid != &session.id {
            continue;
        }
        if chat == &session.chat_id {
            dm = Some(chat.clone());
        } else {
            non_dm = Some(chat.clone());
        }
    }
    non_dm.or(dm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> SessionManager {
        SessionManager::new(16)
    }

    fn register(m: &SessionManager, dm: &str) -> RemoteSession {
        m.register_remote(
            vec!["claude".into(), "--continue".into()],
            ChatId::new(dm),
            UserId::new("telegram:42"),
            "/work/repo".into(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn register_is_idempotent_on_existing_id() {
        let m = mgr();
        let s1 = register(&m, "telegram:42");
        let s2 = m
            .register_remote(
                vec!["other".into()],
                ChatId::new("telegram:999"),
                UserId::new("telegram:999"),
                "/elsewhere".into(),
                Some(&s1.id),
            )
            .unwrap();
        // The existing record wins — command/cwd/owner unchanged.
        assert_eq!(s2.command, s1.command);
        assert_eq!(s2.cwd, s1.cwd);
        assert_eq!(s2.owner_user_id, s1.owner_user_id);
    }

    #[test]
    fn attach_is_exclusive_per_chat() {
        // After attaching a chat to a second session, the first no longer
        // maps it.
        let m = mgr();
        let s1 = register(&m, "telegram:42");
        let s2 = register(&m, "telegram:42");
        let chat = ChatId::new("telegram:-100777");

        assert!(m.attach(&chat, &s1.id));
        assert!(m.attach(&chat, &s2.id));
        assert_eq!(m.session_for_chat(&chat), Some(s2.id.clone()));
        assert_eq!(m.get_bound_chat(&s1.id), None);
    }

    #[test]
    fn attach_unknown_session_fails() {
        let m = mgr();
        assert!(!m.attach(&ChatId::new("telegram:1"), "r-ffffffffffffffff"));
    }

    #[test]
    fn attach_removes_chat_from_other_group_subs() {
        let m = mgr();
        let s1 = register(&m, "telegram:42");
        let s2 = register(&m, "telegram:42");
        let group = ChatId::new("telegram:-100123");

        m.subscribe_group(&s1.id, &group);
        assert!(m.attach(&group, &s2.id));
        assert!(m.subscribed_groups(&s1.id).is_empty());
    }

    #[test]
    fn non_dm_supersedes_owner_dm() {
        // A non-DM attachment wins regardless of DM attachment.
        let m = mgr();
        let s = register(&m, "telegram:42");
        let dm = ChatId::new("telegram:42");
        let group = ChatId::new("telegram:-100555:9");

        m.attach(&dm, &s.id);
        assert_eq!(m.get_bound_chat(&s.id), Some(dm.clone()));

        // Attaching a topic moves the DM binding aside... but I3 says one
        // session per chat, not one chat per session — both stay attached.
        let s_id = s.id.clone();
        m.attach(&group, &s_id);
        assert_eq!(m.get_bound_chat(&s_id), Some(group));
    }

    #[test]
    fn control_merge_order_is_deterministic() {
        // stop, resume and kill merged in any order drain to the resume.
        let m = mgr();
        let s = register(&m, "telegram:42");
        m.request_remote_stop(&s.id);
        m.request_remote_resume(&s.id, "R".into());
        m.request_remote_kill(&s.id);

        let drained = m.drain_remote_control(&s.id).unwrap();
        assert_eq!(
            drained,
            Some(ControlAction::Resume { session_ref: "R".into() })
        );
    }

    #[test]
    fn drains_are_idempotent() {
        // An immediate second drain returns empty / none.
        let m = mgr();
        let s = register(&m, "telegram:42");
        m.queue_input(&s.id, "hello".into());
        m.request_remote_kill(&s.id);

        assert_eq!(m.drain_remote_input(&s.id).unwrap(), vec!["hello"]);
        assert!(m.drain_remote_input(&s.id).unwrap().is_empty());
        assert_eq!(m.drain_remote_control(&s.id).unwrap(), Some(ControlAction::Kill));
        assert_eq!(m.drain_remote_control(&s.id).unwrap(), None);
    }

    #[test]
    fn input_is_fifo() {
        let m = mgr();
        let s = register(&m, "telegram:42");
        m.queue_input(&s.id, "one".into());
        m.queue_input(&s.id, "POLL:2:false".into());
        m.queue_input(&s.id, "three".into());
        assert_eq!(
            m.drain_remote_input(&s.id).unwrap(),
            vec!["one", "POLL:2:false", "three"]
        );
    }

    #[test]
    fn drain_unknown_session_returns_none() {
        let m = mgr();
        assert!(m.drain_remote_input("r-0000000000000000").is_none());
        assert!(m.drain_remote_control("r-0000000000000000").is_none());
    }

    #[test]
    fn only_owner_can_access() {
        let m = mgr();
        let s = register(&m, "telegram:42");
        assert!(m.can_user_access_session(&UserId::new("telegram:42"), &s.id));
        assert!(!m.can_user_access_session(&UserId::new("telegram:43"), &s.id));
    }

    #[test]
    fn reap_detaches_and_clears() {
        let m = mgr();
        let s = register(&m, "telegram:42");
        let chat = ChatId::new("telegram:-100321");
        m.attach(&chat, &s.id);
        m.set_pending_file_mentions(
            &s.id,
            &chat,
            &UserId::new("telegram:42"),
            vec!["src/main.rs".into()],
        );
        m.put_flow(
            "poll-1".into(),
            PendingFlow::ApprovalPoll {
                session_id: s.id.clone(),
                chat_id: chat.clone(),
                options: vec!["Yes".into(), "No".into()],
                multi: false,
                message_id: "m1".into(),
            },
        );

        let reaped = m.reap_stale_remotes(Duration::from_secs(0));
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].attached_chats, vec![chat.clone()]);
        assert!(m.session_for_chat(&chat).is_none());
        assert!(m.take_flow("poll-1").is_none());
        assert!(m
            .consume_pending_file_mentions(&s.id, &chat, &UserId::new("telegram:42"))
            .is_none());
    }

    #[test]
    fn recent_poll_does_not_reap_session() {
        let m = mgr();
        let s = register(&m, "telegram:42");
        // drain updates last_seen
        m.drain_remote_input(&s.id);
        let reaped = m.reap_stale_remotes(Duration::from_secs(3600));
        assert!(reaped.is_empty());
        assert!(m.exists(&s.id));
    }

    #[test]
    fn mentions_keyed_by_triple() {
        let m = mgr();
        let s = register(&m, "telegram:42");
        let chat = ChatId::new("telegram:42");
        let alice = UserId::new("telegram:42");
        let bob = UserId::new("telegram:77");

        m.set_pending_file_mentions(&s.id, &chat, &alice, vec!["a.rs".into()]);
        assert!(m.consume_pending_file_mentions(&s.id, &chat, &bob).is_none());
        assert_eq!(
            m.consume_pending_file_mentions(&s.id, &chat, &alice),
            Some(vec!["a.rs".into()])
        );
    }

    #[test]
    fn job_table_merges_and_caps() {
        let m = mgr();
        let s = register(&m, "telegram:42");
        m.update_background_job(
            &s.id,
            "task-1",
            JobStatus::Running,
            Some("npm run dev".into()),
            vec!["http://localhost:3000".into()],
        );
        m.update_background_job(&s.id, "task-1", JobStatus::Completed, None, vec![]);

        let jobs = m.background_jobs(&s.id);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].command.as_deref(), Some("npm run dev"));
        assert_eq!(jobs[0].urls, vec!["http://localhost:3000"]);

        for i in 0..JOB_TABLE_CAP + 5 {
            m.update_background_job(&s.id, &format!("bulk-{i}"), JobStatus::Running, None, vec![]);
        }
        assert!(m.background_jobs(&s.id).len() <= JOB_TABLE_CAP);
    }

    #[test]
    fn open_approval_poll_lookup() {
        let m = mgr();
        let s = register(&m, "telegram:42");
        let chat = ChatId::new("telegram:42");
        m.put_flow(
            "p-9".into(),
            PendingFlow::ApprovalPoll {
                session_id: s.id.clone(),
                chat_id: chat.clone(),
                options: vec!["Yes".into()],
                multi: false,
                message_id: "m-3".into(),
            },
        );
        let (poll_id, poll_chat, message_id) = m.open_approval_poll(&s.id).unwrap();
        assert_eq!(poll_id, "p-9");
        assert_eq!(poll_chat, chat);
        assert_eq!(message_id, "m-3");
        assert!(m.open_approval_poll("r-1111111111111111").is_none());
    }

    #[test]
    fn session_limit_enforced() {
        let m = SessionManager::new(1);
        register(&m, "telegram:42");
        let err = m.register_remote(
            vec!["codex".into()],
            ChatId::new("telegram:42"),
            UserId::new("telegram:42"),
            "/tmp".into(),
            None,
        );
        assert!(matches!(err, Err(SessionError::LimitReached { max: 1 })));
    }
}
