//! In-memory collaborators for tests, standing in for the Postgres-backed
//! store, queue and cron registry the same way a stub broker and a memory
//! job store would in a full deployment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use http::{StatusCode, header};

use crate::cron::{CronRegistry, validate_expr};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::http_client::{DEFAULT_TIMEOUT, HttpClient};
use crate::id;
use crate::model::{ApiKey, DashboardStats, RequestTask, TaskDraft, TaskStatus, User};
use crate::queue::{DispatchHandler, DispatchUnit, Queue};
use crate::store::{ApiKeyStore, TaskStore, UserStore, UserUpdate};

#[derive(Default)]
struct MemState {
    tasks: HashMap<i64, RequestTask>,
    users: HashMap<i64, User>,
    keys: HashMap<i64, ApiKey>,
    next_task: i64,
    next_user: i64,
    next_key: i64,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemStore {
    async fn insert_task(&self, draft: TaskDraft) -> Result<RequestTask> {
        let mut draft = draft;
        draft.validate()?;

        let mut state = self.inner.lock().unwrap();
        state.next_task += 1;
        let id = state.next_task;

        let task = RequestTask {
            id,
            user_id: draft.user_id,
            name: draft.name,
            request_url: draft.request_url,
            method: draft.method,
            header: draft.header,
            body: draft.body,
            start_time: draft.start_time,
            cron: draft.cron,
            callback_url: draft.callback_url,
            callback_token: draft.callback_token,
            message_id: None,
            job_id: None,
            cron_count: 0,
            status: TaskStatus::Pending,
            error_message: None,
        };

        state.tasks.insert(id, task.clone());

        Ok(task)
    }

    async fn task_by_id(&self, id: i64) -> Result<Option<RequestTask>> {
        Ok(self.inner.lock().unwrap().tasks.get(&id).cloned())
    }

    async fn task_for_user(&self, id: i64, user_id: i64) -> Result<Option<RequestTask>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tasks
            .get(&id)
            .filter(|task| task.user_id == user_id)
            .cloned())
    }

    async fn tasks_for_user(&self, user_id: i64) -> Result<Vec<RequestTask>> {
        let state = self.inner.lock().unwrap();
        let mut tasks: Vec<RequestTask> = state
            .tasks
            .values()
            .filter(|task| task.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.id);

        Ok(tasks)
    }

    async fn update_handles(
        &self,
        id: i64,
        message_id: Option<&str>,
        job_id: Option<&str>,
    ) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if let Some(task) = state.tasks.get_mut(&id) {
            if let Some(message_id) = message_id {
                task.message_id = Some(message_id.to_string());
            }
            if let Some(job_id) = job_id {
                task.job_id = Some(job_id.to_string());
            }
        }

        Ok(())
    }

    async fn transition(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if let Some(task) = state.tasks.get_mut(&id) {
            task.status = status;
            task.error_message = error_message.map(String::from);
        }

        Ok(())
    }

    async fn increment_cron_count(&self, id: i64) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if let Some(task) = state.tasks.get_mut(&id) {
            task.cron_count += 1;
        }

        Ok(())
    }

    async fn delete_task_for_user(&self, id: i64, user_id: i64) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        let owned = state
            .tasks
            .get(&id)
            .is_some_and(|task| task.user_id == user_id);

        if owned {
            state.tasks.remove(&id);
        }

        Ok(owned)
    }

    async fn dashboard_for_user(&self, user_id: i64) -> Result<DashboardStats> {
        let state = self.inner.lock().unwrap();
        let mut status_counts: HashMap<String, i64> = HashMap::new();
        let mut total_tasks = 0;

        for task in state.tasks.values().filter(|task| task.user_id == user_id) {
            total_tasks += 1;
            *status_counts
                .entry(task.status.as_str().to_string())
                .or_default() += 1;
        }

        Ok(DashboardStats {
            total_tasks,
            status_counts,
        })
    }
}

#[async_trait]
impl UserStore for MemStore {
    async fn insert_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        let mut state = self.inner.lock().unwrap();

        if state.users.values().any(|user| user.name == name) {
            return Err(Error::Conflict("Username already exists".to_string()));
        }
        if state.users.values().any(|user| user.email == email) {
            return Err(Error::Conflict("Email already exists".to_string()));
        }

        state.next_user += 1;
        let user = User {
            id: state.next_user,
            name: name.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            verified: false,
            register_time: Utc::now(),
            login_time: None,
        };

        state.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.inner.lock().unwrap().users.get(&id).cloned())
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|user| user.name == name)
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<User> {
        let mut state = self.inner.lock().unwrap();

        if let Some(name) = &update.name
            && state
                .users
                .values()
                .any(|user| user.id != id && &user.name == name)
        {
            return Err(Error::Conflict("Username already exists".to_string()));
        }
        if let Some(email) = &update.email
            && state
                .users
                .values()
                .any(|user| user.id != id && &user.email == email)
        {
            return Err(Error::Conflict("Email already exists".to_string()));
        }

        let user = state.users.get_mut(&id).ok_or(Error::NotFound)?;
        if let Some(name) = update.name {
            user.name = name;
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(password_hash) = update.password_hash {
            user.password_hash = password_hash;
        }

        Ok(user.clone())
    }

    async fn touch_login(&self, id: i64) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if let Some(user) = state.users.get_mut(&id) {
            user.login_time = Some(Utc::now());
        }

        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        self.inner.lock().unwrap().users.remove(&id);

        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for MemStore {
    async fn insert_api_key(
        &self,
        user_id: i64,
        name: &str,
        prefix: &str,
        key_hash: &str,
    ) -> Result<ApiKey> {
        let mut state = self.inner.lock().unwrap();
        state.next_key += 1;

        let key = ApiKey {
            id: state.next_key,
            user_id,
            name: name.to_string(),
            prefix: prefix.to_string(),
            key_hash: key_hash.to_string(),
            created_at: Utc::now(),
            expires_at: None,
            is_active: true,
        };

        state.keys.insert(key.id, key.clone());

        Ok(key)
    }

    async fn api_keys_for_user(&self, user_id: i64) -> Result<Vec<ApiKey>> {
        let state = self.inner.lock().unwrap();
        let mut keys: Vec<ApiKey> = state
            .keys
            .values()
            .filter(|key| key.user_id == user_id && key.is_active)
            .cloned()
            .collect();
        keys.sort_by_key(|key| key.id);

        Ok(keys)
    }

    async fn api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .keys
            .values()
            .filter(|key| key.prefix == prefix && key.is_active)
            .cloned()
            .collect())
    }

    async fn revoke_api_key(&self, id: i64, user_id: i64) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        match state.keys.get_mut(&id) {
            Some(key) if key.user_id == user_id && key.is_active => {
                key.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemMessage {
    pub id: String,
    pub task_id: i64,
    pub visible_at: DateTime<Utc>,
    pub claimed: bool,
    pub cancelled: bool,
    pub done: bool,
}

#[derive(Default)]
pub struct MemQueue {
    inner: Mutex<Vec<MemMessage>>,
}

impl MemQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<MemMessage> {
        self.inner.lock().unwrap().clone()
    }

    fn claim_due(&self, now: DateTime<Utc>) -> Vec<(String, DispatchUnit)> {
        let mut messages = self.inner.lock().unwrap();
        let mut claimed = Vec::new();

        for message in messages.iter_mut() {
            if !message.claimed && !message.cancelled && !message.done && message.visible_at <= now
            {
                message.claimed = true;
                claimed.push((
                    message.id.clone(),
                    DispatchUnit {
                        task_id: message.task_id,
                    },
                ));
            }
        }

        claimed
    }

    fn mark_done(&self, message_id: &str) {
        let mut messages = self.inner.lock().unwrap();
        if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
            message.done = true;
        }
    }
}

#[async_trait]
impl Queue for MemQueue {
    async fn enqueue(&self, task_id: i64) -> Result<String> {
        self.enqueue_at(task_id, Utc::now().timestamp_millis()).await
    }

    async fn enqueue_at(&self, task_id: i64, eta_epoch_ms: i64) -> Result<String> {
        let visible_at = DateTime::from_timestamp_millis(eta_epoch_ms)
            .ok_or_else(|| Error::Queue(format!("invalid eta {eta_epoch_ms}")))?;

        let message = MemMessage {
            id: id::handle(id::Handle::Message),
            task_id,
            visible_at,
            claimed: false,
            cancelled: false,
            done: false,
        };

        let message_id = message.id.clone();
        self.inner.lock().unwrap().push(message);

        Ok(message_id)
    }

    async fn cancel(&self, message_id: &str) -> Result<bool> {
        let mut messages = self.inner.lock().unwrap();
        match messages
            .iter_mut()
            .find(|m| m.id == message_id && !m.claimed && !m.cancelled && !m.done)
        {
            Some(message) => {
                message.cancelled = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume(&self, handler: Arc<dyn DispatchHandler>) -> Result<()> {
        loop {
            for (message_id, unit) in self.claim_due(Utc::now()) {
                handler.handle(unit).await;
                self.mark_done(&message_id);
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[derive(Default)]
pub struct MemCronRegistry {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl MemCronRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(job_id)
    }
}

#[async_trait]
impl CronRegistry for MemCronRegistry {
    async fn register(&self, expr: &str, task_id: i64) -> Result<String> {
        validate_expr(expr)?;

        let job_id = id::handle(id::Handle::CronJob);
        self.entries
            .lock()
            .unwrap()
            .insert(job_id.clone(), (expr.to_string(), task_id));

        Ok(job_id)
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(job_id);

        Ok(())
    }
}

/// A queue whose enqueue always fails, for exercising admission rollback
/// and cron fire bookkeeping.
pub struct FailingQueue;

#[async_trait]
impl Queue for FailingQueue {
    async fn enqueue(&self, _task_id: i64) -> Result<String> {
        Err(Error::Queue("broker unavailable".to_string()))
    }

    async fn enqueue_at(&self, _task_id: i64, _eta_epoch_ms: i64) -> Result<String> {
        Err(Error::Queue("broker unavailable".to_string()))
    }

    async fn cancel(&self, _message_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn consume(&self, _handler: Arc<dyn DispatchHandler>) -> Result<()> {
        Err(Error::Queue("broker unavailable".to_string()))
    }
}

pub struct MemEngineHarness {
    pub engine: Engine,
    pub store: Arc<MemStore>,
    pub queue: Arc<MemQueue>,
    pub cron: Arc<MemCronRegistry>,
}

pub fn mem_engine() -> MemEngineHarness {
    let store = Arc::new(MemStore::new());
    let queue = Arc::new(MemQueue::new());
    let cron = Arc::new(MemCronRegistry::new());

    let engine = Engine {
        store: store.clone(),
        queue: queue.clone(),
        cron: cron.clone(),
        http: HttpClient::new(DEFAULT_TIMEOUT).expect("http client builds"),
    };

    MemEngineHarness {
        engine,
        store,
        queue,
        cron,
    }
}

#[derive(Debug, Clone)]
pub struct StubHit {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
    pub token: Option<String>,
}

type Hits = Arc<tokio::sync::Mutex<Vec<StubHit>>>;

/// Local HTTP server capturing every request it receives. `/ok` answers
/// 200 with `{"ok":true}`, `/teapot` answers 418, anything else 200 with
/// an empty body.
pub struct StubServer {
    addr: SocketAddr,
    hits: Hits,
}

async fn record(State(hits): State<Hits>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, 1024 * 1024).await.unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

    let path = parts.uri.path().to_string();
    let token = parts
        .headers
        .get("x-callback-token")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    hits.lock().await.push(StubHit {
        method: parts.method.to_string(),
        path: path.clone(),
        body,
        token,
    });

    match path.as_str() {
        "/ok" => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            "{\"ok\":true}",
        )
            .into_response(),
        "/teapot" => (StatusCode::IM_A_TEAPOT, "short and stout").into_response(),
        _ => StatusCode::OK.into_response(),
    }
}

impl StubServer {
    pub async fn start() -> anyhow::Result<Self> {
        let hits: Hits = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let app = Router::new().fallback(record).with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, hits })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn hits(&self) -> Vec<StubHit> {
        self.hits.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission;
    use crate::api::schemas::RequestTaskCreate;
    use crate::dispatch::Dispatcher;
    use crate::model::TaskStatus;

    #[tokio::test]
    async fn queue_cancel_only_wins_before_claim() -> anyhow::Result<()> {
        let queue = MemQueue::new();

        let message_id = queue.enqueue(1).await?;
        assert!(queue.cancel(&message_id).await?);
        // A cancelled unit cannot be cancelled twice.
        assert!(!queue.cancel(&message_id).await?);

        let message_id = queue.enqueue(2).await?;
        let claimed = queue.claim_due(Utc::now());
        assert_eq!(claimed.len(), 1);
        // Claimed units are out of the cancellation window.
        assert!(!queue.cancel(&message_id).await?);

        Ok(())
    }

    #[tokio::test]
    async fn deferred_units_stay_invisible_until_eta() -> anyhow::Result<()> {
        let queue = MemQueue::new();

        let eta = Utc::now() + chrono::Duration::hours(1);
        queue.enqueue_at(7, eta.timestamp_millis()).await?;

        assert!(queue.claim_due(Utc::now()).is_empty());
        assert_eq!(queue.claim_due(eta).len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn immediate_units_claim_in_arrival_order() -> anyhow::Result<()> {
        let queue = MemQueue::new();

        queue.enqueue(1).await?;
        queue.enqueue(2).await?;
        queue.enqueue(3).await?;

        let claimed = queue.claim_due(Utc::now());
        let task_ids: Vec<i64> = claimed.iter().map(|(_, unit)| unit.task_id).collect();
        assert_eq!(task_ids, vec![1, 2, 3]);

        Ok(())
    }

    #[tokio::test]
    async fn end_to_end_deferred_dispatch_fires_exactly_once() -> anyhow::Result<()> {
        let stub = StubServer::start().await?;
        let harness = mem_engine();

        let create = RequestTaskCreate {
            name: "deferred".to_string(),
            start_time: Some(Utc::now().timestamp() as f64 + 0.8),
            header: None,
            method: None,
            request_url: stub.url("/ok"),
            callback_url: None,
            callback_token: None,
            body: None,
            cron: None,
        };

        let task = admission::create_task(&harness.engine, 1, create).await?;

        let handler = Arc::new(Dispatcher::new(
            harness.store.clone(),
            harness.engine.http.clone(),
        ));
        let queue = harness.queue.clone();
        tokio::spawn(async move {
            let _ = queue.consume(handler).await;
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(
            stub.hits().await.is_empty(),
            "nothing may fire before the eta"
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(stub.hits().await.len(), 1);

        let task = harness.store.task_by_id(task.id).await?.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        Ok(())
    }

    #[tokio::test]
    async fn admission_rolls_back_the_row_when_enqueue_fails() {
        let store = Arc::new(MemStore::new());
        let engine = Engine {
            store: store.clone(),
            queue: Arc::new(FailingQueue),
            cron: Arc::new(MemCronRegistry::new()),
            http: HttpClient::new(DEFAULT_TIMEOUT).unwrap(),
        };

        let create = RequestTaskCreate {
            name: "doomed".to_string(),
            start_time: None,
            header: None,
            method: None,
            request_url: "http://h.example/ok".to_string(),
            callback_url: None,
            callback_token: None,
            body: None,
            cron: None,
        };

        let err = admission::create_task(&engine, 1, create).await.unwrap_err();
        assert!(matches!(err, Error::Queue(_)));

        let tasks = admission::list_tasks(&engine, 1).await.unwrap();
        assert!(tasks.is_empty(), "queue failure must roll the row back");
    }

    #[tokio::test]
    async fn dashboard_reports_only_nonzero_status_counts() -> anyhow::Result<()> {
        let store = MemStore::new();

        let draft = |name: &str| TaskDraft {
            user_id: 1,
            name: name.to_string(),
            request_url: "http://h.example/ok".to_string(),
            method: "GET".to_string(),
            header: HashMap::new(),
            body: serde_json::json!({}),
            start_time: None,
            cron: None,
            callback_url: None,
            callback_token: None,
        };

        let first = store.insert_task(draft("a")).await?;
        let second = store.insert_task(draft("b")).await?;
        store.insert_task(draft("c")).await?;

        let mut foreign = draft("d");
        foreign.user_id = 2;
        store.insert_task(foreign).await?;

        store
            .transition(first.id, TaskStatus::Completed, None)
            .await?;
        store
            .transition(second.id, TaskStatus::Completed, None)
            .await?;

        let stats = store.dashboard_for_user(1).await?;

        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.status_counts.get("COMPLETED"), Some(&2));
        assert_eq!(stats.status_counts.get("PENDING"), Some(&1));
        assert_eq!(stats.status_counts.len(), 2, "zero counts are omitted");

        Ok(())
    }
}
