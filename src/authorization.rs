//! Human authorization for side effects.
//!
//! The orchestration core never performs write-side effects itself. It
//! carries an optional [`AuthorizationGate`] so an embedding caller can
//! ask for permission before, say, posting review comments.
//!
//! [`ApprovalQueue`] is the in-memory gate. Each action type maps to a
//! permission level; actions that need a human create a pending request,
//! which is resolved by [`ApprovalQueue::approve`] or
//! [`ApprovalQueue::deny`]. Waiters are woken through a watch channel, so
//! waiting never polls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default lifetime of a pending request.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ReadCode,
    AnalyzeCode,
    GenerateReport,
    PostComment,
    ModifyCode,
    ExecuteCommand,
    ExternalApiCall,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionType::ReadCode => "read_code",
            ActionType::AnalyzeCode => "analyze_code",
            ActionType::GenerateReport => "generate_report",
            ActionType::PostComment => "post_comment",
            ActionType::ModifyCode => "modify_code",
            ActionType::ExecuteCommand => "execute_command",
            ActionType::ExternalApiCall => "external_api_call",
        };
        write!(f, "{}", name)
    }
}

/// Who must sign off on an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Automatic,
    UserConfirm,
    AdminApprove,
    Forbidden,
}

impl PermissionLevel {
    pub fn needs_approval(self) -> bool {
        matches!(self, PermissionLevel::UserConfirm | PermissionLevel::AdminApprove)
    }
}

/// An action a component wants to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub description: String,
    /// What the action touches, e.g. a file path or URL.
    #[serde(default)]
    pub target: Option<String>,
}

impl Action {
    pub fn new(action_type: ActionType, description: impl Into<String>) -> Self {
        Self {
            action_type,
            description: description.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Answer to a permission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// True only for actions that may proceed right away.
    pub allowed: bool,
    pub level: PermissionLevel,
    /// Set when a human must decide; pass it to `await_decision`.
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    Expired,
}

#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    fn check_permission(&self, action: &Action) -> Result<Decision>;

    /// Wait for a human decision on a pending request.
    async fn await_decision(&self, request_id: &RequestId, timeout: Duration) -> Result<ApprovalOutcome>;
}

/// A pending request as shown to approvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub action: Action,
    pub level: PermissionLevel,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

struct PendingApproval {
    request: ApprovalRequest,
    decision: watch::Sender<Option<ApprovalOutcome>>,
}

/// In-memory authorization gate with a fixed policy table.
pub struct ApprovalQueue {
    policy: HashMap<ActionType, PermissionLevel>,
    request_ttl: Duration,
    pending: Mutex<HashMap<RequestId, PendingApproval>>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        let policy = HashMap::from([
            (ActionType::ReadCode, PermissionLevel::Automatic),
            (ActionType::AnalyzeCode, PermissionLevel::Automatic),
            (ActionType::GenerateReport, PermissionLevel::Automatic),
            (ActionType::PostComment, PermissionLevel::UserConfirm),
            (ActionType::ExternalApiCall, PermissionLevel::AdminApprove),
            (ActionType::ModifyCode, PermissionLevel::Forbidden),
            (ActionType::ExecuteCommand, PermissionLevel::Forbidden),
        ]);
        Self {
            policy,
            request_ttl: DEFAULT_REQUEST_TTL,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, action_type: ActionType, level: PermissionLevel) -> Self {
        self.policy.insert(action_type, level);
        self
    }

    pub fn with_request_ttl(mut self, ttl: Duration) -> Self {
        self.request_ttl = ttl;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, PendingApproval>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop undecided requests past their expiry. Decided requests stay
    /// until a waiter collects the outcome.
    fn prune_expired(pending: &mut HashMap<RequestId, PendingApproval>, now: DateTime<Utc>) {
        pending.retain(|id, p| {
            let keep = p.decision.borrow().is_some() || now < p.request.expires_at;
            if !keep {
                debug!(request_id = %id, "pruned expired authorization request");
            }
            keep
        });
    }

    /// Unknown action types are forbidden.
    pub fn level_for(&self, action_type: ActionType) -> PermissionLevel {
        self.policy
            .get(&action_type)
            .copied()
            .unwrap_or(PermissionLevel::Forbidden)
    }

    /// Requests still waiting for a decision, oldest first.
    pub fn pending_requests(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        let pending = self.lock();
        let mut requests: Vec<ApprovalRequest> = pending
            .values()
            .filter(|p| p.decision.borrow().is_none() && now < p.request.expires_at)
            .map(|p| p.request.clone())
            .collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    pub fn approve(&self, request_id: &RequestId) -> Result<()> {
        self.resolve(request_id, ApprovalOutcome::Approved)
    }

    pub fn deny(&self, request_id: &RequestId) -> Result<()> {
        self.resolve(request_id, ApprovalOutcome::Denied)
    }

    fn resolve(&self, request_id: &RequestId, outcome: ApprovalOutcome) -> Result<()> {
        let mut pending = self.lock();
        let entry = pending
            .get(request_id)
            .ok_or_else(|| Error::Authorization(format!("unknown request {}", request_id)))?;
        if entry.decision.borrow().is_none() && Utc::now() >= entry.request.expires_at {
            pending.remove(request_id);
            return Err(Error::Authorization(format!("request {} has expired", request_id)));
        }
        if let Some(existing) = *entry.decision.borrow() {
            return Err(Error::Authorization(format!(
                "request {} already resolved as {:?}",
                request_id, existing
            )));
        }
        entry.decision.send_replace(Some(outcome));
        info!(request_id = %request_id, outcome = ?outcome, "authorization request resolved");
        Ok(())
    }
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorizationGate for ApprovalQueue {
    fn check_permission(&self, action: &Action) -> Result<Decision> {
        let level = self.level_for(action.action_type);
        if !level.needs_approval() {
            debug!(action = %action.action_type, level = ?level, "permission checked");
            return Ok(Decision {
                allowed: level == PermissionLevel::Automatic,
                level,
                request_id: None,
            });
        }

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.request_ttl)
            .map_err(|e| Error::Authorization(format!("invalid request ttl: {}", e)))?;
        let request = ApprovalRequest {
            id: RequestId::new(),
            action: action.clone(),
            level,
            created_at: now,
            expires_at: now + ttl,
        };
        let id = request.id;
        let (decision, _) = watch::channel(None);
        {
            let mut pending = self.lock();
            Self::prune_expired(&mut pending, now);
            pending.insert(id, PendingApproval { request, decision });
        }
        info!(request_id = %id, action = %action.action_type, level = ?level, "authorization requested");

        Ok(Decision {
            allowed: false,
            level,
            request_id: Some(id),
        })
    }

    async fn await_decision(&self, request_id: &RequestId, timeout: Duration) -> Result<ApprovalOutcome> {
        let (mut rx, expires_at) = {
            let pending = self.lock();
            let entry = pending
                .get(request_id)
                .ok_or_else(|| Error::Authorization(format!("unknown request {}", request_id)))?;
            (entry.decision.subscribe(), entry.request.expires_at)
        };

        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let wait = timeout.min(remaining);

        let decided = match tokio::time::timeout(wait, rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => *value,
            Ok(Err(_)) | Err(_) => None,
        };

        match decided {
            Some(outcome) => {
                self.lock().remove(request_id);
                Ok(outcome)
            }
            None if Utc::now() >= expires_at => {
                warn!(request_id = %request_id, "authorization request expired");
                self.lock().remove(request_id);
                Ok(ApprovalOutcome::Expired)
            }
            None => {
                // the caller gave up first; the request stays open until its ttl
                debug!(request_id = %request_id, "no decision within the wait, request still pending");
                Ok(ApprovalOutcome::Expired)
            }
        }
    }
}
