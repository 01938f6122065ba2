use crate::errors::SyncError;
use crate::event::{CONTENT_TYPE_JSON, UserProfile};
use crate::metrics_defs::DOWNSTREAM_CALL_DURATION;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::histogram;
use std::time::{Duration, Instant};

/// Acknowledgement code meaning the downstream application accepted the user.
pub const ACCEPTED_CODE: i64 = 1;

/// Source data carries no gender, downstream applications get this constant.
pub const DEFAULT_SEX: i32 = 0;

/// Minimal user profile sent to a downstream application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    pub user_name: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub sex: i32,
}

impl From<&UserProfile> for ProfilePayload {
    fn from(profile: &UserProfile) -> Self {
        ProfilePayload {
            user_name: profile.user_name.clone(),
            name: profile.name.clone(),
            phone: profile.mobile.clone(),
            email: profile.email.clone(),
            sex: DEFAULT_SEX,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgedUser {
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_id: Option<RemoteId>,
}

/// Response body of a downstream sync call.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<AcknowledgedUser>>,
    #[serde(default)]
    pub client_id: Option<RemoteId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Accepted { remote_user_id: u64 },
    Rejected { code: i64, message: String },
}

impl Acknowledgement {
    /// Acceptance needs both the success code and at least one returned user. The entry
    /// matching `user_name` wins; otherwise the first one is used. Ids are only read on
    /// acceptance, where a missing or malformed one is an error.
    pub fn outcome(&self, user_name: &str) -> Result<SyncOutcome, String> {
        let data = self.data.as_deref().unwrap_or_default();
        let entry = data
            .iter()
            .find(|user| user.user_name.as_deref() == Some(user_name))
            .or_else(|| data.first());

        match entry {
            Some(user) if self.code == ACCEPTED_CODE => {
                let remote_user_id = user
                    .user_id
                    .as_ref()
                    .map(RemoteId::parse)
                    .transpose()?
                    .flatten()
                    .ok_or_else(|| "accepted user has no userId".to_string())?;
                Ok(SyncOutcome::Accepted { remote_user_id })
            }
            _ => Ok(SyncOutcome::Rejected {
                code: self.code,
                message: self.message.clone().unwrap_or_default(),
            }),
        }
    }

    /// Remote client id to write back to the registry, read only on accepted codes.
    pub fn issued_client_id(&self) -> Result<Option<u64>, String> {
        match &self.client_id {
            Some(id) if self.code == ACCEPTED_CODE => id.parse(),
            _ => Ok(None),
        }
    }
}

/// Id as sent by a downstream application: a JSON number, a numeric string, blank or null.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(serde_json::Value);

impl RemoteId {
    fn parse(&self) -> Result<Option<u64>, String> {
        match &self.0 {
            Value::Null => Ok(None),
            Value::Number(n) => n.as_u64().map(Some).ok_or_else(|| format!("invalid id {n}")),
            Value::String(text) if text.trim().is_empty() => Ok(None),
            Value::String(text) => text
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| format!("invalid id {text:?}")),
            other => Err(format!("invalid id {other}")),
        }
    }
}

/// Sends single user-sync calls to downstream applications. No retries.
#[derive(Clone, Debug)]
pub struct SyncClient {
    timeout: Duration,
}

impl SyncClient {
    pub fn new(timeout: Duration) -> Self {
        SyncClient { timeout }
    }

    pub async fn send(
        &self,
        endpoint: &str,
        profile: &ProfilePayload,
    ) -> Result<Acknowledgement, SyncError> {
        let network = |source| SyncError::Network {
            endpoint: endpoint.to_string(),
            source,
        };

        // Request-scoped client, connections to downstream applications are not pooled.
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(network)?;

        let start = Instant::now();
        let response = client
            .post(endpoint)
            .header(ACCEPT, CONTENT_TYPE_JSON)
            .json(profile)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        let body = response.bytes().await.map_err(network)?;
        histogram!(DOWNSTREAM_CALL_DURATION).record(start.elapsed().as_secs_f64());

        serde_json::from_slice(&body).map_err(|e| SyncError::Protocol {
            endpoint: endpoint.to_string(),
            reason: format!("status {status}: {e}"),
        })
    }
}
