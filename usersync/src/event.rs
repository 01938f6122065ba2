//! Payloads of the two intercepted backend routes and their validated forms.

use crate::errors::SyncError;
use registry::types::{AppRowId, User, UserId};
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Whether an event asks for synchronization. Accepts `1`/`0` as well as `true`/`false`.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(from = "SyncFlagRepr")]
pub struct SyncFlag(bool);

impl SyncFlag {
    pub fn is_set(&self) -> bool {
        self.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SyncFlagRepr {
    Bool(bool),
    Int(i64),
}

impl From<SyncFlagRepr> for SyncFlag {
    fn from(repr: SyncFlagRepr) -> Self {
        match repr {
            SyncFlagRepr::Bool(flag) => SyncFlag(flag),
            SyncFlagRepr::Int(flag) => SyncFlag(flag == 1),
        }
    }
}

/// Body of `POST /organization/user`. Only the fields needed for sync are kept; the backend
/// receives the original body untouched.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUserRequest {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub app_id_list: Vec<String>,
    #[serde(default)]
    pub sync_flag: SyncFlag,
}

/// Body of `POST /user/app/grant`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    #[serde(default)]
    pub app_id_list: Vec<String>,
    #[serde(default)]
    pub user_id_list: Vec<String>,
    #[serde(default)]
    pub sync_flag: SyncFlag,
}

/// The user-facing fields propagated to downstream applications and mirrored locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    /// Registry id, known only when the user already exists in the registry.
    pub user_id: Option<UserId>,
    pub user_name: String,
    pub name: String,
    pub mobile: String,
    pub email: String,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        UserProfile {
            user_id: Some(user.id),
            user_name: user.user_name,
            name: user.name,
            mobile: user.mobile,
            email: user.email,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct OrganizationUserEvent {
    pub profile: UserProfile,
    pub app_ids: Vec<AppRowId>,
    pub sync: bool,
}

impl TryFrom<OrganizationUserRequest> for OrganizationUserEvent {
    type Error = SyncError;

    fn try_from(req: OrganizationUserRequest) -> Result<Self, Self::Error> {
        let sync = req.sync_flag.is_set();
        if sync && req.user_name.trim().is_empty() {
            return Err(SyncError::InvalidInput("userName is required".into()));
        }

        Ok(OrganizationUserEvent {
            app_ids: parse_ids_if(sync, "app", &req.app_id_list)?,
            profile: UserProfile {
                user_id: None,
                user_name: req.user_name,
                name: req.name,
                mobile: req.mobile,
                email: req.email,
            },
            sync,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct GrantEvent {
    pub user_ids: Vec<UserId>,
    pub app_ids: Vec<AppRowId>,
    pub sync: bool,
}

impl TryFrom<GrantRequest> for GrantEvent {
    type Error = SyncError;

    fn try_from(req: GrantRequest) -> Result<Self, Self::Error> {
        let sync = req.sync_flag.is_set();
        Ok(GrantEvent {
            user_ids: parse_ids_if(sync, "user", &req.user_id_list)?,
            app_ids: parse_ids_if(sync, "app", &req.app_id_list)?,
            sync,
        })
    }
}

/// Decodes a JSON request body after checking its declared content type.
pub fn decode_json<T: DeserializeOwned>(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<T, SyncError> {
    match content_type {
        Some(ct) if ct.contains(CONTENT_TYPE_JSON) => {}
        _ => {
            return Err(SyncError::InvalidInput(format!(
                "Content-Type must be {CONTENT_TYPE_JSON}"
            )));
        }
    }

    serde_json::from_slice(body)
        .map_err(|e| SyncError::InvalidInput(format!("failed to parse JSON: {e}")))
}

/// Ids are only validated for events that sync. Otherwise the list is dropped unread and the
/// request goes to the backend as is.
fn parse_ids_if(sync: bool, kind: &str, ids: &[String]) -> Result<Vec<u64>, SyncError> {
    if !sync {
        return Ok(Vec::new());
    }
    ids.iter()
        .map(|id| {
            id.parse::<u64>()
                .map_err(|e| SyncError::InvalidInput(format!("invalid {kind} ID {id:?}: {e}")))
        })
        .collect()
}
