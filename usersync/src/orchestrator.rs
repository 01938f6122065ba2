use crate::client::{Acknowledgement, DEFAULT_SEX, ProfilePayload, SyncClient, SyncOutcome};
use crate::errors::SyncError;
use crate::event::{
    GrantEvent, GrantRequest, OrganizationUserEvent, OrganizationUserRequest, UserProfile,
    decode_json,
};
use crate::metrics_defs::{DOWNSTREAM_CALLS, MIRROR_COMMIT_ROWS, SYNC_EVENTS};
use crate::mirror::{MirrorRecord, MirrorStore};
use registry::resolver::AddressResolver;
use registry::types::{AppRowId, ResolvedApplication};
use registry::Registry;
use shared::{counter, histogram};
use std::sync::Arc;

/// Which intercepted backend route produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// `POST /organization/user`
    OrganizationUser,
    /// `POST /user/app/grant`
    UserAppGrant,
}

impl Trigger {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Trigger::OrganizationUser => "organization_user",
            Trigger::UserAppGrant => "user_app_grant",
        }
    }

    // Only the organization route hands out remote client ids
    fn propagates_client_id(&self) -> bool {
        matches!(self, Trigger::OrganizationUser)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Users whose mirror rows were replaced
    pub users: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub client_ids_learned: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.users += other.users;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.client_ids_learned += other.client_ids_learned;
    }
}

/// Runs one sync event end to end: resolve, call, commit, back-propagate.
pub struct Orchestrator {
    registry: Arc<dyn Registry>,
    resolver: AddressResolver,
    mirror: Arc<dyn MirrorStore>,
    client: SyncClient,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn Registry>,
        mirror: Arc<dyn MirrorStore>,
        client: SyncClient,
    ) -> Self {
        Orchestrator {
            resolver: AddressResolver::new(registry.clone()),
            registry,
            mirror,
            client,
        }
    }

    /// Decodes an intercepted request body and runs the matching sync.
    pub async fn handle(
        &self,
        trigger: Trigger,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<SyncReport, SyncError> {
        let result = self.dispatch(trigger, content_type, body).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        counter!(SYNC_EVENTS, "trigger" => trigger.as_str(), "result" => outcome).increment(1);

        result
    }

    async fn dispatch(
        &self,
        trigger: Trigger,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<SyncReport, SyncError> {
        match trigger {
            Trigger::OrganizationUser => {
                let request: OrganizationUserRequest = decode_json(content_type, body)?;
                self.sync_organization_user(request.try_into()?).await
            }
            Trigger::UserAppGrant => {
                let request: GrantRequest = decode_json(content_type, body)?;
                self.grant_users(request.try_into()?).await
            }
        }
    }

    pub async fn sync_organization_user(
        &self,
        event: OrganizationUserEvent,
    ) -> Result<SyncReport, SyncError> {
        if !event.sync {
            tracing::debug!(user_name = %event.profile.user_name, "Sync not requested");
            return Ok(SyncReport::default());
        }

        self.sync_user(&event.profile, &event.app_ids, Trigger::OrganizationUser)
            .await
    }

    /// Users are handled one after another. The first hard failure ends the event; users
    /// committed before it stay committed.
    pub async fn grant_users(&self, event: GrantEvent) -> Result<SyncReport, SyncError> {
        if !event.sync {
            tracing::debug!(users = event.user_ids.len(), "Sync not requested");
            return Ok(SyncReport::default());
        }

        let mut report = SyncReport::default();
        for user_id in &event.user_ids {
            let profile = UserProfile::from(self.registry.user(*user_id).await?);
            let user_report = self
                .sync_user(&profile, &event.app_ids, Trigger::UserAppGrant)
                .await?;
            report.absorb(user_report);
        }
        Ok(report)
    }

    async fn sync_user(
        &self,
        profile: &UserProfile,
        app_ids: &[AppRowId],
        trigger: Trigger,
    ) -> Result<SyncReport, SyncError> {
        // Every application must resolve before anything is sent
        let mut applications = Vec::with_capacity(app_ids.len());
        for app_id in app_ids {
            applications.push(self.resolver.resolve(*app_id).await?);
        }

        let payload = ProfilePayload::from(profile);
        let mut report = SyncReport {
            users: 1,
            ..Default::default()
        };
        let mut records = Vec::with_capacity(applications.len());
        let mut issued_client_ids = Vec::new();

        for app in &applications {
            let interpreted = match self.client.send(&app.internal_address, &payload).await {
                Ok(ack) => self.interpret(profile, app, &ack, &mut report),
                Err(e) => Err(e),
            };
            let (app_user_id, client_id) = match interpreted {
                Ok(interpreted) => interpreted,
                Err(e) => {
                    counter!(DOWNSTREAM_CALLS, "outcome" => "failed").increment(1);
                    tracing::error!(
                        user_name = %profile.user_name,
                        app_row_id = app.id,
                        error = %e,
                        "Downstream sync failed, nothing committed"
                    );
                    return Err(e);
                }
            };

            if let Some(client_id) = client_id {
                issued_client_ids.push((app.id, client_id));
            }
            records.push(mirror_record(profile, app, app_user_id));
        }

        self.mirror
            .replace_user_records(&profile.user_name, &records)
            .await?;
        histogram!(MIRROR_COMMIT_ROWS).record(records.len() as f64);

        if trigger.propagates_client_id() {
            for (app_row_id, client_id) in issued_client_ids {
                self.registry
                    .set_app_client_id(app_row_id, client_id)
                    .await?;
                tracing::info!(app_row_id, client_id, "Stored remote client id");
                report.client_ids_learned += 1;
            }
        }

        tracing::info!(
            trigger = trigger.as_str(),
            user_name = %profile.user_name,
            accepted = report.accepted,
            rejected = report.rejected,
            "Committed user sync"
        );
        Ok(report)
    }

    /// Returns the remote user id to mirror and the client id to write back.
    fn interpret(
        &self,
        profile: &UserProfile,
        app: &ResolvedApplication,
        ack: &Acknowledgement,
        report: &mut SyncReport,
    ) -> Result<(Option<u64>, Option<u64>), SyncError> {
        let protocol = |reason| SyncError::Protocol {
            endpoint: app.internal_address.clone(),
            reason,
        };
        let outcome = ack.outcome(&profile.user_name).map_err(protocol)?;
        let client_id = ack.issued_client_id().map_err(protocol)?;

        match outcome {
            SyncOutcome::Accepted { remote_user_id } => {
                counter!(DOWNSTREAM_CALLS, "outcome" => "accepted").increment(1);
                report.accepted += 1;
                Ok((Some(remote_user_id), client_id))
            }
            SyncOutcome::Rejected { code, message } => {
                counter!(DOWNSTREAM_CALLS, "outcome" => "rejected").increment(1);
                tracing::warn!(
                    user_name = %profile.user_name,
                    app_row_id = app.id,
                    code,
                    %message,
                    "Downstream application rejected user"
                );
                report.rejected += 1;
                Ok((None, client_id))
            }
        }
    }
}

fn mirror_record(
    profile: &UserProfile,
    app: &ResolvedApplication,
    app_user_id: Option<u64>,
) -> MirrorRecord {
    MirrorRecord {
        user_id: profile.user_id,
        user_name: profile.user_name.clone(),
        name: profile.name.clone(),
        gender: DEFAULT_SEX,
        mobile: profile.mobile.clone(),
        email: profile.email.clone(),
        app_id: app.app_id,
        app_address: app.internal_address.clone(),
        app_user_id,
    }
}
