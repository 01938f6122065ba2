/// Primary key of a `jos_app` row. This is the application reference carried by grant events.
pub type AppRowId = u64;
/// Primary key of a `xjr_user` row.
pub type UserId = u64;

/// One deployed application as recorded in the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Application {
    pub id: AppRowId,
    /// Owning application id, shared by every deployment of the same app.
    pub app_id: u64,
    pub publish_address_inside: Option<String>,
    pub publish_address_outside: Option<String>,
    /// Remote client id learned from a downstream acknowledgement. `None` until synced.
    pub client_id: Option<u64>,
}

impl Application {
    pub fn new<A>(id: AppRowId, app_id: u64, publish_address_inside: A) -> Self
    where
        A: Into<String>,
    {
        Application {
            id,
            app_id,
            publish_address_inside: Some(publish_address_inside.into()),
            publish_address_outside: None,
            client_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub user_name: String,
    pub name: String,
    pub mobile: String,
    pub email: String,
}

/// An application whose internal callback endpoint is known to be usable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedApplication {
    pub id: AppRowId,
    pub app_id: u64,
    pub internal_address: String,
    pub external_address: Option<String>,
    pub client_id: Option<u64>,
}
