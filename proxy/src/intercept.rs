use hyper::Method;
use usersync::Trigger;

pub const ORGANIZATION_USER_PATH: &str = "/organization/user";
pub const USER_APP_GRANT_PATH: &str = "/user/app/grant";

/// Matches a request against the intercepted backend routes. `path` is the rewritten path.
pub fn match_route(method: &Method, path: &str) -> Option<Trigger> {
    if method != Method::POST {
        return None;
    }
    match path {
        ORGANIZATION_USER_PATH => Some(Trigger::OrganizationUser),
        USER_APP_GRANT_PATH => Some(Trigger::UserAppGrant),
        _ => None,
    }
}
