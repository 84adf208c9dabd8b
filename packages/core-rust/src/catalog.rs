//! Well-known route patterns served by the user service.
//!
//! Callers build concrete patterns from these with
//! [`RoutePattern::expand`](crate::RoutePattern::expand) rather than by
//! string concatenation.

pub const USER_VERIFY: &str = "USER.VERIFY";
pub const USER_GET_ALL_USERS: &str = "USER.GET_ALL_USERS";
pub const USER_GET_USER: &str = "USER.GET_USER";
pub const USER_UPDATE_USER: &str = "USER.UPDATE_USER.:id";
pub const USER_CREATE_USER: &str = "USER.CREATE_USER";
pub const USER_DELETE_USER: &str = "USER.DELETE_USER";
pub const USER_GET_PROFILE: &str = "USER.GET_PROFILE";
pub const USER_UPDATE_PROFILE: &str = "USER.UPDATE_PROFILE.:id";
pub const USER_DELETE_ACCOUNT: &str = "USER.DELETE_ACCOUNT";
pub const USER_GET_ROLE_PERMISSIONS: &str = "USER.GET_ROLE_PERMISSIONS";

pub const ROLE_GET_ALL_ROLES: &str = "ROLE.GET_ALL_ROLES";
pub const ROLE_GET_ROLE: &str = "ROLE.GET_ROLE";
pub const ROLE_GET_PERMISSION_BY_ROLE: &str = "ROLE.GET_PERMISSION_BY_ROLE.:id";

/// Every pattern above, in the order the user service registers them.
pub const ALL: &[&str] = &[
    USER_VERIFY,
    USER_GET_ALL_USERS,
    USER_GET_USER,
    USER_UPDATE_USER,
    USER_CREATE_USER,
    USER_DELETE_USER,
    USER_GET_PROFILE,
    USER_UPDATE_PROFILE,
    USER_DELETE_ACCOUNT,
    USER_GET_ROLE_PERMISSIONS,
    ROLE_GET_ALL_ROLES,
    ROLE_GET_ROLE,
    ROLE_GET_PERMISSION_BY_ROLE,
];
