//! # Backoffice (admin panel backend)
//!
//! `backoffice` serves the API behind a single-page admin panel: bearer-token
//! authentication (register, login, me, logout, refresh) and CRUD for admin
//! users, roles and menus. It also ships the HTTP client the panel uses to
//! talk to that API.
//!
//! ## Tokens
//!
//! Tokens are HS256 JWTs with a TTL expressed in hours. A token moves through
//! `issued -> active -> {refreshed, revoked, expired}`. Revocation is tracked
//! server-side by `jti`; an expired token can only be exchanged through
//! `/auth/refresh` while its refresh window is open, and that exchange revokes it.
//!
//! ## Envelope
//!
//! Admin and config endpoints answer `{code, success, data}`; `code == 0` means
//! success. Errors answer `{code, message}`. A `code` of `401` tells the client
//! the session is gone and it should offer a re-login.
//!
//! ## Client
//!
//! [`client::HttpClient`] attaches bearer tokens, evaluates the envelope, maps
//! errors to UI notifications, and makes sure at most one token refresh is in
//! flight while concurrent requests wait for its result.

pub mod api;
pub mod cli;
pub mod client;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
