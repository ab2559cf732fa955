//! An OAuth2 authorization server.
//!
//! Browsers are authenticated through a chain of identity providers
//! (password, request header or an upstream OpenID Connect server), asked to
//! consent to the requested scopes, and finally issued authorize codes and
//! access tokens backed by a versioned object store.

pub mod api;
pub mod app;
pub mod authn;
pub mod config;
pub mod context;
pub mod discovery;
pub mod entity;
pub mod error;
pub mod external;
pub mod grant;
pub mod handlers;
pub mod login;
pub mod model;
pub mod oauth2;
pub mod render;
pub mod response;
pub mod retry;
pub mod scope;
pub mod selectprovider;
pub mod session;
pub mod storage;
pub mod token;
pub mod user;
