// Pedantic: suppress noise for internal crate code.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

pub mod aggregate;
pub mod api;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod eligibility;
pub mod engine;
pub mod filter;
pub mod notify;
pub mod selection;
pub mod subworkflow;
pub mod types;
