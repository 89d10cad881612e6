pub mod auth;
pub mod calls;
pub mod jitsi;
