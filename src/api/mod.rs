pub mod handlers;
pub mod middleware;
pub mod rooms;
pub mod router;
pub mod signaling;
pub mod websocket;
