pub mod health;
pub mod queue;
pub mod websocket;
