pub mod health_handlers;
pub mod session;
pub mod tool_handlers;
