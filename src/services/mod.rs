pub mod audit;
pub mod auth;
pub mod handshake;
pub mod session_store;

pub use audit::AuditService;
pub use auth::AuthService;
pub use handshake::HandshakeService;
pub use session_store::SessionStore;
