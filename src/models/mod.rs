pub mod login_log;
pub mod session;
pub mod user;

pub use login_log::*;
pub use session::*;
pub use user::*;
