pub mod chain;
pub mod login;
pub mod middleware;
pub mod providers;
pub mod session;

pub use chain::{AuthOutcome, ChainKind, SecurityChains};
pub use login::LoginClient;
pub use middleware::auth_middleware;
pub use providers::{bearer_token, AuthProvider, JwtAuthProvider};
pub use session::SessionStore;
