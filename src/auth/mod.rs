//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! POST /api/auth/login:
//!     → users.rs (lookup by email)
//!     → password.rs (bcrypt verify off the async runtime)
//!     → jwt.rs (access token in body, refresh token in signed cookie)
//!     → session.rs (server-side session, signed cookie)
//!
//! Protected routes:
//!     → extractor.rs (Bearer access token → Claims, role checks)
//! ```
//!
//! # Design Decisions
//! - Access tokens never live in cookies
//! - No token revocation list; logout drops the session and the cookies

pub mod extractor;
pub mod jwt;
pub mod password;
pub mod session;
pub mod users;

pub use extractor::{require_role, AuthUser};
pub use jwt::{Claims, TokenIssuer, TokenKind};
pub use password::{check_password_policy, hash_password, verify_password};
pub use session::SessionStore;
pub use users::{InMemoryUserStore, User, UserStore};
