pub mod credentials;
pub mod memory;
pub mod model;
pub mod password;
pub mod repo;
mod repo_types;
pub mod services;

pub use credentials::{CredentialError, CredentialState, Credentials, HashPolicy};
pub use model::{FieldViolation, NewUser, User};
pub use password::{Argon2Hashing, HashingError, PasswordHashing, Salt};
pub use repo::{PgUserStore, StoreError, UserStore};
pub use services::{PendingSave, UserError, UserService};
