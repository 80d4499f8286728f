//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports from the [`secrecy`] crate. Use these for the identity signing
//! secret and for any bearer token that passes through configuration or logs.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that derives
//! `Debug` and holds one is safe to hand to `tracing`.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let secret = SecretString::from("identity-signing-key");
//! assert!(!format!("{secret:?}").contains("identity-signing-key"));
//! assert_eq!(secret.expose_secret(), "identity-signing-key");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
