//! OAuth2 provider implementations
//!
//! - Azure AD v1 (Microsoft Graph)
//! - LinkedIn
//! - Generic provider with configured endpoints
//!
//! All providers use a shared `BaseOAuthProvider` to eliminate code duplication.

pub mod azure_ad;
pub mod base;
pub mod generic;
pub mod linkedin;

pub use azure_ad::AzureAdProvider;
pub use base::{BaseOAuthProvider, ClientRegistration, ProviderEndpoints};
pub use generic::GenericProvider;
pub use linkedin::LinkedInProvider;
