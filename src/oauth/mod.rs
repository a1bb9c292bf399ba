//! OAuth 2.1 proxy backed by Ory Network
//!
//! The bridge never issues tokens. Authorization, token, revocation and
//! registration requests go to the authority; locally the bridge only:
//!
//! - verifies bearer tokens by introspection (RFC 7662)
//! - cross-checks the token's client against the live client list
//! - serves discovery metadata (RFC 8414, RFC 9728)

pub mod authority;
pub mod clients;
pub mod metadata;
pub mod provider;
pub mod router;
pub mod verifier;

pub use authority::{AuthorityClient, ClientRecord, IntrospectionResponse};
pub use clients::{ClientRegistry, OAuthClient};
pub use metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata};
pub use provider::{OAuthServerProvider, ProxyEndpoints, ProxyProvider};
pub use router::{AuthRouterState, auth_router};
pub use verifier::{TokenClaims, TokenVerifier};
