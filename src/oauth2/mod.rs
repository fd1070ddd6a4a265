//! OAuth2 / OpenID Connect client: configuration, wire calls, the
//! authorization-code state machine and the provider presets.

pub mod api;
pub mod credentials;
pub mod flow;
pub mod options;
pub mod presets;
pub mod provider;

pub use credentials::OAuth2Credentials;
pub use flow::OAuth2Flow;
pub use options::{IntrospectionMode, JWTOptions, OAuth2Options, PubSecKeyOptions};
pub use presets::{GoogleAuthenticationProvider, KeycloakAuthenticationProvider, MicrosoftAuthenticationProvider};
pub use provider::{AuthState, OAuth2AuthenticationProvider};
