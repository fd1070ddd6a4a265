pub mod auth_core;
pub mod callback;
pub mod oauth2;
pub mod openid;

pub use auth_core::error::{AuthError, AuthResult, TokenCheck};
pub use auth_core::user::User;
pub use auth_core::credentials::{Credentials, TokenCredentials, UsernamePasswordCredentials};
pub use auth_core::provider::AuthenticationProvider;
pub use auth_core::password::{BCryptPasswordEncoder, BCryptVersion, PasswordEncoder};
pub use auth_core::basic::{BasicAuthenticationProvider, InMemoryUserManager, UserManager};
pub use auth_core::combine::CombineAuthenticationProvider;
pub use auth_core::http_client::{OAuthHttpClient, HttpMethod, HttpRequest, HttpResponse, HttpClientError, InMemoryHttpClient};
pub use auth_core::capability::{ChannelUserAgent, DirectExecutor, SystemBrowser, UiThreadExecutor, UserAgentLauncher};
pub use callback::{CallbackHttpServer, HttpOptions, QueryParams};
pub use oauth2::{
    AuthState, GoogleAuthenticationProvider, IntrospectionMode, JWTOptions, KeycloakAuthenticationProvider,
    MicrosoftAuthenticationProvider, OAuth2AuthenticationProvider, OAuth2Credentials, OAuth2Flow, OAuth2Options,
    PubSecKeyOptions,
};
pub use openid::{DiscoveryClient, JwtValidator};

#[cfg(feature = "reqwest")]
pub use auth_core::http_client::ReqwestHttpClient;
