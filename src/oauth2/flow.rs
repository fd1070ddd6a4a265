use std::fmt;

use serde::{Deserialize, Serialize};

/// OAuth2 grant flows, each tied to the `grant_type` it sends to the token endpoint.
///
/// PKCE is not a flow of its own: it is a property of [`OAuth2Flow::AuthCode`]
/// switched on through `OAuth2Options::pkce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OAuth2Flow {
    #[default]
    AuthCode,
    Implicit,
    Password,
    Client,
    AuthJwt,
}

impl OAuth2Flow {
    pub const ALL: [OAuth2Flow; 5] = [
        OAuth2Flow::AuthCode,
        OAuth2Flow::Implicit,
        OAuth2Flow::Password,
        OAuth2Flow::Client,
        OAuth2Flow::AuthJwt,
    ];

    pub fn grant_type(&self) -> &'static str {
        match self {
            OAuth2Flow::AuthCode => "authorization_code",
            OAuth2Flow::Implicit => "implicit",
            OAuth2Flow::Password => "password",
            OAuth2Flow::Client => "client_credentials",
            OAuth2Flow::AuthJwt => "urn:ietf:params:oauth:grant-type:jwt-bearer",
        }
    }

    /// Upper-case variant name, e.g. `AUTH_CODE`.
    pub fn name(&self) -> &'static str {
        match self {
            OAuth2Flow::AuthCode => "AUTH_CODE",
            OAuth2Flow::Implicit => "IMPLICIT",
            OAuth2Flow::Password => "PASSWORD",
            OAuth2Flow::Client => "CLIENT",
            OAuth2Flow::AuthJwt => "AUTH_JWT",
        }
    }

    /// Looks a flow up by its grant type. Unknown grant types yield `None`.
    pub fn get_flow(grant_type: &str) -> Option<OAuth2Flow> {
        Self::ALL.into_iter().find(|flow| flow.grant_type() == grant_type)
    }
}

impl fmt::Display for OAuth2Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name(), self.grant_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_type_lookup_round_trips() {
        for flow in OAuth2Flow::ALL {
            assert_eq!(OAuth2Flow::get_flow(flow.grant_type()), Some(flow));
        }
    }

    #[test]
    fn unknown_grant_types_do_not_match() {
        assert_eq!(OAuth2Flow::get_flow(""), None);
        assert_eq!(OAuth2Flow::get_flow("grant_type"), None);
    }

    #[test]
    fn display_names_flow_and_grant() {
        for flow in OAuth2Flow::ALL {
            assert_eq!(flow.to_string(), format!("{} [{}]", flow.name(), flow.grant_type()));
        }
        assert_eq!(OAuth2Flow::Client.to_string(), "CLIENT [client_credentials]");
    }
}
