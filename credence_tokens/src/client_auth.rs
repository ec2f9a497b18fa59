//! How a client proves its identity to a token endpoint

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{provider::CredentialProvider, ClientIdRef, ClientSecret, Error};

/// The `client_assertion_type` for a JWT bearer client assertion (RFC 7523)
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// The kind of client authentication in use
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthKind {
    /// A shared client secret
    ClientSecret,
    /// A federated identity token presented as a client assertion
    Federated,
}

/// Credentials a client presents alongside a token request
#[derive(Clone)]
pub enum ClientAuthentication {
    /// Authenticate with a shared secret (`client_secret_post`)
    ClientSecret(ClientSecret),
    /// Authenticate with a federated token presented as a JWT bearer
    /// assertion
    Federated(Arc<dyn CredentialProvider>),
}

impl ClientAuthentication {
    /// The kind of client authentication
    pub fn kind(&self) -> AuthKind {
        match self {
            Self::ClientSecret(_) => AuthKind::ClientSecret,
            Self::Federated(_) => AuthKind::Federated,
        }
    }

    /// The request parameters that authenticate `client_id`
    ///
    /// For federated authentication this obtains the current federated
    /// credential, refreshing it if necessary.
    pub async fn params(
        &self,
        client_id: &ClientIdRef,
    ) -> Result<BTreeMap<&'static str, String>, Error> {
        let mut params = BTreeMap::new();
        params.insert("client_id", client_id.as_str().to_owned());

        match self {
            Self::ClientSecret(secret) => {
                params.insert("client_secret", secret.as_str().to_owned());
            }
            Self::Federated(provider) => {
                let assertion = provider.get_credential().await?;
                params.insert(
                    "client_assertion_type",
                    JWT_BEARER_ASSERTION_TYPE.to_owned(),
                );
                params.insert("client_assertion", assertion.value().as_str().to_owned());
            }
        }

        Ok(params)
    }
}

impl From<ClientSecret> for ClientAuthentication {
    fn from(secret: ClientSecret) -> Self {
        Self::ClientSecret(secret)
    }
}

impl fmt::Debug for ClientAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ClientSecret(secret) => f.debug_tuple("ClientSecret").field(secret).finish(),
            Self::Federated(_) => f.debug_tuple("Federated").finish_non_exhaustive(),
        }
    }
}
