use std::marker::PhantomData;

use async_trait::async_trait;
use thiserror::Error;

use super::{
    dto::{RefreshGrantForm, TokenResponse},
    RefreshGrant,
};
use crate::{client_auth::ClientAuthentication, ClientId, RefreshTokenRef, ScopeRef};

/// A refresh token grant performed against an OAuth2 token endpoint
#[derive(Debug)]
pub struct HttpRefreshGrant<T = FormBody> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    client_id: ClientId,
    authentication: ClientAuthentication,
    content_type: PhantomData<fn() -> T>,
}

impl HttpRefreshGrant<FormBody> {
    /// Constructs a new refresh grant
    ///
    /// Requests are sent as URL-encoded form data, as RFC 6749 requires.
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        client_id: ClientId,
        authentication: ClientAuthentication,
    ) -> Self {
        Self {
            client,
            token_url,
            client_id,
            authentication,
            content_type: PhantomData,
        }
    }

    /// Configures the grant to send its request to the authority as JSON
    pub fn using_json_body(self) -> HttpRefreshGrant<JsonBody> {
        HttpRefreshGrant {
            client: self.client,
            token_url: self.token_url,
            client_id: self.client_id,
            authentication: self.authentication,
            content_type: PhantomData,
        }
    }
}

impl<T> HttpRefreshGrant<T> {
    /// The token endpoint requests are sent to
    pub fn token_url(&self) -> &reqwest::Url {
        &self.token_url
    }
}

#[async_trait]
impl<T: RequestType> RefreshGrant for HttpRefreshGrant<T> {
    type Error = TokenRequestError;

    async fn exchange(
        &self,
        refresh_token: &RefreshTokenRef,
        scope: Option<&ScopeRef>,
    ) -> Result<TokenResponse, Self::Error> {
        let client_authentication = self
            .authentication
            .params(&self.client_id)
            .await
            .map_err(TokenRequestError::ClientAuthentication)?;

        let form = RefreshGrantForm {
            refresh_token,
            scope,
            client_authentication,
        };

        request_token::<T>(
            &self.client,
            self.token_url.clone(),
            &self.client_id,
            &form,
        )
        .await
    }
}

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// Unable to obtain the credential used to authenticate the client
    #[error("error authenticating client to authority")]
    ClientAuthentication(#[source] crate::Error),
}

#[tracing::instrument(
    err,
    skip(client, token_url, client_id, form),
    fields(
        token_url = %token_url,
        grant_type = "refresh_token",
        client_id = %client_id,
        scope = form.scope.map(|s| s.as_str()),
    ),
)]
async fn request_token<T: RequestType>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    client_id: &ClientId,
    form: &RefreshGrantForm<'_>,
) -> Result<TokenResponse, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let req = T::attach_payload(client.post(token_url), form);
    let resp = req.send().await.map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from issuing authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let resp: TokenResponse = serde_json::from_slice(&body)?;

    tracing::info!(
        has_id_token = resp.id_token.is_some(),
        has_refresh_token = resp.refresh_token.is_some(),
        expires_in = resp.expires_in.map(|d| d.0),
        "received new tokens"
    );

    Ok(resp)
}

/// A manner of attaching a serializable payload to a request
pub trait RequestType {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder;
}

/// Attaches the request to the body as JSON
#[derive(Debug)]
pub struct JsonBody;

/// Attaches the request to the body as URL-encoded form data
#[derive(Debug)]
pub struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.form(payload)
    }
}
