use std::time::Duration;

use clap::Parser;
use credence_clock::System;
use credence_tokens::{
    sources::oauth2::{HttpRefreshGrant, RefreshTokenRequester},
    ClientAuthentication, ClientId, ClientSecret, CredentialStatus, RefreshToken, Scope,
    TokenCache,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The issuing authority's token request URL
    #[arg(short, long, env)]
    token_url: reqwest::Url,

    /// The client ID of the client
    #[arg(short, long, env)]
    client_id: ClientId,

    /// The client secret used to identify the client to the issuing authority
    #[arg(short = 's', long, env, hide_env_values = true)]
    client_secret: ClientSecret,

    /// The refresh token to start from
    #[arg(short, long, env, hide_env_values = true)]
    refresh_token: RefreshToken,

    /// The scope to request on refresh
    #[arg(long, env)]
    scope: Option<Scope>,

    /// How long before expiry to refresh the access token, in milliseconds
    #[arg(short, long, env, default_value_t = 60_000)]
    early_refresh_ms: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder().https_only(true).build()?;

    let grant = HttpRefreshGrant::new(
        client,
        opts.token_url,
        opts.client_id,
        ClientAuthentication::ClientSecret(opts.client_secret),
    );

    let mut requester = RefreshTokenRequester::new(grant, opts.refresh_token);
    if let Some(scope) = opts.scope {
        requester = requester.with_scope(scope);
    }

    let cache = TokenCache::new(requester)
        .with_early_refresh_ms(opts.early_refresh_ms)
        .with_name("refresh_grant");

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        let credential = match cache.get_credential().await {
            Ok(credential) => credential,
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn std::error::Error),
                    "unable to obtain an access token"
                );
                continue;
            }
        };

        let status = credential.status_with_clock(&System, cache.early_refresh());
        let expires_at = credential.expires_at().map(|t| t.0);
        match status {
            CredentialStatus::Fresh => {
                tracing::debug!(?status, expires_at, "pulled access token")
            }
            CredentialStatus::Expiring => {
                tracing::warn!(?status, expires_at, "pulled access token")
            }
            CredentialStatus::Expired
            | CredentialStatus::NotYetValid
            | CredentialStatus::Unverifiable => {
                tracing::error!(?status, expires_at, "pulled access token")
            }
        }
    }
}
