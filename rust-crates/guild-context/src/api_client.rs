use crate::{
    guild::{
        AuthenticatedUser,
        Guild,
        GuildId,
        Profile,
    },
    header_binder::HeaderBinder,
    query_cache::{
        QueryKey,
        QueryLoader,
    },
    sources::{
        GuildDirectory,
        HealthCheck,
        ProfileSource,
        SessionSource,
    },
};
use anyhow::{
    Context,
    anyhow,
};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::fmt;
use url::Url;

/// REST client for the dashboard backend. Requests carry whatever guild the
/// shared [`HeaderBinder`] holds at the moment they are built, except cache
/// loads for a guild-scoped key, which always go to the key's guild.
#[derive(Clone)]
pub struct DashboardClient {
    base_url: Url,
    http: reqwest::Client,
    headers: HeaderBinder,
}

impl DashboardClient {
    pub fn new(base_url: &str, headers: HeaderBinder) -> crate::Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid dashboard api url {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("dashboard api url {base_url} cannot be a base"));
        }
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for dashboard api")?;
        Ok(Self {
            base_url,
            http,
            headers,
        })
    }

    pub fn headers(&self) -> &HeaderBinder {
        &self.headers
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> crate::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("dashboard api url {} cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend(path.split('/'));
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn get_bytes(
        &self,
        path: &str,
        query: &[(&str, &str)],
        headers: HeaderMap,
    ) -> crate::Result<Vec<u8>> {
        let url = self.url(path, query)?;
        let res = self
            .http
            .get(url)
            .headers(headers)
            .send()
            .await
            .with_context(|| format!("dashboard api request to /{path} failed"))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .with_context(|| format!("failed to read /{path} response body"))?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(anyhow!(
                "dashboard api responded with {status} for /{path}: {body}"
            ));
        }
        Ok(bytes.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> crate::Result<T> {
        self.get_json_with(path, query, self.headers.default_headers())
            .await
    }

    async fn get_json_with<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        headers: HeaderMap,
    ) -> crate::Result<T> {
        let bytes = self.get_bytes(path, query, headers).await?;
        serde_json::from_slice(&bytes).with_context(|| format!("invalid /{path} payload"))
    }
}

impl GuildDirectory for DashboardClient {
    async fn list_guilds(&self, principal: &str) -> crate::Result<Vec<Guild>> {
        self.get_json("tenants", &[("principal", principal)]).await
    }
}

impl ProfileSource for DashboardClient {
    async fn profile(&self, guild: &GuildId) -> crate::Result<Profile> {
        self.get_json("profile", &[("tenant", guild.as_str())]).await
    }
}

impl SessionSource for DashboardClient {
    async fn current_user(&self) -> crate::Result<AuthenticatedUser> {
        self.get_json("auth/me", &[]).await
    }
}

impl HealthCheck for DashboardClient {
    async fn heartbeat(&self) -> crate::Result<()> {
        self.get_bytes("health", &[], self.headers.default_headers())
            .await
            .map(|_| ())
    }
}

impl QueryLoader for DashboardClient {
    async fn load(&self, key: &QueryKey) -> crate::Result<serde_json::Value> {
        let query: Vec<(&str, &str)> = key
            .subject
            .as_deref()
            .map(|subject| ("subject", subject))
            .into_iter()
            .collect();
        let headers = match &key.guild {
            Some(guild) => HeaderBinder::scoped_headers(Some(guild)),
            None => self.headers.default_headers(),
        };
        self.get_json_with(&key.family, &query, headers).await
    }
}

impl fmt::Display for DashboardClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn new__rejects_urls_that_cannot_be_a_base() {
        assert!(DashboardClient::new("mailto:ops@example.com", HeaderBinder::new()).is_err());
        assert!(DashboardClient::new("not a url", HeaderBinder::new()).is_err());
    }

    #[test]
    fn url__joins_path_and_query_onto_base_path() {
        // given
        let client = DashboardClient::new("http://127.0.0.1:8080/api/", HeaderBinder::new()).unwrap();

        // when
        let url = client.url("tenants", &[("principal", "user 1")]).unwrap();

        // then
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/tenants?principal=user+1");
    }
}
