use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, TaskError};

use super::sibling::CodeHost;

/// Public GitHub API base.
pub const GITHUB_API: &str = "https://api.github.com";

/// [`CodeHost`] over the GitHub REST API.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: Url,
    login: String,
    password: String,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_base", &self.api_base.as_str())
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct CreateRepository<'a> {
    name: &'a str,
    private: bool,
    has_issues: bool,
    has_wiki: bool,
}

#[derive(Deserialize)]
struct CreatedRepository {
    ssh_url: String,
}

impl GithubClient {
    /// Client for the public GitHub API.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let api_base = Url::parse(GITHUB_API)
            .map_err(|err| TaskError::Internal(format!("invalid GitHub API url: {err}")))?;
        Ok(Self::with_api_base(api_base, login, password))
    }

    /// Client for a GitHub-compatible API at `api_base`.
    pub fn with_api_base(
        api_base: Url,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base,
            login: login.into(),
            password: password.into(),
        }
    }

    fn repos_url(&self, organization: &str) -> Result<Url> {
        self.api_base
            .join(&format!("orgs/{organization}/repos"))
            .map_err(|err| TaskError::Internal(format!("invalid organization {organization}: {err}")))
    }
}

fn ssh_url(organization: &str, name: &str) -> String {
    format!("git@github.com:{organization}/{name}.git")
}

#[async_trait]
impl CodeHost for GithubClient {
    async fn create_repository(&self, organization: &str, name: &str) -> Result<String> {
        let response = self
            .http
            .post(self.repos_url(organization)?)
            .basic_auth(&self.login, Some(&self.password))
            .header(reqwest::header::USER_AGENT, "tessera")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&CreateRepository {
                name,
                private: false,
                has_issues: false,
                has_wiki: false,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let created = response.json::<CreatedRepository>().await?;
            info!(%organization, %name, "created code host repository");
            return Ok(created.ssh_url);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("already exists") {
            debug!(%organization, %name, "code host repository already exists");
            return Ok(ssh_url(organization, name));
        }
        Err(TaskError::Upstream {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::post;
    use serde_json::{Value, json};

    use super::*;

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    async fn create(
        Path(org): Path<String>,
        axum::Json(body): axum::Json<Value>,
    ) -> (HttpStatus, axum::Json<Value>) {
        let name = body["name"].as_str().unwrap_or_default().to_string();
        match name.as_str() {
            "ds-existing" => (
                HttpStatus::UNPROCESSABLE_ENTITY,
                axum::Json(json!({"message": "Repository creation failed.", "errors": [{"message": "name already exists on this account"}]})),
            ),
            "ds-broken" => (
                HttpStatus::INTERNAL_SERVER_ERROR,
                axum::Json(json!({"message": "boom"})),
            ),
            _ => (
                HttpStatus::CREATED,
                axum::Json(json!({"ssh_url": format!("git@example.test:{org}/{name}.git")})),
            ),
        }
    }

    #[tokio::test]
    async fn creates_existing_and_failing_repositories() {
        let base = serve(Router::new().route("/orgs/{org}/repos", post(create))).await;
        let client = GithubClient::with_api_base(base, "bot", "secret");

        assert_eq!(
            client.create_repository("Org", "ds000001").await.unwrap(),
            "git@example.test:Org/ds000001.git"
        );
        assert_eq!(
            client.create_repository("Org", "ds-existing").await.unwrap(),
            "git@github.com:Org/ds-existing.git"
        );
        match client.create_repository("Org", "ds-broken").await {
            Err(TaskError::Upstream { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("boom"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
