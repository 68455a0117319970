//! Gateway backed by a Bitbucket-Server-style REST API.
//!
//! A repository name `ns/name` maps to project `ns` and slug `name`; names
//! without a namespace live in the configured default project. Reads carry
//! the short read timeout, mutations the longer write timeout.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::repository::gateway::{RemoteError, RepositoryError, RepositoryGateway};
use crate::repository::model::{
    ArchiveFormat, Branch, CloneUrls, GitHistory, GitLog, GitUser, LogQuery, Repository,
    RepositoryUpdate, Tag, is_valid_name, split_name,
};
use crate::user::{self, SshKey, User};

/// Page size used when walking every page of a listing
const PAGE_LIMIT: u64 = 100;
const DIFF_CONTEXT_LINES: &str = "10";

const PERMISSION_WRITE: &str = "REPO_WRITE";
const PERMISSION_READ: &str = "REPO_READ";
const PERMISSION_ADMIN: &str = "REPO_ADMIN";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    #[serde(default = "default_last_page")]
    is_last_page: bool,
    next_page_start: Option<u64>,
}

fn default_last_page() -> bool {
    true
}

#[derive(Deserialize)]
struct RepoDto {
    #[serde(default)]
    public: bool,
    #[serde(default)]
    links: LinksDto,
}

#[derive(Deserialize, Default)]
struct LinksDto {
    #[serde(default)]
    clone: Vec<LinkDto>,
}

#[derive(Deserialize)]
struct LinkDto {
    href: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct UserDto {
    name: String,
}

#[derive(Deserialize)]
struct UserPermissionDto {
    user: UserDto,
    permission: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefDto {
    display_id: String,
    #[serde(default)]
    latest_commit: String,
    #[serde(default)]
    is_default: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonDto {
    name: String,
    #[serde(default)]
    email_address: String,
}

#[derive(Deserialize)]
struct ParentDto {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitDto {
    id: String,
    #[serde(default)]
    message: String,
    author: PersonDto,
    author_timestamp: i64,
    committer: Option<PersonDto>,
    committer_timestamp: Option<i64>,
    #[serde(default)]
    parents: Vec<ParentDto>,
}

#[derive(Deserialize)]
struct KeyDto {
    id: u64,
    text: String,
    #[serde(default)]
    label: String,
}

#[derive(Deserialize)]
struct KeyEntryDto {
    key: KeyDto,
}

/// Millisecond epoch timestamp as RFC 3339
fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

fn git_user(person: PersonDto, millis: i64) -> GitUser {
    GitUser {
        name: person.name,
        email: person.email_address,
        date: Some(format_timestamp(millis)),
    }
}

/// Pick read-only and read-write URLs out of the host's clone links
fn clone_urls(links: Vec<LinkDto>) -> CloneUrls {
    let mut urls = CloneUrls::default();
    for link in &links {
        match link.name.as_str() {
            "ssh" => urls.read_write = Some(link.href.clone()),
            "http" | "https" => urls.read_only = Some(link.href.clone()),
            _ => {}
        }
    }
    // Unnamed links come in (read-only, read-write) order
    if urls.read_only.is_none() {
        urls.read_only = links.first().map(|l| l.href.clone());
    }
    if urls.read_write.is_none() {
        urls.read_write = links.get(1).or(links.first()).map(|l| l.href.clone());
    }
    urls
}

/// Accounts as the host names them, deduplicated
fn host_names<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let slugs: BTreeSet<String> = names.map(|n| User::new(n.as_str()).slug().to_string()).collect();
    slugs.into_iter().collect()
}

/// Turn a non-2xx response into `RemoteError::Status`
async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(serde_json::from_str("{}")?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn status_of(err: &RemoteError) -> Option<u16> {
    match err {
        RemoteError::Status { status, .. } => Some(*status),
        _ => None,
    }
}

pub struct BitbucketGateway {
    client: Client,
    base_url: String,
    username: String,
    password: Option<String>,
    default_project: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl BitbucketGateway {
    pub fn new(config: &ApiConfig) -> Result<Self, RepositoryError> {
        let client = Client::builder()
            .user_agent(concat!("gitwarden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RemoteError::from)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password(),
            default_project: config.default_project.clone(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        })
    }

    /// Repository collection URL of the project holding `name`, and its slug
    fn locate<'a>(&self, name: &'a str) -> Result<(String, &'a str), RepositoryError> {
        if !is_valid_name(name) {
            return Err(RepositoryError::InvalidRepository(format!(
                "repository name is not valid: {name:?}"
            )));
        }
        let (project, slug) = split_name(name);
        let project = project.unwrap_or(&self.default_project);
        Ok((
            format!("{}/api/1.0/projects/{}/repos", self.base_url, project),
            slug,
        ))
    }

    fn repo_url(&self, name: &str) -> Result<String, RepositoryError> {
        let (collection, slug) = self.locate(name)?;
        Ok(format!("{collection}/{slug}"))
    }

    fn keys_url(&self) -> String {
        format!("{}/ssh/1.0/keys", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let timeout = if method == Method::GET {
            self.read_timeout
        } else {
            self.write_timeout
        };
        debug!(%method, %url, "remote call");
        self.client
            .request(method, url)
            .basic_auth(&self.username, self.password.as_deref())
            .timeout(timeout)
    }

    async fn call(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        check(request.send().await?).await
    }

    /// Walk every page of a listing
    async fn fetch_all<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, RemoteError> {
        let mut items = Vec::new();
        let mut start = 0;
        loop {
            let request = self
                .request(Method::GET, url)
                .query(query)
                .query(&[("start", start), ("limit", PAGE_LIMIT)]);
            let page: Page<T> = read_json(self.call(request).await?).await?;
            items.extend(page.values);
            match page.next_page_start {
                Some(next) if !page.is_last_page && next > start => start = next,
                _ => return Ok(items),
            }
        }
    }

    /// A 404 on a repository sub-resource means "nothing there" unless the
    /// repository itself is gone
    async fn or_empty<T: Default>(
        &self,
        name: &str,
        result: Result<T, RemoteError>,
    ) -> Result<T, RepositoryError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if status_of(&err) == Some(404) => {
                self.get(name).await?;
                Ok(T::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn set_permissions(
        &self,
        repo_url: &str,
        users: &[String],
        permission: &str,
    ) -> Result<(), RemoteError> {
        if users.is_empty() {
            return Ok(());
        }
        let mut query: Vec<(&str, &str)> = vec![("permission", permission)];
        query.extend(users.iter().map(|u| ("name", u.as_str())));
        let request = self
            .request(Method::PUT, &format!("{repo_url}/permissions/users"))
            .query(&query);
        self.call(request).await?;
        Ok(())
    }

    async fn drop_permission(&self, repo_url: &str, user: &str) -> Result<(), RemoteError> {
        let request = self
            .request(Method::DELETE, &format!("{repo_url}/permissions/users"))
            .query(&[("name", user)]);
        match self.call(request).await {
            Err(err) if status_of(&err) == Some(404) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    /// Fetch every named repository, skipping the ones that do not exist
    async fn existing(&self, repos: &[String]) -> Result<Vec<Repository>, RepositoryError> {
        let mut found = Vec::new();
        for name in repos {
            match self.get(name).await {
                Ok(repo) => found.push(repo),
                Err(RepositoryError::NotFound(_)) | Err(RepositoryError::InvalidRepository(_)) => {
                    debug!(repo = %name, "skipping unknown repository");
                }
                Err(err) => return Err(err),
            }
        }
        if found.is_empty() {
            return Err(RepositoryError::NotFound(repos.join(", ")));
        }
        Ok(found)
    }
}

#[async_trait]
impl RepositoryGateway for BitbucketGateway {
    async fn create(&self, repo: &Repository) -> Result<Repository, RepositoryError> {
        repo.validate()?;
        debug!(repo = %repo.name, "creating repository");

        let (collection, slug) = self.locate(&repo.name)?;
        let repo_url = format!("{collection}/{slug}");
        let request = self.request(Method::POST, &collection).json(&json!({
            "name": slug,
            "scmId": "git",
            "public": repo.is_public,
        }));
        let created: RepoDto = match self.call(request).await {
            Ok(response) => read_json(response).await?,
            Err(err) if status_of(&err) == Some(409) => {
                return Err(RepositoryError::AlreadyExists(repo.name.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        let writers = host_names(repo.users.iter());
        let readers: Vec<String> = host_names(repo.read_only_users.iter())
            .into_iter()
            .filter(|u| !writers.contains(u))
            .collect();
        let granted = match self.set_permissions(&repo_url, &writers, PERMISSION_WRITE).await {
            Ok(()) => self.set_permissions(&repo_url, &readers, PERMISSION_READ).await,
            Err(err) => Err(err),
        };
        if let Err(err) = granted {
            // Roll back the half-created repository
            if let Err(cleanup) = self.remove(&repo.name).await {
                warn!(repo = %repo.name, error = %cleanup, "failed to remove half-created repository");
            }
            return Err(err.into());
        }

        let mut created_repo = repo.clone();
        created_repo.is_public = created.public;
        created_repo.clone_urls = clone_urls(created.links.clone);
        Ok(created_repo)
    }

    async fn get(&self, name: &str) -> Result<Repository, RepositoryError> {
        let repo_url = self.repo_url(name)?;
        let dto: RepoDto = match self.call(self.request(Method::GET, &repo_url)).await {
            Ok(response) => read_json(response).await?,
            Err(err) if status_of(&err) == Some(404) => {
                return Err(RepositoryError::NotFound(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let permissions: Vec<UserPermissionDto> = self
            .fetch_all(&format!("{repo_url}/permissions/users"), &[])
            .await?;

        let mut repo = Repository::new(name, Vec::new(), Vec::new(), dto.public);
        for entry in permissions {
            match entry.permission.as_str() {
                PERMISSION_WRITE | PERMISSION_ADMIN => {
                    repo.users.insert(entry.user.name);
                }
                PERMISSION_READ => {
                    repo.read_only_users.insert(entry.user.name);
                }
                _ => {}
            }
        }
        repo.clone_urls = clone_urls(dto.links.clone);
        Ok(repo)
    }

    async fn remove(&self, name: &str) -> Result<(), RepositoryError> {
        debug!(repo = %name, "removing repository");
        let repo_url = self.repo_url(name)?;
        match self.call(self.request(Method::DELETE, &repo_url)).await {
            Ok(_) => Ok(()),
            Err(err) if status_of(&err) == Some(404) => {
                Err(RepositoryError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&self, name: &str, update: &RepositoryUpdate) -> Result<(), RepositoryError> {
        debug!(repo = %name, "updating repository");
        let current = self.get(name).await?;

        if let Some(is_public) = update.is_public.filter(|p| *p != current.is_public) {
            let request = self
                .request(Method::PUT, &self.repo_url(name)?)
                .json(&json!({ "public": is_public }));
            self.call(request).await?;
        }
        Ok(())
    }

    async fn grant_access(
        &self,
        repos: &[String],
        users: &[String],
        read_only: bool,
    ) -> Result<(), RepositoryError> {
        let users = host_names(users.iter());
        for repo in self.existing(repos).await? {
            let repo_url = self.repo_url(&repo.name)?;
            if read_only {
                // A read grant must not downgrade an existing writer
                let readers: Vec<String> = users
                    .iter()
                    .filter(|u| !repo.users.contains(*u))
                    .cloned()
                    .collect();
                self.set_permissions(&repo_url, &readers, PERMISSION_READ).await?;
            } else {
                self.set_permissions(&repo_url, &users, PERMISSION_WRITE).await?;
            }
        }
        Ok(())
    }

    async fn revoke_access(
        &self,
        repos: &[String],
        users: &[String],
        read_only: bool,
    ) -> Result<(), RepositoryError> {
        let users = host_names(users.iter());
        for repo in self.existing(repos).await? {
            let repo_url = self.repo_url(&repo.name)?;
            let members = if read_only {
                &repo.read_only_users
            } else {
                &repo.users
            };
            for user in users.iter().filter(|u| members.contains(*u)) {
                self.drop_permission(&repo_url, user).await?;
            }
        }
        Ok(())
    }

    async fn branches(&self, name: &str) -> Result<Vec<Branch>, RepositoryError> {
        let url = format!("{}/branches", self.repo_url(name)?);
        let refs = self.fetch_all::<RefDto>(&url, &[]).await;
        let refs = self.or_empty(name, refs).await?;
        Ok(refs
            .into_iter()
            .map(|r| Branch {
                name: r.display_id,
                latest_commit: r.latest_commit,
                is_default: r.is_default,
            })
            .collect())
    }

    async fn tags(&self, name: &str) -> Result<Vec<Tag>, RepositoryError> {
        let url = format!("{}/tags", self.repo_url(name)?);
        let refs = self.fetch_all::<RefDto>(&url, &[]).await;
        let refs = self.or_empty(name, refs).await?;
        Ok(refs
            .into_iter()
            .map(|r| Tag {
                name: r.display_id,
                latest_commit: r.latest_commit,
            })
            .collect())
    }

    async fn diff(&self, name: &str, from: &str, to: &str) -> Result<Vec<u8>, RepositoryError> {
        let url = format!("{}/diff", self.repo_url(name)?);
        let request = self.request(Method::GET, &url).query(&[
            ("since", from),
            ("until", to),
            ("contextLines", DIFF_CONTEXT_LINES),
        ]);
        let body = match self.call(request).await {
            Ok(response) => response.bytes().await.map(|b| b.to_vec()).map_err(RemoteError::from),
            Err(err) => Err(err),
        };
        self.or_empty(name, body).await
    }

    async fn archive(
        &self,
        name: &str,
        git_ref: &str,
        format: ArchiveFormat,
    ) -> Result<Vec<u8>, RepositoryError> {
        let url = format!("{}/archive", self.repo_url(name)?);
        let request = self
            .request(Method::GET, &url)
            .query(&[("at", git_ref), ("format", format.as_str())]);
        let body = match self.call(request).await {
            Ok(response) => response.bytes().await.map(|b| b.to_vec()).map_err(RemoteError::from),
            Err(err) => Err(err),
        };
        self.or_empty(name, body).await
    }

    async fn logs(&self, name: &str, query: &LogQuery) -> Result<GitHistory, RepositoryError> {
        let url = format!("{}/commits", self.repo_url(name)?);
        let limit = query.page_size().to_string();
        let mut params: Vec<(&str, &str)> = vec![("limit", limit.as_str())];
        if let Some(git_ref) = &query.git_ref {
            params.push(("until", git_ref.as_str()));
        }
        if let Some(path) = &query.path {
            params.push(("path", path.as_str()));
        }
        if let Some(start) = &query.start {
            params.push(("start", start.as_str()));
        }

        let page = match self.call(self.request(Method::GET, &url).query(&params)).await {
            Ok(response) => read_json::<Page<CommitDto>>(response).await.map(Some),
            Err(err) => Err(err),
        };
        let Some(page) = self.or_empty(name, page).await? else {
            return Ok(GitHistory::default());
        };

        let next = match page.next_page_start {
            Some(next) if !page.is_last_page => Some(next.to_string()),
            _ => None,
        };
        let commits = page
            .values
            .into_iter()
            .map(|c| {
                let committed_at = c.committer_timestamp.unwrap_or(c.author_timestamp);
                GitLog {
                    git_ref: c.id,
                    subject: c.message,
                    created_at: format_timestamp(committed_at),
                    committer: c.committer.map(|p| git_user(p, committed_at)),
                    author: Some(git_user(c.author, c.author_timestamp)),
                    parent: c.parents.into_iter().map(|p| p.id).collect(),
                }
            })
            .collect();

        Ok(GitHistory { commits, next })
    }

    async fn get_user(&self, name: &str) -> Result<User, RepositoryError> {
        let user = User::new(name);
        user.validate()?;
        let url = format!("{}/api/1.0/users/{}", self.base_url, user.slug());
        match self.call(self.request(Method::GET, &url)).await {
            Ok(response) => {
                let _: UserDto = read_json(response).await?;
                Ok(user)
            }
            Err(err) if status_of(&err) == Some(404) => {
                Err(RepositoryError::UserNotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn add_keys(
        &self,
        user: &str,
        keys: &BTreeMap<String, String>,
    ) -> Result<(), RepositoryError> {
        for body in keys.values() {
            user::validate_key(body)?;
        }
        let owner = self.get_user(user).await?;

        for (label, body) in keys {
            let request = self
                .request(Method::POST, &self.keys_url())
                .query(&[("user", owner.slug())])
                .json(&json!({ "text": body.trim(), "label": label }));
            match self.call(request).await {
                Ok(_) => {}
                Err(err) if status_of(&err) == Some(409) => return Err(RepositoryError::DuplicateKey),
                Err(RemoteError::Status { status: 400, body }) => {
                    return Err(RepositoryError::InvalidKey(body));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn list_keys(&self, user: &str) -> Result<Vec<SshKey>, RepositoryError> {
        let owner = self.get_user(user).await?;
        let entries: Vec<KeyEntryDto> = self
            .fetch_all(&self.keys_url(), &[("user", owner.slug())])
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| SshKey {
                id: e.key.id,
                label: e.key.label,
                text: e.key.text,
            })
            .collect())
    }

    async fn remove_key(&self, user: &str, id: u64) -> Result<(), RepositoryError> {
        if !self.list_keys(user).await?.iter().any(|k| k.id == id) {
            return Err(RepositoryError::KeyNotFound(id.to_string()));
        }
        let url = format!("{}/{}", self.keys_url(), id);
        match self.call(self.request(Method::DELETE, &url)).await {
            Ok(_) => Ok(()),
            Err(err) if status_of(&err) == Some(404) => {
                Err(RepositoryError::KeyNotFound(id.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
