//! [`VersionedRepo`] backed by `git` and `git annex` on the local disk.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, TaskError};
use crate::types::{CommitAuthor, CommitId, DatasetId};

use super::{
    Dataset, DatasetStore, RepoFile, Sibling, Tag, VersionRecord, VersionedRepo,
    validate_ref_name,
};

/// Opens datasets as git-annex repositories under `root`.
#[derive(Clone)]
pub struct AnnexStore {
    root: PathBuf,
    env: Arc<Vec<(String, String)>>,
}

impl fmt::Debug for AnnexStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values may hold credentials.
        let keys: Vec<&str> = self.env.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("AnnexStore")
            .field("root", &self.root)
            .field("env", &keys)
            .finish()
    }
}

impl AnnexStore {
    /// Store whose datasets live under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            env: Arc::new(Vec::new()),
        }
    }

    /// Extra environment passed to every git invocation (object-store
    /// credentials for `initremote` and `export`).
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = self.env.as_ref().clone();
        env.extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self.env = Arc::new(env);
        self
    }

    /// Directory holding every dataset.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DatasetStore for AnnexStore {
    fn dataset_path(&self, id: &DatasetId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn get_dataset(&self, id: &DatasetId) -> Dataset {
        let path = self.dataset_path(id);
        Dataset {
            id: id.clone(),
            path: path.clone(),
            repo: Arc::new(AnnexRepo {
                path,
                env: Arc::clone(&self.env),
            }),
        }
    }
}

struct AnnexRepo {
    path: PathBuf,
    env: Arc<Vec<(String, String)>>,
}

impl AnnexRepo {
    async fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.path).kill_on_drop(true);
        for (key, value) in self.env.iter() {
            cmd.env(key, value);
        }
        cmd.args(args);
        Ok(cmd.output().await?)
    }

    /// Runs git and fails on a non-zero exit, returning stdout.
    async fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(output.stdout)
    }

    async fn git_text(&self, args: &[&str]) -> Result<String> {
        let stdout = self.git(args).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    fn working_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|part| matches!(part, std::path::Component::ParentDir))
        {
            return Err(TaskError::Store(format!(
                "path {path} escapes the dataset"
            )));
        }
        Ok(self.path.join(relative))
    }
}

fn command_failed(args: &[&str], output: &Output) -> TaskError {
    TaskError::Store(format!(
        "git {} exited with {}: {}",
        args.join(" "),
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stderr).trim()
    ))
}

#[async_trait]
impl VersionedRepo for AnnexRepo {
    async fn exists(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path.join(".git")).await?)
    }

    async fn create(&self) -> Result<()> {
        if self.exists().await? {
            return Err(TaskError::Store(format!(
                "dataset already exists at {}",
                self.path.display()
            )));
        }
        tokio::fs::create_dir_all(&self.path).await?;
        self.git(&["init", "--quiet"]).await?;
        self.git(&["annex", "init", "--quiet"]).await?;
        info!(path = %self.path.display(), "initialized annex repository");
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || force_remove_dir(&path))
            .await
            .map_err(|err| TaskError::Internal(format!("removal task failed: {err}")))??;
        Ok(())
    }

    async fn head(&self) -> Result<CommitId> {
        Ok(CommitId(self.git_text(&["rev-parse", "HEAD"]).await?))
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        let listing = self
            .git_text(&[
                "for-each-ref",
                "--sort=creatordate",
                "--format=%(refname:strip=2)%09%(objectname)%09%(*objectname)",
                "refs/tags",
            ])
            .await?;
        Ok(parse_tag_listing(&listing))
    }

    async fn read_head_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let object = format!("HEAD:{path}");
        let present = self.run(["cat-file", "-e", object.as_str()]).await?;
        if !present.status.success() {
            return Ok(None);
        }
        Ok(Some(self.git(&["cat-file", "blob", object.as_str()]).await?))
    }

    async fn read_working_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.working_path(path)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_working_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let target = self.working_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, contents).await?;
        Ok(())
    }

    async fn add(&self, path: &str) -> Result<()> {
        self.working_path(path)?;
        // git-annex applies the largefiles rules from .gitattributes.
        self.git(&["annex", "add", "--quiet", "--", path]).await?;
        Ok(())
    }

    async fn unlock(&self, path: &str) -> Result<()> {
        self.working_path(path)?;
        self.git(&["annex", "unlock", "--quiet", "--", path]).await?;
        Ok(())
    }

    async fn list_files(&self, treeish: &str) -> Result<Vec<RepoFile>> {
        validate_ref_name(treeish)?;
        let tree = self
            .git(&["ls-tree", "-r", "-l", "--full-tree", "-z", treeish])
            .await?;
        let branch = format!("--branch={treeish}");
        let annexed = self
            .git(&[
                "annex",
                "find",
                "--include=*",
                &branch,
                "--format=${file}\\t${key}\\t${bytesize}\\n",
            ])
            .await?;
        Ok(merge_listings(
            &String::from_utf8_lossy(&tree),
            &String::from_utf8_lossy(&annexed),
        ))
    }

    async fn commit(&self, author: &CommitAuthor, message: &str) -> Result<CommitId> {
        let name = format!("user.name={}", author.name_or_default());
        let email = format!("user.email={}", author.email_or_default());
        self.git(&["-c", &name, "-c", &email, "commit", "--quiet", "-m", message])
            .await?;
        let commit = self.head().await?;
        debug!(path = %self.path.display(), %commit, "committed");
        Ok(commit)
    }

    async fn reset(&self) -> Result<()> {
        let has_head = self.run(["rev-parse", "--verify", "--quiet", "HEAD"]).await?;
        if has_head.status.success() {
            self.git(&["reset", "--hard", "--quiet", "HEAD"]).await?;
        } else {
            // Nothing committed yet: unstage everything.
            let unstage = self.run(["rm", "-r", "--cached", "--quiet", "--", "."]).await?;
            debug!(status = ?unstage.status.code(), "unstaged files of an empty repository");
        }
        self.git(&["clean", "-fdq"]).await?;
        Ok(())
    }

    async fn tag(&self, name: &str) -> Result<CommitId> {
        validate_ref_name(name)?;
        self.git(&["tag", "--", name]).await?;
        let target = format!("{name}^{{commit}}");
        Ok(CommitId(self.git_text(&["rev-parse", "--verify", &target]).await?))
    }

    async fn siblings(&self) -> Result<Vec<Sibling>> {
        let output = self.run(["config", "--get-regexp", r"^remote\."]).await?;
        // Exit status 1 means no remote is configured.
        match output.status.code() {
            Some(0) => Ok(parse_remote_config(&String::from_utf8_lossy(&output.stdout))),
            Some(1) => Ok(Vec::new()),
            _ => Err(command_failed(&["config", "--get-regexp"], &output)),
        }
    }

    async fn init_s3_remote(&self, name: &str, bucket: &str, public: bool) -> Result<()> {
        let bucket = format!("bucket={bucket}");
        let public = format!("public={}", if public { "yes" } else { "no" });
        let fileprefix = format!(
            "fileprefix={}/",
            self.path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        self.git(&[
            "annex",
            "initremote",
            name,
            "type=S3",
            &bucket,
            &fileprefix,
            "exporttree=yes",
            "versioning=yes",
            "partsize=1GiB",
            "encryption=none",
            "autoenable=true",
            &public,
        ])
        .await?;
        Ok(())
    }

    async fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.git(&["remote", "add", name, url]).await?;
        Ok(())
    }

    async fn export_tree(
        &self,
        remote: &str,
        bucket: &str,
        treeish: &str,
    ) -> Result<VersionRecord> {
        validate_ref_name(treeish)?;
        self.git(&["annex", "export", treeish, "--to", remote]).await?;
        let branch = format!("--branch={treeish}");
        let whereis = self.git(&["annex", "whereis", "--json", &branch]).await?;
        parse_whereis_versions(&whereis, bucket)
    }

    async fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        validate_ref_name(refspec)?;
        self.git(&["push", "--quiet", "--", remote, refspec]).await?;
        Ok(())
    }
}

/// Removes a directory tree, clearing read-only bits first (annexed
/// objects are stored without write permission).
pub fn force_remove_dir(path: &Path) -> io::Result<()> {
    make_writable(path)?;
    std::fs::remove_dir_all(path)
}

fn make_writable(path: &Path) -> io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        std::fs::set_permissions(path, permissions)?;
    }
    if metadata.is_dir() {
        for entry in std::fs::read_dir(path)? {
            make_writable(&entry?.path())?;
        }
    }
    Ok(())
}

/// Parses `for-each-ref` lines of `name \t object \t peeled-object`.
/// Annotated tags resolve to their peeled commit.
fn parse_tag_listing(listing: &str) -> Vec<Tag> {
    listing
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let name = parts.next()?.trim();
            let object = parts.next()?.trim();
            let peeled = parts.next().map(str::trim).unwrap_or_default();
            if name.is_empty() || object.is_empty() {
                return None;
            }
            let commit = if peeled.is_empty() { object } else { peeled };
            Some(Tag {
                name: name.to_string(),
                commit: CommitId(commit.to_string()),
            })
        })
        .collect()
}

/// Collects remote names (and plain URLs) from `git config` output.
/// Special remotes carry an `annex-uuid` key but no URL.
fn parse_remote_config(config: &str) -> Vec<Sibling> {
    let mut remotes: BTreeMap<String, Option<String>> = BTreeMap::new();
    for line in config.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        let Some(rest) = key.strip_prefix("remote.") else {
            continue;
        };
        let Some((name, setting)) = rest.rsplit_once('.') else {
            continue;
        };
        let entry = remotes.entry(name.to_string()).or_default();
        if setting == "url" {
            *entry = Some(value.trim().to_string());
        }
    }
    remotes
        .into_iter()
        .map(|(name, url)| Sibling { name, url })
        .collect()
}

/// Joins `ls-tree -r -l -z` records (`mode type object size\tpath\0`) with
/// `annex find` lines (`file\tkey\tbytesize`). Annexed entries take the
/// annexed content size; pointer files without local content keep the
/// pointer size.
fn merge_listings(tree: &str, annexed: &str) -> Vec<RepoFile> {
    let annexed: BTreeMap<&str, (&str, Option<u64>)> = annexed
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let file = parts.next()?;
            let key = parts.next()?;
            let size = parts.next().and_then(|raw| raw.trim().parse().ok());
            (!file.is_empty()).then_some((file, (key, size)))
        })
        .collect();

    let mut files: Vec<RepoFile> = tree
        .split('\0')
        .filter_map(|record| {
            let (meta, path) = record.split_once('\t')?;
            let mut meta = meta.split_whitespace();
            let _mode = meta.next()?;
            if meta.next()? != "blob" {
                return None;
            }
            let _object = meta.next()?;
            let blob_size = meta.next()?.parse::<u64>().unwrap_or_default();
            let (key, size) = match annexed.get(path) {
                Some(&(key, size)) => (Some(key.to_string()), size.unwrap_or(blob_size)),
                None => (None, blob_size),
            };
            Some(RepoFile {
                filename: path.to_string(),
                size,
                key,
            })
        })
        .collect();
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    files
}

#[derive(Deserialize)]
struct WhereisEntry {
    file: String,
    #[serde(default)]
    whereis: Vec<WhereisLocation>,
}

#[derive(Deserialize)]
struct WhereisLocation {
    #[serde(default)]
    urls: Vec<String>,
}

/// Extracts `versionId` query parameters from object-store URLs in
/// `whereis --json` output, keeping only URLs that point into `bucket`.
fn parse_whereis_versions(json_lines: &[u8], bucket: &str) -> Result<VersionRecord> {
    let mut record = VersionRecord::new();
    let stream = serde_json::Deserializer::from_slice(json_lines).into_iter::<WhereisEntry>();
    for entry in stream {
        let entry = entry?;
        let versions: Vec<String> = entry
            .whereis
            .iter()
            .flat_map(|location| location.urls.iter())
            .filter_map(|raw| Url::parse(raw).ok())
            .filter(|url| url_in_bucket(url, bucket))
            .filter_map(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == "versionId")
                    .map(|(_, value)| value.into_owned())
            })
            .collect();
        if !versions.is_empty() {
            record.entry(entry.file).or_default().extend(versions);
        }
    }
    Ok(record)
}

fn url_in_bucket(url: &Url, bucket: &str) -> bool {
    let host_match = url
        .host_str()
        .is_some_and(|host| host.starts_with(&format!("{bucket}.")));
    let path_match = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .is_some_and(|first| first == bucket);
    host_match || path_match
}
