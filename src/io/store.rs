//! Object stores that tiles are listed from, cached from, and published to.
//!
//! [`S3CliStore`] shells out to the AWS CLI with anonymous access;
//! [`LocalStore`] mirrors the same operations on a local directory tree.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::io::command::{CommandOutcome, command_line, run_with_timeout};

pub const DEFAULT_REGION: &str = "us-west-2";

/// A local directory or an `s3://` prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    S3(String),
}

impl Location {
    pub fn parse(s: &str) -> Location {
        if s.starts_with("s3://") {
            Location::S3(s.trim_end_matches('/').to_string())
        } else {
            Location::Local(PathBuf::from(s))
        }
    }

    pub fn is_s3(&self) -> bool {
        matches!(self, Location::S3(_))
    }

    /// Append a `/`-separated relative path.
    pub fn join(&self, rel: &str) -> Location {
        let rel = rel.trim_matches('/');
        if rel.is_empty() {
            return self.clone();
        }
        match self {
            Location::Local(p) => Location::Local(p.join(rel)),
            Location::S3(url) => Location::S3(format!("{}/{}", url.trim_end_matches('/'), rel)),
        }
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Location::Local(p) => Some(p),
            Location::S3(_) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(p) => write!(f, "{}", p.display()),
            Location::S3(url) => f.write_str(url),
        }
    }
}

/// File-name suffixes a sync is restricted to. Empty means everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncFilter {
    pub suffixes: Vec<String>,
}

impl SyncFilter {
    pub fn suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.suffixes.is_empty() || self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

pub trait ObjectStore: Send + Sync {
    /// Names of the direct children of `prefix`.
    fn list(&self, prefix: &Location) -> Result<Vec<String>>;

    /// Mirror files under `src` that pass `filter` into `dst`. Exceeding
    /// `timeout` yields `FetchTimeout`.
    fn sync(&self, src: &Location, dst: &Path, filter: &SyncFilter, timeout: Option<Duration>) -> Result<()>;

    /// Copy every file under the local `src` directory to `dst`.
    fn publish(&self, src: &Path, dst: &Location, timeout: Option<Duration>) -> Result<()>;

    /// Human-readable form of a sync, for verbose and dry-run output.
    fn describe_sync(&self, src: &Location, dst: &Path, filter: &SyncFilter) -> String;

    fn describe_publish(&self, src: &Path, dst: &Location) -> String;
}

fn timeout_error(src: &Location, limit: Duration) -> Error {
    Error::FetchTimeout {
        tile: src.to_string(),
        seconds: limit.as_secs(),
    }
}

/// Anonymous S3 access through the `aws` command-line client.
#[derive(Clone, Debug)]
pub struct S3CliStore {
    pub program: String,
    pub region: String,
}

impl Default for S3CliStore {
    fn default() -> Self {
        Self {
            program: "aws".to_string(),
            region: DEFAULT_REGION.to_string(),
        }
    }
}

impl S3CliStore {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Self::default()
        }
    }

    fn url<'a>(&self, location: &'a Location) -> Result<&'a str> {
        match location {
            Location::S3(url) => Ok(url),
            Location::Local(p) => Err(Error::InvalidArgument {
                arg: "s3 location",
                value: p.display().to_string(),
            }),
        }
    }

    fn sync_args(&self, src: &str, dst: &Path, filter: &SyncFilter) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "s3".into(),
            "sync".into(),
            "--region".into(),
            self.region.clone(),
            "--no-sign-request".into(),
            format!("{}/", src),
            dst.display().to_string(),
            // size-only re-fetches truncated files left by an interrupted sync
            "--size-only".into(),
            "--quiet".into(),
        ];
        if !filter.suffixes.is_empty() {
            args.extend(["--exclude".to_string(), "*".to_string()]);
            for suffix in &filter.suffixes {
                args.extend(["--include".to_string(), format!("*{}", suffix)]);
            }
        }
        args
    }

    fn publish_args(&self, src: &Path, dst: &str) -> Vec<String> {
        vec![
            "s3".into(),
            "cp".into(),
            "--recursive".into(),
            "--region".into(),
            self.region.clone(),
            src.display().to_string(),
            format!("{}/", dst),
        ]
    }
}

/// Child names from `aws s3 ls` output: `PRE name/` lines for prefixes and
/// `date time size name` lines for objects.
fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let name = match line.strip_prefix("PRE ") {
                Some(prefix) => prefix.trim(),
                None => line.split_whitespace().nth(3)?,
            };
            let name = name.trim_end_matches('/');
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

impl ObjectStore for S3CliStore {
    fn list(&self, prefix: &Location) -> Result<Vec<String>> {
        let url = self.url(prefix)?;
        let args = vec![
            "s3".into(),
            "ls".into(),
            "--region".into(),
            self.region.clone(),
            "--no-sign-request".into(),
            format!("{}/", url),
        ];
        match run_with_timeout(&self.program, &args, None, true)? {
            CommandOutcome::Completed(out) => Ok(parse_listing(&out)),
            CommandOutcome::TimedOut(limit) => Err(timeout_error(prefix, limit)),
        }
    }

    fn sync(&self, src: &Location, dst: &Path, filter: &SyncFilter, timeout: Option<Duration>) -> Result<()> {
        let args = self.sync_args(self.url(src)?, dst, filter);
        match run_with_timeout(&self.program, &args, timeout, false)? {
            CommandOutcome::Completed(_) => Ok(()),
            CommandOutcome::TimedOut(limit) => Err(timeout_error(src, limit)),
        }
    }

    fn publish(&self, src: &Path, dst: &Location, timeout: Option<Duration>) -> Result<()> {
        let args = self.publish_args(src, self.url(dst)?);
        match run_with_timeout(&self.program, &args, timeout, false)? {
            CommandOutcome::Completed(_) => {
                info!("Published {:?} to {}", src, dst);
                Ok(())
            }
            CommandOutcome::TimedOut(limit) => Err(timeout_error(dst, limit)),
        }
    }

    fn describe_sync(&self, src: &Location, dst: &Path, filter: &SyncFilter) -> String {
        command_line(&self.program, &self.sync_args(&src.to_string(), dst, filter))
    }

    fn describe_publish(&self, src: &Path, dst: &Location) -> String {
        command_line(&self.program, &self.publish_args(src, &dst.to_string()))
    }
}

/// A directory tree used as an object store.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalStore;

impl LocalStore {
    fn path<'a>(&self, location: &'a Location) -> Result<&'a Path> {
        location.as_local().ok_or_else(|| Error::InvalidArgument {
            arg: "local location",
            value: location.to_string(),
        })
    }
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Copy `src` to `dst` through a temporary file in the destination
/// directory, so `dst` is either absent or complete.
pub fn copy_atomic(src: &Path, dst: &Path) -> Result<()> {
    let dir = dst
        .parent()
        .ok_or_else(|| Error::InvalidPath { path: dst.to_path_buf() })?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    let mut reader = fs::File::open(src)?;
    std::io::copy(&mut reader, tmp.as_file_mut())?;
    tmp.persist(dst).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn same_size(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.len() == b.len(),
        _ => false,
    }
}

fn mirror(src: &Path, dst: &Path, filter: &SyncFilter, deadline: Option<(Instant, Duration)>, origin: &Location) -> Result<usize> {
    let mut files = Vec::new();
    walk(src, &mut files)?;
    let mut copied = 0;
    for file in files {
        if let Some((start, limit)) = deadline {
            if start.elapsed() >= limit {
                return Err(timeout_error(origin, limit));
            }
        }
        let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if !filter.accepts(name) {
            continue;
        }
        let rel = file
            .strip_prefix(src)
            .map_err(|_| Error::InvalidPath { path: file.clone() })?;
        let target = dst.join(rel);
        if same_size(&file, &target) {
            continue;
        }
        copy_atomic(&file, &target)?;
        copied += 1;
    }
    Ok(copied)
}

impl ObjectStore for LocalStore {
    fn list(&self, prefix: &Location) -> Result<Vec<String>> {
        let dir = self.path(prefix)?;
        if !dir.is_dir() {
            return Err(Error::InvalidPath { path: dir.to_path_buf() });
        }
        let mut names = fs::read_dir(dir)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn sync(&self, src: &Location, dst: &Path, filter: &SyncFilter, timeout: Option<Duration>) -> Result<()> {
        let dir = self.path(src)?;
        if !dir.is_dir() {
            return Err(Error::InvalidPath { path: dir.to_path_buf() });
        }
        let copied = mirror(dir, dst, filter, timeout.map(|t| (Instant::now(), t)), src)?;
        debug!("Synced {} file(s) from {:?} to {:?}", copied, dir, dst);
        Ok(())
    }

    fn publish(&self, src: &Path, dst: &Location, timeout: Option<Duration>) -> Result<()> {
        let target = self.path(dst)?;
        let copied = mirror(src, target, &SyncFilter::default(), timeout.map(|t| (Instant::now(), t)), dst)?;
        info!("Published {} file(s) from {:?} to {:?}", copied, src, target);
        Ok(())
    }

    fn describe_sync(&self, src: &Location, dst: &Path, filter: &SyncFilter) -> String {
        let only = if filter.suffixes.is_empty() {
            String::new()
        } else {
            format!(" (only *{})", filter.suffixes.join(", *"))
        };
        format!("copy {} -> {}{}", src, dst.display(), only)
    }

    fn describe_publish(&self, src: &Path, dst: &Location) -> String {
        format!("copy {} -> {}", src.display(), dst)
    }
}

/// Routes each operation to S3 or the local tree by the location it names.
#[derive(Clone, Debug, Default)]
pub struct RoutedStore {
    pub s3: S3CliStore,
    pub local: LocalStore,
}

impl RoutedStore {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            s3: S3CliStore::new(region),
            local: LocalStore,
        }
    }

    fn route(&self, location: &Location) -> &dyn ObjectStore {
        if location.is_s3() { &self.s3 } else { &self.local }
    }
}

impl ObjectStore for RoutedStore {
    fn list(&self, prefix: &Location) -> Result<Vec<String>> {
        self.route(prefix).list(prefix)
    }

    fn sync(&self, src: &Location, dst: &Path, filter: &SyncFilter, timeout: Option<Duration>) -> Result<()> {
        self.route(src).sync(src, dst, filter, timeout)
    }

    fn publish(&self, src: &Path, dst: &Location, timeout: Option<Duration>) -> Result<()> {
        self.route(dst).publish(src, dst, timeout)
    }

    fn describe_sync(&self, src: &Location, dst: &Path, filter: &SyncFilter) -> String {
        self.route(src).describe_sync(src, dst, filter)
    }

    fn describe_publish(&self, src: &Path, dst: &Location) -> String {
        self.route(dst).describe_publish(src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_parse_and_join() {
        let s3 = Location::parse("s3://sentinel-1-global-coherence-earthbigdata/");
        assert!(s3.is_s3());
        assert_eq!(
            s3.join("/data/tiles/").join("N45W090").to_string(),
            "s3://sentinel-1-global-coherence-earthbigdata/data/tiles/N45W090"
        );
        let local = Location::parse("/tmp/root");
        assert_eq!(local.join("data/tiles"), Location::Local(PathBuf::from("/tmp/root/data/tiles")));
    }

    #[test]
    fn listing_keeps_prefixes_and_objects() {
        let out = "                           PRE N00E006/\n                           PRE N00E007/\n2021-10-12 10:00:00       1234 index.json\n";
        assert_eq!(parse_listing(out), vec!["N00E006", "N00E007", "index.json"]);
    }

    #[test]
    fn s3_sync_command_filters_metrics() {
        let store = S3CliStore::default();
        let line = store.describe_sync(
            &Location::parse("s3://bucket/data/tiles/N45W090"),
            Path::new("/tmp/cache/N45W090"),
            &SyncFilter::suffixes(["winter_vv_COH12.tif"]),
        );
        assert_eq!(
            line,
            "aws s3 sync --region us-west-2 --no-sign-request s3://bucket/data/tiles/N45W090/ /tmp/cache/N45W090 --size-only --quiet --exclude * --include *winter_vv_COH12.tif"
        );
    }

    #[test]
    fn local_sync_copies_filtered_files_and_skips_same_size() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("N45W090_winter_vv_COH12.tif"), b"abc").unwrap();
        fs::write(src.path().join("N45W090_winter_vv_AMP.tif"), b"abcd").unwrap();

        let filter = SyncFilter::suffixes(["COH12.tif"]);
        let origin = Location::Local(src.path().to_path_buf());
        LocalStore.sync(&origin, dst.path(), &filter, None).unwrap();
        assert!(dst.path().join("N45W090_winter_vv_COH12.tif").exists());
        assert!(!dst.path().join("N45W090_winter_vv_AMP.tif").exists());

        // a same-size file is left untouched
        fs::write(dst.path().join("N45W090_winter_vv_COH12.tif"), b"xyz").unwrap();
        LocalStore.sync(&origin, dst.path(), &filter, None).unwrap();
        assert_eq!(fs::read(dst.path().join("N45W090_winter_vv_COH12.tif")).unwrap(), b"xyz");
    }

    #[test]
    fn local_list_returns_sorted_children() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["N45W090", "N44W090", "README"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let names = LocalStore.list(&Location::Local(dir.path().to_path_buf())).unwrap();
        assert_eq!(names, vec!["N44W090", "N45W090", "README"]);
    }

    #[test]
    fn routed_store_dispatches_by_location() {
        let store = RoutedStore::default();
        let local = store.describe_sync(&Location::parse("/data/tiles/N45W090"), Path::new("/tmp/c"), &SyncFilter::default());
        assert_eq!(local, "copy /data/tiles/N45W090 -> /tmp/c");
        let s3 = store.describe_publish(Path::new("/tmp/out"), &Location::parse("s3://bucket/out"));
        assert!(s3.starts_with("aws s3 cp --recursive"));
    }
}
