//! Mirrors dataset containers from the object store into a local directory.

mod listing;
pub mod store;

pub use listing::{
    ListingOptions, MAX_LIST_PAGES, PAGE_LIMIT, list_all_containers, list_all_objects, paginate,
};
pub use store::{Container, DIRECTORY_CONTENT_TYPE, ObjectStore, RemoteObject};

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The only entry allowed in the target directory of a fresh checkout.
pub const PLACEHOLDER_ENTRY: &str = "README";

/// What a download run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub containers: usize,
    pub objects_listed: usize,
    pub objects_written: usize,
    pub skipped_directories: usize,
    pub skipped_partial: usize,
    pub bytes_written: u64,
}

/// Fails unless `dir` exists and is empty apart from the placeholder entry.
pub fn check_target_dir(dir: &Path) -> Result<()> {
    debug!(dir = %dir.display(), "Checking local data directory exists and is empty");

    if !dir.is_dir() {
        return Err(Error::Precondition {
            path: dir.to_path_buf(),
            reason: "local data directory does not exist".to_string(),
        });
    }

    let listing = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<std::io::Result<Vec<_>>>()?;

    match listing.as_slice() {
        [] => Ok(()),
        [only] if only == PLACEHOLDER_ENTRY => Ok(()),
        _ => Err(Error::Precondition {
            path: dir.to_path_buf(),
            reason: format!("local data directory not empty ({} entries)", listing.len()),
        }),
    }
}

/// Resolves an object name to a path below `target_dir`.
fn object_path(target_dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let safe = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(Error::UnsafeObjectName {
            name: name.to_string(),
        });
    }
    Ok(target_dir.join(relative))
}

/// One object scheduled for download.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedObject {
    container: String,
    name: String,
    target: PathBuf,
}

/// Lists one container and schedules its regular, complete objects.
///
/// Every target is validated here so that a bad name fails the run before
/// any object is written.
#[tracing::instrument(skip(store, target_dir, options, report, planned))]
async fn plan_container<S: ObjectStore + ?Sized>(
    store: &S,
    container: &str,
    target_dir: &Path,
    options: ListingOptions,
    report: &mut FetchReport,
    planned: &mut Vec<PlannedObject>,
) -> Result<()> {
    let content = list_all_objects(store, container, options).await?;
    info!(objects = content.len(), "Container listed");
    report.objects_listed += content.len();

    for obj in content {
        if obj.is_directory() {
            report.skipped_directories += 1;
            continue;
        }
        if obj.is_partial() {
            debug!(object = %obj.name, "Skipping partial upload");
            report.skipped_partial += 1;
            continue;
        }

        let target = object_path(target_dir, &obj.name)?;
        if target.exists() || planned.iter().any(|p| p.target == target) {
            return Err(Error::Precondition {
                path: target,
                reason: format!("object '{container}/{}' would overwrite another file", obj.name),
            });
        }
        planned.push(PlannedObject {
            container: container.to_string(),
            name: obj.name,
            target,
        });
    }

    Ok(())
}

async fn download_object<S: ObjectStore + ?Sized>(
    store: &S,
    object: &PlannedObject,
    report: &mut FetchReport,
) -> Result<()> {
    let body = store.get_object(&object.container, &object.name).await?;

    if let Some(parent) = object.target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&object.target, &body)?;

    debug!(
        container = %object.container,
        object = %object.name,
        bytes = body.len(),
        "Object written"
    );
    report.objects_written += 1;
    report.bytes_written += body.len() as u64;
    Ok(())
}

/// Downloads the containers named in `datasets` into `target_dir`.
///
/// Assumes a clean run: the target must be empty (see [`check_target_dir`])
/// and nothing already on disk is overwritten or deleted.
pub async fn download_containers<S: ObjectStore + ?Sized>(
    store: &S,
    datasets: &HashSet<String>,
    target_dir: &Path,
) -> Result<FetchReport> {
    download_containers_with(store, datasets, target_dir, ListingOptions::default()).await
}

pub async fn download_containers_with<S: ObjectStore + ?Sized>(
    store: &S,
    datasets: &HashSet<String>,
    target_dir: &Path,
    options: ListingOptions,
) -> Result<FetchReport> {
    check_target_dir(target_dir)?;

    let containers = list_all_containers(store, options).await?;
    info!(available = containers.len(), wanted = datasets.len(), "Downloading containers");

    let mut report = FetchReport::default();
    let mut planned = Vec::new();
    for container in containers.iter().filter(|c| datasets.contains(&c.name)) {
        plan_container(store, &container.name, target_dir, options, &mut report, &mut planned)
            .await?;
        report.containers += 1;
    }

    for object in &planned {
        download_object(store, object, &mut report).await?;
    }

    info!(
        containers = report.containers,
        objects_written = report.objects_written,
        skipped_directories = report.skipped_directories,
        skipped_partial = report.skipped_partial,
        bytes = report.bytes_written,
        "Download complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory store that counts listing calls.
    #[derive(Default)]
    struct MemoryStore {
        containers: BTreeMap<String, Vec<(RemoteObject, Vec<u8>)>>,
        object_listings: Mutex<usize>,
    }

    impl MemoryStore {
        fn with(mut self, container: &str, name: &str, content_type: &str, body: &str) -> Self {
            self.containers
                .entry(container.to_string())
                .or_default()
                .push((
                    RemoteObject {
                        name: name.to_string(),
                        content_type: content_type.to_string(),
                    },
                    body.as_bytes().to_vec(),
                ));
            self
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn list_containers(
            &self,
            marker: Option<&str>,
            limit: usize,
        ) -> Result<Vec<Container>> {
            Ok(self
                .containers
                .keys()
                .filter(|name| marker.is_none_or(|m| name.as_str() > m))
                .take(limit)
                .map(|name| Container { name: name.clone() })
                .collect())
        }

        async fn list_objects(
            &self,
            container: &str,
            marker: Option<&str>,
            limit: usize,
        ) -> Result<Vec<RemoteObject>> {
            *self.object_listings.lock().unwrap() += 1;
            let mut objects: Vec<RemoteObject> = self
                .containers
                .get(container)
                .map(|objs| objs.iter().map(|(o, _)| o.clone()).collect())
                .unwrap_or_default();
            objects.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(objects
                .into_iter()
                .filter(|o| marker.is_none_or(|m| o.name.as_str() > m))
                .take(limit)
                .collect())
        }

        async fn get_object(&self, container: &str, name: &str) -> Result<Bytes> {
            self.containers
                .get(container)
                .and_then(|objs| objs.iter().find(|(o, _)| o.name == name))
                .map(|(_, body)| Bytes::from(body.clone()))
                .ok_or_else(|| Error::Store(format!("{container}/{name} not found")))
        }
    }

    fn sample_store() -> MemoryStore {
        MemoryStore::default()
            .with("gvb", "gvb", DIRECTORY_CONTENT_TYPE, "")
            .with("gvb", "ritten.csv", "text/csv", "a,b\n")
            .with("gvb", "stops/haltes.xlsx", "application/octet-stream", "xlsx")
            .with("gvb", "ritten.csv.part-001", "text/csv", "partial")
            .with("mora", "MORA_data_data.csv", "text/csv", "mora")
            .with("other", "ignored.csv", "text/csv", "nope")
    }

    fn wanted(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn tree(dir: &Path) -> Vec<String> {
        fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(root, &path, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap();
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        let mut out = Vec::new();
        walk(dir, dir, &mut out);
        out.sort();
        out
    }

    #[tokio::test]
    async fn test_writes_only_regular_complete_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample_store();

        let report = download_containers(&store, &wanted(&["gvb", "mora"]), dir.path())
            .await
            .unwrap();

        assert_eq!(
            tree(dir.path()),
            vec!["MORA_data_data.csv", "ritten.csv", "stops/haltes.xlsx"]
        );
        assert_eq!(report.containers, 2);
        assert_eq!(report.objects_listed, 5);
        assert_eq!(report.objects_written, 3);
        assert_eq!(report.skipped_directories, 1);
        assert_eq!(report.skipped_partial, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("ritten.csv")).unwrap(),
            "a,b\n"
        );
    }

    #[tokio::test]
    async fn test_readme_placeholder_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PLACEHOLDER_ENTRY), "data goes here").unwrap();

        let report = download_containers(&sample_store(), &wanted(&["mora"]), dir.path())
            .await
            .unwrap();
        assert_eq!(report.objects_written, 1);
    }

    #[tokio::test]
    async fn test_populated_directory_fails_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("leftover.csv"), "x").unwrap();

        let err = download_containers(&sample_store(), &wanted(&["gvb"]), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Precondition { .. }));
        assert_eq!(tree(dir.path()), vec!["leftover.csv"]);
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let err = download_containers(&sample_store(), &wanted(&["gvb"]), &missing)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_unsafe_object_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data");
        fs::create_dir(&target).unwrap();
        let store = MemoryStore::default().with("gvb", "../escape.csv", "text/csv", "x");

        let err = download_containers(&store, &wanted(&["gvb"]), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsafeObjectName { .. }));
        assert!(!dir.path().join("escape.csv").exists());
    }

    #[tokio::test]
    async fn test_unsafe_name_in_later_container_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data");
        fs::create_dir(&target).unwrap();
        let store = MemoryStore::default()
            .with("gvb", "ritten.csv", "text/csv", "a,b\n")
            .with("mora", "/abs/report.csv", "text/csv", "x");

        let err = download_containers(&store, &wanted(&["gvb", "mora"]), &target)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnsafeObjectName { .. }));
        assert!(tree(&target).is_empty());
    }

    #[tokio::test]
    async fn test_object_named_like_placeholder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PLACEHOLDER_ENTRY), "data goes here").unwrap();
        let store = MemoryStore::default()
            .with("mora", "MORA_data_data.csv", "text/csv", "mora")
            .with("mora", PLACEHOLDER_ENTRY, "text/plain", "remote readme");

        let err = download_containers(&store, &wanted(&["mora"]), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Precondition { .. }));
        assert_eq!(tree(dir.path()), vec![PLACEHOLDER_ENTRY]);
        assert_eq!(
            fs::read_to_string(dir.path().join(PLACEHOLDER_ENTRY)).unwrap(),
            "data goes here"
        );
    }

    #[tokio::test]
    async fn test_same_name_in_two_containers_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default()
            .with("gvb", "data.csv", "text/csv", "gvb")
            .with("mora", "data.csv", "text/csv", "mora");

        let err = download_containers(&store, &wanted(&["gvb", "mora"]), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Precondition { .. }));
        assert!(tree(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_three_listing_calls_for_two_full_pages() {
        let dir = tempfile::tempdir().unwrap();
        let total = 2 * PAGE_LIMIT + 3;
        let mut store = MemoryStore::default();
        store.containers.insert(
            "big".to_string(),
            (0..total)
                .map(|i| {
                    (
                        RemoteObject {
                            name: format!("obj{i:06}"),
                            content_type: DIRECTORY_CONTENT_TYPE.to_string(),
                        },
                        Vec::new(),
                    )
                })
                .collect(),
        );

        let report = download_containers(&store, &wanted(&["big"]), dir.path())
            .await
            .unwrap();

        assert_eq!(*store.object_listings.lock().unwrap(), 3);
        assert_eq!(report.objects_listed, total);
        assert_eq!(report.objects_written, 0);
    }

    #[test]
    fn test_object_path_accepts_nested_names() {
        let base = Path::new("/data");
        assert_eq!(
            object_path(base, "gvb/ritten.csv").unwrap(),
            PathBuf::from("/data/gvb/ritten.csv")
        );
        assert!(object_path(base, "/etc/passwd").is_err());
        assert!(object_path(base, "").is_err());
    }
}
