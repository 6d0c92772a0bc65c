//! UI entry descriptors and the `entry` data service.
//!
//! Plugins that ship a UI bundle register an [`Entry`]. The active set is
//! published under the reserved `entry` key, so clients receive the asset
//! manifest through the same channel as ordinary state.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::Connection;
use crate::console::WeakConsole;
use crate::error::HandlerError;
use crate::service::DataService;

/// Asset paths of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryFiles {
    /// One path, used in every mode.
    Single(String),
    /// Several paths, used in every mode.
    List(Vec<String>),
    /// Separate development and production paths.
    Modes { dev: String, prod: String },
}

impl From<&str> for EntryFiles {
    fn from(path: &str) -> Self {
        Self::Single(path.to_owned())
    }
}

impl From<String> for EntryFiles {
    fn from(path: String) -> Self {
        Self::Single(path)
    }
}

impl From<Vec<String>> for EntryFiles {
    fn from(paths: Vec<String>) -> Self {
        Self::List(paths)
    }
}

/// Which variant of [`EntryFiles::Modes`] is served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Development,
    #[default]
    Production,
}

/// Resolves entry files to the asset URLs sent to clients.
pub trait AssetResolver: Send + Sync {
    fn resolve(&self, files: &EntryFiles, mode: DeploymentMode) -> Vec<String>;
}

/// Picks the mode-specific path and prepends an optional base URL.
#[derive(Debug, Clone, Default)]
pub struct DefaultAssetResolver {
    base: Option<String>,
}

impl DefaultAssetResolver {
    /// Creates a resolver that prefixes every path with `base`.
    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn prefixed(&self, path: &str) -> String {
        match &self.base {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            None => path.to_owned(),
        }
    }
}

impl AssetResolver for DefaultAssetResolver {
    fn resolve(&self, files: &EntryFiles, mode: DeploymentMode) -> Vec<String> {
        match files {
            EntryFiles::Single(path) => vec![self.prefixed(path)],
            EntryFiles::List(paths) => paths.iter().map(|p| self.prefixed(p)).collect(),
            EntryFiles::Modes { dev, prod } => match mode {
                DeploymentMode::Development => vec![self.prefixed(dev)],
                DeploymentMode::Production => vec![self.prefixed(prod)],
            },
        }
    }
}

/// Per-connection data attached to an entry.
pub type EntryDataFn =
    Arc<dyn Fn(Connection) -> Pin<Box<dyn Future<Output = Value> + Send>> + Send + Sync>;

/// A registered UI bundle.
#[derive(Clone)]
pub struct Entry {
    pub files: EntryFiles,
    pub data: Option<EntryDataFn>,
}

impl Entry {
    /// An entry without per-connection data.
    pub fn new(files: impl Into<EntryFiles>) -> Self {
        Self {
            files: files.into(),
            data: None,
        }
    }

    /// Builder: attach a per-connection data callback.
    pub fn with_data<F, Fut>(mut self, data: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        let data: EntryDataFn = Arc::new(move |connection| Box::pin(data(connection)));
        self.data = Some(data);
        self
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("files", &self.files)
            .field("data", &self.data.is_some())
            .finish()
    }
}

/// One entry as delivered to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryView {
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Value of the `entry` key: the process identity plus every active entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySet {
    #[serde(rename = "_id")]
    pub process_id: String,
    #[serde(flatten)]
    pub entries: BTreeMap<String, EntryView>,
}

pub(crate) async fn build_entry_set(
    process_id: String,
    mode: DeploymentMode,
    resolver: &dyn AssetResolver,
    entries: Vec<(String, Entry)>,
    connection: &Connection,
) -> EntrySet {
    let views = entries.into_iter().map(|(id, entry)| {
        let files = resolver.resolve(&entry.files, mode);
        async move {
            let data = match &entry.data {
                Some(data) => Some(data(connection.clone()).await),
                None => None,
            };
            (id, EntryView { files, data })
        }
    });
    EntrySet {
        process_id,
        entries: join_all(views).await.into_iter().collect(),
    }
}

/// Data service behind the reserved `entry` key.
pub(crate) struct EntryService {
    pub(crate) console: WeakConsole,
}

#[async_trait]
impl DataService for EntryService {
    type Value = EntrySet;

    async fn get(&self, _forced: bool, connection: &Connection) -> Result<EntrySet, HandlerError> {
        let console = self.console.upgrade().ok_or("console has shut down")?;
        Ok(console.entry_set(connection).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionMeta;
    use serde_json::json;

    #[test]
    fn files_accept_all_shapes() {
        let single: EntryFiles = serde_json::from_value(json!("a.js")).unwrap();
        assert_eq!(single, EntryFiles::Single("a.js".into()));

        let list: EntryFiles = serde_json::from_value(json!(["a.js", "b.css"])).unwrap();
        assert_eq!(list, EntryFiles::List(vec!["a.js".into(), "b.css".into()]));

        let modes: EntryFiles =
            serde_json::from_value(json!({ "dev": "src/index.ts", "prod": "dist/index.js" }))
                .unwrap();
        assert!(matches!(modes, EntryFiles::Modes { .. }));
    }

    #[test]
    fn resolver_selects_mode() {
        let files = EntryFiles::Modes {
            dev: "src/index.ts".into(),
            prod: "dist/index.js".into(),
        };
        let resolver = DefaultAssetResolver::default();
        assert_eq!(
            resolver.resolve(&files, DeploymentMode::Development),
            vec!["src/index.ts"]
        );
        assert_eq!(
            resolver.resolve(&files, DeploymentMode::Production),
            vec!["dist/index.js"]
        );
    }

    #[test]
    fn resolver_prefixes_base() {
        let resolver = DefaultAssetResolver::with_base("/assets/");
        let files = EntryFiles::List(vec!["/a.js".into(), "b.css".into()]);
        assert_eq!(
            resolver.resolve(&files, DeploymentMode::Production),
            vec!["/assets/a.js", "/assets/b.css"]
        );
    }

    #[tokio::test]
    async fn entry_set_wire_shape() {
        let (connection, _rx) = Connection::new(ConnectionMeta::default(), 1024);
        let entries = vec![
            ("e1".to_string(), Entry::new("market.js")),
            (
                "e2".to_string(),
                Entry::new(vec!["logs.js".to_string()])
                    .with_data(|_| async { json!({ "lines": 3 }) }),
            ),
        ];
        let set = build_entry_set(
            "proc".into(),
            DeploymentMode::Production,
            &DefaultAssetResolver::default(),
            entries,
            &connection,
        )
        .await;

        insta::assert_json_snapshot!(set, @r#"
        {
          "_id": "proc",
          "e1": {
            "files": [
              "market.js"
            ]
          },
          "e2": {
            "files": [
              "logs.js"
            ],
            "data": {
              "lines": 3
            }
          }
        }
        "#);
    }
}
