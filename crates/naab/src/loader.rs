//! Module loading.
//!
//! A module path is a dotted identifier resolved to a `.naab` file relative
//! to the importing file's directory, then each configured search root.
//! Files load once per canonical path; a re-entrant load of a path still
//! marked "loading" returns the partially populated environment, which is
//! how import cycles terminate. Parsing is delegated to the embedder
//! through the [`ModuleParser`] hook — the core never parses NAAb surface
//! syntax itself.

use std::path::{Path, PathBuf};

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::Program,
    env::EnvId,
    exception::{Error, ErrorKind, RunError, RunResult},
    resource::{MAX_FILE_SIZE, MAX_LINE_LEN},
};

/// Embedder-supplied parser hook. Receives the module source and canonical
/// path, returns the parsed program or a load-time `ParseError`.
pub trait ModuleParser: std::fmt::Debug {
    fn parse_module(&self, source: &str, path: &Path) -> Result<Program, Error>;
}

/// Cache entry for one canonical module path.
#[derive(Debug)]
pub(crate) struct ModuleEntry {
    pub env: EnvId,
    /// Names exported so far. Grows while the module is still loading, so
    /// cycle participants observe the partial table.
    pub exports: AHashSet<String>,
    pub loading: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ModuleLoader {
    cache: AHashMap<PathBuf, ModuleEntry>,
    /// env -> canonical path, for member-access export checks.
    by_env: AHashMap<EnvId, PathBuf>,
    search_roots: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new(search_roots: Vec<PathBuf>) -> Self {
        Self {
            cache: AHashMap::new(),
            by_env: AHashMap::new(),
            search_roots,
        }
    }

    /// Resolves a dotted module path to a canonical file path, searching the
    /// importing file's directory first, then the configured roots.
    pub fn resolve(&self, segments: &[String], current_file: &str) -> RunResult<PathBuf> {
        let mut relative = PathBuf::new();
        for segment in segments {
            relative.push(segment);
        }
        relative.set_extension("naab");

        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(dir) = Path::new(current_file).parent() {
            candidates.push(dir.join(&relative));
        }
        for root in &self.search_roots {
            candidates.push(root.join(&relative));
        }

        for candidate in &candidates {
            if candidate.is_file() {
                return std::fs::canonicalize(candidate).map_err(|err| {
                    RunError::err(
                        ErrorKind::IOError,
                        format!("cannot canonicalize {}: {err}", candidate.display()),
                    )
                });
            }
        }
        Err(RunError::err(
            ErrorKind::ModuleNotFound,
            format!("cannot resolve module {}", segments.join(".")),
        ))
    }

    /// Reads module source with the file-size and line-length caps applied.
    pub fn read_source(&self, path: &Path) -> RunResult<String> {
        let metadata = std::fs::metadata(path)
            .map_err(|err| RunError::err(ErrorKind::IOError, format!("cannot stat {}: {err}", path.display())))?;
        if metadata.len() > MAX_FILE_SIZE as u64 {
            return Err(RunError::err(
                ErrorKind::ResourceLimit,
                format!("module {} exceeds the 10 MiB cap", path.display()),
            ));
        }
        let source = std::fs::read_to_string(path)
            .map_err(|err| RunError::err(ErrorKind::IOError, format!("cannot read {}: {err}", path.display())))?;
        if let Some((line_no, _)) = source
            .lines()
            .enumerate()
            .find(|(_, line)| line.len() > MAX_LINE_LEN)
        {
            return Err(RunError::err(
                ErrorKind::ResourceLimit,
                format!(
                    "line {} of {} exceeds the 10000-character cap",
                    line_no + 1,
                    path.display()
                ),
            ));
        }
        Ok(source)
    }

    pub fn entry(&self, path: &Path) -> Option<&ModuleEntry> {
        self.cache.get(path)
    }

    /// Marks a path as loading with its freshly created root environment.
    pub fn begin_loading(&mut self, path: PathBuf, env: EnvId) {
        self.by_env.insert(env, path.clone());
        self.cache.insert(
            path,
            ModuleEntry {
                env,
                exports: AHashSet::new(),
                loading: true,
            },
        );
    }

    pub fn add_export(&mut self, path: &Path, name: &str) {
        if let Some(entry) = self.cache.get_mut(path) {
            entry.exports.insert(name.to_owned());
        }
    }

    pub fn finish_loading(&mut self, path: &Path) {
        if let Some(entry) = self.cache.get_mut(path) {
            entry.loading = false;
        }
    }

    /// Abandons a failed load so a later import retries it.
    pub fn abandon(&mut self, path: &Path) -> Option<EnvId> {
        if let Some(entry) = self.cache.remove(path) {
            self.by_env.remove(&entry.env);
            return Some(entry.env);
        }
        None
    }

    /// Whether `name` is exported by the module rooted at `env`.
    pub fn is_exported(&self, env: EnvId, name: &str) -> bool {
        self.by_env
            .get(&env)
            .and_then(|path| self.cache.get(path))
            .is_some_and(|entry| entry.exports.contains(name))
    }

    /// Every loaded module's root environment; these are GC roots.
    pub fn module_envs(&self) -> Vec<EnvId> {
        self.cache.values().map(|entry| entry.env).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_prefers_the_importing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("app");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("db.naab"), "x").unwrap();

        let loader = ModuleLoader::new(vec![]);
        let current = nested.join("main.naab");
        let resolved = loader
            .resolve(&["db".to_owned()], current.to_str().unwrap())
            .unwrap();
        assert!(resolved.ends_with("db.naab"));
    }

    #[test]
    fn resolution_falls_back_to_search_roots() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("lib");
        std::fs::create_dir_all(root.join("app/services")).unwrap();
        std::fs::write(root.join("app/services/db.naab"), "x").unwrap();

        let loader = ModuleLoader::new(vec![root]);
        let resolved = loader
            .resolve(
                &["app".to_owned(), "services".to_owned(), "db".to_owned()],
                "/nonexistent/main.naab",
            )
            .unwrap();
        assert!(resolved.ends_with("app/services/db.naab"));
    }

    #[test]
    fn unresolvable_module_reports_module_not_found() {
        let loader = ModuleLoader::new(vec![]);
        let err = loader
            .resolve(&["ghost".to_owned()], "/nonexistent/main.naab")
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ModuleNotFound));
    }
}
