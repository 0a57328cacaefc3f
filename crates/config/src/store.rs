// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Recipe loading, name resolution and caching.

use crate::error::Error;
use crate::recipe::Recipe;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Loads recipes from `recipes/<category>/<name>.yaml` and caches
/// them under both the requested and the canonical name.
///
/// Name resolution: an input containing a slash is looked up at the
/// literal path; a bare name is searched across all category
/// directories and the first match wins.
pub struct RecipeStore {
    recipes_dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Recipe>>>,
}

impl RecipeStore {
    /// Creates a store over the given recipes directory.
    pub fn new(recipes_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipes_dir: recipes_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Loads and validates a recipe by bare or canonical name.
    pub fn load(&self, name: &str) -> Result<Arc<Recipe>, Error> {
        if let Some(hit) = self.cache_get(name) {
            return Ok(hit);
        }

        let (canonical, file) = self.resolve(name).ok_or_else(|| Error::RecipeNotFound {
            name: name.to_string(),
        })?;

        if let Some(hit) = self.cache_get(&canonical) {
            self.cache_put(name, hit.clone());
            return Ok(hit);
        }

        let raw = std::fs::read_to_string(&file).map_err(|source| Error::RecipeIo {
            path: file.display().to_string(),
            source,
        })?;
        let mut recipe: Recipe =
            serde_yaml::from_str(&raw).map_err(|source| Error::RecipeParse {
                path: file.display().to_string(),
                source,
            })?;
        recipe.path = Some(canonical.clone());
        recipe.validate()?;

        let recipe = Arc::new(recipe);
        self.cache_put(&canonical, recipe.clone());
        if canonical != name {
            self.cache_put(name, recipe.clone());
        }
        debug!(recipe = %canonical, "loaded recipe");
        Ok(recipe)
    }

    /// Lists every recipe found under the recipes directory. Files
    /// that fail to parse are logged and skipped.
    pub fn list_all(&self) -> Vec<Arc<Recipe>> {
        let mut out = Vec::new();
        let Ok(categories) = std::fs::read_dir(&self.recipes_dir) else {
            warn!(dir = %self.recipes_dir.display(), "recipes directory does not exist");
            return out;
        };
        for category in categories.flatten() {
            if !category.path().is_dir() {
                continue;
            }
            let cat_name = category.file_name().to_string_lossy().to_string();
            let Ok(files) = std::fs::read_dir(category.path()) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match self.load(&format!("{cat_name}/{stem}")) {
                    Ok(recipe) => out.push(recipe),
                    Err(e) => warn!(file = %path.display(), error = %e, "skipping recipe"),
                }
            }
        }
        out
    }

    /// Drops every cached recipe so the next load re-reads from disk.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn resolve(&self, name: &str) -> Option<(String, PathBuf)> {
        if name.contains('/') {
            let candidate = self.recipes_dir.join(format!("{name}.yaml"));
            return candidate.exists().then(|| (name.to_string(), candidate));
        }
        let categories = std::fs::read_dir(&self.recipes_dir).ok()?;
        for category in categories.flatten() {
            if !category.path().is_dir() {
                continue;
            }
            let candidate = category.path().join(format!("{name}.yaml"));
            if candidate.exists() {
                let canonical =
                    format!("{}/{}", category.file_name().to_string_lossy(), name);
                return Some((canonical, candidate));
            }
        }
        None
    }

    fn cache_get(&self, key: &str) -> Option<Arc<Recipe>> {
        self.lock_cache().get(key).cloned()
    }

    fn cache_put(&self, key: &str, value: Arc<Recipe>) {
        let _ = self.lock_cache().insert(key.to_string(), value);
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Recipe>>> {
        // Cache poisoning would mean a panic mid-insert; the map stays usable.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for RecipeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeStore")
            .field("recipes_dir", &self.recipes_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_recipe_file(root: &Path, category: &str, name: &str, yaml: &str) -> PathBuf {
        let dir = root.join(category);
        std::fs::create_dir_all(&dir).expect("create category dir");
        let path = dir.join(format!("{name}.yaml"));
        std::fs::write(&path, yaml).expect("write recipe");
        path
    }

    const VLLM: &str = "name: vllm-single-node\ncategory: inference\nports: [8001]\n";
    const QDRANT: &str = "name: qdrant\ncategory: vector-db\nports: [6333]\n";

    fn store() -> (TempDir, RecipeStore) {
        let dir = TempDir::new().expect("tempdir");
        write_recipe_file(dir.path(), "inference", "vllm-single-node", VLLM);
        write_recipe_file(dir.path(), "vector-db", "qdrant", QDRANT);
        let store = RecipeStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn canonical_name_loads_directly() {
        let (_dir, store) = store();
        let r = store.load("inference/vllm-single-node").expect("load");
        assert_eq!(r.path.as_deref(), Some("inference/vllm-single-node"));
    }

    #[test]
    fn bare_name_resolves_across_categories() {
        let (_dir, store) = store();
        let r = store.load("qdrant").expect("load");
        assert_eq!(r.path.as_deref(), Some("vector-db/qdrant"));
        // Second load hits the cache under the bare name.
        let again = store.load("qdrant").expect("load");
        assert!(Arc::ptr_eq(&r, &again));
    }

    #[test]
    fn unknown_recipe_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load("no-such-recipe"),
            Err(Error::RecipeNotFound { .. })
        ));
    }

    #[test]
    fn list_all_skips_invalid_files() {
        let (dir, store) = store();
        write_recipe_file(dir.path(), "inference", "broken", "category: inference\n");
        let all = store.list_all();
        assert_eq!(all.len(), 2);
    }
}
