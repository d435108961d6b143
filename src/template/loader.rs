use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Source of template text for `extends`, `include` and `Environment::render`
pub trait TemplateLoader: Send + Sync {
    /// Return the source of template `name`, or `Error::NotFound`
    fn load(&self, name: &str) -> Result<String>;
}

impl<F> TemplateLoader for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn load(&self, name: &str) -> Result<String> {
        self(name)
    }
}

/// Loads templates from files under a base directory
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    base_dir: PathBuf,
    extension: String,
}

impl FileSystemLoader {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            extension: "html".to_string(),
        }
    }

    /// Extension appended to names that do not already carry it
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the path to a template file
    pub fn template_path(&self, name: &str) -> Result<PathBuf> {
        // '/page' and 'page' resolve to the same file
        let relative = name.strip_prefix('/').unwrap_or(name);
        if relative.is_empty() {
            return Err(Error::not_found(name));
        }

        let relative = Path::new(relative);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::template(format!(
                "template name '{}' leaves the views directory",
                name
            )));
        }

        let mut path = self.base_dir.join(relative);
        let has_extension = self.extension.is_empty()
            || path
                .extension()
                .is_some_and(|ext| ext.to_string_lossy() == self.extension);
        if !has_extension {
            let mut file_name = path
                .file_name()
                .map(|f| f.to_os_string())
                .unwrap_or_default();
            file_name.push(".");
            file_name.push(&self.extension);
            path.set_file_name(file_name);
        }

        Ok(path)
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> Result<String> {
        let path = self.template_path(name)?;
        match std::fs::read_to_string(&path) {
            Ok(source) => {
                log::debug!("Loaded template '{}' from {}", name, path.display());
                Ok(source)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(name)),
            Err(e) => Err(Error::template(format!(
                "Failed to load template {:?}: {}",
                path, e
            ))),
        }
    }
}

/// Templates held in memory, keyed by name
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    templates: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateLoader for MemoryLoader {
    fn load(&self, name: &str) -> Result<String> {
        let key = name.strip_prefix('/').unwrap_or(name);
        self.templates
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(name))
    }
}
