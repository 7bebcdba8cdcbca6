use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Prompt template for role '{role}' not found at {}", path.display())]
    NotFound { role: String, path: PathBuf },

    #[error("Error loading prompt template for role '{role}' from {}: {source}", path.display())]
    Io {
        role: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TemplateError {
    pub fn role(&self) -> &str {
        match self {
            TemplateError::NotFound { role, .. } => role,
            TemplateError::Io { role, .. } => role,
        }
    }
}

/// Resolves a role identifier to its system prompt
pub trait RoleTemplateStore: Send + Sync {
    fn load(&self, role: &str) -> Result<String, TemplateError>;
}

/// Loads role templates from a prompts directory.
///
/// A role id is tried as a file name first; ids without an extension also
/// try `<role>.txt`, so `critic` and `critic.txt` name the same template.
/// Loaded templates are cached for the life of the store.
pub struct FileTemplateStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl FileTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn candidates(&self, role: &str) -> Vec<PathBuf> {
        let primary = self.dir.join(role);
        if Path::new(role).extension().is_some() {
            vec![primary]
        } else {
            vec![primary, self.dir.join(format!("{}.txt", role))]
        }
    }

    fn cached(&self, role: &str) -> Option<String> {
        self.cache.lock().ok().and_then(|c| c.get(role).cloned())
    }

    fn remember(&self, role: &str, template: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(role.to_string(), template.to_string());
        }
    }
}

impl RoleTemplateStore for FileTemplateStore {
    fn load(&self, role: &str) -> Result<String, TemplateError> {
        if let Some(template) = self.cached(role) {
            return Ok(template);
        }

        let candidates = self.candidates(role);
        for path in &candidates {
            match std::fs::read_to_string(path) {
                Ok(template) => {
                    debug!(role, path = %path.display(), "Loaded role template");
                    self.remember(role, &template);
                    return Ok(template);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(TemplateError::Io {
                        role: role.to_string(),
                        path: path.clone(),
                        source,
                    })
                }
            }
        }

        Err(TemplateError::NotFound {
            role: role.to_string(),
            path: self.dir.join(role),
        })
    }
}

/// Map-backed template store
#[derive(Debug, Default, Clone)]
pub struct InMemoryTemplateStore {
    templates: HashMap<String, String>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, role: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(role.into(), template.into());
        self
    }
}

impl RoleTemplateStore for InMemoryTemplateStore {
    fn load(&self, role: &str) -> Result<String, TemplateError> {
        self.templates
            .get(role)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound {
                role: role.to_string(),
                path: PathBuf::from(role),
            })
    }
}
