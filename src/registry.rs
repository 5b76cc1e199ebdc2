use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::{ReportTemplate, BUILTIN_TEMPLATE_ID};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cannot delete the built-in default template")]
    BuiltinDelete,
    #[error("template `{0}` not found")]
    NotFound(String),
    #[error("template `{0}` is still used by saved reports")]
    InUse(String),
    #[error("template id `{0}` is not usable as a storage key")]
    InvalidId(String),
    #[error("invalid template: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Preferences {
    #[serde(default)]
    default_template_id: Option<String>,
}

/// The set of templates available to the application: the built-in default
/// plus every template imported into the registry's directory, keyed by
/// template id. Also owns the "default template for new reports" preference.
///
/// One instance is constructed at startup and passed by reference to whoever
/// needs lookups; the registry itself contains no locking, so threaded
/// embedders wrap it in their own mutex or confine it to one owner.
pub struct TemplateRegistry {
    template_dir: PathBuf,
    prefs_path: PathBuf,
    templates: HashMap<String, ReportTemplate>,
    prefs: Preferences,
}

impl TemplateRegistry {
    /// Opens (creating if needed) the registry rooted at `base_dir`:
    /// templates live in `base_dir/templates/`, the preference file beside
    /// it. Unreadable or unparseable template files are skipped with an
    /// error log; the built-in default is always present.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let base = base_dir.as_ref();
        let template_dir = base.join("templates");
        fs::create_dir_all(&template_dir)?;
        let prefs_path = base.join("prefs.json");
        let prefs = load_prefs(&prefs_path);
        let mut registry = TemplateRegistry {
            template_dir,
            prefs_path,
            templates: HashMap::new(),
            prefs,
        };
        registry.reload()?;
        Ok(registry)
    }

    fn reload(&mut self) -> Result<(), TemplateError> {
        self.templates.clear();
        let builtin = ReportTemplate::builtin_default();
        self.templates.insert(builtin.template_id().to_string(), builtin);

        for entry in fs::read_dir(&self.template_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_template_file(&path) {
                Ok(template) => {
                    self.templates
                        .insert(template.template_id().to_string(), template);
                }
                Err(err) => error!("skipping template file {}: {err}", path.display()),
            }
        }
        debug!("loaded {} templates", self.templates.len());
        Ok(())
    }

    /// Every available template, in no particular order.
    pub fn list(&self) -> Vec<&ReportTemplate> {
        self.templates.values().collect()
    }

    pub fn get(&self, template_id: &str) -> Option<&ReportTemplate> {
        self.templates.get(template_id)
    }

    /// Lookup that falls back to the built-in default when `template_id` is
    /// unknown. The built-in is always loaded, so this cannot fail.
    pub fn get_or_builtin(&self, template_id: &str) -> &ReportTemplate {
        self.templates
            .get(template_id)
            .unwrap_or_else(|| &self.templates[BUILTIN_TEMPLATE_ID])
    }

    /// The id of the template new reports start from.
    pub fn default_template_id(&self) -> &str {
        self.prefs
            .default_template_id
            .as_deref()
            .unwrap_or(BUILTIN_TEMPLATE_ID)
    }

    pub fn set_default_template_id(&mut self, template_id: &str) -> Result<(), TemplateError> {
        self.prefs.default_template_id = Some(template_id.to_string());
        self.save_prefs()
    }

    /// Resolves the default-for-new-reports preference, falling back to the
    /// built-in template if the preferred one has disappeared.
    pub fn current_template(&self) -> &ReportTemplate {
        self.get_or_builtin(self.default_template_id())
    }

    /// Parses `bytes` as a single template JSON document and stores it,
    /// overwriting any template with the same id, then reloads. A parse
    /// failure leaves the registry untouched. Returns the imported id.
    pub fn import(&mut self, bytes: &[u8]) -> Result<String, TemplateError> {
        let template: ReportTemplate = serde_json::from_slice(bytes)?;
        let template_id = template.template_id().to_string();
        if template_id.is_empty()
            || template_id.contains(['/', '\\'])
            || template_id.contains("..")
        {
            return Err(TemplateError::InvalidId(template_id));
        }
        if self.templates.contains_key(&template_id) {
            warn!("template `{template_id}` already exists; overwriting");
        }
        let path = self.template_file(&template_id);
        fs::write(&path, serde_json::to_string_pretty(&template)?)?;
        debug!("template saved to {}", path.display());
        self.reload()?;
        Ok(template_id)
    }

    /// Deletes an imported template. The built-in default is never
    /// deletable; a template that `in_use` reports as referenced by saved
    /// reports is rejected (callers pass the store's lookup, keeping the
    /// referential-integrity check inside the delete itself). Deleting the
    /// current default-for-new-reports resets that preference to the
    /// built-in.
    pub fn delete(
        &mut self,
        template_id: &str,
        in_use: impl Fn(&str) -> bool,
    ) -> Result<(), TemplateError> {
        if template_id == BUILTIN_TEMPLATE_ID {
            return Err(TemplateError::BuiltinDelete);
        }
        let path = self.template_file(template_id);
        if !path.exists() {
            return Err(TemplateError::NotFound(template_id.to_string()));
        }
        if in_use(template_id) {
            return Err(TemplateError::InUse(template_id.to_string()));
        }
        fs::remove_file(&path)?;
        if self.default_template_id() == template_id {
            self.prefs.default_template_id = None;
            self.save_prefs()?;
        }
        self.reload()
    }

    fn template_file(&self, template_id: &str) -> PathBuf {
        self.template_dir.join(format!("{template_id}.json"))
    }

    fn save_prefs(&self) -> Result<(), TemplateError> {
        fs::write(&self.prefs_path, serde_json::to_string_pretty(&self.prefs)?)?;
        Ok(())
    }
}

fn load_template_file(path: &Path) -> Result<ReportTemplate, TemplateError> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn load_prefs(path: &Path) -> Preferences {
    match fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|err| {
            warn!("ignoring unreadable preferences file {}: {err}", path.display());
            Preferences::default()
        }),
        Err(_) => Preferences::default(),
    }
}
