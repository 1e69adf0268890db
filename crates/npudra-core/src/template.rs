//! Partition template catalog.
//!
//! A template is a named (AI core count, memory size) shape that a physical
//! NPU can be carved into. The catalog is loaded once at startup, either from
//! the vendor's template table (`npu-smi info -t template-info` output saved
//! to a file) or from a built-in default set.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};

/// Rows whose first column starts with this prefix are partition templates.
pub const TEMPLATE_NAME_PREFIX: &str = "vir";

/// A named partition shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    /// AI core count.
    pub ai_core: u32,
    /// Memory size in GB.
    pub memory_gb: u32,
}

impl Template {
    pub fn new(name: impl Into<String>, ai_core: u32, memory_gb: u32) -> Self {
        Self {
            name: name.into(),
            ai_core,
            memory_gb,
        }
    }

    /// Whether this template meets or exceeds the requested minimums.
    pub fn satisfies(&self, ai_core: u32, memory_gb: u32) -> bool {
        self.ai_core >= ai_core && self.memory_gb >= memory_gb
    }

    /// Total surplus over the requested minimums. Only meaningful when
    /// [`Template::satisfies`] holds.
    pub fn surplus(&self, ai_core: u32, memory_gb: u32) -> u64 {
        u64::from(self.ai_core - ai_core) + u64::from(self.memory_gb - memory_gb)
    }
}

/// Templates keyed by name. Inserting an existing name overwrites it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Template>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in catalog used when no template table can be read.
    pub fn default_catalog() -> Self {
        let mut catalog = Self::new();
        catalog.insert(Template::new("vir01", 4, 8));
        catalog.insert(Template::new("vir02", 8, 12));
        catalog.insert(Template::new("vir04", 16, 16));
        catalog
    }

    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Keep only the templates matching `keep`.
    pub fn filtered(&self, mut keep: impl FnMut(&Template) -> bool) -> Self {
        Self {
            templates: self
                .templates
                .iter()
                .filter(|(_, t)| keep(t))
                .map(|(k, t)| (k.clone(), t.clone()))
                .collect(),
        }
    }

    /// Load the catalog from a template table file.
    ///
    /// An unreadable file falls back to [`TemplateCatalog::default_catalog`];
    /// a readable file without a recognizable header is an error.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(?path, error = %e, "template table unreadable, using default templates");
                let catalog = Self::default_catalog();
                info!(templates = catalog.len(), "default templates loaded");
                return Ok(catalog);
            }
        };
        let catalog = Self::parse(&content)?;
        info!(?path, templates = catalog.len(), "templates loaded from table");
        Ok(catalog)
    }

    /// Parse the text table printed by the NPU management tool.
    ///
    /// The header line names the `Name`, `AICORE` and `Memory` columns. The
    /// line right after the header is a units line; data rows start after the
    /// next `==` separator.
    pub fn parse(output: &str) -> CoreResult<Self> {
        let whitespace =
            Regex::new(r"\s+").map_err(|e| CoreError::TemplateTable(e.to_string()))?;
        let mut lines = output.lines();

        let header = lines
            .by_ref()
            .find(|line| line.contains("Name") && line.contains("AICORE") && line.contains("Memory"))
            .ok_or_else(|| CoreError::TemplateTable("template info header not found".to_string()))?;

        let columns: BTreeMap<&str, usize> = split_fields(&whitespace, header)
            .into_iter()
            .enumerate()
            .map(|(pos, field)| (field, pos))
            .collect();

        // Units line, then everything up to the separator.
        lines.next();
        for line in lines.by_ref() {
            if line.contains("==") {
                break;
            }
        }

        let mut catalog = Self::new();
        for line in lines {
            let fields = split_fields(&whitespace, line);
            let Some(name) = fields.first() else { continue };
            if line.contains("--") || !name.starts_with(TEMPLATE_NAME_PREFIX) {
                continue;
            }

            let mut template = Template::new(*name, 0, 0);
            for (&column, &pos) in &columns {
                let Some(raw) = fields.get(pos) else { continue };
                let value = match column {
                    "AICORE" => &mut template.ai_core,
                    "Memory" => &mut template.memory_gb,
                    _ => continue,
                };
                let cell = raw.strip_suffix("GB").unwrap_or(raw);
                match cell.parse::<u32>() {
                    Ok(v) => *value = v,
                    Err(e) => {
                        warn!(template = %name, column, value = %raw, error = %e, "unparsable template cell");
                    }
                }
            }
            catalog.insert(template);
        }
        Ok(catalog)
    }
}

/// Strip the table border and split a row into whitespace-separated fields.
fn split_fields<'a>(whitespace: &Regex, line: &'a str) -> Vec<&'a str> {
    let inner = line.trim().trim_matches('|').trim();
    if inner.is_empty() {
        return Vec::new();
    }
    whitespace.split(inner).collect()
}
