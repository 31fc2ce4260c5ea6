//! Template engine for notification titles and texts.
//!
//! A `TemplateEngine` is a compiled namespace of named templates built from
//! the built-in template source (optional) followed by every file matched by
//! the configured globs, in order. Later definitions replace earlier ones of
//! the same name.
//!
//! Templates use Handlebars syntax. A source declares named templates with
//! `{{#*inline "name"}}...{{/inline}}` blocks; a file that declares none is
//! registered whole under its file stem. Named templates are used as
//! partials: `{{> link_title}}`.

pub mod helpers;

use handlebars::{
    no_escape, Context, Handlebars, RenderContext, RenderError, Renderable, StringOutput, Template,
};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// The built-in template source, defining `link_title` and `link_content`.
pub const BUILTIN_TEMPLATES: &str = include_str!("default.hbs");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to parse template {name:?}: {source}")]
    Parse {
        name: String,
        #[source]
        source: handlebars::TemplateError,
    },

    #[error("invalid template glob {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to read template file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render template: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// A compiled, immutable set of named templates plus helpers.
pub struct TemplateEngine {
    registry: Handlebars<'static>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("templates", &self.template_names())
            .finish()
    }
}

impl TemplateEngine {
    /// Builds an engine from the built-in templates (when `load_builtin` is
    /// set) and the files matched by `globs`.
    ///
    /// A glob that matches nothing is not an error, so template files can be
    /// added later and picked up on reload.
    pub fn from_globs<S: AsRef<str>>(load_builtin: bool, globs: &[S]) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(no_escape);
        helpers::register(&mut registry);

        let mut engine = Self { registry };
        if load_builtin {
            engine.register_source(BUILTIN_TEMPLATES, "<builtin>")?;
        }

        for pattern in globs {
            let pattern = pattern.as_ref();
            let paths = glob::glob(pattern).map_err(|source| TemplateError::Glob {
                pattern: pattern.to_string(),
                source,
            })?;
            for entry in paths {
                let path = entry.map_err(|e| TemplateError::Read {
                    path: e.path().to_path_buf(),
                    source: e.into_error(),
                })?;
                if path.is_file() {
                    engine.register_file(&path)?;
                }
            }
        }

        Ok(engine)
    }

    /// Renders `text` against `data`.
    ///
    /// Empty text renders to the empty string without being parsed. Inline
    /// templates declared by `text` are local to this call; the engine's
    /// named templates are visible but never modified, so concurrent renders
    /// cannot interfere with each other.
    pub fn render<T: Serialize>(&self, text: &str, data: &T) -> Result<String, TemplateError> {
        if text.is_empty() {
            return Ok(String::new());
        }
        let template = compile_inline(text)?;
        let context = Context::wraps(data)?;
        let mut output = StringOutput::new();
        template.render(&self.registry, &context, &mut RenderContext::new(None), &mut output)?;
        Ok(output.into_string().map_err(RenderError::from)?)
    }

    /// Parses `text` without rendering it.
    pub fn check_syntax(&self, text: &str) -> Result<(), TemplateError> {
        compile_inline(text).map(|_| ())
    }

    /// Returns true if a named template `name` is defined.
    pub fn has_template(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }

    /// Names of all defined templates, sorted.
    pub fn template_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .registry
            .get_templates()
            .keys()
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    fn register_file(&mut self, path: &Path) -> Result<(), TemplateError> {
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.display().to_string();
        if self.register_source(&source, &origin)? == 0 {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(origin.as_str())
                .to_string();
            self.register(&stem, &source)?;
        }
        Ok(())
    }

    /// Registers every inline block of `source`; returns how many there were.
    fn register_source(&mut self, source: &str, origin: &str) -> Result<usize, TemplateError> {
        let blocks = inline_blocks(source);
        for (name, body) in &blocks {
            debug!(template = %name, origin, "Registering template");
            self.register(name, body)?;
        }
        Ok(blocks.len())
    }

    fn register(&mut self, name: &str, body: &str) -> Result<(), TemplateError> {
        self.registry
            .register_template_string(name, body)
            .map_err(|source| TemplateError::Parse {
                name: name.to_string(),
                source,
            })
    }
}

fn compile_inline(text: &str) -> Result<Template, TemplateError> {
    Template::compile(text).map_err(|source| TemplateError::Parse {
        name: "<inline>".to_string(),
        source,
    })
}

fn inline_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)\{\{~?\s*#\*inline\s+"([^"]+)"\s*(~?)\}\}(.*?)\{\{(~?)\s*/inline\s*~?\}\}"#)
            .expect("inline block pattern is valid")
    })
}

/// Splits a template source into its top-level `{{#*inline}}` blocks,
/// honouring `~` whitespace control on the block tags.
fn inline_blocks(source: &str) -> Vec<(String, String)> {
    inline_block_re()
        .captures_iter(source)
        .map(|caps| {
            let mut body = &caps[3];
            if !caps[2].is_empty() {
                body = body.trim_start();
            }
            if !caps[4].is_empty() {
                body = body.trim_end();
            }
            (caps[1].to_string(), body.to_string())
        })
        .collect()
}
