use crate::{
    error::{error_chain, Error, Result},
    record::Record,
};
use ignore::WalkBuilder;
use memchr::memmem;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use tracing::{debug, trace};

/// Extensions of sibling files the main template may include, extend or
/// import.
static TEMPLATE_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "html", "htm", "xml", "svg", "css", "txt", "md", "tera", "j2", "jinja", "jinja2",
    ]
    .into_iter()
    .collect()
});

/// A parsed template loaded once per run and rendered once per record.
///
/// The directory holding the template is the resolution root for anything
/// it references. Auto-escaping is on for every template regardless of its
/// file extension, so field values cannot inject markup.
#[derive(Debug)]
pub struct TemplateEngine {
    tera: Tera,
    name: String,
}

impl TemplateEngine {
    /// Loads the template at `path` and every template it references,
    /// directly or through other templates.
    ///
    /// Files in the same directory tree that nothing references are never
    /// read, so they cannot break the load.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateLoad`] if the file is missing, or if it or a
    /// template it references cannot be read or fails to parse.
    pub fn load(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::template_load(path, "path has no file name"))?;
        let base_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let main = fs::read_to_string(path)
            .map_err(|e| Error::template_load(path, e.to_string()))?;

        let candidates = Self::find_candidates(&base_dir, path);
        let templates = Self::resolve_references(name.clone(), main, &candidates)?;

        let mut tera = Tera::default();
        tera.autoescape_on(vec![""]);
        tera.add_raw_templates(templates)
            .map_err(|e| Error::template_load(path, error_chain(&e)))?;

        debug!(
            "Loaded template '{}' from {} ({} templates registered)",
            name,
            base_dir.display(),
            tera.get_template_names().count()
        );

        Ok(Self { tera, name })
    }

    /// Builds an engine from an in-memory template, mainly for tests and
    /// library callers that do not keep templates on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateLoad`] if the source fails to parse.
    pub fn from_source(name: &str, source: &str) -> Result<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![""]);
        tera.add_raw_template(name, source)
            .map_err(|e| Error::template_load(name, error_chain(&e)))?;

        Ok(Self {
            tera,
            name: name.to_string(),
        })
    }

    /// Lists template-like files under `base_dir` other than `main`, keyed
    /// by their `/`-separated path relative to `base_dir`.
    fn find_candidates(base_dir: &Path, main: &Path) -> HashMap<String, PathBuf> {
        let main = fs::canonicalize(main).ok();
        let walker = WalkBuilder::new(base_dir)
            .hidden(true)
            .git_ignore(true)
            .follow_links(false)
            .build();

        walker
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|entry| has_template_extension(entry.path()))
            .filter(|entry| fs::canonicalize(entry.path()).ok() != main)
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(base_dir).ok()?;
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                Some((name, entry.into_path()))
            })
            .collect()
    }

    /// Reads the templates reachable from the main template through the
    /// names quoted in their tags, main first.
    fn resolve_references(
        name: String,
        main: String,
        candidates: &HashMap<String, PathBuf>,
    ) -> Result<Vec<(String, String)>> {
        let mut visited = HashSet::from([name.clone()]);
        let mut pending = VecDeque::from([(name, main)]);
        let mut templates = Vec::new();

        while let Some((current, source)) = pending.pop_front() {
            for referenced in referenced_names(&source) {
                let Some(path) = candidates.get(referenced) else {
                    continue;
                };
                if !visited.insert(referenced.to_string()) {
                    continue;
                }
                trace!("'{}' references '{}'", current, referenced);
                let content = fs::read_to_string(path)
                    .map_err(|e| Error::template_load(path, e.to_string()))?;
                pending.push_back((referenced.to_string(), content));
            }
            templates.push((current, source));
        }

        trace!(
            "{} of {} sibling files are referenced",
            templates.len() - 1,
            candidates.len()
        );
        Ok(templates)
    }

    /// Name of the main template, relative to its directory.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders the main template with `row` and `row_number` in context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateRender`] if the template references
    /// something the context cannot satisfy.
    pub fn render(&self, record: &Record, row_number: usize) -> Result<String> {
        let mut context = Context::new();
        context.insert("row", record);
        context.insert("row_number", &row_number);

        self.tera
            .render(&self.name, &context)
            .map_err(|e| Error::template_render(&self.name, row_number, &e))
    }
}

/// String literals inside `{% ... %}` tags. `include`, `extends` and
/// `import` only accept literal names, so these cover every reference.
fn referenced_names(source: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = source;
    while let Some(open) = memmem::find(rest.as_bytes(), b"{%") {
        let tag_start = open + 2;
        let Some(len) = memmem::find(&rest.as_bytes()[tag_start..], b"%}") else {
            break;
        };
        names.extend(quoted_literals(&rest[tag_start..tag_start + len]));
        rest = &rest[tag_start + len + 2..];
    }
    names
}

fn quoted_literals(tag: &str) -> Vec<&str> {
    let mut literals = Vec::new();
    let mut rest = tag;
    while let Some((start, quote)) = rest
        .char_indices()
        .find(|(_, c)| matches!(c, '"' | '\'' | '`'))
    {
        let body = &rest[start + 1..];
        let Some(end) = body.find(quote) else {
            break;
        };
        literals.push(&body[..end]);
        rest = &body[end + 1..];
    }
    literals
}

fn has_template_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(ext.to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_render_row_and_row_number() {
        let engine = TemplateEngine::from_source("t", "Row {{row_number}}: {{row.name}}").unwrap();

        let a = Record::from_pairs([("name", "A")]);
        let b = Record::from_pairs([("name", "B")]);
        assert_eq!(engine.render(&a, 1).unwrap(), "Row 1: A");
        assert_eq!(engine.render(&b, 2).unwrap(), "Row 2: B");
    }

    #[test]
    fn test_autoescape_regardless_of_extension() {
        let engine = TemplateEngine::from_source("letter.txt", "<p>{{ row.name }}</p>").unwrap();
        let record = Record::from_pairs([("name", "<b>Ada & co</b>")]);

        let html = engine.render(&record, 1).unwrap();
        assert!(html.contains("&lt;b&gt;Ada &amp; co&lt;&#x2F;b&gt;"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn test_undefined_field_is_render_error() {
        let engine = TemplateEngine::from_source("t", "{{ row.missing }}").unwrap();
        let err = engine.render(&Record::from_pairs([("name", "A")]), 5).unwrap_err();
        assert!(matches!(err, Error::TemplateRender { row: 5, .. }));
    }

    #[test]
    fn test_load_resolves_siblings() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("base.html")
            .write_str("<html><body>{% block body %}{% endblock %}</body></html>")
            .unwrap();
        temp.child("partials/footer.html")
            .write_str("<footer>#{{ row_number }}</footer>")
            .unwrap();
        temp.child("letter.html")
            .write_str(
                "{% extends \"base.html\" %}{% block body %}Dear {{ row.name }}\
                 {% include \"partials/footer.html\" %}{% endblock %}",
            )
            .unwrap();
        temp.child("logo.png").write_binary(&[0x89, 0x50, 0xff, 0x00]).unwrap();

        let engine = TemplateEngine::load(&temp.path().join("letter.html")).unwrap();
        assert_eq!(engine.name(), "letter.html");

        let html = engine.render(&Record::from_pairs([("name", "Ada")]), 9).unwrap();
        assert_eq!(
            html,
            "<html><body>Dear Ada<footer>#9</footer></body></html>"
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = TemplateEngine::load(Path::new("/nonexistent/letter.html")).unwrap_err();
        assert!(matches!(err, Error::TemplateLoad { .. }));
    }

    #[test]
    fn test_load_syntax_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("broken.html")
            .write_str("{% if row.name %}unclosed")
            .unwrap();

        let err = TemplateEngine::load(&temp.path().join("broken.html")).unwrap_err();
        assert!(matches!(err, Error::TemplateLoad { .. }));
    }

    #[test]
    fn test_unreferenced_broken_sibling_is_ignored() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("letter.html")
            .write_str("<p>Dear {{ row.name }}</p>")
            .unwrap();
        temp.child("NOTES.md")
            .write_str("Use `{{ row.field` to insert a value")
            .unwrap();

        let engine = TemplateEngine::load(&temp.path().join("letter.html")).unwrap();
        let html = engine.render(&Record::from_pairs([("name", "Ada")]), 1).unwrap();
        assert_eq!(html, "<p>Dear Ada</p>");
    }

    #[test]
    fn test_referenced_broken_template_fails_load() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("layout.html")
            .write_str("{% block body %}{% endblock %}{% include 'partials/sig.html' %}")
            .unwrap();
        temp.child("partials/sig.html")
            .write_str("{% if row.name %}unclosed")
            .unwrap();
        temp.child("letter.html")
            .write_str("{% extends \"layout.html\" %}{% block body %}x{% endblock %}")
            .unwrap();

        let err = TemplateEngine::load(&temp.path().join("letter.html")).unwrap_err();
        assert!(matches!(err, Error::TemplateLoad { .. }));
    }

    #[test]
    fn test_referenced_names_only_inside_tags() {
        let source = "Don't {% include \"a.html\" %} \"b.html\" {%- import 'm.tera' as m -%}";
        assert_eq!(referenced_names(source), vec!["a.html", "m.tera"]);
        assert!(referenced_names("{% if x %}unterminated").is_empty());
    }

    #[test]
    fn test_template_extension_filter() {
        assert!(has_template_extension(Path::new("a/b.HTML")));
        assert!(has_template_extension(Path::new("x.j2")));
        assert!(!has_template_extension(Path::new("logo.png")));
        assert!(!has_template_extension(Path::new("Makefile")));
    }
}
