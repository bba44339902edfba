//! Dependency explorer for Quill
//!
//! Handles multi-file programs by following `import` and `include`
//! directives: each target is located in the search directories, parsed,
//! registered and explored in turn. Units come out in post-order: every file
//! follows its own dependencies, siblings keep their first-seen order.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::ast::{Program, SourceMap, Spanned};
use crate::error::{CompileError, Diagnostics};
use crate::parser::parse_source;
use crate::sema::{Registration, register};
use crate::symbols::SymbolTables;

/// Resolve `name` against `search_dirs`, appending `extension` unless already present
pub fn resolve_file(name: &str, search_dirs: &[PathBuf], extension: &str) -> Option<PathBuf> {
    let file_name = if name.ends_with(&format!(".{extension}")) {
        name.to_string()
    } else {
        format!("{name}.{extension}")
    };
    let direct = Path::new(&file_name);
    if direct.is_absolute() {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    search_dirs.iter().map(|dir| dir.join(&file_name)).find(|path| path.is_file())
}

/// Follows directive targets of freshly registered trees
pub struct DependencyExplorer<'a> {
    pub search_dirs: &'a [PathBuf],
    pub extension: &'a str,
    /// Sources embedded by the host, consulted before the search directories
    pub libraries: &'a HashMap<String, String>,
    pub sources: &'a mut SourceMap,
    pub tables: &'a mut SymbolTables,
    /// Canonical paths of every file parsed in this session
    pub parsed: &'a mut HashSet<PathBuf>,
    /// Import targets in first-seen order
    pub imported: &'a mut Vec<String>,
}

impl DependencyExplorer<'_> {
    /// Explore the targets of `registration`, appending every new unit to `units`
    pub fn explore(
        &mut self,
        registration: &Registration,
        units: &mut Vec<Program>,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();
        self.explore_targets(registration, units, &mut diags);
        diags
    }

    fn explore_targets(
        &mut self,
        registration: &Registration,
        units: &mut Vec<Program>,
        diags: &mut Diagnostics,
    ) {
        for target in &registration.imports {
            if !self.imported.contains(&target.node) {
                self.imported.push(target.node.clone());
            }
        }
        for target in registration.imports.iter().chain(&registration.includes) {
            self.visit_target(target, units, diags);
        }
    }

    fn visit_target(
        &mut self,
        target: &Spanned<String>,
        units: &mut Vec<Program>,
        diags: &mut Diagnostics,
    ) {
        if let Some(text) = self.libraries.get(&target.node) {
            if self.parsed.insert(PathBuf::from(format!("<lib:{}>", target.node))) {
                let text = text.clone();
                self.load(format!("<{}>", target.node), text, units, diags);
            }
            return;
        }

        let Some(path) = resolve_file(&target.node, self.search_dirs, self.extension) else {
            let dirs: Vec<String> =
                self.search_dirs.iter().map(|d| d.display().to_string()).collect();
            diags.push(
                CompileError::parse(format!("cannot find '{}'", target.node), target.span)
                    .with_note(format!("searched: {}", dirs.join(", ")), None),
            );
            return;
        };
        let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !self.parsed.insert(canonical) {
            tracing::trace!(file = %path.display(), "already parsed");
            return;
        }

        match std::fs::read_to_string(&path) {
            Ok(text) => self.load(path.display().to_string(), text, units, diags),
            Err(e) => {
                let message = format!("cannot read '{}': {e}", path.display());
                diags.push(CompileError::parse(message, target.span));
            }
        }
    }

    fn load(
        &mut self,
        name: String,
        text: String,
        units: &mut Vec<Program>,
        diags: &mut Diagnostics,
    ) {
        let file = self.sources.add(name.as_str(), text.as_str());
        let program = match parse_source(&text, file) {
            Ok(program) => program,
            Err(e) => {
                diags.push(e);
                return;
            }
        };
        tracing::debug!(file = %name, statements = program.stmts.len(), "parsed dependency");

        let registration = register(&program, self.tables);
        self.explore_targets(&registration, units, diags);
        diags.extend(registration.diagnostics);
        units.push(program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        sources: SourceMap,
        tables: SymbolTables,
        parsed: HashSet<PathBuf>,
        imported: Vec<String>,
        libraries: HashMap<String, String>,
    }

    impl Fixture {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (name, text) in files {
                fs::write(dir.path().join(name), text).unwrap();
            }
            Self {
                dir,
                sources: SourceMap::new(),
                tables: SymbolTables::new(),
                parsed: HashSet::new(),
                imported: Vec::new(),
                libraries: HashMap::new(),
            }
        }

        fn explore(&mut self, root: &str) -> (Vec<String>, Diagnostics) {
            let file = self.sources.add("<input>", root);
            let program = parse_source(root, file).unwrap();
            let registration = register(&program, &mut self.tables);
            let mut units = Vec::new();
            let dirs = vec![self.dir.path().to_path_buf()];
            let mut explorer = DependencyExplorer {
                search_dirs: &dirs,
                extension: "ql",
                libraries: &self.libraries,
                sources: &mut self.sources,
                tables: &mut self.tables,
                parsed: &mut self.parsed,
                imported: &mut self.imported,
            };
            let diags = explorer.explore(&registration, &mut units);
            units.push(program);
            let names = units
                .iter()
                .map(|u| {
                    let name = &self.sources.get(u.file).unwrap().name;
                    let base = Path::new(name).file_name();
                    base.map_or(name.clone(), |n| n.to_string_lossy().into_owned())
                })
                .collect();
            (names, diags)
        }
    }

    #[test]
    fn test_resolve_file_appends_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.ql"), "").unwrap();
        let dirs = vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()];
        assert_eq!(resolve_file("lib", &dirs, "ql"), Some(dir.path().join("lib.ql")));
        assert_eq!(resolve_file("lib.ql", &dirs, "ql"), Some(dir.path().join("lib.ql")));
        assert_eq!(resolve_file("missing", &dirs, "ql"), None);
    }

    #[test]
    fn test_dependencies_come_first() {
        let mut fx =
            Fixture::new(&[("a.ql", r#"include "b"; int a = b;"#), ("b.ql", "int b = 2;")]);
        let (names, diags) = fx.explore(r#"include "a"; int main = a;"#);
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(names, vec!["b.ql", "a.ql", "<input>"]);
        assert!(fx.tables.vars.find("b").is_some());
    }

    #[test]
    fn test_sibling_includes_keep_their_order() {
        let mut fx = Fixture::new(&[
            ("base.ql", "int base = 1;"),
            ("left.ql", r#"include "base"; int left = base;"#),
            ("right.ql", "int right = 2;"),
        ]);
        let (names, diags) = fx.explore(r#"include "left"; include "right"; include "base";"#);
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(names, vec!["base.ql", "left.ql", "right.ql", "<input>"]);
    }

    #[test]
    fn test_file_is_parsed_once() {
        let mut fx =
            Fixture::new(&[("shared.ql", "int shared = 1;"), ("x.ql", r#"include "shared";"#)]);
        let (names, diags) = fx.explore(r#"include "shared"; include "x";"#);
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(names.iter().filter(|n| *n == "shared.ql").count(), 1);

        let (names, diags) = fx.explore(r#"include "shared";"#);
        assert!(diags.is_empty());
        assert_eq!(names, vec!["<input>"]);
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let mut fx = Fixture::new(&[]);
        let (_, diags) = fx.explore(r#"include "nowhere";"#);
        assert_eq!(diags.status(), Status::Parse);
    }

    #[test]
    fn test_imports_are_recorded() {
        let mut fx = Fixture::new(&[("math.ql", "import float sqrt(float x);")]);
        let (_, diags) = fx.explore(r#"import "math"; import "math";"#);
        assert!(diags.is_empty());
        assert_eq!(fx.imported, vec!["math".to_string()]);
        assert!(fx.tables.functions.contains("sqrt"));
    }

    #[test]
    fn test_errors_in_dependency_are_reported() {
        let mut fx = Fixture::new(&[("bad.ql", "int = ;")]);
        let (_, diags) = fx.explore(r#"include "bad";"#);
        assert_eq!(diags.status(), Status::Parse);
    }

    #[test]
    fn test_embedded_library_shadows_disk() {
        let mut fx = Fixture::new(&[("io.ql", "int from_disk = 1;")]);
        fx.libraries.insert("io".to_string(), "import void print(string s);".to_string());
        let (names, diags) = fx.explore(r#"import "io"; import "io";"#);
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(names, vec!["<io>", "<input>"]);
        assert!(fx.tables.functions.contains("print"));
        assert!(fx.tables.vars.find("from_disk").is_none());
    }
}
