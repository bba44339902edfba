//! Quill session: the embedding entry point
//!
//! A [`Session`] owns everything that persists between `run` calls: source
//! texts, symbol tables, the value stack and native bindings. Every run
//! works on clones of the tables and is committed only when all passes and
//! the evaluation succeed.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{ClassDecl, FnDecl, Program, SourceMap, Span, Stmt, Type};
use crate::error::{CompileError, Diagnostics, Status};
use crate::interp::{
    DEFAULT_MAX_ARRAY_LEN, DEFAULT_MAX_CALL_DEPTH, Interpreter, Linker, NativeFunction,
    NativeModule, RuntimeValue,
};
use crate::parser::parse_source;
use crate::resolver::DependencyExplorer;
use crate::sema::{bind, register};
use crate::symbols::SymbolTables;

/// Source file extension
pub const EXTENSION: &str = "ql";

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directories searched for `import` and `include` targets, in order
    pub search_dirs: Vec<PathBuf>,
    pub extension: String,
    pub max_call_depth: usize,
    /// Most elements one array may hold, over all of its dimensions
    pub max_array_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            search_dirs: vec![PathBuf::from(".")],
            extension: EXTENSION.to_string(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults plus `QUILL_PATH` directories, `QUILL_MAX_DEPTH` and `QUILL_MAX_ARRAY`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(paths) = std::env::var_os("QUILL_PATH") {
            let dirs = std::env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty());
            config.search_dirs.extend(dirs);
        }
        if let Some(depth) = std::env::var("QUILL_MAX_DEPTH").ok().and_then(|v| v.parse().ok()) {
            config.max_call_depth = depth;
        }
        if let Some(len) = std::env::var("QUILL_MAX_ARRAY").ok().and_then(|v| v.parse().ok()) {
            config.max_array_len = len;
        }
        config
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_array_len(mut self, len: usize) -> Self {
        self.max_array_len = len;
        self
    }
}

/// Outcome of [`Session::run`]
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: Status,
    /// Rendered errors, empty on success
    pub message: String,
    pub errors: Vec<CompileError>,
}

impl RunResult {
    fn success() -> Self {
        Self { status: Status::Success, message: String::new(), errors: Vec::new() }
    }

    fn failure(diags: Diagnostics, sources: &SourceMap) -> Self {
        let message = diags.render(sources);
        tracing::debug!(status = %diags.status(), errors = diags.len(), "run failed");
        Self { status: diags.status(), message, errors: diags.into_errors() }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Failure of [`Session::get_variable`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("variable '{0}' is not declared")]
    Undeclared(String),
    #[error("variable '{0}' has no value")]
    Uninitialized(String),
}

/// State produced by the passes of one run, not yet committed
struct Pending {
    units: Vec<Program>,
    tables: SymbolTables,
    parsed: HashSet<PathBuf>,
    imported: Vec<String>,
}

/// Persistent interpreter session
pub struct Session {
    config: SessionConfig,
    sources: SourceMap,
    tables: SymbolTables,
    /// Files parsed by committed runs
    parsed: HashSet<PathBuf>,
    /// Import targets of committed runs
    imported: Vec<String>,
    /// Committed trees, kept alive for the declarations they own
    programs: Vec<Program>,
    /// Statements supplied directly to committed runs
    exported: Vec<String>,
    interp: Interpreter,
    modules: HashMap<String, Rc<dyn NativeModule>>,
    libraries: HashMap<String, String>,
    extension: Option<Box<dyn Any>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let interp =
            Interpreter::new(config.max_call_depth).with_max_array_len(config.max_array_len);
        Self {
            config,
            sources: SourceMap::new(),
            tables: SymbolTables::new(),
            parsed: HashSet::new(),
            imported: Vec::new(),
            programs: Vec::new(),
            exported: Vec::new(),
            interp,
            modules: HashMap::new(),
            libraries: HashMap::new(),
            extension: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Every source text seen so far, for rendering errors
    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    /// Compile and execute `text`, committing its declarations on success
    #[tracing::instrument(skip_all, fields(bytes = text.len()))]
    pub fn run(&mut self, text: &str) -> RunResult {
        self.run_source("<input>", text, None)
    }

    /// Run the contents of `path`; the file counts as parsed for later includes
    pub fn run_file(&mut self, path: &Path) -> RunResult {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                let file = self.sources.add(path.display().to_string(), "");
                let message = format!("cannot read '{}': {e}", path.display());
                let error = CompileError::parse(message, Span::new(file, 0, 0));
                return RunResult::failure(error.into(), &self.sources);
            }
        };
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.run_source(&path.display().to_string(), &text, Some(canonical))
    }

    /// Run every pass on `text` without evaluating or committing anything
    pub fn check(&mut self, text: &str) -> RunResult {
        match self.compile("<input>", text, None) {
            Ok(_) => RunResult::success(),
            Err(diags) => RunResult::failure(diags, &self.sources),
        }
    }

    fn run_source(&mut self, name: &str, text: &str, canonical: Option<PathBuf>) -> RunResult {
        let pending = match self.compile(name, text, canonical) {
            Ok(pending) => pending,
            Err(diags) => return RunResult::failure(diags, &self.sources),
        };
        let Pending { units, tables, parsed, imported } = pending;
        let fallback = units.last().map(|u| Span::new(u.file, 0, 0)).unwrap_or_default();

        let fresh: Vec<String> = imported[self.imported.len()..].to_vec();
        if let Err(error) = self.load_modules(&tables, &fresh, fallback) {
            drop(units);
            drop(tables);
            self.interp.natives_mut().prune();
            return RunResult::failure(error.into(), &self.sources);
        }

        let height = self.interp.stack_height();
        match self.interp.run(&units) {
            Ok(()) => {
                if let Some(direct) = units.last() {
                    self.record_export(direct, text);
                }
                self.tables = tables;
                self.parsed = parsed;
                self.imported = imported;
                self.programs.extend(units);
                tracing::debug!(globals = self.tables.vars.globals().count(), "run committed");
                RunResult::success()
            }
            Err(e) => {
                // destructors of discarded globals run while their classes still exist
                self.interp.unwind_to(height);
                let error = e.into_compile_error(fallback);
                drop(units);
                drop(tables);
                self.interp.natives_mut().prune();
                RunResult::failure(error.into(), &self.sources)
            }
        }
    }

    /// Scan, parse, register, explore dependencies, bind and type check
    fn compile(
        &mut self,
        name: &str,
        text: &str,
        canonical: Option<PathBuf>,
    ) -> Result<Pending, Diagnostics> {
        let file = self.sources.add(name, text);
        let program = parse_source(text, file)?;

        let mut tables = self.tables.clone();
        let mut parsed = self.parsed.clone();
        let mut imported = self.imported.clone();
        if let Some(path) = canonical {
            parsed.insert(path);
        }

        let registration = register(&program, &mut tables);
        if !registration.diagnostics.is_empty() {
            return Err(registration.diagnostics);
        }

        let mut units = Vec::new();
        let mut explorer = DependencyExplorer {
            search_dirs: &self.config.search_dirs,
            extension: &self.config.extension,
            libraries: &self.libraries,
            sources: &mut self.sources,
            tables: &mut tables,
            parsed: &mut parsed,
            imported: &mut imported,
        };
        let explored = explorer.explore(&registration, &mut units);
        if !explored.is_empty() {
            return Err(explored);
        }
        units.push(program);

        let bound = bind(&units, &mut tables);
        if !bound.is_empty() {
            return Err(bound);
        }
        let checked = crate::types::check(&units);
        if !checked.is_empty() {
            return Err(checked);
        }
        tracing::debug!(units = units.len(), "passes complete");
        Ok(Pending { units, tables, parsed, imported })
    }

    fn load_modules(
        &mut self,
        tables: &SymbolTables,
        names: &[String],
        at: Span,
    ) -> Result<(), CompileError> {
        for name in names {
            let Some(module) = self.modules.get(name).cloned() else {
                tracing::warn!(
                    module = %name,
                    "no native module registered; its prototypes stay unbound"
                );
                continue;
            };
            tracing::debug!(module = %name, "loading native module");
            let mut linker =
                Linker::new(tables, self.interp.natives_mut(), self.extension.as_deref_mut());
            module
                .load(&mut linker)
                .map_err(|message| {
                    let message = format!("native module '{name}' failed to load: {message}");
                    CompileError::runtime(message, at)
                })?;
        }
        Ok(())
    }

    fn record_export(&mut self, program: &Program, text: &str) {
        for stmt in &program.stmts {
            let span = stmt.span();
            let Some(slice) = text.get(span.start..span.end) else {
                continue;
            };
            let line = match stmt {
                Stmt::Expr(_) => format!("{slice};"),
                _ => slice.to_string(),
            };
            self.exported.push(line);
        }
    }

    // ====================================================================
    // Host API
    // ====================================================================

    /// Current value of a committed global
    pub fn get_variable(&self, name: &str) -> Result<RuntimeValue, LookupError> {
        let decl = self
            .tables
            .vars
            .find_global(name)
            .ok_or_else(|| LookupError::Undeclared(name.to_string()))?;
        self.interp
            .global_value(&decl)
            .ok_or_else(|| LookupError::Uninitialized(name.to_string()))
    }

    pub fn get_class(&self, path: &[&str]) -> Option<Rc<ClassDecl>> {
        self.tables.find_class(path)
    }

    /// Function with exactly `prototype` as parameter types
    pub fn get_function(&self, path: &[&str], prototype: &[Type]) -> Option<Rc<FnDecl>> {
        self.tables.find_function(path, prototype)
    }

    /// Value of the most recent expression statement
    pub fn result(&self) -> &RuntimeValue {
        self.interp.result()
    }

    /// Write the directly supplied statements of every committed run
    pub fn export_code(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        for line in &self.exported {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    /// Attach an implementation to a native prototype
    pub fn register_native(&mut self, decl: &Rc<FnDecl>, func: impl NativeFunction + 'static) {
        self.interp.natives_mut().bind(decl, Rc::new(func));
    }

    /// Module loaded the first time a run imports `name`
    pub fn add_native_module(
        &mut self,
        name: impl Into<String>,
        module: impl NativeModule + 'static,
    ) {
        self.modules.insert(name.into(), Rc::new(module));
    }

    /// Source text served for `import`/`include` of `name` before searching the disk
    pub fn add_library(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.libraries.insert(name.into(), text.into());
    }

    /// Opaque value handed to native modules while they load
    pub fn set_extension_context<T: Any>(&mut self, context: T) {
        self.extension = Some(Box::new(context));
    }

    pub fn extension_context<T: Any>(&mut self) -> Option<&mut T> {
        self.extension.as_deref_mut()?.downcast_mut::<T>()
    }

    /// Forget every committed run, running outstanding destructors first
    pub fn reset(&mut self) {
        self.interp.clear();
        self.interp.natives_mut().clear();
        self.tables = SymbolTables::new();
        self.parsed.clear();
        self.imported.clear();
        self.programs.clear();
        self.exported.clear();
        tracing::debug!("session reset");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.interp.clear();
    }
}
