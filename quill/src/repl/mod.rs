//! REPL (Read-Eval-Print Loop) for Quill
//!
//! Every accepted input is one `Session::run`, so declarations persist
//! between lines. Input continues over several lines while braces or
//! parentheses are open.

use crate::interp::RuntimeValue;
use crate::session::{RunResult, Session};
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Result as RlResult};
use std::path::{Path, PathBuf};

const PROMPT: &str = "> ";
const CONTINUATION: &str = ". ";
const HISTORY_FILE: &str = ".quill_history";

/// REPL state
pub struct Repl {
    editor: DefaultEditor,
    session: Session,
    history_path: Option<PathBuf>,
    /// Lines of an input that is not complete yet
    pending: String,
}

impl Repl {
    /// Create a REPL around `session`
    pub fn new(session: Session) -> RlResult<Self> {
        let editor = DefaultEditor::new()?;
        let history_path = dirs_home().map(|h| h.join(HISTORY_FILE));

        let mut repl = Repl { editor, session, history_path, pending: String::new() };
        if let Some(ref path) = repl.history_path {
            let _ = repl.editor.load_history(path);
        }
        Ok(repl)
    }

    /// Run the REPL
    pub fn run(&mut self) -> RlResult<()> {
        println!("Quill {}", env!("CARGO_PKG_VERSION"));
        println!("Type :help for help, :quit to exit.\n");

        loop {
            let prompt = if self.pending.is_empty() { PROMPT } else { CONTINUATION };
            match self.editor.readline(prompt) {
                Ok(line) => {
                    if self.pending.is_empty() {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if trimmed.starts_with(':') {
                            let _ = self.editor.add_history_entry(trimmed);
                            if self.handle_command(trimmed) {
                                break;
                            }
                            continue;
                        }
                    }

                    self.pending.push_str(&line);
                    self.pending.push('\n');
                    if !is_complete(&self.pending) {
                        continue;
                    }
                    let input = std::mem::take(&mut self.pending);
                    let _ = self.editor.add_history_entry(input.trim_end());
                    self.eval_input(&input);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    self.pending.clear();
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("Goodbye!");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {err}");
                    break;
                }
            }
        }

        if let Some(ref path) = self.history_path {
            let _ = self.editor.save_history(path);
        }

        Ok(())
    }

    /// Handle REPL commands (starting with :); returns true to quit
    fn handle_command(&mut self, cmd: &str) -> bool {
        let (name, arg) = match cmd.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (cmd, ""),
        };
        match name {
            ":quit" | ":q" | ":exit" => {
                println!("Goodbye!");
                true
            }
            ":help" | ":h" | ":?" => {
                self.print_help();
                false
            }
            ":reset" => {
                self.session.reset();
                println!("Session reset.");
                false
            }
            ":export" => {
                if let Err(err) = self.session.export_code(&mut std::io::stdout().lock()) {
                    eprintln!("Error: {err}");
                }
                false
            }
            ":load" if !arg.is_empty() => {
                let result = self.session.run_file(Path::new(arg));
                self.report(&result);
                false
            }
            ":load" => {
                println!("Usage: :load <file>");
                false
            }
            _ => {
                println!("Unknown command: {cmd}");
                println!("Type :help for help.");
                false
            }
        }
    }

    fn print_help(&self) {
        println!("Quill REPL Commands:");
        println!("  :help, :h, :?   Show this help");
        println!("  :quit, :q       Exit the REPL");
        println!("  :reset          Forget every declaration");
        println!("  :export         Print the statements entered so far");
        println!("  :load <file>    Run a source file");
        println!();
        println!("You can enter:");
        println!("  - Declarations: int a = 3;  class Point {{ int x; int y; }};");
        println!("  - Functions: int twice(int n) {{ return n * 2; }}");
        println!("  - Expressions: twice(a) + 1;");
        println!("  - Console output after import \"io\": println(str(a));");
    }

    /// Run one complete input and print its result or errors
    fn eval_input(&mut self, input: &str) -> RunResult {
        let result = self.session.run(input);
        self.report(&result);
        result
    }

    fn report(&self, result: &RunResult) {
        if !result.is_success() {
            eprintln!("{}", result.message);
            return;
        }
        match self.session.result() {
            RuntimeValue::Empty => {}
            value => println!("{value}"),
        }
    }
}

/// Whether every brace and parenthesis opened in `input` is closed
fn is_complete(input: &str) -> bool {
    let mut depth: i64 = 0;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth -= 1,
            '"' => {
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    depth <= 0
}

/// Get home directory
fn dirs_home() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    #[test]
    fn test_is_complete() {
        assert!(is_complete("int a = 1;"));
        assert!(!is_complete("int f() {"));
        assert!(!is_complete("int f() {\n  if (1) {\n  }\n"));
        assert!(is_complete("int f() {\n  return 1;\n}\n"));
        assert!(!is_complete("f(1,"));
    }

    #[test]
    fn test_is_complete_ignores_strings_and_comments() {
        assert!(is_complete(r#"string s = "{";"#));
        assert!(is_complete(r#"string s = "\"{";"#));
        assert!(is_complete("int a = 1; // {\n"));
    }

    #[test]
    fn test_handle_command_quit() {
        let mut repl = Repl::new(Session::default()).unwrap();
        assert!(repl.handle_command(":quit"));
        assert!(repl.handle_command(":q"));
        assert!(repl.handle_command(":exit"));
    }

    #[test]
    fn test_handle_command_returns_false_otherwise() {
        let mut repl = Repl::new(Session::default()).unwrap();
        assert!(!repl.handle_command(":help"));
        assert!(!repl.handle_command(":export"));
        assert!(!repl.handle_command(":load"));
        assert!(!repl.handle_command(":load /nonexistent/file.ql"));
        assert!(!repl.handle_command(":anything_else"));
    }

    #[test]
    fn test_inputs_share_one_session() {
        let mut repl = Repl::new(Session::default()).unwrap();
        assert!(repl.eval_input("int a = 3;").is_success());
        assert!(repl.eval_input("a = a + 1; a;").is_success());
        assert!(matches!(repl.session.result(), RuntimeValue::Int(4)));
        assert_eq!(repl.eval_input("a(").status, Status::Parse);
    }

    #[test]
    fn test_reset_command() {
        let mut repl = Repl::new(Session::default()).unwrap();
        assert!(repl.eval_input("int a = 3;").is_success());
        assert!(!repl.handle_command(":reset"));
        assert!(repl.session.get_variable("a").is_err());
    }

    #[test]
    fn test_history_file_name() {
        let repl = Repl::new(Session::default()).unwrap();
        if let Some(path) = repl.history_path {
            assert!(path.to_string_lossy().ends_with(".quill_history"));
        }
    }
}
