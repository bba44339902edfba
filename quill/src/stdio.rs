//! Console module used by the command-line host
//!
//! `import "io";` declares the prototypes in [`PROTOTYPES`]; the module binds
//! them to implementations writing to the host's output.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::ast::Type;
use crate::interp::{Linker, NativeArgs, NativeModule, NativeResult, RuntimeValue};
use crate::session::Session;

/// Name scripts import
pub const MODULE: &str = "io";

/// Declarations served for `import "io";`
pub const PROTOTYPES: &str = "\
import void print(string s);
import void println(string s);
import string str(int n);
import string str(float x);
import int len(string s);
";

/// Native implementations of the `io` prototypes
pub struct StdioModule<W> {
    out: Rc<RefCell<W>>,
}

impl StdioModule<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(Rc::new(RefCell::new(std::io::stdout())))
    }
}

impl<W: Write + 'static> StdioModule<W> {
    pub fn new(out: Rc<RefCell<W>>) -> Self {
        Self { out }
    }
}

impl<W: Write + 'static> NativeModule for StdioModule<W> {
    fn load(&self, linker: &mut Linker<'_>) -> Result<(), String> {
        let out = Rc::clone(&self.out);
        linker.bind_function(
            &["print"],
            &[Type::String],
            move |args: &mut NativeArgs<'_>| -> NativeResult {
                let mut out = out.borrow_mut();
                write!(out, "{}", args.string(0)?)
                    .and_then(|_| out.flush())
                    .map_err(|e| e.to_string())?;
                Ok(RuntimeValue::Empty)
            },
        )?;

        let out = Rc::clone(&self.out);
        linker.bind_function(
            &["println"],
            &[Type::String],
            move |args: &mut NativeArgs<'_>| -> NativeResult {
                writeln!(out.borrow_mut(), "{}", args.string(0)?).map_err(|e| e.to_string())?;
                Ok(RuntimeValue::Empty)
            },
        )?;

        linker.bind_function(&["str"], &[Type::Int], |args: &mut NativeArgs<'_>| -> NativeResult {
            Ok(RuntimeValue::string(args.int(0)?.to_string()))
        })?;
        linker.bind_function(&["str"], &[Type::Float], |args: &mut NativeArgs<'_>| -> NativeResult {
            Ok(RuntimeValue::string(args.float(0)?.to_string()))
        })?;
        linker.bind_function(
            &["len"],
            &[Type::String],
            |args: &mut NativeArgs<'_>| -> NativeResult {
                Ok(RuntimeValue::Int(args.string(0)?.chars().count() as i64))
            },
        )
    }
}

/// Make `import "io";` available in `session`
pub fn install<W: Write + 'static>(session: &mut Session, module: StdioModule<W>) {
    session.add_library(MODULE, PROTOTYPES);
    session.add_native_module(MODULE, module);
}
