use super::{substitute, Renderer};
use crate::{
    module::{Module, Stats},
    outcome::Status,
    params::{ColorConfig, Params},
    suite::Summary,
    test::Test,
    value::Value,
};
use std::{
    fmt,
    io::{self, Write as _},
};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, StandardStreamLock, WriteColor};

struct Colored<T> {
    val: T,
    spec: Option<ColorSpec>,
}

impl<T> Colored<T> {
    fn fg(mut self, color: Color) -> Self {
        self.spec
            .get_or_insert_with(ColorSpec::new)
            .set_fg(Some(color));
        self
    }

    fn bold(mut self) -> Self {
        self.spec.get_or_insert_with(ColorSpec::new).set_bold(true);
        self
    }

    fn fmt_colored<W: ?Sized>(&self, w: &mut W) -> io::Result<()>
    where
        T: fmt::Display,
        W: WriteColor,
    {
        if let Some(ref spec) = self.spec {
            w.set_color(spec)?;
        }
        write!(w, "{}", &self.val)?;
        if let Some(..) = self.spec {
            w.reset()?;
        }
        Ok(())
    }
}

fn colored<T>(val: T) -> Colored<T> {
    Colored { val, spec: None }
}

/// A renderer that prints a table of results to the standard output.
pub struct ConsoleRenderer {
    stream: StandardStream,
    only_errors: bool,
}

impl ConsoleRenderer {
    /// Create a console renderer with the given color configuration.
    pub fn new(color: ColorConfig) -> Self {
        Self {
            stream: StandardStream::stdout(match color {
                ColorConfig::Auto => ColorChoice::Auto,
                ColorConfig::Always => ColorChoice::Always,
                ColorConfig::Never => ColorChoice::Never,
            }),
            only_errors: false,
        }
    }

    /// Create a console renderer configured from command line parameters.
    pub fn from_params(params: &Params) -> Self {
        let mut renderer = Self::new(params.color);
        renderer.only_errors = params.only_errors;
        renderer
    }

    /// Print only the rows of failed tests.
    pub fn only_errors(mut self, only_errors: bool) -> Self {
        self.only_errors = only_errors;
        self
    }

    fn print_module_header(&self, w: &mut StandardStreamLock<'_>, module: &Module) -> io::Result<()> {
        writeln!(w)?;
        colored(module.name()).fg(Color::Blue).bold().fmt_colored(w)?;
        writeln!(w)?;
        writeln!(w, "{}", "-".repeat(80))?;
        Ok(())
    }

    fn print_test_row(&self, w: &mut StandardStreamLock<'_>, test: &Test) -> io::Result<()> {
        let status = match test.status() {
            Some(status) => status,
            None => return Ok(()),
        };
        if self.only_errors && status != Status::Fail {
            return Ok(());
        }

        let label = colored(status).fg(match status {
            Status::Pass => Color::Green,
            Status::Fail => Color::Red,
            Status::Skip => Color::Black,
        });
        write!(w, "[ ")?;
        label.fmt_colored(w)?;
        write!(w, " ] ")?;
        colored(test.name()).bold().fmt_colored(w)?;
        match status {
            Status::Pass => match test.run_time() {
                Some(elapsed) => writeln!(w, "  {}ms", elapsed.as_millis())?,
                None => writeln!(w)?,
            },
            Status::Fail | Status::Skip => writeln!(w, ": {}", test.status_message())?,
        }
        Ok(())
    }

    fn print_module_footer(&self, w: &mut StandardStreamLock<'_>, module: &Module) -> io::Result<()> {
        let stats = module.stats();
        let tally = colored(tally(stats)).fg(
            if stats.fails == 0 {
                Color::Green
            } else {
                Color::Red
            },
        );
        write!(w, "{:>76}", "")?;
        tally.fmt_colored(w)?;
        writeln!(w)?;
        Ok(())
    }

    fn print_summary(&self, w: &mut StandardStreamLock<'_>, summary: &Summary) -> io::Result<()> {
        let line = colored(format!(
            "{} failed, {} passed, {} skipped",
            summary.fails(),
            summary.passes(),
            summary.skips()
        ))
        .fg(if summary.fails() == 0 {
            Color::Green
        } else {
            Color::Red
        });
        writeln!(w)?;
        line.fmt_colored(w)?;
        if let Some(elapsed) = summary.run_time() {
            write!(w, " in {}ms", elapsed.as_millis())?;
        }
        writeln!(w)?;
        Ok(())
    }
}

impl fmt::Debug for ConsoleRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleRenderer")
            .field("only_errors", &self.only_errors)
            .finish()
    }
}

/// Describe a value the way it reads best in a terminal.
fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        Value::Array(items) => format!("Array (length: {})", items.len()),
        Value::Object(..) => "Object".into(),
        Value::Function(func) => match func.name() {
            Some(name) => format!("Function {}", name),
            None => "Function".into(),
        },
        value => value.to_string(),
    }
}

impl Renderer for ConsoleRenderer {
    fn before_module(&self, module: &Module, _: &Summary) {
        let mut w = self.stream.lock();
        let _ = self.print_module_header(&mut w, module);
    }

    fn after_module(&self, module: &Module, _: &Summary) {
        let mut w = self.stream.lock();
        let _ = self.print_module_footer(&mut w, module);
    }

    fn after_test(&self, test: &Test, _: &Module, _: &Summary) {
        let mut w = self.stream.lock();
        let _ = self.print_test_row(&mut w, test);
    }

    fn after_run(&self, summary: &Summary) {
        let mut w = self.stream.lock();
        let _ = self.print_summary(&mut w, summary);
    }

    /// In addition to `{N}`, `{args}` expands to the list of every argument.
    fn template_string(&self, message: &str, args: &[Value]) -> String {
        let expanded;
        let message = if message.contains("{args}") {
            let list = (0..args.len())
                .map(|i| format!("{{{}}}", i))
                .collect::<Vec<_>>()
                .join(", ");
            expanded = message.replace("{args}", &format!("[{}]", list));
            &expanded[..]
        } else {
            message
        };
        substitute(message, args, describe)
    }
}

/// Passed tests out of those that ran or were skipped.
fn tally(stats: &Stats) -> String {
    format!("{}/{}", stats.passes, stats.total())
}
