//! Run parameters supplied from the command line.

use crate::exit_status::ExitStatus;
use getopts::Options;
use std::{error, path::Path, str::FromStr, time::Duration};

/// Parameters of a test run, usually parsed from command line arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    /// Run only the module with exactly this name.
    pub mod_filter: Option<String>,
    /// Run only the tests with exactly this name.
    pub test_filter: Option<String>,
    /// The default timeout for asynchronous tests and hooks.
    pub timeout: Option<Duration>,
    /// The color configuration of the console renderer.
    pub color: ColorConfig,
    /// Print only failed tests.
    pub only_errors: bool,
}

impl Params {
    /// Parse the command line arguments of the current process.
    pub fn from_env() -> Result<Self, ExitStatus> {
        let args: Vec<_> = std::env::args().collect();
        let parser = Parser::new(&args[..]);
        match parser.parse() {
            Ok(Some(params)) => Ok(params),
            Ok(None) => {
                parser.print_usage();
                Err(ExitStatus::OK)
            }
            Err(err) => {
                eprintln!("CLI argument error: {}", err);
                Err(ExitStatus::FAILED)
            }
        }
    }

    /// Parse a list of arguments. The first element is the program name.
    ///
    /// Returns `Ok(None)` when help was requested.
    pub fn parse(args: &[String]) -> Result<Option<Self>, Box<dyn error::Error>> {
        Parser::new(args).parse()
    }
}

/// The color configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ColorConfig {
    #[allow(missing_docs)]
    Auto,
    #[allow(missing_docs)]
    Always,
    #[allow(missing_docs)]
    Never,
}

impl Default for ColorConfig {
    fn default() -> Self {
        ColorConfig::Auto
    }
}

impl FromStr for ColorConfig {
    type Err = Box<dyn error::Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ColorConfig::Auto),
            "always" => Ok(ColorConfig::Always),
            "never" => Ok(ColorConfig::Never),
            v => Err(format!(
                "argument for --color must be auto, always, or never (was {})",
                v
            )
            .into()),
        }
    }
}

struct Parser<'a> {
    args: &'a [String],
    opts: Options,
}

impl<'a> Parser<'a> {
    fn new(args: &'a [String]) -> Self {
        let mut opts = Options::new();
        opts.optflag("h", "help", "Display this message");
        opts.optopt(
            "",
            "mod-filter",
            "Run only the module with exactly this name",
            "NAME",
        );
        opts.optopt(
            "",
            "test-filter",
            "Run only the tests with exactly this name",
            "NAME",
        );
        opts.optopt(
            "",
            "timeout",
            "Default timeout of asynchronous tests and hooks, in milliseconds",
            "MS",
        );
        opts.optopt(
            "",
            "color",
            "Configure coloring of output:
                auto   = colorize if stdout is a tty (default);
                always = always colorize output;
                never  = never colorize output;",
            "auto|always|never",
        );
        opts.optflag("", "only-errors", "Print only the failed tests");

        Self { args, opts }
    }

    fn print_usage(&self) {
        let binary = self.args.get(0).map_or("terrapin", |s| &s[..]);
        let progname = Path::new(binary)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(binary);

        let message = format!("Usage: {} [OPTIONS]", progname);
        eprintln!("{}", self.opts.usage(&message));
    }

    fn parse(&self) -> Result<Option<Params>, Box<dyn error::Error>> {
        let args = &self.args[..];

        let matches = self.opts.parse(args.get(1..).unwrap_or(args))?;
        if matches.opt_present("h") {
            return Ok(None);
        }

        let timeout = matches
            .opt_get::<u64>("timeout")?
            .map(Duration::from_millis);
        let color = matches.opt_get("color")?.unwrap_or_default();

        Ok(Some(Params {
            mod_filter: matches.opt_str("mod-filter"),
            test_filter: matches.opt_str("test-filter"),
            timeout,
            color,
            only_errors: matches.opt_present("only-errors"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("terrapin")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parse_defaults() {
        let params = Params::parse(&args(&[])).unwrap().unwrap();
        assert_eq!(params, Params::default());
    }

    #[test]
    fn parse_all_options() {
        let params = Params::parse(&args(&[
            "--mod-filter",
            "strings",
            "--test-filter=trim",
            "--timeout",
            "250",
            "--color",
            "never",
            "--only-errors",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(
            params,
            Params {
                mod_filter: Some("strings".into()),
                test_filter: Some("trim".into()),
                timeout: Some(Duration::from_millis(250)),
                color: ColorConfig::Never,
                only_errors: true,
            }
        );
    }

    #[test]
    fn parse_help() {
        assert!(Params::parse(&args(&["-h"])).unwrap().is_none());
    }

    #[test]
    fn parse_errors() {
        assert!(Params::parse(&args(&["--color", "sometimes"])).is_err());
        assert!(Params::parse(&args(&["--timeout", "soon"])).is_err());
        assert!(Params::parse(&args(&["--unknown"])).is_err());
    }
}
