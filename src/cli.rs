use crate::{
    AppendError, delimiter,
    pipeline::{self, AppendSession},
};
use clap::{CommandFactory, Parser};
use std::{ffi::OsString, path::PathBuf};

pub const EXIT_SUCCESS: u8 = 0;
/// Fatal error during the run, or an invalid delimiter.
pub const EXIT_ERROR: u8 = 1;
/// Missing required flags, unknown flags.
pub const EXIT_USAGE: u8 = 2;

const EXAMPLE: &str = "\
Example: Appends CSV file prc.csv to a sheet named Pf-Table
 in an excel template named PfSlicer.xltx starting at line 2
 and outputs a file named pfoutput.xlsx

\tcsv2xlsheet -i prc.csv -t PfSlicer.xltx -s Pf-Table -r 2 -o pfoutput.xlsx";

/// Appends data from CSV/TSV files onto an existing Excel (XLSX,XLTX) sheet.
/// Works with tables, pivot tables and slicers.
/// Line input errors are ignored and logged.
/// Quotation marks are removed during processing.
#[derive(Parser, Debug)]
#[command(name = "csv2xlsheet", version, after_help = EXAMPLE)]
pub struct Cli {
    /// Input Path to the source CSV/TSV file (required)
    #[arg(short = 'i', value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Path to the Excel XLSX/XLTX file (required)
    #[arg(short = 't', value_name = "FILE")]
    pub template: Option<PathBuf>,

    /// Existing sheet name to append lines (required)
    #[arg(short = 's', value_name = "NAME")]
    pub sheet: Option<String>,

    /// Output file name (required)
    #[arg(short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Delimiter of input file (options: 'csv', 'tab', or a single character)
    #[arg(short = 'd', value_name = "DELIM", default_value = "csv")]
    pub delimiter: String,

    /// Start appending sheet from this line number (values below 1 mean the first line)
    #[arg(short = 'r', value_name = "LINE", default_value_t = 1, allow_negative_numbers = true)]
    pub start_line: isize,
}

impl Cli {
    /// Checks the required flags and resolves the delimiter.
    pub fn into_session(self) -> Result<AppendSession, AppendError> {
        let non_empty = |p: Option<PathBuf>| p.filter(|p| !p.as_os_str().is_empty());
        let (Some(source), Some(template), Some(sheet), Some(output)) = (
            non_empty(self.input),
            non_empty(self.template),
            self.sheet.filter(|s| !s.is_empty()),
            non_empty(self.output),
        ) else {
            return Err(AppendError::MissingFlags);
        };
        let separator = delimiter::resolve(&self.delimiter)?;
        Ok(AppendSession {
            source,
            template,
            sheet,
            separator,
            start_line: self.start_line.max(1).unsigned_abs(),
            output,
        })
    }
}

/// Whole command line → process exit code. Help goes to stdout, errors to stderr,
/// the run summary to stdout.
pub fn run_cli<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    if args.len() <= 1 {
        print_help();
        return EXIT_SUCCESS;
    }

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            // -h / --version тоже сюда, с кодом 0
            if let Err(io) = err.print() {
                eprintln!("{io}");
            }
            return u8::try_from(err.exit_code()).unwrap_or(EXIT_USAGE);
        }
    };

    let session = match cli.into_session() {
        Ok(session) => session,
        Err(err @ AppendError::MissingFlags) => {
            print_help();
            eprintln!("\n{err}");
            return EXIT_USAGE;
        }
        Err(err) => {
            eprintln!("Error: {err}");
            return EXIT_ERROR;
        }
    };

    match pipeline::run(&session) {
        Ok(summary) => {
            print!("{summary}");
            EXIT_SUCCESS
        }
        Err(err) => {
            log::debug!("run failed: {err:?}");
            eprintln!("Error: {err:#}");
            EXIT_ERROR
        }
    }
}

fn print_help() {
    let mut cmd = Cli::command();
    if let Err(err) = cmd.print_help() {
        eprintln!("{err}");
    }
}
